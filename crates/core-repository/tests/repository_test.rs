//! Integration tests for the feature repository

use imsbind_core_repository::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Created(FeatureStatus, u64),
    Removed(RemovalReason),
    Status(FeatureStatus, SubscriptionId),
    Caps(ImsCapabilities),
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Seen>>,
}

impl Recorder {
    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

impl FeatureObserver for Recorder {
    fn feature_created(&self, record: &FeatureRecord) {
        self.seen
            .lock()
            .push(Seen::Created(record.status, record.feature_handle.id()));
    }

    fn feature_removed(&self, reason: RemovalReason) {
        self.seen.lock().push(Seen::Removed(reason));
    }

    fn status_changed(&self, status: FeatureStatus, subscription: SubscriptionId) {
        self.seen.lock().push(Seen::Status(status, subscription));
    }

    fn capabilities_updated(&self, capabilities: ImsCapabilities) {
        self.seen.lock().push(Seen::Caps(capabilities));
    }
}

fn record(slot: SlotId, feature: FeatureType, handle: u64) -> FeatureRecord {
    FeatureRecord::new(
        FeatureKey::new(slot, feature),
        SubscriptionId::new(2),
        RemoteHandle::new(handle),
    )
}

#[test]
fn test_late_registration_replays_current_record() {
    let repo = FeatureRepository::new();
    repo.add_connection(record(0, FeatureType::Mmtel, 10));
    repo.notify_feature_state(0, FeatureType::Mmtel, RemoteHandle::new(10), FeatureStatus::Ready);

    let late = Arc::new(Recorder::default());
    repo.register_for_connection_updates(0, FeatureType::Mmtel, late.clone(), Arc::new(InlineExecutor));

    // The replayed record already carries the latest status
    assert_eq!(late.seen(), vec![Seen::Created(FeatureStatus::Ready, 10)]);
}

#[test]
fn test_registration_without_record_replays_nothing() {
    let repo = FeatureRepository::new();
    let observer = Arc::new(Recorder::default());
    repo.register_for_connection_updates(1, FeatureType::Rcs, observer.clone(), Arc::new(InlineExecutor));

    assert!(observer.seen().is_empty());
}

#[test]
fn test_full_lifecycle_is_delivered_in_order() {
    let repo = FeatureRepository::new();
    let observer = Arc::new(Recorder::default());
    repo.register_for_connection_updates(0, FeatureType::Mmtel, observer.clone(), Arc::new(InlineExecutor));

    repo.add_connection(record(0, FeatureType::Mmtel, 1));
    repo.notify_feature_state(0, FeatureType::Mmtel, RemoteHandle::new(1), FeatureStatus::Initializing);
    repo.notify_feature_state(0, FeatureType::Mmtel, RemoteHandle::new(1), FeatureStatus::Ready);
    repo.update_capabilities(0, FeatureType::Mmtel, ImsCapabilities::EMERGENCY_OVER_MMTEL);
    repo.remove_connection(0, FeatureType::Mmtel, RemovalReason::ServiceDied);

    assert_eq!(
        observer.seen(),
        vec![
            Seen::Created(FeatureStatus::Unavailable, 1),
            Seen::Status(FeatureStatus::Initializing, SubscriptionId::new(2)),
            Seen::Status(FeatureStatus::Ready, SubscriptionId::new(2)),
            Seen::Caps(ImsCapabilities::EMERGENCY_OVER_MMTEL),
            Seen::Removed(RemovalReason::ServiceDied),
        ]
    );
}

#[test]
fn test_observers_only_see_their_key() {
    let repo = FeatureRepository::new();
    let mmtel = Arc::new(Recorder::default());
    let rcs = Arc::new(Recorder::default());
    repo.register_for_connection_updates(0, FeatureType::Mmtel, mmtel.clone(), Arc::new(InlineExecutor));
    repo.register_for_connection_updates(0, FeatureType::Rcs, rcs.clone(), Arc::new(InlineExecutor));

    repo.add_connection(record(0, FeatureType::Rcs, 5));

    assert!(mmtel.seen().is_empty());
    assert_eq!(rcs.seen(), vec![Seen::Created(FeatureStatus::Unavailable, 5)]);
}

#[test]
fn test_status_from_replaced_feature_is_dropped() {
    let repo = FeatureRepository::new();
    let observer = Arc::new(Recorder::default());
    repo.register_for_connection_updates(0, FeatureType::Mmtel, observer.clone(), Arc::new(InlineExecutor));

    repo.add_connection(record(0, FeatureType::Mmtel, 1));
    repo.remove_connection(0, FeatureType::Mmtel, RemovalReason::SubscriptionChanged);
    repo.add_connection(record(0, FeatureType::Mmtel, 2));

    assert!(!repo.notify_feature_state(0, FeatureType::Mmtel, RemoteHandle::new(1), FeatureStatus::Ready));
    assert_eq!(
        observer.seen(),
        vec![
            Seen::Created(FeatureStatus::Unavailable, 1),
            Seen::Removed(RemovalReason::SubscriptionChanged),
            Seen::Created(FeatureStatus::Unavailable, 2),
        ]
    );
}

#[tokio::test]
async fn test_tokio_executor_preserves_order() {
    let repo = FeatureRepository::new();
    let observer = Arc::new(Recorder::default());
    let executor = Arc::new(TokioExecutor::try_current().unwrap());
    repo.register_for_connection_updates(0, FeatureType::Mmtel, observer.clone(), executor);

    let mut expected = Vec::new();
    for handle in 0..50u64 {
        repo.add_connection(record(0, FeatureType::Mmtel, handle));
        repo.remove_connection(0, FeatureType::Mmtel, RemovalReason::NoLongerDesired);
        expected.push(Seen::Created(FeatureStatus::Unavailable, handle));
        expected.push(Seen::Removed(RemovalReason::NoLongerDesired));
    }

    for _ in 0..100 {
        if observer.seen().len() == expected.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(observer.seen(), expected);
}

#[test]
fn test_concurrent_writers_on_distinct_keys() {
    let repo = Arc::new(FeatureRepository::new());

    let handles: Vec<_> = (0..8u32)
        .map(|slot| {
            let repo = Arc::clone(&repo);
            std::thread::spawn(move || {
                for handle in 0..100u64 {
                    repo.add_connection(record(slot, FeatureType::Mmtel, handle));
                    repo.notify_feature_state(
                        slot,
                        FeatureType::Mmtel,
                        RemoteHandle::new(handle),
                        FeatureStatus::Ready,
                    );
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let records = repo.records();
    assert_eq!(records.len(), 8);
    for record in records {
        assert_eq!(record.feature_handle, RemoteHandle::new(99));
        assert_eq!(record.status, FeatureStatus::Ready);
    }
}
