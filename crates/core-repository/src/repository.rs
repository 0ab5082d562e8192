//! Concurrent feature repository
//!
//! Maps a [`FeatureKey`] to the record of the live remote feature, if any, and
//! to the observers registered for that key. Each key has its own
//! `parking_lot` mutex inside a `DashMap`; the map shard lock is never held
//! while a key lock is taken, and no lock is held while observers run.

use crate::feature::{FeatureKey, FeatureStatus, FeatureType, ImsCapabilities, SlotId};
use crate::observer::{Executor, FeatureEvent, FeatureObserver, ObserverId, Subscription};
use crate::record::{FeatureRecord, RemoteHandle, RemovalReason};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct KeyEntry {
    record: Option<FeatureRecord>,
    observers: Vec<Arc<Subscription>>,
}

impl KeyEntry {
    /// Queue an event for every observer and hand back who needs a drain
    fn publish(&self, event: FeatureEvent) -> Vec<Arc<Subscription>> {
        for sub in &self.observers {
            sub.enqueue(event.clone());
        }
        self.observers.clone()
    }
}

/// Process-wide store of live feature records
#[derive(Debug, Default)]
pub struct FeatureRepository {
    entries: DashMap<FeatureKey, Arc<Mutex<KeyEntry>>>,
    next_observer: AtomicU64,
}

impl FeatureRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: FeatureKey) -> Arc<Mutex<KeyEntry>> {
        Arc::clone(self.entries.entry(key).or_default().value())
    }

    fn existing(&self, key: &FeatureKey) -> Option<Arc<Mutex<KeyEntry>>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn drain(pending: Vec<Arc<Subscription>>) {
        for sub in pending {
            sub.schedule_drain();
        }
    }

    /// Snapshot of the record for `(slot, feature)`, if one exists
    pub fn get_if_exists(&self, slot: SlotId, feature: FeatureType) -> Option<FeatureRecord> {
        let entry = self.existing(&FeatureKey::new(slot, feature))?;
        let guard = entry.lock();
        guard.record.clone()
    }

    /// Snapshot of all records, ordered by key
    pub fn records(&self) -> Vec<FeatureRecord> {
        let entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut records: Vec<FeatureRecord> = entries
            .iter()
            .filter_map(|entry| entry.lock().record.clone())
            .collect();
        records.sort_by_key(FeatureRecord::key);
        records
    }

    /// Number of observers registered for `(slot, feature)`
    pub fn observer_count(&self, slot: SlotId, feature: FeatureType) -> usize {
        self.existing(&FeatureKey::new(slot, feature))
            .map(|entry| entry.lock().observers.len())
            .unwrap_or(0)
    }

    /// Observe `(slot, feature)`
    ///
    /// If a record exists it is delivered right away as `feature_created`,
    /// followed by every later event for the key. Snapshot and subscription
    /// happen under the same lock, so nothing is missed or duplicated.
    pub fn register_for_connection_updates(
        &self,
        slot: SlotId,
        feature: FeatureType,
        observer: Arc<dyn FeatureObserver>,
        executor: Arc<dyn Executor>,
    ) -> ObserverId {
        let key = FeatureKey::new(slot, feature);
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        let sub = Arc::new(Subscription::new(id, observer, executor));

        let entry = self.entry(key);
        let replay = {
            let mut guard = entry.lock();
            let replay = match &guard.record {
                Some(record) => {
                    sub.enqueue(FeatureEvent::Created(record.clone()));
                    true
                }
                None => false,
            };
            guard.observers.push(Arc::clone(&sub));
            replay
        };

        debug!(%key, observer = %id, replay, "Registered feature observer");
        if replay {
            sub.schedule_drain();
        }
        id
    }

    /// Stop delivering events to `id`. Returns `false` if it was not registered.
    pub fn unregister_for_connection_updates(
        &self,
        slot: SlotId,
        feature: FeatureType,
        id: ObserverId,
    ) -> bool {
        let key = FeatureKey::new(slot, feature);
        let Some(entry) = self.existing(&key) else {
            return false;
        };

        let removed = {
            let mut guard = entry.lock();
            let position = guard.observers.iter().position(|sub| sub.id() == id);
            position.map(|index| guard.observers.remove(index))
        };

        match removed {
            Some(sub) => {
                sub.deactivate();
                debug!(%key, observer = %id, "Unregistered feature observer");
                true
            }
            None => false,
        }
    }

    /// Insert (or replace) the record for its key and announce it
    pub fn add_connection(&self, record: FeatureRecord) {
        let key = record.key();
        let entry = self.entry(key);
        let pending = {
            let mut guard = entry.lock();
            let pending = guard.publish(FeatureEvent::Created(record.clone()));
            guard.record = Some(record);
            pending
        };

        debug!(%key, observers = pending.len(), "Feature record added");
        Self::drain(pending);
    }

    /// Remove the record for `(slot, feature)` and announce why
    ///
    /// Returns the removed record; `None` (and no event) if there was none.
    pub fn remove_connection(
        &self,
        slot: SlotId,
        feature: FeatureType,
        reason: RemovalReason,
    ) -> Option<FeatureRecord> {
        let key = FeatureKey::new(slot, feature);
        let entry = self.existing(&key)?;
        let (removed, pending) = {
            let mut guard = entry.lock();
            let removed = guard.record.take()?;
            (removed, guard.publish(FeatureEvent::Removed(reason)))
        };

        debug!(%key, %reason, observers = pending.len(), "Feature record removed");
        Self::drain(pending);
        Some(removed)
    }

    /// Apply a status reported by the remote feature identified by `handle`
    ///
    /// Ignored (returns `false`) when the key has no record, when the record
    /// belongs to another remote feature, or when the status did not change.
    pub fn notify_feature_state(
        &self,
        slot: SlotId,
        feature: FeatureType,
        handle: RemoteHandle,
        status: FeatureStatus,
    ) -> bool {
        let key = FeatureKey::new(slot, feature);
        let Some(entry) = self.existing(&key) else {
            return false;
        };

        let pending = {
            let mut guard = entry.lock();
            let Some(record) = guard.record.as_mut() else {
                return false;
            };
            if record.feature_handle != handle {
                trace!(%key, %handle, "Status from stale feature ignored");
                return false;
            }
            if record.status == status {
                return false;
            }
            record.status = status;
            let subscription = record.subscription;
            guard.publish(FeatureEvent::StatusChanged {
                status,
                subscription,
            })
        };

        debug!(%key, %status, "Feature status changed");
        Self::drain(pending);
        true
    }

    /// Store new capability bits; announces only an actual change
    pub fn update_capabilities(
        &self,
        slot: SlotId,
        feature: FeatureType,
        capabilities: ImsCapabilities,
    ) -> bool {
        let key = FeatureKey::new(slot, feature);
        let Some(entry) = self.existing(&key) else {
            return false;
        };

        let pending = {
            let mut guard = entry.lock();
            let Some(record) = guard.record.as_mut() else {
                return false;
            };
            if record.capabilities == capabilities {
                return false;
            }
            record.capabilities = capabilities;
            guard.publish(FeatureEvent::CapabilitiesUpdated(capabilities))
        };

        debug!(%key, capabilities = capabilities.bits(), "Feature capabilities updated");
        Self::drain(pending);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::SubscriptionId;
    use crate::observer::InlineExecutor;

    #[derive(Default)]
    struct Counter {
        created: Mutex<Vec<FeatureRecord>>,
        removed: Mutex<Vec<RemovalReason>>,
        statuses: Mutex<Vec<FeatureStatus>>,
        caps: Mutex<Vec<ImsCapabilities>>,
    }

    impl FeatureObserver for Counter {
        fn feature_created(&self, record: &FeatureRecord) {
            self.created.lock().push(record.clone());
        }
        fn feature_removed(&self, reason: RemovalReason) {
            self.removed.lock().push(reason);
        }
        fn status_changed(&self, status: FeatureStatus, _subscription: SubscriptionId) {
            self.statuses.lock().push(status);
        }
        fn capabilities_updated(&self, capabilities: ImsCapabilities) {
            self.caps.lock().push(capabilities);
        }
    }

    fn mmtel(handle: u64) -> FeatureRecord {
        FeatureRecord::new(
            FeatureKey::new(0, FeatureType::Mmtel),
            SubscriptionId::new(2),
            RemoteHandle::new(handle),
        )
    }

    #[test]
    fn test_get_if_exists() {
        let repo = FeatureRepository::new();
        assert!(repo.get_if_exists(0, FeatureType::Mmtel).is_none());

        repo.add_connection(mmtel(1));
        let record = repo.get_if_exists(0, FeatureType::Mmtel).unwrap();
        assert_eq!(record.feature_handle, RemoteHandle::new(1));
        assert!(repo.get_if_exists(0, FeatureType::Rcs).is_none());
    }

    #[test]
    fn test_remove_without_record_is_silent() {
        let repo = FeatureRepository::new();
        let counter = Arc::new(Counter::default());
        repo.register_for_connection_updates(0, FeatureType::Mmtel, counter.clone(), Arc::new(InlineExecutor));

        assert!(repo
            .remove_connection(0, FeatureType::Mmtel, RemovalReason::Unbound)
            .is_none());
        assert!(counter.removed.lock().is_empty());
    }

    #[test]
    fn test_stale_handle_status_ignored() {
        let repo = FeatureRepository::new();
        repo.add_connection(mmtel(1));

        assert!(!repo.notify_feature_state(0, FeatureType::Mmtel, RemoteHandle::new(9), FeatureStatus::Ready));
        assert_eq!(
            repo.get_if_exists(0, FeatureType::Mmtel).unwrap().status,
            FeatureStatus::Unavailable
        );

        assert!(repo.notify_feature_state(0, FeatureType::Mmtel, RemoteHandle::new(1), FeatureStatus::Ready));
        assert!(!repo.notify_feature_state(0, FeatureType::Mmtel, RemoteHandle::new(1), FeatureStatus::Ready));
    }

    #[test]
    fn test_capabilities_only_announced_on_change() {
        let repo = FeatureRepository::new();
        let counter = Arc::new(Counter::default());
        repo.register_for_connection_updates(0, FeatureType::Mmtel, counter.clone(), Arc::new(InlineExecutor));
        repo.add_connection(mmtel(1));

        assert!(!repo.update_capabilities(0, FeatureType::Mmtel, ImsCapabilities::empty()));
        assert!(repo.update_capabilities(0, FeatureType::Mmtel, ImsCapabilities::EMERGENCY_OVER_MMTEL));
        assert!(!repo.update_capabilities(0, FeatureType::Mmtel, ImsCapabilities::EMERGENCY_OVER_MMTEL));

        assert_eq!(*counter.caps.lock(), vec![ImsCapabilities::EMERGENCY_OVER_MMTEL]);
    }

    #[test]
    fn test_records_sorted() {
        let repo = FeatureRepository::new();
        repo.add_connection(FeatureRecord::new(
            FeatureKey::new(1, FeatureType::Mmtel),
            SubscriptionId::new(3),
            RemoteHandle::new(3),
        ));
        repo.add_connection(FeatureRecord::new(
            FeatureKey::new(0, FeatureType::Rcs),
            SubscriptionId::new(2),
            RemoteHandle::new(2),
        ));
        repo.add_connection(mmtel(1));

        let keys: Vec<_> = repo.records().iter().map(FeatureRecord::key).collect();
        assert_eq!(
            keys,
            vec![
                FeatureKey::new(0, FeatureType::Mmtel),
                FeatureKey::new(0, FeatureType::Rcs),
                FeatureKey::new(1, FeatureType::Mmtel),
            ]
        );
    }

    #[test]
    fn test_unregister() {
        let repo = FeatureRepository::new();
        let counter = Arc::new(Counter::default());
        let id = repo.register_for_connection_updates(0, FeatureType::Mmtel, counter.clone(), Arc::new(InlineExecutor));
        assert_eq!(repo.observer_count(0, FeatureType::Mmtel), 1);

        assert!(repo.unregister_for_connection_updates(0, FeatureType::Mmtel, id));
        assert!(!repo.unregister_for_connection_updates(0, FeatureType::Mmtel, id));
        assert_eq!(repo.observer_count(0, FeatureType::Mmtel), 0);

        repo.add_connection(mmtel(1));
        assert!(counter.created.lock().is_empty());
    }
}
