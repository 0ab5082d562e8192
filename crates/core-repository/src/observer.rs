//! Observer plumbing: callbacks, executors and per-subscription event queues
//!
//! Every registered observer owns a [`Subscription`]. The repository pushes
//! events into the subscription's queue while it holds the key lock, then asks
//! the subscription to drain *after* the lock is released. Draining runs on the
//! observer's [`Executor`] and is serial: at most one drain loop per
//! subscription is active at any time, so events for a key reach an observer in
//! exactly the order they were produced.

use crate::feature::{FeatureStatus, ImsCapabilities, SubscriptionId};
use crate::record::{FeatureRecord, RemovalReason};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Receives lifecycle events of one feature key
pub trait FeatureObserver: Send + Sync {
    /// A record for the key exists (new, or replayed on registration)
    fn feature_created(&self, record: &FeatureRecord);

    /// The record was removed
    fn feature_removed(&self, reason: RemovalReason);

    /// The remote side reported a new status
    fn status_changed(&self, status: FeatureStatus, subscription: SubscriptionId);

    /// The derived capability bits changed
    fn capabilities_updated(&self, capabilities: ImsCapabilities);
}

/// Unit of work handed to an [`Executor`]
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Where observer callbacks run
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Runs observer callbacks on the thread that produced the event
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Runs observer callbacks as tasks on a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor bound to the runtime of the caller, if there is one
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }
}

/// Identity of a registration, returned by the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) u64);

impl ObserverId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// One queued notification
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureEvent {
    Created(FeatureRecord),
    Removed(RemovalReason),
    StatusChanged {
        status: FeatureStatus,
        subscription: SubscriptionId,
    },
    CapabilitiesUpdated(ImsCapabilities),
}

impl FeatureEvent {
    fn dispatch(self, observer: &dyn FeatureObserver) {
        match self {
            FeatureEvent::Created(record) => observer.feature_created(&record),
            FeatureEvent::Removed(reason) => observer.feature_removed(reason),
            FeatureEvent::StatusChanged {
                status,
                subscription,
            } => observer.status_changed(status, subscription),
            FeatureEvent::CapabilitiesUpdated(caps) => observer.capabilities_updated(caps),
        }
    }
}

/// An observer registration together with its pending events
pub(crate) struct Subscription {
    id: ObserverId,
    observer: Arc<dyn FeatureObserver>,
    executor: Arc<dyn Executor>,
    queue: Mutex<VecDeque<FeatureEvent>>,
    draining: AtomicBool,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        id: ObserverId,
        observer: Arc<dyn FeatureObserver>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            id,
            observer,
            executor,
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn id(&self) -> ObserverId {
        self.id
    }

    /// Queue an event; must be called while the key lock is held
    pub(crate) fn enqueue(&self, event: FeatureEvent) {
        self.queue.lock().push_back(event);
    }

    /// Stop delivering, including events that are already queued
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.queue.lock().clear();
    }

    /// Start a drain loop on the executor unless one is already running
    pub(crate) fn schedule_drain(self: &Arc<Self>) {
        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        self.executor.execute(Box::new(move || this.drain()));
    }

    fn drain(&self) {
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(event) => {
                    if self.active.load(Ordering::Acquire) {
                        event.dispatch(self.observer.as_ref());
                    }
                }
                None => {
                    self.draining.store(false, Ordering::Release);
                    // A producer may have queued after our pop but before the
                    // flag was cleared; it then saw `draining` set and left.
                    if self.queue.lock().is_empty() || self.draining.swap(true, Ordering::AcqRel) {
                        return;
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pending", &self.queue.lock().len())
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{FeatureKey, FeatureType};
    use crate::record::RemoteHandle;

    #[derive(Default)]
    struct Log {
        events: Mutex<Vec<String>>,
    }

    impl FeatureObserver for Log {
        fn feature_created(&self, record: &FeatureRecord) {
            self.events.lock().push(format!("created:{}", record.key()));
        }
        fn feature_removed(&self, reason: RemovalReason) {
            self.events.lock().push(format!("removed:{}", reason));
        }
        fn status_changed(&self, status: FeatureStatus, _subscription: SubscriptionId) {
            self.events.lock().push(format!("status:{}", status));
        }
        fn capabilities_updated(&self, capabilities: ImsCapabilities) {
            self.events.lock().push(format!("caps:{}", capabilities.bits()));
        }
    }

    fn subscription(log: Arc<Log>) -> Arc<Subscription> {
        Arc::new(Subscription::new(ObserverId(1), log, Arc::new(InlineExecutor)))
    }

    #[test]
    fn test_drain_preserves_order() {
        let log = Arc::new(Log::default());
        let sub = subscription(log.clone());
        let record = FeatureRecord::new(
            FeatureKey::new(0, FeatureType::Mmtel),
            SubscriptionId::new(2),
            RemoteHandle::new(1),
        );

        sub.enqueue(FeatureEvent::Created(record));
        sub.enqueue(FeatureEvent::StatusChanged {
            status: FeatureStatus::Ready,
            subscription: SubscriptionId::new(2),
        });
        sub.enqueue(FeatureEvent::Removed(RemovalReason::Unbound));
        sub.schedule_drain();

        assert_eq!(
            *log.events.lock(),
            vec!["created:mmtel@slot0", "status:ready", "removed:unbound"]
        );
    }

    #[test]
    fn test_deactivated_subscription_drops_events() {
        let log = Arc::new(Log::default());
        let sub = subscription(log.clone());

        sub.enqueue(FeatureEvent::CapabilitiesUpdated(ImsCapabilities::all()));
        sub.deactivate();
        sub.enqueue(FeatureEvent::Removed(RemovalReason::Unbound));
        sub.schedule_drain();

        assert!(log.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_tokio_executor_runs_task() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let executor = TokioExecutor::try_current().unwrap();
        executor.execute(Box::new(move || {
            let _ = tx.send(42);
        }));
        assert_eq!(rx.await.unwrap(), 42);
    }
}
