//! Interface of the remote IMS service and the status callbacks registered with it

use crate::error::RemoteError;
use imsbind_core_repository::{
    FeatureKey, FeatureRepository, FeatureStatus, FeatureType, ImsCapabilities, RemoteHandle,
    SlotId, SubscriptionId,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Calls the controller makes into a connected service
///
/// Creation calls return `Ok(None)` when the service answered without a
/// feature object.
pub trait RemoteImsService: Send + Sync {
    fn create_mmtel_feature(
        &self,
        slot: SlotId,
        subscription: SubscriptionId,
    ) -> Result<Option<RemoteHandle>, RemoteError>;

    fn create_rcs_feature(
        &self,
        slot: SlotId,
        subscription: SubscriptionId,
    ) -> Result<Option<RemoteHandle>, RemoteError>;

    /// MMTEL instance limited to emergency calls, for slots without a subscription
    fn create_emergency_only_mmtel_feature(
        &self,
        slot: SlotId,
    ) -> Result<Option<RemoteHandle>, RemoteError>;

    /// `changed` is `true` when the feature is about to be recreated
    fn remove_ims_feature(
        &self,
        slot: SlotId,
        feature: FeatureType,
        changed: bool,
    ) -> Result<(), RemoteError>;

    fn add_feature_status_callback(
        &self,
        slot: SlotId,
        feature: FeatureType,
        callback: Arc<FeatureStatusCallback>,
    ) -> Result<(), RemoteError>;

    fn remove_feature_status_callback(
        &self,
        slot: SlotId,
        feature: FeatureType,
        callback: &Arc<FeatureStatusCallback>,
    ) -> Result<(), RemoteError>;

    fn get_ims_service_capabilities(&self) -> Result<ImsCapabilities, RemoteError>;

    fn get_config(
        &self,
        slot: SlotId,
        subscription: SubscriptionId,
    ) -> Result<Option<RemoteHandle>, RemoteError>;

    fn get_registration(
        &self,
        slot: SlotId,
        subscription: SubscriptionId,
    ) -> Result<Option<RemoteHandle>, RemoteError>;

    fn notify_ims_service_ready(&self) -> Result<(), RemoteError>;
}

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
enum Delivery {
    /// Record not inserted yet; keep the latest early report
    Held(Option<FeatureStatus>),
    Forwarding,
}

/// Status sink handed to the remote side for one feature instance
///
/// Reports are forwarded to the repository tagged with the feature handle, so a
/// report from an instance that has since been replaced is ignored. Services
/// may report while the callback is being registered, before the record
/// exists; such reports are held until [`attach`](Self::attach).
pub struct FeatureStatusCallback {
    id: u64,
    key: FeatureKey,
    handle: RemoteHandle,
    repository: Arc<FeatureRepository>,
    delivery: Mutex<Delivery>,
}

impl FeatureStatusCallback {
    pub fn new(key: FeatureKey, handle: RemoteHandle, repository: Arc<FeatureRepository>) -> Self {
        Self {
            id: NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed),
            key,
            handle,
            repository,
            delivery: Mutex::new(Delivery::Held(None)),
        }
    }

    /// Start forwarding; replays a report held since registration
    pub fn attach(&self) {
        let mut delivery = self.delivery.lock();
        if let Delivery::Held(Some(status)) = *delivery {
            self.forward(status);
        }
        *delivery = Delivery::Forwarding;
    }

    fn forward(&self, status: FeatureStatus) {
        let applied = self.repository.notify_feature_state(
            self.key.slot,
            self.key.feature,
            self.handle,
            status,
        );
        debug!(key = %self.key, %status, applied, "Feature status reported");
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> FeatureKey {
        self.key
    }

    /// Called by the remote side when the feature's status changes
    pub fn notify_status(&self, status: FeatureStatus) {
        let mut delivery = self.delivery.lock();
        match &mut *delivery {
            Delivery::Held(held) => *held = Some(status),
            Delivery::Forwarding => self.forward(status),
        }
    }
}

impl fmt::Debug for FeatureStatusCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureStatusCallback")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("handle", &self.handle)
            .finish()
    }
}
