//! Notifications from a controller to whoever orchestrates controllers

use crate::binding::ComponentName;
use imsbind_core_repository::{FeatureType, SlotId};

/// Receives feature and binding outcomes of a controller
///
/// Calls are made on the controller's task; implementations must not block.
pub trait ControllerCallbacks: Send + Sync {
    fn feature_created(&self, slot: SlotId, feature: FeatureType, controller: &ComponentName);

    fn feature_removed(&self, slot: SlotId, feature: FeatureType, controller: &ComponentName);

    /// The service cannot be bound; no automatic retry will follow
    fn bind_permanent_error(&self, controller: &ComponentName);
}

/// Callbacks that ignore everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl ControllerCallbacks for NoopCallbacks {
    fn feature_created(&self, _slot: SlotId, _feature: FeatureType, _controller: &ComponentName) {}

    fn feature_removed(&self, _slot: SlotId, _feature: FeatureType, _controller: &ComponentName) {}

    fn bind_permanent_error(&self, _controller: &ComponentName) {}
}
