//! Feature records: the repository's view of one live remote feature

use crate::feature::{FeatureKey, FeatureStatus, FeatureType, ImsCapabilities, SlotId, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference to an object living in the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteHandle(u64);

impl RemoteHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// Why a feature record disappeared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// The feature is no longer part of the desired configuration
    NoLongerDesired,

    /// The slot's subscription changed; the feature is being recreated
    SubscriptionChanged,

    /// The remote service disconnected
    ServiceDisconnected,

    /// The remote service process died
    ServiceDied,

    /// The controller was explicitly unbound
    Unbound,
}

impl RemovalReason {
    /// String representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::NoLongerDesired => "no_longer_desired",
            RemovalReason::SubscriptionChanged => "subscription_changed",
            RemovalReason::ServiceDisconnected => "service_disconnected",
            RemovalReason::ServiceDied => "service_died",
            RemovalReason::Unbound => "unbound",
        }
    }

    /// The "changed" flag passed to the remote removal entrypoint
    ///
    /// `true` means the feature will be recreated right away; everything else
    /// is a final teardown.
    pub fn is_recreate(&self) -> bool {
        matches!(self, RemovalReason::SubscriptionChanged)
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one live feature instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Slot the feature is bound to
    pub slot: SlotId,

    /// Feature type (never `EmergencyMmtel`)
    pub feature: FeatureType,

    /// Subscription the remote instance was created for
    pub subscription: SubscriptionId,

    /// Handle of the remote feature object
    pub feature_handle: RemoteHandle,

    /// Handle of the feature's configuration interface, if the service has one
    pub config_handle: Option<RemoteHandle>,

    /// Handle of the feature's registration interface, if the service has one
    pub registration_handle: Option<RemoteHandle>,

    /// Status last reported by the remote side
    pub status: FeatureStatus,

    /// Derived capability bits
    pub capabilities: ImsCapabilities,
}

impl FeatureRecord {
    /// Create a record for a freshly created remote feature
    ///
    /// New records always start out `Unavailable` until the remote side
    /// reports otherwise.
    pub fn new(key: FeatureKey, subscription: SubscriptionId, feature_handle: RemoteHandle) -> Self {
        Self {
            slot: key.slot,
            feature: key.feature,
            subscription,
            feature_handle,
            config_handle: None,
            registration_handle: None,
            status: FeatureStatus::Unavailable,
            capabilities: ImsCapabilities::empty(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ImsCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_config(mut self, handle: Option<RemoteHandle>) -> Self {
        self.config_handle = handle;
        self
    }

    pub fn with_registration(mut self, handle: Option<RemoteHandle>) -> Self {
        self.registration_handle = handle;
        self
    }

    pub fn key(&self) -> FeatureKey {
        FeatureKey::new(self.slot, self.feature)
    }
}
