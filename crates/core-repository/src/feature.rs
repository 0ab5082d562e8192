//! Feature identity: slots, subscriptions, feature types and capability bits

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a physical/logical communication slot
pub type SlotId = u32;

/// Identity of the subscription active on a slot
///
/// Negative values denote "no active subscription".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(i32);

impl SubscriptionId {
    /// Sentinel for a slot without an active subscription
    pub const INVALID: SubscriptionId = SubscriptionId(-1);

    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl From<i32> for SubscriptionId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("invalid")
        }
    }
}

/// Logical capability surfaces exposed by the remote service
///
/// `EmergencyMmtel` is a modifier of an MMTEL instance on the same slot; it
/// is never instantiated on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    /// Emergency calling over MMTEL
    EmergencyMmtel,

    /// Multimedia telephony
    Mmtel,

    /// Rich communication services
    Rcs,
}

impl FeatureType {
    pub const ALL: [FeatureType; 3] = [
        FeatureType::EmergencyMmtel,
        FeatureType::Mmtel,
        FeatureType::Rcs,
    ];

    /// String representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::EmergencyMmtel => "emergency_mmtel",
            FeatureType::Mmtel => "mmtel",
            FeatureType::Rcs => "rcs",
        }
    }

    /// Numeric code used on the remote interface
    pub fn code(&self) -> i32 {
        match self {
            FeatureType::EmergencyMmtel => 0,
            FeatureType::Mmtel => 1,
            FeatureType::Rcs => 2,
        }
    }

    /// Whether the remote service creates a standalone object for this type
    pub fn is_instantiable(&self) -> bool {
        !matches!(self, FeatureType::EmergencyMmtel)
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identity of a feature instance: one per slot and type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureKey {
    pub slot: SlotId,
    pub feature: FeatureType,
}

impl FeatureKey {
    pub const fn new(slot: SlotId, feature: FeatureType) -> Self {
        Self { slot, feature }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@slot{}", self.feature, self.slot)
    }
}

/// Readiness reported by the remote feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    /// Created but not usable yet
    #[default]
    Unavailable,

    /// Remote side is setting the feature up
    Initializing,

    /// Feature is ready for use
    Ready,

    /// Remote side reported something we do not understand
    Unknown,
}

impl FeatureStatus {
    /// String representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureStatus::Unavailable => "unavailable",
            FeatureStatus::Initializing => "initializing",
            FeatureStatus::Ready => "ready",
            FeatureStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Capability bits, both advertised by the service and derived per feature
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ImsCapabilities: u64 {
        /// Emergency calls may be placed over this MMTEL feature
        const EMERGENCY_OVER_MMTEL = 1 << 0;

        /// SIP delegates may be created for this slot
        const SIP_DELEGATE_CREATION = 1 << 1;
    }
}
