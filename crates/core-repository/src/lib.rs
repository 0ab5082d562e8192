//! imsbind Core Repository: live feature records and their observers
//!
//! # Overview
//!
//! A process-wide, concurrent map from `(slot, feature type)` to the record of
//! the feature instance currently living in the remote service. Controllers
//! write to it; any number of observers read from it.
//!
//! ```text
//!  controller task                      observers
//!  ───────────────                      ─────────
//!  add_connection ──┐
//!  remove_connection┼──> [ key lock ] ──> per-subscription queue ──> executor
//!  notify_feature_state   (DashMap +         (serial drain,          (inline or
//!  update_capabilities     Mutex)             ordered per key)        tokio)
//! ```
//!
//! Late observers receive the current record immediately on registration.
//!
//! # Usage Example
//!
//! ```
//! use imsbind_core_repository::prelude::*;
//! use std::sync::Arc;
//!
//! let repo = FeatureRepository::new();
//! repo.add_connection(FeatureRecord::new(
//!     FeatureKey::new(0, FeatureType::Mmtel),
//!     SubscriptionId::new(2),
//!     RemoteHandle::new(1),
//! ));
//!
//! assert!(repo.get_if_exists(0, FeatureType::Mmtel).is_some());
//! ```

pub mod configuration;
pub mod feature;
pub mod observer;
pub mod record;
pub mod repository;

pub use configuration::FeatureConfiguration;
pub use feature::{FeatureKey, FeatureStatus, FeatureType, ImsCapabilities, SlotId, SubscriptionId};
pub use observer::{Executor, FeatureEvent, FeatureObserver, InlineExecutor, ObserverId, Task, TokioExecutor};
pub use record::{FeatureRecord, RemoteHandle, RemovalReason};
pub use repository::FeatureRepository;

/// Prelude module for convenient imports
pub mod prelude {
    pub use super::configuration::FeatureConfiguration;
    pub use super::feature::{
        FeatureKey, FeatureStatus, FeatureType, ImsCapabilities, SlotId, SubscriptionId,
    };
    pub use super::observer::{Executor, FeatureObserver, InlineExecutor, TokioExecutor};
    pub use super::record::{FeatureRecord, RemoteHandle, RemovalReason};
    pub use super::repository::FeatureRepository;
}
