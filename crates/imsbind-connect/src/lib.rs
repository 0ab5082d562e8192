//! imsbind Connect: controller for a remote IMS service
//!
//! This crate keeps one remote IMS service bound and keeps the features it
//! hosts in line with a desired configuration.
//!
//! # Architecture
//!
//! - **ImsServiceController**: connection lifecycle (bind, unbind, crash
//!   handling, rebind with exponential backoff) running on its own task
//! - **Reconciler**: diffs the committed feature set against the desired one
//!   and drives creation/removal on the remote service
//! - **capabilities**: derives per-feature capability bits
//! - **mock**: in-memory binder, service and callbacks for tests and simulation
//!
//! Feature records land in a shared
//! [`FeatureRepository`](imsbind_core_repository::FeatureRepository).
//!
//! # Example
//!
//! ```rust,no_run
//! use imsbind_connect::mock::{MockImsService, MockServiceBinder, RecordingCallbacks};
//! use imsbind_connect::{ComponentName, ImsServiceController};
//! use imsbind_core_repository::{FeatureConfiguration, FeatureRepository, FeatureType};
//! use imsbind_core_resilience::RebindPolicy;
//! use std::sync::Arc;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let binder = Arc::new(MockServiceBinder::new());
//!     binder.auto_connect(Some(Arc::new(MockImsService::new())));
//!
//!     let controller = ImsServiceController::spawn(
//!         ComponentName::new("com.example.ims", "ImsService"),
//!         RebindPolicy::default(),
//!         binder,
//!         Arc::new(FeatureRepository::new()),
//!         Arc::new(RecordingCallbacks::new()),
//!     );
//!
//!     let desired = FeatureConfiguration::new()
//!         .with_feature(0, FeatureType::Mmtel)
//!         .with_subscription(0, 2);
//!     controller.bind(desired).await?;
//!     controller.wait_idle().await?;
//!     Ok(())
//! }
//! ```

pub mod binding;
pub mod callbacks;
pub mod capabilities;
pub mod controller;
pub mod error;
pub mod mock;
pub mod reconciler;
pub mod remote;

pub use binding::{BindFlags, ComponentName, ServiceBinder, ServiceConnection};
pub use callbacks::{ControllerCallbacks, NoopCallbacks};
pub use controller::{ConnectionState, ControllerSnapshot, ImsServiceController};
pub use error::{ConnectError, RemoteError};
pub use reconciler::{plan, ReconcileOutcome, ReconcilePlan, Reconciler};
pub use remote::{FeatureStatusCallback, RemoteImsService};
