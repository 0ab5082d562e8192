//! Binding to the remote service: target names, bind flags and connection events

use crate::controller::{Command, ConnectionEvent};
use crate::remote::RemoteImsService;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Fully qualified name of the remote service component
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
}

impl ComponentName {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }

    /// `package/class` form, used in logs and reports
    pub fn flatten(&self) -> String {
        format!("{}/{}", self.package, self.class)
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

bitflags! {
    /// Flags passed along with a connect request
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindFlags: u32 {
        /// Start the service if it is not running
        const AUTO_CREATE = 0x0000_0001;

        /// The connection matters to the caller
        const IMPORTANT = 0x0000_0040;

        /// Treat the service like a foreground service
        const FOREGROUND_SERVICE = 0x0400_0000;
    }
}

impl BindFlags {
    /// Flags every controller connects with
    pub const SERVICE: BindFlags = BindFlags::AUTO_CREATE
        .union(BindFlags::FOREGROUND_SERVICE)
        .union(BindFlags::IMPORTANT);
}

/// Transport that establishes and releases connections to a component
///
/// `connect` returns whether the request was accepted; the outcome arrives
/// later through the [`ServiceConnection`] it was given.
pub trait ServiceBinder: Send + Sync {
    fn connect(&self, target: &ComponentName, flags: BindFlags, connection: ServiceConnection) -> bool;

    fn disconnect(&self, connection: &ServiceConnection);
}

/// Event sink for one connection attempt
///
/// Cheap to clone. Holding one does not keep the controller alive. Events sent
/// after the controller released this attempt are dropped by the controller.
#[derive(Clone)]
pub struct ServiceConnection {
    id: u64,
    target: ComponentName,
    events: mpsc::WeakUnboundedSender<Command>,
}

impl ServiceConnection {
    pub(crate) fn new(id: u64, target: ComponentName, events: mpsc::WeakUnboundedSender<Command>) -> Self {
        Self { id, target, events }
    }

    /// Identifier of the connection attempt, unique per controller
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> &ComponentName {
        &self.target
    }

    fn post(&self, event: ConnectionEvent) {
        let name = event.as_str();
        let delivered = self
            .events
            .upgrade()
            .map(|tx| tx.send(Command::Connection { id: self.id, event }).is_ok())
            .unwrap_or(false);
        if !delivered {
            trace!(target_component = %self.target, event = name, "Controller gone, connection event dropped");
        }
    }

    pub fn on_service_connected(&self, service: Arc<dyn RemoteImsService>) {
        self.post(ConnectionEvent::Connected(service));
    }

    pub fn on_service_disconnected(&self) {
        self.post(ConnectionEvent::Disconnected);
    }

    pub fn on_binding_died(&self) {
        self.post(ConnectionEvent::BindingDied);
    }

    pub fn on_null_binding(&self) {
        self.post(ConnectionEvent::NullBinding);
    }
}

impl PartialEq for ServiceConnection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.target == other.target
    }
}

impl fmt::Debug for ServiceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConnection")
            .field("id", &self.id)
            .field("target", &self.target)
            .finish()
    }
}
