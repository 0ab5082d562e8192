//! Connection lifecycle of one remote IMS service
//!
//! An [`ImsServiceController`] is a cheap handle to a task that owns all
//! controller state. External calls, connection events and rebind timer
//! firings are all commands on a single unbounded queue, so they are handled
//! strictly one at a time.
//!
//! ```text
//!                 bind()                       connected
//!   Unbound ───────────────> Connecting ──────────────────> Connected
//!      ▲                       │   ▲                          │
//!      │ unbind()              │   │ rebind timer             │ disconnected /
//!      │ (from any state)      │   └──────────────────────────┘ binding died
//!      │                       │ null binding
//!      │                       ▼
//!      └─── bind() ─────── PermanentError
//! ```

use crate::binding::{BindFlags, ComponentName, ServiceBinder, ServiceConnection};
use crate::callbacks::ControllerCallbacks;
use crate::error::ConnectError;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::remote::RemoteImsService;
use imsbind_core_repository::{FeatureConfiguration, FeatureRepository, ImsCapabilities, RemovalReason};
use imsbind_core_resilience::{ExponentialBackoff, RebindPolicy, RetryTimer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

/// Connection state of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection requested
    #[default]
    Unbound,

    /// Waiting for the service, or for the next rebind attempt
    Connecting,

    /// Service connected, features reconciled
    Connected,

    /// The service refused to provide an interface; only `bind()` leaves this state
    PermanentError,
}

impl ConnectionState {
    /// String representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unbound => "unbound",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::PermanentError => "permanent_error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub component: ComponentName,
    pub state: ConnectionState,

    /// Configuration to apply on the next connect (or applied, while connected)
    pub pending: FeatureConfiguration,

    /// What is currently instantiated
    pub committed: FeatureConfiguration,

    /// Delay the next rebind would wait
    pub rebind_delay: Duration,
    pub rebind_pending: bool,

    /// Identifier of the held connection attempt, if any
    pub connection_id: Option<u64>,

    /// Capabilities advertised by the connected service
    pub advertised: ImsCapabilities,
}

pub(crate) enum ConnectionEvent {
    Connected(Arc<dyn RemoteImsService>),
    Disconnected,
    BindingDied,
    NullBinding,
}

impl ConnectionEvent {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ConnectionEvent::Connected(_) => "connected",
            ConnectionEvent::Disconnected => "disconnected",
            ConnectionEvent::BindingDied => "binding_died",
            ConnectionEvent::NullBinding => "null_binding",
        }
    }
}

pub(crate) enum Command {
    Bind {
        desired: FeatureConfiguration,
        reply: oneshot::Sender<bool>,
    },
    Unbind {
        reply: oneshot::Sender<()>,
    },
    ChangeFeatureSet {
        desired: FeatureConfiguration,
        reply: oneshot::Sender<()>,
    },
    Connection {
        id: u64,
        event: ConnectionEvent,
    },
    RebindTimer {
        token: u64,
    },
    Snapshot {
        reply: oneshot::Sender<ControllerSnapshot>,
    },
    WaitIdle {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running controller
///
/// Clones share the same controller. The controller unbinds and its task ends
/// once every handle has been dropped.
#[derive(Clone)]
pub struct ImsServiceController {
    component: ComponentName,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ImsServiceController {
    /// Start a controller for `component` on the current tokio runtime
    pub fn spawn(
        component: ComponentName,
        policy: RebindPolicy,
        binder: Arc<dyn ServiceBinder>,
        repository: Arc<FeatureRepository>,
        callbacks: Arc<dyn ControllerCallbacks>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Unbound);

        let task = ControllerTask {
            component: component.clone(),
            binder,
            reconciler: Reconciler::new(component.clone(), repository, Arc::clone(&callbacks)),
            callbacks,
            backoff: ExponentialBackoff::new(policy),
            timer: RetryTimer::new(),
            timer_token: 0,
            rebind_pending: false,
            connection: None,
            next_connection_id: 0,
            service: None,
            pending: FeatureConfiguration::new(),
            state: state_tx,
            commands: commands.downgrade(),
        };

        info!(component = %component, "Starting IMS service controller");
        tokio::spawn(task.run(rx));

        Self {
            component,
            commands,
            state: state_rx,
        }
    }

    pub fn component(&self) -> &ComponentName {
        &self.component
    }

    /// Current state, without waiting for queued commands
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ConnectError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| ConnectError::ControllerClosed(self.component.to_string()))?;
        rx.await
            .map_err(|_| ConnectError::ControllerClosed(self.component.to_string()))
    }

    /// Connect to the service and instantiate `desired` once connected
    ///
    /// Returns `false` if a connection is already established or in progress,
    /// or if the binder refused the request.
    pub async fn bind(&self, desired: FeatureConfiguration) -> Result<bool, ConnectError> {
        self.request(|reply| Command::Bind { desired, reply }).await
    }

    /// Tear everything down and release the connection
    pub async fn unbind(&self) -> Result<(), ConnectError> {
        self.request(|reply| Command::Unbind { reply }).await
    }

    /// Replace the desired configuration
    ///
    /// Reconciled right away while connected; otherwise kept for the next
    /// connect.
    pub async fn change_feature_set(&self, desired: FeatureConfiguration) -> Result<(), ConnectError> {
        self.request(|reply| Command::ChangeFeatureSet { desired, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<ControllerSnapshot, ConnectError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Delay the next rebind attempt would wait
    pub async fn rebind_delay(&self) -> Result<Duration, ConnectError> {
        Ok(self.snapshot().await?.rebind_delay)
    }

    /// Resolves once everything queued before this call has been handled
    pub async fn wait_idle(&self) -> Result<(), ConnectError> {
        self.request(|reply| Command::WaitIdle { reply }).await
    }
}

impl fmt::Debug for ImsServiceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImsServiceController")
            .field("component", &self.component)
            .field("state", &self.state())
            .finish()
    }
}

struct ControllerTask {
    component: ComponentName,
    binder: Arc<dyn ServiceBinder>,
    reconciler: Reconciler,
    callbacks: Arc<dyn ControllerCallbacks>,
    backoff: ExponentialBackoff,
    timer: RetryTimer,
    timer_token: u64,
    rebind_pending: bool,
    connection: Option<ServiceConnection>,
    next_connection_id: u64,
    service: Option<Arc<dyn RemoteImsService>>,
    pending: FeatureConfiguration,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl ControllerTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }

        debug!(component = %self.component, "Controller handles dropped, shutting down");
        self.unbind();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Bind { desired, reply } => {
                let _ = reply.send(self.bind(desired));
            }
            Command::Unbind { reply } => {
                self.unbind();
                let _ = reply.send(());
            }
            Command::ChangeFeatureSet { desired, reply } => {
                self.change_feature_set(desired);
                let _ = reply.send(());
            }
            Command::Connection { id, event } => self.on_connection_event(id, event),
            Command::RebindTimer { token } => self.on_rebind_timer(token),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::WaitIdle { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(component = %self.component, from = %previous, to = %state, "Connection state changed");
        }
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            component: self.component.clone(),
            state: self.current_state(),
            pending: self.pending.clone(),
            committed: self.reconciler.committed().clone(),
            rebind_delay: self.backoff.current_delay(),
            rebind_pending: self.rebind_pending,
            connection_id: self.connection.as_ref().map(ServiceConnection::id),
            advertised: self.reconciler.advertised(),
        }
    }

    fn bind(&mut self, desired: FeatureConfiguration) -> bool {
        match self.current_state() {
            ConnectionState::Connected => {
                warn!(component = %self.component, "Bind requested while already connected");
                return false;
            }
            ConnectionState::Connecting if !self.rebind_pending => {
                warn!(component = %self.component, "Bind requested while a connection is in progress");
                return false;
            }
            _ => {}
        }

        if self.rebind_pending {
            debug!(component = %self.component, "Bind replaces the pending rebind");
            self.cancel_rebind();
            self.release_connection();
        }

        self.pending = desired;
        if self.start_connect() {
            true
        } else {
            warn!(component = %self.component, "Binder refused the connection");
            self.set_state(ConnectionState::Unbound);
            false
        }
    }

    fn unbind(&mut self) {
        self.cancel_rebind();
        self.backoff.reset();

        if let Some(service) = self.service.take() {
            self.reconciler.teardown(service.as_ref(), RemovalReason::Unbound);
        }
        self.release_connection();
        self.set_state(ConnectionState::Unbound);
    }

    fn change_feature_set(&mut self, desired: FeatureConfiguration) {
        self.pending = desired;

        match (&self.service, self.current_state()) {
            (Some(service), ConnectionState::Connected) => {
                let service = Arc::clone(service);
                let outcome = self.reconciler.apply(service.as_ref(), &self.pending);
                self.log_outcome(&outcome);
            }
            (_, state) => {
                debug!(component = %self.component, %state, "Not connected, feature set stored for the next connect");
            }
        }
    }

    fn on_connection_event(&mut self, id: u64, event: ConnectionEvent) {
        let current = self.connection.as_ref().map(ServiceConnection::id);
        if current != Some(id) {
            debug!(
                component = %self.component,
                connection = id,
                event = event.as_str(),
                "Event from a released connection ignored"
            );
            return;
        }

        match event {
            ConnectionEvent::Connected(service) => self.on_connected(service),
            ConnectionEvent::Disconnected => self.on_disconnected(),
            ConnectionEvent::BindingDied => self.on_binding_died(),
            ConnectionEvent::NullBinding => self.on_null_binding(),
        }
    }

    fn on_connected(&mut self, service: Arc<dyn RemoteImsService>) {
        self.cancel_rebind();
        if let Some(previous) = self.service.take() {
            self.reconciler.teardown(previous.as_ref(), RemovalReason::ServiceDisconnected);
        }

        self.backoff.reset();
        self.service = Some(Arc::clone(&service));
        self.set_state(ConnectionState::Connected);

        if let Err(e) = service.notify_ims_service_ready() {
            warn!(component = %self.component, "notify_ims_service_ready failed: {}", e);
        }

        let advertised = service.get_ims_service_capabilities().unwrap_or_else(|e| {
            warn!(component = %self.component, "Reading service capabilities failed: {}", e);
            ImsCapabilities::empty()
        });
        self.reconciler.set_advertised(advertised);

        let outcome = self.reconciler.apply(service.as_ref(), &self.pending);
        self.log_outcome(&outcome);
    }

    fn on_disconnected(&mut self) {
        warn!(component = %self.component, "Service disconnected");
        if let Some(service) = self.service.take() {
            self.reconciler.teardown(service.as_ref(), RemovalReason::ServiceDisconnected);
        }

        self.set_state(ConnectionState::Connecting);
        self.schedule_rebind();
    }

    fn on_binding_died(&mut self) {
        warn!(component = %self.component, "Service binding died");
        if let Some(service) = self.service.take() {
            self.reconciler.teardown(service.as_ref(), RemovalReason::ServiceDied);
        }

        self.release_connection();
        self.set_state(ConnectionState::Connecting);
        self.schedule_rebind();
    }

    fn on_null_binding(&mut self) {
        if self.current_state() == ConnectionState::Connected {
            warn!(component = %self.component, "Null binding while connected ignored");
            return;
        }

        error!(component = %self.component, "Service returned a null binding, giving up");
        self.cancel_rebind();
        self.release_connection();
        self.set_state(ConnectionState::PermanentError);
        self.callbacks.bind_permanent_error(&self.component);
    }

    fn on_rebind_timer(&mut self, token: u64) {
        if token != self.timer_token || !self.rebind_pending {
            trace!(component = %self.component, token, "Stale rebind timer ignored");
            return;
        }

        self.rebind_pending = false;
        self.timer.clear();
        self.release_connection();

        info!(component = %self.component, "Rebinding to service");
        if !self.start_connect() {
            warn!(component = %self.component, "Binder refused the rebind");
            self.schedule_rebind();
        }
    }

    /// Issue a connect request with a fresh connection; `false` if refused
    fn start_connect(&mut self) -> bool {
        self.next_connection_id += 1;
        let connection = ServiceConnection::new(
            self.next_connection_id,
            self.component.clone(),
            self.commands.clone(),
        );

        self.set_state(ConnectionState::Connecting);
        // Stored before connecting so events the binder posts right away match
        self.connection = Some(connection.clone());

        if self.binder.connect(&self.component, BindFlags::SERVICE, connection) {
            debug!(component = %self.component, connection = self.next_connection_id, "Connect requested");
            true
        } else {
            self.connection = None;
            false
        }
    }

    fn release_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            debug!(component = %self.component, connection = connection.id(), "Releasing connection");
            self.binder.disconnect(&connection);
        }
    }

    fn schedule_rebind(&mut self) {
        let delay = self.backoff.notify_failed();
        self.timer_token += 1;
        self.rebind_pending = true;

        let token = self.timer_token;
        let commands = self.commands.clone();
        self.timer.schedule(delay, move || {
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::RebindTimer { token });
            }
        });

        info!(
            component = %self.component,
            ?delay,
            retries = self.backoff.retries(),
            "Rebind scheduled"
        );
    }

    fn cancel_rebind(&mut self) {
        if self.rebind_pending {
            debug!(component = %self.component, "Cancelling pending rebind");
        }
        self.timer.cancel();
        self.rebind_pending = false;
        self.timer_token += 1;
    }

    fn log_outcome(&self, outcome: &ReconcileOutcome) {
        if outcome.is_noop() {
            return;
        }
        info!(
            component = %self.component,
            created = outcome.created.len(),
            removed = outcome.removed.len(),
            failed = outcome.failed.len(),
            capability_updates = outcome.capability_updates,
            "Feature set reconciled"
        );
    }
}
