//! In-memory binder, service and callbacks
//!
//! Used by the tests and by the command-line simulation. Everything records
//! what it was asked to do and can be told to fail.

use crate::binding::{BindFlags, ComponentName, ServiceBinder, ServiceConnection};
use crate::callbacks::ControllerCallbacks;
use crate::error::RemoteError;
use crate::remote::{FeatureStatusCallback, RemoteImsService};
use imsbind_core_repository::{
    FeatureKey, FeatureStatus, FeatureType, ImsCapabilities, RemoteHandle, SlotId, SubscriptionId,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Binder that records connect/disconnect requests
///
/// Connections are not answered unless a service is set with
/// [`auto_connect`](Self::auto_connect); tests usually drive the returned
/// [`ServiceConnection`] by hand.
#[derive(Default)]
pub struct MockServiceBinder {
    state: Mutex<BinderState>,
}

#[derive(Default)]
struct BinderState {
    connections: Vec<ServiceConnection>,
    flags: Vec<BindFlags>,
    disconnected: Vec<u64>,
    refuse: bool,
    auto_connect: Option<Arc<dyn RemoteImsService>>,
}

impl MockServiceBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or accept again) every following connect request
    pub fn refuse_connects(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Answer every accepted connect with `service`
    pub fn auto_connect(&self, service: Option<Arc<dyn RemoteImsService>>) {
        self.state.lock().auto_connect = service;
    }

    /// Number of connect requests, accepted or not
    pub fn connect_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnected.len()
    }

    /// Connection ids passed to `disconnect`, in order
    pub fn disconnected(&self) -> Vec<u64> {
        self.state.lock().disconnected.clone()
    }

    pub fn last_connection(&self) -> Option<ServiceConnection> {
        self.state.lock().connections.last().cloned()
    }

    pub fn last_flags(&self) -> Option<BindFlags> {
        self.state.lock().flags.last().copied()
    }
}

impl ServiceBinder for MockServiceBinder {
    fn connect(&self, _target: &ComponentName, flags: BindFlags, connection: ServiceConnection) -> bool {
        let auto = {
            let mut state = self.state.lock();
            state.connections.push(connection.clone());
            state.flags.push(flags);
            if state.refuse {
                return false;
            }
            state.auto_connect.clone()
        };

        if let Some(service) = auto {
            connection.on_service_connected(service);
        }
        true
    }

    fn disconnect(&self, connection: &ServiceConnection) {
        self.state.lock().disconnected.push(connection.id());
    }
}

/// One call received by [`MockImsService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    CreateMmtel { slot: SlotId, subscription: SubscriptionId },
    CreateRcs { slot: SlotId, subscription: SubscriptionId },
    CreateEmergencyOnlyMmtel { slot: SlotId },
    Remove { slot: SlotId, feature: FeatureType, changed: bool },
    AddStatusCallback { slot: SlotId, feature: FeatureType },
    RemoveStatusCallback { slot: SlotId, feature: FeatureType },
    GetCapabilities,
    GetConfig { slot: SlotId, subscription: SubscriptionId },
    GetRegistration { slot: SlotId, subscription: SubscriptionId },
    NotifyReady,
}

#[derive(Default)]
struct ServiceState {
    calls: Vec<RemoteCall>,
    next_handle: u64,
    capabilities: ImsCapabilities,
    failing: BTreeSet<FeatureType>,
    returning_none: BTreeSet<FeatureType>,
    fail_status_callbacks: bool,
    fail_removals: bool,
    dead: bool,
    handles: BTreeMap<FeatureKey, RemoteHandle>,
    callbacks: BTreeMap<FeatureKey, Arc<FeatureStatusCallback>>,
}

/// Remote service that hands out sequential handles and records every call
#[derive(Default)]
pub struct MockImsService {
    state: Mutex<ServiceState>,
}

impl MockImsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(self, capabilities: ImsCapabilities) -> Self {
        self.state.lock().capabilities = capabilities;
        self
    }

    pub fn set_capabilities(&self, capabilities: ImsCapabilities) {
        self.state.lock().capabilities = capabilities;
    }

    /// Make creation of `feature` fail with a remote error
    pub fn fail_creation(&self, feature: FeatureType, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing.insert(feature);
        } else {
            state.failing.remove(&feature);
        }
    }

    /// Make creation of `feature` answer without a feature object
    pub fn return_no_feature(&self, feature: FeatureType, none: bool) {
        let mut state = self.state.lock();
        if none {
            state.returning_none.insert(feature);
        } else {
            state.returning_none.remove(&feature);
        }
    }

    pub fn fail_status_callbacks(&self, fail: bool) {
        self.state.lock().fail_status_callbacks = fail;
    }

    pub fn fail_removals(&self, fail: bool) {
        self.state.lock().fail_removals = fail;
    }

    /// Every call fails with `DeadObject` (calls are still recorded)
    pub fn set_dead(&self, dead: bool) {
        self.state.lock().dead = dead;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// How many times `call` was received
    pub fn count(&self, call: &RemoteCall) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Number of feature creations of any kind
    pub fn creation_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    RemoteCall::CreateMmtel { .. }
                        | RemoteCall::CreateRcs { .. }
                        | RemoteCall::CreateEmergencyOnlyMmtel { .. }
                )
            })
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Handle of the most recent feature object created for the key
    pub fn handle_of(&self, slot: SlotId, feature: FeatureType) -> Option<RemoteHandle> {
        self.state.lock().handles.get(&FeatureKey::new(slot, feature)).copied()
    }

    /// Status callback currently registered for the key
    pub fn status_callback(&self, slot: SlotId, feature: FeatureType) -> Option<Arc<FeatureStatusCallback>> {
        self.state.lock().callbacks.get(&FeatureKey::new(slot, feature)).cloned()
    }

    /// Report a status through the registered callback; `false` if there is none
    pub fn report_status(&self, slot: SlotId, feature: FeatureType, status: FeatureStatus) -> bool {
        match self.status_callback(slot, feature) {
            Some(callback) => {
                callback.notify_status(status);
                true
            }
            None => false,
        }
    }

    fn record(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.dead {
            return Err(RemoteError::DeadObject);
        }
        Ok(())
    }

    fn create(&self, key: FeatureKey, call: RemoteCall, name: &'static str) -> Result<Option<RemoteHandle>, RemoteError> {
        self.record(call)?;

        let mut state = self.state.lock();
        if state.failing.contains(&key.feature) {
            return Err(RemoteError::call_failed(name, "creation rejected"));
        }
        if state.returning_none.contains(&key.feature) {
            return Ok(None);
        }

        state.next_handle += 1;
        let handle = RemoteHandle::new(state.next_handle);
        state.handles.insert(key, handle);
        Ok(Some(handle))
    }

    fn interface(&self, call: RemoteCall) -> Result<Option<RemoteHandle>, RemoteError> {
        self.record(call)?;

        let mut state = self.state.lock();
        state.next_handle += 1;
        Ok(Some(RemoteHandle::new(state.next_handle)))
    }
}

impl RemoteImsService for MockImsService {
    fn create_mmtel_feature(
        &self,
        slot: SlotId,
        subscription: SubscriptionId,
    ) -> Result<Option<RemoteHandle>, RemoteError> {
        self.create(
            FeatureKey::new(slot, FeatureType::Mmtel),
            RemoteCall::CreateMmtel { slot, subscription },
            "create_mmtel_feature",
        )
    }

    fn create_rcs_feature(
        &self,
        slot: SlotId,
        subscription: SubscriptionId,
    ) -> Result<Option<RemoteHandle>, RemoteError> {
        self.create(
            FeatureKey::new(slot, FeatureType::Rcs),
            RemoteCall::CreateRcs { slot, subscription },
            "create_rcs_feature",
        )
    }

    fn create_emergency_only_mmtel_feature(&self, slot: SlotId) -> Result<Option<RemoteHandle>, RemoteError> {
        self.create(
            FeatureKey::new(slot, FeatureType::Mmtel),
            RemoteCall::CreateEmergencyOnlyMmtel { slot },
            "create_emergency_only_mmtel_feature",
        )
    }

    fn remove_ims_feature(&self, slot: SlotId, feature: FeatureType, changed: bool) -> Result<(), RemoteError> {
        self.record(RemoteCall::Remove {
            slot,
            feature,
            changed,
        })?;

        let mut state = self.state.lock();
        if state.fail_removals {
            return Err(RemoteError::call_failed("remove_ims_feature", "removal rejected"));
        }
        state.handles.remove(&FeatureKey::new(slot, feature));
        Ok(())
    }

    fn add_feature_status_callback(
        &self,
        slot: SlotId,
        feature: FeatureType,
        callback: Arc<FeatureStatusCallback>,
    ) -> Result<(), RemoteError> {
        self.record(RemoteCall::AddStatusCallback { slot, feature })?;

        let mut state = self.state.lock();
        if state.fail_status_callbacks {
            return Err(RemoteError::call_failed("add_feature_status_callback", "callback rejected"));
        }
        state.callbacks.insert(FeatureKey::new(slot, feature), callback);
        Ok(())
    }

    fn remove_feature_status_callback(
        &self,
        slot: SlotId,
        feature: FeatureType,
        callback: &Arc<FeatureStatusCallback>,
    ) -> Result<(), RemoteError> {
        self.record(RemoteCall::RemoveStatusCallback { slot, feature })?;

        let mut state = self.state.lock();
        let key = FeatureKey::new(slot, feature);
        if state.callbacks.get(&key).map(|c| c.id()) == Some(callback.id()) {
            state.callbacks.remove(&key);
        }
        Ok(())
    }

    fn get_ims_service_capabilities(&self) -> Result<ImsCapabilities, RemoteError> {
        self.record(RemoteCall::GetCapabilities)?;
        Ok(self.state.lock().capabilities)
    }

    fn get_config(&self, slot: SlotId, subscription: SubscriptionId) -> Result<Option<RemoteHandle>, RemoteError> {
        self.interface(RemoteCall::GetConfig { slot, subscription })
    }

    fn get_registration(
        &self,
        slot: SlotId,
        subscription: SubscriptionId,
    ) -> Result<Option<RemoteHandle>, RemoteError> {
        self.interface(RemoteCall::GetRegistration { slot, subscription })
    }

    fn notify_ims_service_ready(&self) -> Result<(), RemoteError> {
        self.record(RemoteCall::NotifyReady)
    }
}

/// One notification received by [`RecordingCallbacks`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    FeatureCreated { slot: SlotId, feature: FeatureType, controller: ComponentName },
    FeatureRemoved { slot: SlotId, feature: FeatureType, controller: ComponentName },
    BindPermanentError(ComponentName),
}

/// Callbacks that remember every notification
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    events: Mutex<Vec<ControllerEvent>>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ControllerEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// How many `feature_created` calls named the key
    pub fn created(&self, slot: SlotId, feature: FeatureType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ControllerEvent::FeatureCreated { slot: s, feature: f, .. } if *s == slot && *f == feature))
            .count()
    }

    /// How many `feature_removed` calls named the key
    pub fn removed(&self, slot: SlotId, feature: FeatureType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ControllerEvent::FeatureRemoved { slot: s, feature: f, .. } if *s == slot && *f == feature))
            .count()
    }

    pub fn permanent_errors(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ControllerEvent::BindPermanentError(_)))
            .count()
    }
}

impl ControllerCallbacks for RecordingCallbacks {
    fn feature_created(&self, slot: SlotId, feature: FeatureType, controller: &ComponentName) {
        self.events.lock().push(ControllerEvent::FeatureCreated {
            slot,
            feature,
            controller: controller.clone(),
        });
    }

    fn feature_removed(&self, slot: SlotId, feature: FeatureType, controller: &ComponentName) {
        self.events.lock().push(ControllerEvent::FeatureRemoved {
            slot,
            feature,
            controller: controller.clone(),
        });
    }

    fn bind_permanent_error(&self, controller: &ComponentName) {
        self.events
            .lock()
            .push(ControllerEvent::BindPermanentError(controller.clone()));
    }
}
