//! Feature-set reconciliation
//!
//! Turns the difference between what a controller has instantiated (the
//! committed configuration) and what is now desired into remote calls,
//! repository updates and notifications.
//!
//! Remote feature objects are bound to the subscription they were created
//! for, so a key whose slot changed subscription is removed and recreated even
//! though it is in both sets.
//!
//! `EmergencyMmtel` never becomes a remote object of its own. It only changes
//! how MMTEL on the same slot is created (emergency-only when the slot has no
//! subscription) and which capabilities that MMTEL record carries.

use crate::binding::ComponentName;
use crate::callbacks::ControllerCallbacks;
use crate::capabilities;
use crate::error::RemoteError;
use crate::remote::{FeatureStatusCallback, RemoteImsService};
use imsbind_core_repository::{
    FeatureConfiguration, FeatureKey, FeatureRecord, FeatureRepository, FeatureType,
    ImsCapabilities, RemoteHandle, RemovalReason, SlotId, SubscriptionId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ordered operations needed to move from one configuration to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Keys to remove, each with the reason reported to observers
    pub removals: Vec<(FeatureKey, RemovalReason)>,

    /// Keys to create; instantiable features come before emergency modifiers
    pub additions: Vec<FeatureKey>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.removals.len() + self.additions.len()
    }
}

/// Diff `committed` against `desired`
pub fn plan(committed: &FeatureConfiguration, desired: &FeatureConfiguration) -> ReconcilePlan {
    let mut removals = Vec::new();
    let mut additions = Vec::new();

    for key in committed.features() {
        if !desired.contains_key(key) {
            removals.push((*key, RemovalReason::NoLongerDesired));
        } else if committed.subscription(key.slot) != desired.subscription(key.slot) {
            removals.push((*key, RemovalReason::SubscriptionChanged));
            additions.push(*key);
        } else if key.feature == FeatureType::EmergencyMmtel
            && !desired.contains(key.slot, FeatureType::Mmtel)
        {
            // The modifier goes with its MMTEL; re-adding it only succeeds
            // once MMTEL is desired again
            removals.push((*key, RemovalReason::NoLongerDesired));
            additions.push(*key);
        }
    }

    for key in desired.features() {
        if !committed.contains_key(key) {
            additions.push(*key);
        }
    }

    // MMTEL has to exist before its emergency modifier can attach to it
    additions.sort_by_key(|key| (!key.feature.is_instantiable(), *key));

    ReconcilePlan {
        removals,
        additions,
    }
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub removed: Vec<FeatureKey>,
    pub created: Vec<FeatureKey>,

    /// Keys that could not be created; left out of the committed set
    pub failed: Vec<FeatureKey>,

    /// Records whose capability bits changed
    pub capability_updates: usize,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.created.is_empty() && self.failed.is_empty()
    }
}

type CreateFn =
    fn(&dyn RemoteImsService, SlotId, SubscriptionId) -> Result<Option<RemoteHandle>, RemoteError>;

fn create_mmtel(
    service: &dyn RemoteImsService,
    slot: SlotId,
    subscription: SubscriptionId,
) -> Result<Option<RemoteHandle>, RemoteError> {
    service.create_mmtel_feature(slot, subscription)
}

fn create_emergency_only_mmtel(
    service: &dyn RemoteImsService,
    slot: SlotId,
    _subscription: SubscriptionId,
) -> Result<Option<RemoteHandle>, RemoteError> {
    service.create_emergency_only_mmtel_feature(slot)
}

fn create_rcs(
    service: &dyn RemoteImsService,
    slot: SlotId,
    subscription: SubscriptionId,
) -> Result<Option<RemoteHandle>, RemoteError> {
    service.create_rcs_feature(slot, subscription)
}

/// Creation entrypoint per feature type; `None` for modifiers
fn creation_entrypoint(feature: FeatureType, emergency_only: bool) -> Option<(&'static str, CreateFn)> {
    match (feature, emergency_only) {
        (FeatureType::Mmtel, false) => Some(("create_mmtel_feature", create_mmtel as CreateFn)),
        (FeatureType::Mmtel, true) => Some((
            "create_emergency_only_mmtel_feature",
            create_emergency_only_mmtel as CreateFn,
        )),
        (FeatureType::Rcs, _) => Some(("create_rcs_feature", create_rcs as CreateFn)),
        (FeatureType::EmergencyMmtel, _) => None,
    }
}

/// Per-controller reconciliation state
pub struct Reconciler {
    component: ComponentName,
    repository: Arc<FeatureRepository>,
    callbacks: Arc<dyn ControllerCallbacks>,
    committed: FeatureConfiguration,
    status_callbacks: BTreeMap<FeatureKey, Arc<FeatureStatusCallback>>,
    advertised: ImsCapabilities,
}

impl Reconciler {
    pub fn new(
        component: ComponentName,
        repository: Arc<FeatureRepository>,
        callbacks: Arc<dyn ControllerCallbacks>,
    ) -> Self {
        Self {
            component,
            repository,
            callbacks,
            committed: FeatureConfiguration::new(),
            status_callbacks: BTreeMap::new(),
            advertised: ImsCapabilities::empty(),
        }
    }

    /// What this controller believes is instantiated
    pub fn committed(&self) -> &FeatureConfiguration {
        &self.committed
    }

    /// Capabilities advertised by the connected service
    pub fn advertised(&self) -> ImsCapabilities {
        self.advertised
    }

    pub fn set_advertised(&mut self, advertised: ImsCapabilities) {
        self.advertised = advertised;
    }

    /// Bring the remote service in line with `desired`
    pub fn apply(
        &mut self,
        service: &dyn RemoteImsService,
        desired: &FeatureConfiguration,
    ) -> ReconcileOutcome {
        let plan = plan(&self.committed, desired);
        let mut outcome = ReconcileOutcome::default();

        if plan.is_empty() {
            debug!(component = %self.component, "Feature set unchanged, nothing to reconcile");
            self.committed = desired.clone();
            return outcome;
        }

        info!(
            component = %self.component,
            removals = plan.removals.len(),
            additions = plan.additions.len(),
            "Reconciling feature set"
        );

        let mut live: BTreeSet<FeatureKey> = self.committed.features().clone();

        for (key, reason) in &plan.removals {
            self.remove_feature(service, *key, *reason);
            live.remove(key);
            outcome.removed.push(*key);
        }

        for key in &plan.additions {
            let created = if key.feature.is_instantiable() {
                self.create_feature(service, *key, desired, &live)
            } else {
                self.attach_emergency(*key, &live)
            };

            if created {
                live.insert(*key);
                outcome.created.push(*key);
            } else {
                outcome.failed.push(*key);
            }
        }

        // An emergency modifier never outlives the MMTEL it is attached to
        let orphaned: Vec<FeatureKey> = live
            .iter()
            .filter(|key| {
                !key.feature.is_instantiable() && !live.contains(&FeatureKey::new(key.slot, FeatureType::Mmtel))
            })
            .copied()
            .collect();
        for key in orphaned {
            self.remove_feature(service, key, RemovalReason::NoLongerDesired);
            live.remove(&key);
            outcome.removed.push(key);
        }

        self.committed = FeatureConfiguration::from_parts(
            live,
            desired.slot_subscriptions().iter().map(|(slot, sub)| (*slot, *sub)),
        );
        outcome.capability_updates = self.refresh_capabilities(desired);
        outcome
    }

    /// Remove every committed feature and forget the baseline
    pub fn teardown(&mut self, service: &dyn RemoteImsService, reason: RemovalReason) -> usize {
        let keys: Vec<FeatureKey> = self.committed.features().iter().copied().collect();
        if !keys.is_empty() {
            info!(component = %self.component, %reason, features = keys.len(), "Tearing down features");
        }

        for key in &keys {
            self.remove_feature(service, *key, reason);
        }

        self.committed = FeatureConfiguration::new();
        self.status_callbacks.clear();
        keys.len()
    }

    fn remove_feature(&mut self, service: &dyn RemoteImsService, key: FeatureKey, reason: RemovalReason) {
        let FeatureKey { slot, feature } = key;

        if feature.is_instantiable() {
            if let Err(e) = service.remove_ims_feature(slot, feature, reason.is_recreate()) {
                warn!(component = %self.component, slot, %feature, "Remote feature removal failed: {}", e);
            }

            if let Some(callback) = self.status_callbacks.remove(&key) {
                if let Err(e) = service.remove_feature_status_callback(slot, feature, &callback) {
                    warn!(component = %self.component, slot, %feature, "Status callback removal failed: {}", e);
                }
            }

            self.repository.remove_connection(slot, feature, reason);
        }

        debug!(component = %self.component, slot, %feature, %reason, "Feature removed");
        self.callbacks.feature_removed(slot, feature, &self.component);
    }

    fn attach_emergency(&mut self, key: FeatureKey, live: &BTreeSet<FeatureKey>) -> bool {
        if !live.contains(&FeatureKey::new(key.slot, FeatureType::Mmtel)) {
            debug!(
                component = %self.component,
                slot = key.slot,
                "Emergency MMTEL requested without MMTEL on the slot, skipping"
            );
            return false;
        }

        debug!(component = %self.component, slot = key.slot, "Emergency MMTEL enabled");
        self.callbacks.feature_created(key.slot, key.feature, &self.component);
        true
    }

    fn create_feature(
        &mut self,
        service: &dyn RemoteImsService,
        key: FeatureKey,
        desired: &FeatureConfiguration,
        live: &BTreeSet<FeatureKey>,
    ) -> bool {
        let FeatureKey { slot, feature } = key;
        let subscription = desired.subscription(slot);
        let emergency_only = feature == FeatureType::Mmtel
            && !subscription.is_valid()
            && desired.contains(slot, FeatureType::EmergencyMmtel);

        let Some((call, create)) = creation_entrypoint(feature, emergency_only) else {
            return false;
        };

        let handle = match create(service, slot, subscription) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                warn!(component = %self.component, slot, %feature, "{} returned no feature", call);
                return false;
            }
            Err(e) => {
                warn!(component = %self.component, slot, %feature, "{} failed: {}", call, e);
                return false;
            }
        };

        let config = service.get_config(slot, subscription).unwrap_or_else(|e| {
            debug!(component = %self.component, slot, %feature, "No config interface: {}", e);
            None
        });
        let registration = service.get_registration(slot, subscription).unwrap_or_else(|e| {
            debug!(component = %self.component, slot, %feature, "No registration interface: {}", e);
            None
        });

        let callback = Arc::new(FeatureStatusCallback::new(key, handle, Arc::clone(&self.repository)));
        if let Err(e) = service.add_feature_status_callback(slot, feature, Arc::clone(&callback)) {
            warn!(component = %self.component, slot, %feature, "Status callback registration failed: {}", e);
            if let Err(e) = service.remove_ims_feature(slot, feature, false) {
                debug!(component = %self.component, slot, %feature, "Cleanup removal failed: {}", e);
            }
            return false;
        }

        let mut with_key = live.clone();
        with_key.insert(key);
        let caps = capabilities::compute(key, desired, &with_key, self.advertised);

        let record = FeatureRecord::new(key, subscription, handle)
            .with_config(config)
            .with_registration(registration)
            .with_capabilities(caps);
        self.repository.add_connection(record);
        callback.attach();
        self.status_callbacks.insert(key, callback);

        info!(component = %self.component, slot, %feature, %subscription, emergency_only, "Feature created");
        self.callbacks.feature_created(slot, feature, &self.component);
        true
    }

    /// Push capability bits of all live records; returns how many changed
    fn refresh_capabilities(&self, desired: &FeatureConfiguration) -> usize {
        capabilities::compute_all(desired, self.committed.features(), self.advertised)
            .into_iter()
            .filter(|(key, caps)| self.repository.update_capabilities(key.slot, key.feature, *caps))
            .count()
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("component", &self.component)
            .field("committed", &self.committed)
            .field("advertised", &self.advertised)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FeatureConfiguration {
        FeatureConfiguration::new()
    }

    fn key(slot: SlotId, feature: FeatureType) -> FeatureKey {
        FeatureKey::new(slot, feature)
    }

    #[test]
    fn test_plan_identical_is_empty() {
        let a = config()
            .with_feature(0, FeatureType::Mmtel)
            .with_feature(0, FeatureType::Rcs)
            .with_subscription(0, 2);
        assert!(plan(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_plan_added_and_removed() {
        let committed = config()
            .with_feature(0, FeatureType::Mmtel)
            .with_feature(0, FeatureType::Rcs)
            .with_subscription(0, 2);
        let desired = config()
            .with_feature(0, FeatureType::Mmtel)
            .with_feature(1, FeatureType::Mmtel)
            .with_subscription(0, 2)
            .with_subscription(1, 3);

        let plan = plan(&committed, &desired);
        assert_eq!(plan.removals, vec![(key(0, FeatureType::Rcs), RemovalReason::NoLongerDesired)]);
        assert_eq!(plan.additions, vec![key(1, FeatureType::Mmtel)]);
    }

    #[test]
    fn test_plan_subscription_change_recreates() {
        let committed = config()
            .with_feature(0, FeatureType::Mmtel)
            .with_feature(1, FeatureType::Mmtel)
            .with_subscription(0, 2)
            .with_subscription(1, 3);
        let desired = committed.clone().with_subscription(1, 4);

        let plan = plan(&committed, &desired);
        assert_eq!(
            plan.removals,
            vec![(key(1, FeatureType::Mmtel), RemovalReason::SubscriptionChanged)]
        );
        assert_eq!(plan.additions, vec![key(1, FeatureType::Mmtel)]);
    }

    #[test]
    fn test_plan_orders_emergency_after_mmtel() {
        let desired = config()
            .with_feature(0, FeatureType::EmergencyMmtel)
            .with_feature(0, FeatureType::Mmtel)
            .with_feature(1, FeatureType::EmergencyMmtel)
            .with_feature(1, FeatureType::Mmtel);

        let plan = plan(&config(), &desired);
        assert_eq!(
            plan.additions,
            vec![
                key(0, FeatureType::Mmtel),
                key(1, FeatureType::Mmtel),
                key(0, FeatureType::EmergencyMmtel),
                key(1, FeatureType::EmergencyMmtel),
            ]
        );
    }

    #[test]
    fn test_subscription_change_on_unused_slot_is_noop() {
        let committed = config().with_feature(0, FeatureType::Mmtel).with_subscription(0, 2);
        let desired = committed.clone().with_subscription(1, 5);
        assert!(plan(&committed, &desired).is_empty());
    }

    #[test]
    fn test_plan_removing_mmtel_takes_emergency_along() {
        let committed = config()
            .with_feature(0, FeatureType::Mmtel)
            .with_feature(0, FeatureType::EmergencyMmtel)
            .with_subscription(0, 2);
        let desired = config().with_feature(0, FeatureType::EmergencyMmtel).with_subscription(0, 2);

        let plan = plan(&committed, &desired);
        assert!(plan
            .removals
            .contains(&(key(0, FeatureType::Mmtel), RemovalReason::NoLongerDesired)));
        assert!(plan
            .removals
            .contains(&(key(0, FeatureType::EmergencyMmtel), RemovalReason::NoLongerDesired)));
        assert_eq!(plan.additions, vec![key(0, FeatureType::EmergencyMmtel)]);
    }

    #[test]
    fn test_creation_table() {
        assert_eq!(
            creation_entrypoint(FeatureType::Mmtel, false).map(|(name, _)| name),
            Some("create_mmtel_feature")
        );
        assert_eq!(
            creation_entrypoint(FeatureType::Mmtel, true).map(|(name, _)| name),
            Some("create_emergency_only_mmtel_feature")
        );
        assert_eq!(
            creation_entrypoint(FeatureType::Rcs, true).map(|(name, _)| name),
            Some("create_rcs_feature")
        );
        assert!(creation_entrypoint(FeatureType::EmergencyMmtel, false).is_none());
    }
}
