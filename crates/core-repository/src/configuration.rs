//! Feature configuration: the desired feature set plus slot subscriptions

use crate::feature::{FeatureKey, FeatureType, SlotId, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A set of feature keys together with the subscription active on each slot
///
/// Used both for the configuration a caller asks for and for the baseline a
/// controller believes is instantiated. Slots missing from the subscription
/// map are treated as having no active subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfiguration {
    #[serde(default)]
    features: BTreeSet<FeatureKey>,

    #[serde(default)]
    slot_subscriptions: BTreeMap<SlotId, SubscriptionId>,
}

impl FeatureConfiguration {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from its parts
    pub fn from_parts(
        features: impl IntoIterator<Item = FeatureKey>,
        slot_subscriptions: impl IntoIterator<Item = (SlotId, SubscriptionId)>,
    ) -> Self {
        Self {
            features: features.into_iter().collect(),
            slot_subscriptions: slot_subscriptions.into_iter().collect(),
        }
    }

    /// Add a feature (builder style)
    pub fn with_feature(mut self, slot: SlotId, feature: FeatureType) -> Self {
        self.features.insert(FeatureKey::new(slot, feature));
        self
    }

    /// Set the subscription of a slot (builder style)
    pub fn with_subscription(mut self, slot: SlotId, subscription: impl Into<SubscriptionId>) -> Self {
        self.slot_subscriptions.insert(slot, subscription.into());
        self
    }

    pub fn insert(&mut self, key: FeatureKey) -> bool {
        self.features.insert(key)
    }

    pub fn remove(&mut self, key: &FeatureKey) -> bool {
        self.features.remove(key)
    }

    pub fn set_subscription(&mut self, slot: SlotId, subscription: SubscriptionId) {
        self.slot_subscriptions.insert(slot, subscription);
    }

    pub fn clear_subscription(&mut self, slot: SlotId) {
        self.slot_subscriptions.remove(&slot);
    }

    /// All feature keys, ordered by slot then type
    pub fn features(&self) -> &BTreeSet<FeatureKey> {
        &self.features
    }

    /// The explicit slot → subscription mapping
    pub fn slot_subscriptions(&self) -> &BTreeMap<SlotId, SubscriptionId> {
        &self.slot_subscriptions
    }

    /// Subscription of a slot, `INVALID` when unknown
    pub fn subscription(&self, slot: SlotId) -> SubscriptionId {
        self.slot_subscriptions
            .get(&slot)
            .copied()
            .unwrap_or(SubscriptionId::INVALID)
    }

    pub fn contains(&self, slot: SlotId, feature: FeatureType) -> bool {
        self.features.contains(&FeatureKey::new(slot, feature))
    }

    pub fn contains_key(&self, key: &FeatureKey) -> bool {
        self.features.contains(key)
    }

    /// Slots that carry at least one feature
    pub fn slots(&self) -> BTreeSet<SlotId> {
        self.features.iter().map(|key| key.slot).collect()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_slot_is_invalid() {
        let config = FeatureConfiguration::new()
            .with_feature(0, FeatureType::Mmtel)
            .with_subscription(0, 2);

        assert_eq!(config.subscription(0), SubscriptionId::new(2));
        assert_eq!(config.subscription(1), SubscriptionId::INVALID);
    }

    #[test]
    fn test_builder_and_queries() {
        let config = FeatureConfiguration::new()
            .with_feature(0, FeatureType::Mmtel)
            .with_feature(0, FeatureType::Rcs)
            .with_feature(1, FeatureType::Mmtel)
            .with_feature(0, FeatureType::Mmtel);

        assert_eq!(config.len(), 3);
        assert!(config.contains(0, FeatureType::Rcs));
        assert!(!config.contains(1, FeatureType::Rcs));
        assert_eq!(config.slots().into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_equality_includes_subscriptions() {
        let a = FeatureConfiguration::new()
            .with_feature(0, FeatureType::Mmtel)
            .with_subscription(0, 2);
        let b = a.clone().with_subscription(0, 3);

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
