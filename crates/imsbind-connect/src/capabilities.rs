//! Derived capability bits of live features

use imsbind_core_repository::{FeatureConfiguration, FeatureKey, FeatureType, ImsCapabilities};
use std::collections::{BTreeMap, BTreeSet};

/// Capability bits of the live feature `key`
///
/// - MMTEL gets `EMERGENCY_OVER_MMTEL` while emergency calling is desired on
///   its slot.
/// - MMTEL and RCS get `SIP_DELEGATE_CREATION` when the service advertises it
///   and both are live on the slot.
pub fn compute(
    key: FeatureKey,
    desired: &FeatureConfiguration,
    live: &BTreeSet<FeatureKey>,
    advertised: ImsCapabilities,
) -> ImsCapabilities {
    let mut caps = ImsCapabilities::empty();

    if key.feature == FeatureType::Mmtel && desired.contains(key.slot, FeatureType::EmergencyMmtel) {
        caps |= ImsCapabilities::EMERGENCY_OVER_MMTEL;
    }

    if matches!(key.feature, FeatureType::Mmtel | FeatureType::Rcs)
        && advertised.contains(ImsCapabilities::SIP_DELEGATE_CREATION)
        && live.contains(&FeatureKey::new(key.slot, FeatureType::Mmtel))
        && live.contains(&FeatureKey::new(key.slot, FeatureType::Rcs))
    {
        caps |= ImsCapabilities::SIP_DELEGATE_CREATION;
    }

    caps
}

/// Capability bits of every instantiable key in `live`
pub fn compute_all(
    desired: &FeatureConfiguration,
    live: &BTreeSet<FeatureKey>,
    advertised: ImsCapabilities,
) -> BTreeMap<FeatureKey, ImsCapabilities> {
    live.iter()
        .filter(|key| key.feature.is_instantiable())
        .map(|key| (*key, compute(*key, desired, live, advertised)))
        .collect()
}
