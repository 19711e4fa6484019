//! Unit availability
//!
//! A unit is available when at least one of its devices completed the cycle
//! successfully. Every configured unit gets a value each cycle.

use std::collections::BTreeMap;

use crate::core::register_map::RegisterMap;

/// Device id to "completed this cycle" flag
pub type DeviceStatus = BTreeMap<String, bool>;

/// OR of member device statuses per unit; devices missing from `status` count as failed
pub fn aggregate(map: &RegisterMap, status: &DeviceStatus) -> BTreeMap<String, bool> {
    map.units()
        .iter()
        .map(|(unit, members)| {
            let available = members
                .iter()
                .any(|device| status.get(device).copied().unwrap_or(false));
            (unit.clone(), available)
        })
        .collect()
}
