//! Instance selection for joining players.
//!
//! Greedy load spreading over a registry snapshot. Pure functions, so the
//! caller decides what snapshot they run against.

use fleetgrid_state::ServerInstance;

/// The preferred instance when it can take a player, else the least loaded.
pub fn select_instance<'a>(
    instances: &'a [ServerInstance],
    preferred: Option<&str>,
) -> Option<&'a ServerInstance> {
    if let Some(id) = preferred
        && let Some(inst) = instances.iter().find(|i| i.instance_id == id)
        && inst.is_joinable()
    {
        return Some(inst);
    }
    least_loaded(instances)
}

/// Joinable instance with the fewest players; ties go to the first one
/// in iteration order.
pub fn least_loaded(instances: &[ServerInstance]) -> Option<&ServerInstance> {
    instances
        .iter()
        .filter(|i| i.is_joinable())
        .min_by_key(|i| i.capacity.current)
}
