//! FleetRegistry — the local source of truth for known instances.
//!
//! Every accessor is synchronous and holds the lock only for the
//! duration of the in-memory read or write. Callers copy out what they
//! need before making network calls and write results back afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::types::*;

/// Thread-safe registry of server instances keyed by `instance_id`.
///
/// Iteration order is the key order, so selection tie-breaks are
/// deterministic for a given fleet.
#[derive(Clone, Default)]
pub struct FleetRegistry {
    instances: Arc<RwLock<BTreeMap<InstanceId, ServerInstance>>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<InstanceId, ServerInstance>> {
        self.instances.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<InstanceId, ServerInstance>> {
        self.instances.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace an instance. Rejects capacity overflow.
    pub fn upsert(&self, instance: ServerInstance) -> StateResult<()> {
        instance.capacity.validate()?;
        let id = instance.instance_id.clone();
        self.write().insert(id.clone(), instance);
        debug!(instance_id = %id, "instance stored");
        Ok(())
    }

    pub fn get(&self, instance_id: &str) -> Option<ServerInstance> {
        self.read().get(instance_id).cloned()
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.read().contains_key(instance_id)
    }

    /// Snapshot of every instance. Callers must not rely on ordering.
    pub fn list_all(&self) -> Vec<ServerInstance> {
        self.read().values().cloned().collect()
    }

    /// Remove an instance, returning it if it existed.
    pub fn remove(&self, instance_id: &str) -> Option<ServerInstance> {
        let removed = self.write().remove(instance_id);
        if removed.is_some() {
            debug!(%instance_id, "instance removed");
        }
        removed
    }

    pub fn count_by_status(&self, status: InstanceStatus) -> u32 {
        self.read().values().filter(|i| i.status == status).count() as u32
    }

    /// Number of registered instances, whatever their status.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Instances not stopping or stopped.
    pub fn active_count(&self) -> u32 {
        self.read().values().filter(|i| i.status.is_active()).count() as u32
    }

    pub fn ports_in_use(&self) -> BTreeSet<u16> {
        self.read().values().map(|i| i.port).collect()
    }

    /// Apply `f` to a copy of the instance, validate, then store it.
    ///
    /// The stored record is untouched when validation fails.
    pub fn update<F>(&self, instance_id: &str, f: F) -> StateResult<ServerInstance>
    where
        F: FnOnce(&mut ServerInstance),
    {
        let mut instances = self.write();
        let current = instances
            .get(instance_id)
            .ok_or_else(|| StateError::NotFound(instance_id.to_string()))?;

        let mut updated = current.clone();
        f(&mut updated);
        if updated.instance_id != instance_id {
            return Err(StateError::InvalidState(format!(
                "instance id cannot change ({instance_id} -> {})",
                updated.instance_id
            )));
        }
        updated.capacity.validate()?;
        instances.insert(instance_id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Set the status and return the previous one.
    pub fn set_status(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        now: u64,
    ) -> StateResult<InstanceStatus> {
        let mut previous = status;
        self.update(instance_id, |inst| {
            previous = inst.status;
            inst.transition(status, now);
        })?;
        Ok(previous)
    }

    /// Move to `to` if `allowed` accepts the current status, under one lock.
    ///
    /// Returns the record as it was before the transition so the caller
    /// can restore it if the follow-up network call fails.
    pub fn begin_transition(
        &self,
        instance_id: &str,
        to: InstanceStatus,
        now: u64,
        allowed: fn(InstanceStatus) -> bool,
    ) -> StateResult<ServerInstance> {
        let mut instances = self.write();
        let inst = instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::NotFound(instance_id.to_string()))?;
        if !allowed(inst.status) {
            return Err(StateError::InvalidState(format!(
                "instance {instance_id} cannot go from {} to {to}",
                inst.status
            )));
        }
        let prior = inst.clone();
        inst.transition(to, now);
        Ok(prior)
    }

    /// Put back the status and timestamp captured by `begin_transition`.
    pub fn restore_status(&self, prior: &ServerInstance) -> StateResult<()> {
        self.update(&prior.instance_id, |inst| {
            inst.status = prior.status;
            inst.last_update = prior.last_update;
        })
        .map(|_| ())
    }

    /// Record the number of connected players.
    pub fn set_players(&self, instance_id: &str, current: u32) -> StateResult<ServerInstance> {
        self.update(instance_id, |inst| inst.capacity.current = current)
    }

    /// Promote `starting` instances that have waited at least
    /// `timeout_secs` to `running`. Returns the promoted ids.
    pub fn promote_stale_starting(&self, timeout_secs: u64, now: u64) -> Vec<InstanceId> {
        let mut instances = self.write();
        let mut promoted = Vec::new();
        for inst in instances.values_mut() {
            if inst.status == InstanceStatus::Starting
                && now.saturating_sub(inst.last_update) >= timeout_secs
            {
                inst.transition(InstanceStatus::Running, now);
                promoted.push(inst.instance_id.clone());
            }
        }
        promoted
    }

    pub fn status(&self) -> FleetStatus {
        let instances = self.read();
        let mut status = FleetStatus {
            total_instances: instances.len() as u32,
            running_instances: 0,
            idle_instances: 0,
        };
        for inst in instances.values() {
            if inst.status == InstanceStatus::Running {
                status.running_instances += 1;
                if inst.capacity.is_empty() {
                    status.idle_instances += 1;
                }
            }
        }
        status
    }
}
