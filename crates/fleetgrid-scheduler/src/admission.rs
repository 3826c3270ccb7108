//! AdmissionController — join/leave and queue bookkeeping.
//!
//! Joins for the same player are serialized through a per-player async
//! lock; joins for different players run concurrently and only meet on
//! the scaler's provisioning lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use fleetgrid_autoscale::ScalingController;
use fleetgrid_state::*;

use crate::error::{AdmissionError, AdmissionResult};
use crate::selector::select_instance;

pub struct AdmissionController {
    scaler: Arc<ScalingController>,
    registry: FleetRegistry,
    entries: RwLock<HashMap<PlayerId, QueueEntry>>,
    player_locks: Mutex<HashMap<PlayerId, Arc<AsyncMutex<()>>>>,
}

impl AdmissionController {
    pub fn new(scaler: Arc<ScalingController>) -> Self {
        Self {
            registry: scaler.registry().clone(),
            scaler,
            entries: RwLock::new(HashMap::new()),
            player_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Route `player_id` onto an instance and record the assignment.
    ///
    /// Any earlier entry for the player is replaced. The player's
    /// connected count is not touched here; occupancy comes from the
    /// game process through reports and reconciliation.
    pub async fn join(
        &self,
        player_id: &str,
        preferred: Option<&str>,
    ) -> AdmissionResult<JoinTicket> {
        let lock = self.player_lock(player_id);
        let result = {
            let _guard = lock.lock().await;
            self.join_locked(player_id, preferred).await
        };
        self.release_player_lock(player_id, lock);
        result
    }

    async fn join_locked(
        &self,
        player_id: &str,
        preferred: Option<&str>,
    ) -> AdmissionResult<JoinTicket> {
        let queued_at = epoch_secs();

        let snapshot = self.registry.list_all();
        if let Some(inst) = select_instance(&snapshot, preferred) {
            let ticket = JoinTicket::from(inst);
            self.assign(player_id, &ticket.instance_id, queued_at);
            debug!(
                %player_id,
                instance_id = %ticket.instance_id,
                players = inst.capacity.current,
                "player routed to existing instance"
            );
            return Ok(ticket);
        }

        let max = self.scaler.policy().max_total_instances;
        if snapshot.len() as u32 >= max {
            info!(%player_id, max, "join refused, fleet full");
            return Err(AdmissionError::CapacityExceeded { max });
        }

        let prior = self.write_entry(QueueEntry {
            player_id: player_id.to_string(),
            assigned_instance_id: None,
            queued_at,
            status: QueueStatus::Queued,
        });
        debug!(%player_id, "no joinable instance, provisioning one");

        match self.scaler.provision_one().await {
            Ok(inst) => {
                let ticket = JoinTicket::from(&inst);
                self.assign(player_id, &ticket.instance_id, queued_at);
                info!(%player_id, instance_id = %ticket.instance_id, "player routed to new instance");
                Ok(ticket)
            }
            Err(e) => {
                // A failed re-join leaves the earlier assignment in place.
                match prior {
                    Some(entry) => {
                        self.write_entry(entry);
                    }
                    None => {
                        self.remove_entry(player_id);
                    }
                }
                warn!(%player_id, error = %e, "join failed while provisioning");
                Err(e.into())
            }
        }
    }

    /// Drop the player's entry. Leaving twice, or never having joined, is fine.
    pub async fn leave(&self, player_id: &str) {
        let lock = self.player_lock(player_id);
        let removed = {
            let _guard = lock.lock().await;
            self.remove_entry(player_id)
        };
        self.release_player_lock(player_id, lock);

        match removed {
            Some(entry) => debug!(
                %player_id,
                instance_id = entry.assigned_instance_id.as_deref().unwrap_or("-"),
                "player left"
            ),
            None => debug!(%player_id, "leave for unknown player ignored"),
        }
    }

    pub fn entry(&self, player_id: &str) -> Option<QueueEntry> {
        self.read_entries().get(player_id).cloned()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<QueueEntry> {
        let mut all: Vec<QueueEntry> = self.read_entries().values().cloned().collect();
        all.sort_by(|a, b| {
            a.queued_at
                .cmp(&b.queued_at)
                .then_with(|| a.player_id.cmp(&b.player_id))
        });
        all
    }

    /// Players assigned to `instance_id`, sorted.
    pub fn players_on(&self, instance_id: &str) -> Vec<PlayerId> {
        let mut players: Vec<PlayerId> = self
            .read_entries()
            .values()
            .filter(|e| e.assigned_instance_id.as_deref() == Some(instance_id))
            .map(|e| e.player_id.clone())
            .collect();
        players.sort();
        players
    }

    /// Drop every entry assigned to `instance_id`. Returns how many went.
    pub fn release_instance(&self, instance_id: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| e.assigned_instance_id.as_deref() != Some(instance_id));
        let released = before - entries.len();
        if released > 0 {
            info!(%instance_id, released, "queue entries released");
        }
        released
    }

    fn assign(&self, player_id: &str, instance_id: &str, queued_at: u64) {
        self.write_entry(QueueEntry {
            player_id: player_id.to_string(),
            assigned_instance_id: Some(instance_id.to_string()),
            queued_at,
            status: QueueStatus::Assigned,
        });
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PlayerId, QueueEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entry(&self, entry: QueueEntry) -> Option<QueueEntry> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.player_id.clone(), entry)
    }

    fn remove_entry(&self, player_id: &str) -> Option<QueueEntry> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(player_id)
    }

    fn player_lock(&self, player_id: &str) -> Arc<AsyncMutex<()>> {
        self.player_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(player_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the player's lock once nobody else holds or waits on it.
    fn release_player_lock(&self, player_id: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.player_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(player_id);
        }
    }
}
