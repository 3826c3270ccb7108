//! Domain types for fleet bookkeeping.
//!
//! These types describe the game-server instances the fleet manages and
//! the admission records of players routed onto them. All types are
//! serializable so the API layer can return them directly.

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Panel-assigned identity of an instance. Stable for its lifetime.
pub type InstanceId = String;

/// Identity of a player as known to the excluded account layer.
pub type PlayerId = String;

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Instance ──────────────────────────────────────────────────────

/// Lifecycle status of a game-server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Unknown,
}

impl InstanceStatus {
    /// Counts toward the fleet size used by scaling decisions.
    pub fn is_active(self) -> bool {
        !matches!(self, InstanceStatus::Stopping | InstanceStatus::Stopped)
    }

    /// A forced stop is accepted from this status.
    pub fn can_stop(self) -> bool {
        matches!(
            self,
            InstanceStatus::Starting | InstanceStatus::Running | InstanceStatus::Unknown
        )
    }

    /// A start is accepted from this status.
    pub fn can_start(self) -> bool {
        matches!(self, InstanceStatus::Stopped | InstanceStatus::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current and maximum concurrent players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub current: u32,
    pub max: u32,
}

impl Capacity {
    pub fn empty(max: u32) -> Self {
        Self { current: 0, max }
    }

    pub fn has_room(&self) -> bool {
        self.current < self.max
    }

    pub fn is_empty(&self) -> bool {
        self.current == 0
    }

    pub fn validate(&self) -> StateResult<()> {
        if self.current > self.max {
            return Err(StateError::InvalidState(format!(
                "capacity overflow: {} players exceeds max {}",
                self.current, self.max
            )));
        }
        Ok(())
    }
}

/// One externally hosted game-server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInstance {
    pub instance_id: InstanceId,
    /// Identity generated locally before the panel confirmed creation.
    pub local_id: String,
    pub display_name: String,
    pub status: InstanceStatus,
    pub capacity: Capacity,
    /// Address players connect to.
    pub address: String,
    pub port: u16,
    /// Unix timestamp (seconds) of the last status change.
    pub last_update: u64,
}

impl ServerInstance {
    /// Can accept one more player right now.
    pub fn is_joinable(&self) -> bool {
        self.status == InstanceStatus::Running && self.capacity.has_room()
    }

    /// Running with nobody connected.
    pub fn is_idle(&self) -> bool {
        self.status == InstanceStatus::Running && self.capacity.is_empty()
    }

    /// Set the status, stamping `last_update` when it actually changes.
    pub fn transition(&mut self, status: InstanceStatus, now: u64) {
        if self.status != status {
            self.status = status;
            self.last_update = now;
        }
    }
}

/// Read-only projection of an instance for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub instance_id: InstanceId,
    pub display_name: String,
    pub status: InstanceStatus,
    pub players: u32,
    pub max_players: u32,
    pub address: String,
    pub port: u16,
    pub last_update: u64,
}

impl From<&ServerInstance> for InstanceSummary {
    fn from(inst: &ServerInstance) -> Self {
        Self {
            instance_id: inst.instance_id.clone(),
            display_name: inst.display_name.clone(),
            status: inst.status,
            players: inst.capacity.current,
            max_players: inst.capacity.max,
            address: inst.address.clone(),
            port: inst.port,
            last_update: inst.last_update,
        }
    }
}

// ── Admission ─────────────────────────────────────────────────────

/// Where a player stands in admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting on capacity to be provisioned.
    Queued,
    Assigned,
}

/// A player's assignment record. At most one per player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub player_id: PlayerId,
    pub assigned_instance_id: Option<InstanceId>,
    /// Unix timestamp (seconds) when the player entered admission.
    pub queued_at: u64,
    pub status: QueueStatus,
}

/// Where a joining player should connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTicket {
    pub instance_id: InstanceId,
    pub address: String,
    pub port: u16,
}

impl From<&ServerInstance> for JoinTicket {
    fn from(inst: &ServerInstance) -> Self {
        Self {
            instance_id: inst.instance_id.clone(),
            address: inst.address.clone(),
            port: inst.port,
        }
    }
}

/// Fleet-wide counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub total_instances: u32,
    pub running_instances: u32,
    pub idle_instances: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(status: InstanceStatus, current: u32) -> ServerInstance {
        ServerInstance {
            instance_id: "srv-1".to_string(),
            local_id: "local-1".to_string(),
            display_name: "fleet-7777".to_string(),
            status,
            capacity: Capacity { current, max: 4 },
            address: "127.0.0.1".to_string(),
            port: 7777,
            last_update: 100,
        }
    }

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        // Should be after 2024-01-01.
        assert!(epoch_secs() > 1_704_067_200);
    }

    #[test]
    fn capacity_rejects_overflow() {
        assert!(Capacity { current: 4, max: 4 }.validate().is_ok());
        assert!(matches!(
            Capacity { current: 5, max: 4 }.validate(),
            Err(StateError::InvalidState(_))
        ));
    }

    #[test]
    fn joinable_requires_running_with_room() {
        assert!(instance(InstanceStatus::Running, 3).is_joinable());
        assert!(!instance(InstanceStatus::Running, 4).is_joinable());
        assert!(!instance(InstanceStatus::Starting, 0).is_joinable());
    }

    #[test]
    fn idle_means_running_and_empty() {
        assert!(instance(InstanceStatus::Running, 0).is_idle());
        assert!(!instance(InstanceStatus::Starting, 0).is_idle());
        assert!(!instance(InstanceStatus::Running, 1).is_idle());
    }

    #[test]
    fn transition_stamps_only_on_change() {
        let mut inst = instance(InstanceStatus::Starting, 0);
        inst.transition(InstanceStatus::Starting, 500);
        assert_eq!(inst.last_update, 100);
        inst.transition(InstanceStatus::Running, 500);
        assert_eq!(inst.last_update, 500);
        assert_eq!(inst.status, InstanceStatus::Running);
    }

    #[test]
    fn status_transition_rules() {
        assert!(InstanceStatus::Running.can_stop());
        assert!(InstanceStatus::Starting.can_stop());
        assert!(!InstanceStatus::Stopped.can_stop());
        assert!(InstanceStatus::Stopped.can_start());
        assert!(!InstanceStatus::Running.can_start());
        assert!(!InstanceStatus::Stopping.is_active());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&InstanceStatus::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
        let summary = InstanceSummary::from(&instance(InstanceStatus::Running, 2));
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["players"], 2);
        assert_eq!(value["status"], "running");
    }
}
