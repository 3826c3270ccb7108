//! Shared fixtures for the manager tests.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_core::{FleetPolicy, InstanceTemplate, TimingConfig};
use fleetgrid_panel::{Allocation, InMemoryPanel, PanelInstance};
use fleetgrid_state::{Capacity, InstanceStatus, ServerInstance};

use crate::manager::FleetManager;

pub(crate) fn policy(min_idle: u32, max_total: u32) -> FleetPolicy {
    FleetPolicy {
        max_players_per_instance: 10,
        min_idle_instances: min_idle,
        max_total_instances: max_total,
        start_port: 7777,
        name_prefix: "fleet-".to_string(),
        public_address: "203.0.113.10".to_string(),
    }
}

pub(crate) fn template() -> InstanceTemplate {
    InstanceTemplate {
        owner_user_id: 1,
        egg_id: 1,
        docker_image: "game:latest".to_string(),
        startup: "./server".to_string(),
        memory_mb: 512,
        swap_mb: 0,
        disk_mb: 1024,
        io_weight: 500,
        cpu_percent: 100,
        environment: HashMap::new(),
    }
}

pub(crate) fn timing() -> TimingConfig {
    TimingConfig {
        reconcile_interval: "10ms".to_string(),
        starting_timeout: "60s".to_string(),
        stop_poll_interval: "5ms".to_string(),
        stop_timeout: "100ms".to_string(),
    }
}

pub(crate) fn manager(min_idle: u32, max_total: u32) -> (Arc<InMemoryPanel>, FleetManager) {
    let panel = Arc::new(InMemoryPanel::new());
    let manager = FleetManager::new(
        panel.clone(),
        policy(min_idle, max_total),
        template(),
        timing(),
    );
    (panel, manager)
}

pub(crate) fn panel_instance(id: &str, name: &str, status: InstanceStatus, port: u16) -> PanelInstance {
    PanelInstance {
        instance_id: id.to_string(),
        name: name.to_string(),
        status,
        allocations: vec![Allocation {
            id: Some(u64::from(port)),
            ip: "0.0.0.0".to_string(),
            port,
        }],
    }
}

/// Register an instance locally and on the panel with the same status.
pub(crate) fn seed(
    panel: &InMemoryPanel,
    manager: &FleetManager,
    id: &str,
    status: InstanceStatus,
    players: u32,
    port: u16,
) {
    panel.insert(panel_instance(id, &format!("fleet-{port}"), status, port));
    manager
        .registry()
        .upsert(ServerInstance {
            instance_id: id.to_string(),
            local_id: format!("local-{id}"),
            display_name: format!("fleet-{port}"),
            status,
            capacity: Capacity { current: players, max: 10 },
            address: "203.0.113.10".to_string(),
            port,
            last_update: fleetgrid_state::epoch_secs(),
        })
        .unwrap();
}
