//! Scaling controller — provisioning, idle floor, and scale-to-target.
//!
//! All registry reads are copied out before any panel call; the registry
//! lock is never held across an `.await`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleet_core::{FleetPolicy, InstanceTemplate};
use fleetgrid_panel::{InstanceSpec, PanelClient, PanelError};
use fleetgrid_state::*;

use crate::error::{ScaleError, ScaleResult};

/// Environment variable through which a provisioned server learns its local id.
pub const LOCAL_ID_ENV: &str = "FLEETGRID_LOCAL_ID";

/// What a `scale_to` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaledUp,
    ScaledDown,
    NoChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSummary {
    pub target_count: u32,
    pub previous_count: u32,
    pub action: ScaleAction,
}

/// Sizes the fleet through the panel and records results in the registry.
pub struct ScalingController {
    pub(crate) registry: FleetRegistry,
    pub(crate) panel: Arc<dyn PanelClient>,
    policy: FleetPolicy,
    template: InstanceTemplate,
    /// Serializes provisioning so the max-instances guard cannot race.
    provision_lock: Mutex<()>,
}

impl ScalingController {
    pub fn new(
        registry: FleetRegistry,
        panel: Arc<dyn PanelClient>,
        policy: FleetPolicy,
        template: InstanceTemplate,
    ) -> Self {
        Self {
            registry,
            panel,
            policy,
            template,
            provision_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &FleetPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    pub fn panel(&self) -> &Arc<dyn PanelClient> {
        &self.panel
    }

    /// Create and start one new instance and register it as `starting`.
    ///
    /// A failed create leaves whatever the panel may have half-built for
    /// an operator to clean up; nothing is rolled back or retried here.
    pub async fn provision_one(&self) -> ScaleResult<ServerInstance> {
        let _guard = self.provision_lock.lock().await;

        let registered = self.registry.len() as u32;
        if registered >= self.policy.max_total_instances {
            return Err(ScaleError::FleetFull {
                max: self.policy.max_total_instances,
            });
        }

        let port = self.next_port()?;
        let local_id = Uuid::new_v4().to_string();
        let name = format!("{}{port}", self.policy.name_prefix);

        let allocation = self
            .panel
            .ensure_allocation(port)
            .await
            .map_err(ScaleError::Provisioning)?;

        // The create request asks the panel to start the server once
        // installed, so there is no separate start signal.
        let spec = InstanceSpec::builder(name.as_str())
            .template(&self.template)
            .env(LOCAL_ID_ENV, local_id.as_str())
            .allocation(&allocation)
            .build()
            .map_err(ScaleError::Provisioning)?;

        let created = self
            .panel
            .create_instance(&spec)
            .await
            .map_err(ScaleError::Provisioning)?;

        let instance = ServerInstance {
            instance_id: created.instance_id,
            local_id,
            display_name: name,
            status: InstanceStatus::Starting,
            capacity: Capacity::empty(self.policy.max_players_per_instance),
            address: allocation.connect_address(&self.policy.public_address),
            port,
            last_update: epoch_secs(),
        };
        self.registry.upsert(instance.clone())?;

        info!(
            instance_id = %instance.instance_id,
            local_id = %instance.local_id,
            port,
            "instance provisioned"
        );
        Ok(instance)
    }

    /// Top the fleet up to `min_idle_instances`. Returns how many were
    /// provisioned. Never fails; a provisioning error ends the top-up early.
    pub async fn ensure_minimum_idle(&self) -> u32 {
        let snapshot = self.registry.list_all();
        let idle = snapshot.iter().filter(|i| counts_as_idle(i)).count() as u32;
        let total = snapshot.len() as u32;

        let min_idle = self.policy.min_idle_instances;
        let max_total = self.policy.max_total_instances;

        if idle >= min_idle || total >= max_total {
            debug!(idle, total, min_idle, max_total, "idle floor satisfied or fleet full");
            return 0;
        }

        let wanted = (min_idle - idle).min(max_total - total);
        let mut provisioned = 0;
        for _ in 0..wanted {
            match self.provision_one().await {
                Ok(_) => provisioned += 1,
                Err(e) => {
                    warn!(error = %e, provisioned, wanted, "idle top-up stopped early");
                    break;
                }
            }
        }

        if provisioned > 0 {
            info!(provisioned, idle_before = idle, min_idle, "idle capacity topped up");
        }
        provisioned
    }

    /// Move the active fleet size to `target`.
    ///
    /// Scale-up is best-effort: stopped instances are restarted first,
    /// then new ones provisioned, and the first failure ends the attempt.
    /// Scale-down stops the emptiest instances and propagates a failed stop.
    pub async fn scale_to(&self, target: u32) -> ScaleResult<ScaleSummary> {
        let max = self.policy.max_total_instances;
        if target > max {
            return Err(ScaleError::TargetTooLarge { target, max });
        }

        let snapshot = self.registry.list_all();
        let previous = snapshot.iter().filter(|i| i.status.is_active()).count() as u32;

        let action = if target > previous {
            self.scale_up(&snapshot, target - previous).await;
            ScaleAction::ScaledUp
        } else if target < previous {
            self.scale_down(snapshot, previous - target).await?;
            ScaleAction::ScaledDown
        } else {
            debug!(target, "already at target, no scaling needed");
            ScaleAction::NoChange
        };

        info!(from = previous, to = target, ?action, "scale request handled");
        Ok(ScaleSummary {
            target_count: target,
            previous_count: previous,
            action,
        })
    }

    async fn scale_up(&self, snapshot: &[ServerInstance], mut missing: u32) {
        let stopped: Vec<&ServerInstance> = snapshot
            .iter()
            .filter(|i| i.status == InstanceStatus::Stopped)
            .collect();

        for inst in stopped {
            if missing == 0 {
                return;
            }
            match self.start_instance(&inst.instance_id).await {
                Ok(()) => missing -= 1,
                Err(e) => {
                    warn!(instance_id = %inst.instance_id, error = %e, "restart during scale-up failed");
                    return;
                }
            }
        }

        for _ in 0..missing {
            if let Err(e) = self.provision_one().await {
                warn!(error = %e, "provisioning during scale-up failed");
                return;
            }
        }
    }

    async fn scale_down(&self, snapshot: Vec<ServerInstance>, count: u32) -> ScaleResult<()> {
        let mut candidates: Vec<ServerInstance> = snapshot
            .into_iter()
            .filter(|i| i.status.is_active())
            .collect();
        // Stable: idle instances first, ties keep registry order.
        candidates.sort_by_key(|i| i.capacity.current);

        for inst in candidates.into_iter().take(count as usize) {
            if !inst.capacity.is_empty() {
                warn!(
                    instance_id = %inst.instance_id,
                    players = inst.capacity.current,
                    "not enough idle instances, stopping an occupied one"
                );
            }
            self.stop_instance(&inst.instance_id).await?;
        }
        Ok(())
    }

    /// `start_port + registered`, skipping ports already held.
    fn next_port(&self) -> ScaleResult<u16> {
        let in_use = self.registry.ports_in_use();
        let first = u32::from(self.policy.start_port) + self.registry.len() as u32;
        (first..=u32::from(u16::MAX))
            .filter_map(|p| u16::try_from(p).ok())
            .find(|p| !in_use.contains(p))
            .ok_or_else(|| ScaleError::Provisioning(PanelError::new("no free port left")))
    }
}

/// Zero players and either serving or about to serve.
fn counts_as_idle(inst: &ServerInstance) -> bool {
    inst.capacity.is_empty()
        && matches!(inst.status, InstanceStatus::Running | InstanceStatus::Starting)
}
