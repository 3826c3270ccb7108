//! FleetManager — the operations the HTTP layer calls.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use fleet_core::{FleetConfig, FleetPolicy, InstanceTemplate, TimingConfig};
use fleetgrid_autoscale::{ScaleError, ScaleSummary, ScalingController};
use fleetgrid_panel::{PanelClient, PanelError};
use fleetgrid_scheduler::AdmissionController;
use fleetgrid_state::*;

use crate::error::{FleetError, FleetResult};

pub struct FleetManager {
    pub(crate) registry: FleetRegistry,
    pub(crate) panel: Arc<dyn PanelClient>,
    pub(crate) scaler: Arc<ScalingController>,
    admission: AdmissionController,
    pub(crate) policy: FleetPolicy,
    pub(crate) timing: TimingConfig,
    /// Set while a reconcile pass is in flight.
    pub(crate) reconciling: AtomicBool,
}

impl FleetManager {
    pub fn new(
        panel: Arc<dyn PanelClient>,
        policy: FleetPolicy,
        template: InstanceTemplate,
        timing: TimingConfig,
    ) -> Self {
        let registry = FleetRegistry::new();
        let scaler = Arc::new(ScalingController::new(
            registry.clone(),
            panel.clone(),
            policy.clone(),
            template,
        ));
        let admission = AdmissionController::new(scaler.clone());
        Self {
            registry,
            panel,
            scaler,
            admission,
            policy,
            timing,
            reconciling: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &FleetConfig, panel: Arc<dyn PanelClient>) -> Self {
        Self::new(
            panel,
            config.policy.clone(),
            config.template.clone(),
            config.timing.clone(),
        )
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn policy(&self) -> &FleetPolicy {
        &self.policy
    }

    // ── Players ───────────────────────────────────────────────────

    pub async fn join(&self, player_id: &str, preferred: Option<&str>) -> FleetResult<JoinTicket> {
        Ok(self.admission.join(player_id, preferred).await?)
    }

    pub async fn leave(&self, player_id: &str) {
        self.admission.leave(player_id).await;
    }

    /// Record the connected-player count reported by a game process.
    pub fn report_players(&self, instance_id: &str, current: u32) -> FleetResult<InstanceSummary> {
        let inst = self.registry.set_players(instance_id, current)?;
        debug!(%instance_id, players = current, "occupancy reported");
        Ok(InstanceSummary::from(&inst))
    }

    // ── Instances ─────────────────────────────────────────────────

    /// Every registered instance, ordered by id.
    pub fn list_instances(&self) -> Vec<InstanceSummary> {
        self.registry
            .list_all()
            .iter()
            .map(InstanceSummary::from)
            .collect()
    }

    pub fn get_instance(&self, instance_id: &str) -> FleetResult<InstanceSummary> {
        self.registry
            .get(instance_id)
            .map(|inst| InstanceSummary::from(&inst))
            .ok_or_else(|| FleetError::NotFound(instance_id.to_string()))
    }

    /// Provision one instance outside of any join.
    pub async fn create_instance(&self) -> FleetResult<InstanceSummary> {
        match self.scaler.provision_one().await {
            Ok(inst) => Ok(InstanceSummary::from(&inst)),
            // An explicit create against a full fleet is a provisioning failure.
            Err(e @ ScaleError::FleetFull { .. }) => {
                Err(FleetError::Provisioning(PanelError::new(e.to_string())))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn start_instance(&self, instance_id: &str) -> FleetResult<()> {
        Ok(self.scaler.start_instance(instance_id).await?)
    }

    pub async fn stop_instance(&self, instance_id: &str) -> FleetResult<()> {
        Ok(self.scaler.stop_instance(instance_id).await?)
    }

    /// Stop, wait for the panel to report the instance stopped, delete it
    /// on the panel, then forget it locally.
    pub async fn delete_instance(&self, instance_id: &str) -> FleetResult<()> {
        let inst = self
            .registry
            .get(instance_id)
            .ok_or_else(|| FleetError::NotFound(instance_id.to_string()))?;

        if inst.status.can_stop() {
            self.scaler.stop_instance(instance_id).await?;
        }

        if self.wait_until_stopped(instance_id).await? {
            match self.panel.delete_instance(instance_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(%instance_id, "instance already gone from panel");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.registry.remove(instance_id);
        let released = self.admission.release_instance(instance_id);
        info!(%instance_id, released, "instance deleted");
        Ok(())
    }

    /// Poll the panel until it reports `stopped`. Returns `false` if the
    /// panel no longer has the instance at all.
    async fn wait_until_stopped(&self, instance_id: &str) -> FleetResult<bool> {
        let poll = self.timing.stop_poll_interval();
        let timeout = self.timing.stop_timeout();
        let deadline = Instant::now() + timeout;

        loop {
            match self.panel.get_instance(instance_id).await? {
                None => return Ok(false),
                Some(p) if p.status == InstanceStatus::Stopped => {
                    let marked = self
                        .registry
                        .set_status(instance_id, InstanceStatus::Stopped, epoch_secs());
                    if let Err(e) = missing_ok(marked) {
                        warn!(%instance_id, error = %e, "could not mark instance stopped");
                    }
                    return Ok(true);
                }
                Some(p) => {
                    debug!(%instance_id, status = %p.status, "waiting for instance to stop");
                }
            }

            if Instant::now() + poll > deadline {
                warn!(%instance_id, timeout_ms = timeout.as_millis() as u64, "instance did not stop in time");
                return Err(FleetError::Panel(PanelError::new(format!(
                    "instance {instance_id} did not stop within {}ms",
                    timeout.as_millis()
                ))));
            }
            tokio::time::sleep(poll).await;
        }
    }

    // ── Fleet ─────────────────────────────────────────────────────

    pub async fn scale_to(&self, target: u32) -> FleetResult<ScaleSummary> {
        Ok(self.scaler.scale_to(target).await?)
    }

    pub fn status(&self) -> FleetStatus {
        self.registry.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_autoscale::ScaleAction;
    use fleetgrid_panel::PanelOp;

    use crate::test_support::{manager, seed};

    #[tokio::test]
    async fn join_routes_and_leave_is_idempotent() {
        let (panel, manager) = manager(0, 3);
        seed(&panel, &manager, "a", InstanceStatus::Running, 4, 7777);
        seed(&panel, &manager, "b", InstanceStatus::Running, 1, 7778);

        let ticket = manager.join("p1", None).await.unwrap();
        assert_eq!(ticket.instance_id, "b");
        assert_eq!(manager.admission().players_on("b"), vec!["p1"]);

        manager.leave("p1").await;
        manager.leave("p1").await;
        assert!(manager.admission().entry("p1").is_none());
    }

    #[tokio::test]
    async fn join_on_full_fleet_is_capacity_exceeded() {
        let (panel, manager) = manager(0, 1);
        seed(&panel, &manager, "a", InstanceStatus::Running, 10, 7777);

        let err = manager.join("p1", None).await.unwrap_err();
        assert!(matches!(err, FleetError::CapacityExceeded(_)));
        assert_eq!(panel.calls().create, 0);
    }

    #[tokio::test]
    async fn create_instance_returns_starting_summary() {
        let (panel, manager) = manager(0, 1);

        let summary = manager.create_instance().await.unwrap();
        assert_eq!(summary.status, InstanceStatus::Starting);
        assert_eq!(summary.players, 0);
        assert_eq!(summary.max_players, 10);
        assert_eq!(manager.list_instances(), vec![summary]);

        let err = manager.create_instance().await.unwrap_err();
        assert!(matches!(err, FleetError::Provisioning(_)));
        assert_eq!(panel.calls().create, 1);
    }

    #[tokio::test]
    async fn stop_and_start_round_trip() {
        let (panel, manager) = manager(0, 3);
        seed(&panel, &manager, "a", InstanceStatus::Running, 0, 7777);

        manager.stop_instance("a").await.unwrap();
        assert_eq!(manager.get_instance("a").unwrap().status, InstanceStatus::Stopping);

        // Not startable until it has actually stopped.
        let err = manager.start_instance("a").await.unwrap_err();
        assert!(matches!(err, FleetError::InvalidState(_)));

        manager.registry().set_status("a", InstanceStatus::Stopped, 1).unwrap();
        manager.start_instance("a").await.unwrap();
        assert_eq!(manager.get_instance("a").unwrap().status, InstanceStatus::Starting);
    }

    #[tokio::test]
    async fn stop_failure_rolls_back_and_reports_panel_status() {
        let (panel, manager) = manager(0, 3);
        seed(&panel, &manager, "a", InstanceStatus::Running, 0, 7777);
        panel.fail(PanelOp::Power);

        let err = manager.stop_instance("a").await.unwrap_err();
        assert!(matches!(err, FleetError::Panel(_)));
        assert_eq!(err.panel_status(), Some(500));
        assert_eq!(manager.get_instance("a").unwrap().status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let (_panel, manager) = manager(0, 3);
        assert!(matches!(
            manager.stop_instance("ghost").await,
            Err(FleetError::NotFound(_))
        ));
        assert!(matches!(
            manager.delete_instance("ghost").await,
            Err(FleetError::NotFound(_))
        ));
        assert!(matches!(manager.get_instance("ghost"), Err(FleetError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_stops_waits_and_removes() {
        let (panel, manager) = manager(0, 3);
        seed(&panel, &manager, "a", InstanceStatus::Running, 0, 7777);
        manager.join("p1", Some("a")).await.unwrap();

        manager.delete_instance("a").await.unwrap();

        assert!(manager.registry().get("a").is_none());
        assert!(panel.instance("a").is_none());
        assert!(manager.admission().entry("p1").is_none());
        let calls = panel.calls();
        assert_eq!(calls.power, 1);
        assert_eq!(calls.delete, 1);
        assert!(calls.get >= 1);
    }

    #[tokio::test]
    async fn delete_of_stopped_instance_skips_stop_signal() {
        let (panel, manager) = manager(0, 3);
        seed(&panel, &manager, "a", InstanceStatus::Stopped, 0, 7777);

        manager.delete_instance("a").await.unwrap();
        assert_eq!(panel.calls().power, 0);
        assert_eq!(panel.calls().delete, 1);
    }

    #[tokio::test]
    async fn delete_times_out_when_panel_never_stops() {
        let (panel, manager) = manager(0, 3);
        seed(&panel, &manager, "a", InstanceStatus::Running, 0, 7777);
        panel.set_stop_status(InstanceStatus::Stopping);

        let err = manager.delete_instance("a").await.unwrap_err();
        assert!(matches!(err, FleetError::Panel(_)));
        assert!(err.to_string().contains("did not stop"));

        assert_eq!(panel.calls().delete, 0);
        assert_eq!(manager.get_instance("a").unwrap().status, InstanceStatus::Stopping);
        assert!(panel.calls().get > 1);
    }

    #[tokio::test]
    async fn delete_tolerates_instance_missing_on_panel() {
        let (panel, manager) = manager(0, 3);
        seed(&panel, &manager, "a", InstanceStatus::Stopped, 0, 7777);
        panel.delete_instance("a").await.unwrap();

        manager.delete_instance("a").await.unwrap();
        assert!(manager.registry().is_empty());
        // One delete from the setup above, none from the manager.
        assert_eq!(panel.calls().delete, 1);
    }

    #[tokio::test]
    async fn scale_to_through_facade() {
        let (_panel, manager) = manager(0, 3);

        let summary = manager.scale_to(2).await.unwrap();
        assert_eq!(summary.action, ScaleAction::ScaledUp);
        assert_eq!(manager.list_instances().len(), 2);

        assert!(matches!(
            manager.scale_to(4).await,
            Err(FleetError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn report_players_updates_occupancy() {
        let (panel, manager) = manager(0, 3);
        seed(&panel, &manager, "a", InstanceStatus::Running, 0, 7777);
        seed(&panel, &manager, "b", InstanceStatus::Running, 0, 7778);
        assert_eq!(manager.status().idle_instances, 2);

        let summary = manager.report_players("a", 6).unwrap();
        assert_eq!(summary.players, 6);
        assert_eq!(
            manager.status(),
            FleetStatus {
                total_instances: 2,
                running_instances: 2,
                idle_instances: 1,
            }
        );

        assert!(matches!(
            manager.report_players("a", 11),
            Err(FleetError::InvalidState(_))
        ));
        assert_eq!(manager.get_instance("a").unwrap().players, 6);
        assert!(matches!(
            manager.report_players("ghost", 1),
            Err(FleetError::NotFound(_))
        ));
    }
}
