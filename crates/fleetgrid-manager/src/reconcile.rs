//! Reconciliation against the panel and the background loop driving it.
//!
//! The merge is conservative: instances the panel stops listing are kept
//! until an explicit delete removes them.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleetgrid_panel::PanelInstance;
use fleetgrid_state::*;

use crate::error::{FleetError, FleetResult};
use crate::manager::FleetManager;

/// Counts from one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Fleet-owned instances listed by the panel.
    pub seen: u32,
    pub inserted: u32,
    pub updated: u32,
    /// `starting` instances promoted to `running` on timeout.
    pub promoted: u32,
}

/// Clears the in-flight flag when the pass ends.
pub(crate) struct ReconcileGuard<'a>(&'a AtomicBool);

impl Drop for ReconcileGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FleetManager {
    pub(crate) fn try_begin_reconcile(&self) -> Option<ReconcileGuard<'_>> {
        self.reconciling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ReconcileGuard(&self.reconciling))
    }

    /// Pull the panel's instance list into the registry.
    ///
    /// Fails with `InvalidState` if another pass is already running.
    pub async fn reconcile(&self) -> FleetResult<ReconcileReport> {
        let Some(_guard) = self.try_begin_reconcile() else {
            return Err(FleetError::InvalidState(
                "reconciliation already in progress".to_string(),
            ));
        };
        self.reconcile_locked().await
    }

    async fn reconcile_locked(&self) -> FleetResult<ReconcileReport> {
        let listed = self.panel.list_instances().await?;
        let now = epoch_secs();
        let mut report = ReconcileReport::default();

        for remote in listed
            .iter()
            .filter(|p| p.name.starts_with(&self.policy.name_prefix))
        {
            report.seen += 1;
            match self.registry.get(&remote.instance_id) {
                None => {
                    if self.adopt(remote, now)? {
                        report.inserted += 1;
                    }
                }
                Some(local) => {
                    if self.merge(&local, remote, now)? {
                        report.updated += 1;
                    }
                }
            }
        }

        let timeout = self.timing.starting_timeout().as_secs();
        let promoted = self.registry.promote_stale_starting(timeout, now);
        for id in &promoted {
            info!(instance_id = %id, timeout_secs = timeout, "starting instance promoted to running");
        }
        report.promoted = promoted.len() as u32;

        debug!(
            seen = report.seen,
            inserted = report.inserted,
            updated = report.updated,
            promoted = report.promoted,
            "reconcile pass complete"
        );
        Ok(report)
    }

    /// Register a fleet-owned instance the registry does not know yet.
    fn adopt(&self, remote: &PanelInstance, now: u64) -> FleetResult<bool> {
        let Some(alloc) = remote.primary_allocation() else {
            warn!(instance_id = %remote.instance_id, "panel instance has no allocation, not adopted");
            return Ok(false);
        };
        self.registry.upsert(ServerInstance {
            instance_id: remote.instance_id.clone(),
            // The panel does not echo our local id back; adopted instances
            // are known by their panel id.
            local_id: remote.instance_id.clone(),
            display_name: remote.name.clone(),
            status: remote.status,
            capacity: Capacity::empty(self.policy.max_players_per_instance),
            address: alloc.connect_address(&self.policy.public_address),
            port: alloc.port,
            last_update: now,
        })?;
        info!(instance_id = %remote.instance_id, status = %remote.status, "instance adopted from panel");
        Ok(true)
    }

    /// Fold the panel's view into a known instance. Returns whether anything changed.
    fn merge(&self, local: &ServerInstance, remote: &PanelInstance, now: u64) -> FleetResult<bool> {
        let status = merged_status(local.status, remote.status);
        let (address, port) = match remote.primary_allocation() {
            Some(a) => (a.connect_address(&self.policy.public_address), a.port),
            None => (local.address.clone(), local.port),
        };

        if status == local.status && address == local.address && port == local.port {
            return Ok(false);
        }

        self.registry.update(&local.instance_id, |inst| {
            inst.transition(status, now);
            inst.address = address;
            inst.port = port;
        })?;
        if status != local.status {
            info!(
                instance_id = %local.instance_id,
                from = %local.status,
                to = %status,
                "instance status reconciled"
            );
        }
        Ok(true)
    }

    /// One background pass: reconcile, then top up idle capacity.
    /// Never fails; returns `None` when skipped or when reconcile failed.
    pub async fn tick(&self) -> Option<ReconcileReport> {
        let Some(_guard) = self.try_begin_reconcile() else {
            debug!("reconcile still in flight, tick skipped");
            return None;
        };

        let report = match self.reconcile_locked().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "reconcile failed, keeping current registry");
                None
            }
        };
        self.scaler.ensure_minimum_idle().await;
        report
    }

    /// Tick every `reconcile_interval` until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.timing.reconcile_interval();
        info!(interval_ms = interval.as_millis() as u64, "reconcile loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("reconcile loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Panel status wins, except that `unknown` tells us nothing, a panel
/// still saying `starting` does not undo a promotion, and a stop in
/// flight only completes once the panel reports `stopped`.
fn merged_status(local: InstanceStatus, remote: InstanceStatus) -> InstanceStatus {
    match (local, remote) {
        (local, InstanceStatus::Unknown) => local,
        (InstanceStatus::Running, InstanceStatus::Starting) => InstanceStatus::Running,
        (InstanceStatus::Stopping, InstanceStatus::Running | InstanceStatus::Starting) => {
            InstanceStatus::Stopping
        }
        (_, remote) => remote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use fleetgrid_panel::{PanelClient, PanelOp};

    use crate::test_support::{manager, panel_instance, seed};

    #[test]
    fn merge_rules() {
        use InstanceStatus::*;
        assert_eq!(merged_status(Starting, Running), Running);
        assert_eq!(merged_status(Running, Stopped), Stopped);
        assert_eq!(merged_status(Running, Unknown), Running);
        assert_eq!(merged_status(Running, Starting), Running);
        assert_eq!(merged_status(Stopping, Stopped), Stopped);
        assert_eq!(merged_status(Stopping, Running), Stopping);
        assert_eq!(merged_status(Stopping, Starting), Stopping);
        assert_eq!(merged_status(Stopped, Starting), Starting);
    }

    #[tokio::test]
    async fn reconcile_adopts_fleet_owned_instances_only() {
        let (panel, manager) = manager(0, 5);
        panel.insert(panel_instance("1", "fleet-7777", InstanceStatus::Running, 7777));
        panel.insert(panel_instance("2", "fleet-7778", InstanceStatus::Stopped, 7778));
        panel.insert(panel_instance("3", "website", InstanceStatus::Running, 8080));

        let report = manager.reconcile().await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                seen: 2,
                inserted: 2,
                updated: 0,
                promoted: 0,
            }
        );

        let listed = manager.list_instances();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].instance_id, "1");
        assert_eq!(listed[0].status, InstanceStatus::Running);
        assert_eq!(listed[0].address, "203.0.113.10");
        assert_eq!(listed[0].port, 7777);
        assert_eq!(listed[0].max_players, 10);
        assert_eq!(listed[1].status, InstanceStatus::Stopped);
        assert!(manager.registry().get("3").is_none());
    }

    #[tokio::test]
    async fn reconcile_reflects_panel_status_and_keeps_occupancy() {
        let (panel, manager) = manager(0, 5);
        seed(&panel, &manager, "a", InstanceStatus::Starting, 0, 7777);
        seed(&panel, &manager, "b", InstanceStatus::Running, 4, 7778);
        panel.set_status("a", InstanceStatus::Running);
        panel.set_status("b", InstanceStatus::Stopped);

        let report = manager.reconcile().await.unwrap();
        assert_eq!(report.updated, 2);

        assert_eq!(manager.get_instance("a").unwrap().status, InstanceStatus::Running);
        let b = manager.get_instance("b").unwrap();
        assert_eq!(b.status, InstanceStatus::Stopped);
        assert_eq!(b.players, 4);

        // Nothing changed on the panel since: nothing to update.
        let again = manager.reconcile().await.unwrap();
        assert_eq!(again.updated, 0);
    }

    #[tokio::test]
    async fn reconcile_keeps_instances_missing_from_panel() {
        let (panel, manager) = manager(0, 5);
        seed(&panel, &manager, "a", InstanceStatus::Running, 2, 7777);
        panel.delete_instance("a").await.unwrap();

        let report = manager.reconcile().await.unwrap();
        assert_eq!(report.seen, 0);
        assert_eq!(manager.get_instance("a").unwrap().status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn stopping_instance_stays_out_of_rotation() {
        let (panel, manager) = manager(0, 1);
        seed(&panel, &manager, "a", InstanceStatus::Running, 0, 7777);
        panel.set_stop_status(InstanceStatus::Running);

        manager.stop_instance("a").await.unwrap();
        manager.reconcile().await.unwrap();
        assert_eq!(manager.get_instance("a").unwrap().status, InstanceStatus::Stopping);

        // Nothing joinable and no room to grow.
        assert!(matches!(
            manager.join("p1", None).await,
            Err(FleetError::CapacityExceeded(_))
        ));

        panel.set_status("a", InstanceStatus::Stopped);
        manager.reconcile().await.unwrap();
        assert_eq!(manager.get_instance("a").unwrap().status, InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn unknown_panel_status_keeps_local() {
        let (panel, manager) = manager(0, 5);
        seed(&panel, &manager, "a", InstanceStatus::Running, 0, 7777);
        panel.set_status("a", InstanceStatus::Unknown);

        let before = manager.get_instance("a").unwrap();
        manager.reconcile().await.unwrap();
        assert_eq!(manager.get_instance("a").unwrap(), before);
    }

    #[tokio::test]
    async fn stale_starting_instance_is_promoted() {
        let (panel, manager) = manager(0, 5);
        seed(&panel, &manager, "a", InstanceStatus::Starting, 0, 7777);
        seed(&panel, &manager, "b", InstanceStatus::Starting, 0, 7778);
        manager
            .registry()
            .update("a", |inst| inst.last_update = 0)
            .unwrap();

        let report = manager.reconcile().await.unwrap();
        assert_eq!(report.promoted, 1);
        assert_eq!(manager.get_instance("a").unwrap().status, InstanceStatus::Running);
        assert_eq!(manager.get_instance("b").unwrap().status, InstanceStatus::Starting);

        // Panel still reports starting; the promotion sticks.
        manager.reconcile().await.unwrap();
        assert_eq!(manager.get_instance("a").unwrap().status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn reconcile_surfaces_panel_failure() {
        let (panel, manager) = manager(0, 5);
        panel.fail(PanelOp::List);

        assert!(matches!(manager.reconcile().await, Err(FleetError::Panel(_))));
        // The flag is cleared even on failure.
        panel.recover(PanelOp::List);
        assert!(manager.reconcile().await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_reconcile_is_rejected_and_tick_skips() {
        let (panel, manager) = manager(1, 5);
        let guard = manager.try_begin_reconcile().unwrap();

        assert!(matches!(
            manager.reconcile().await,
            Err(FleetError::InvalidState(_))
        ));
        assert!(manager.tick().await.is_none());
        assert_eq!(panel.calls().list, 0);
        assert_eq!(panel.calls().create, 0);

        drop(guard);
        assert!(manager.tick().await.is_some());
    }

    #[tokio::test]
    async fn tick_tops_up_idle_even_when_listing_fails() {
        let (panel, manager) = manager(2, 5);
        panel.fail(PanelOp::List);

        assert!(manager.tick().await.is_none());
        assert_eq!(panel.calls().create, 2);
        assert_eq!(manager.status().total_instances, 2);
    }

    #[tokio::test]
    async fn tick_swallows_provisioning_failure() {
        let (panel, manager) = manager(1, 5);
        panel.fail(PanelOp::Create);

        let report = manager.tick().await.unwrap();
        assert_eq!(report.seen, 0);
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn run_loop_ticks_until_shutdown() {
        let (panel, manager) = manager(1, 5);
        let manager = Arc::new(manager);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run(rx).await }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(panel.calls().list >= 1);
        assert_eq!(manager.status().total_instances, 1);
    }
}
