//! Power actions on registered instances.

use tracing::{info, warn};

use fleetgrid_panel::PowerSignal;
use fleetgrid_state::{epoch_secs, missing_ok, InstanceStatus, ServerInstance};

use crate::error::ScaleResult;
use crate::scaler::ScalingController;

impl ScalingController {
    /// Send a start signal and mark the instance `starting`.
    pub async fn start_instance(&self, instance_id: &str) -> ScaleResult<()> {
        let prior = self.registry.begin_transition(
            instance_id,
            InstanceStatus::Starting,
            epoch_secs(),
            InstanceStatus::can_start,
        )?;
        self.signal(&prior, PowerSignal::Start).await
    }

    /// Send a forced stop and mark the instance `stopping`. Players still
    /// connected are disconnected by the server going down.
    pub async fn stop_instance(&self, instance_id: &str) -> ScaleResult<()> {
        let prior = self.registry.begin_transition(
            instance_id,
            InstanceStatus::Stopping,
            epoch_secs(),
            InstanceStatus::can_stop,
        )?;
        self.signal(&prior, PowerSignal::Stop).await
    }

    async fn signal(&self, prior: &ServerInstance, signal: PowerSignal) -> ScaleResult<()> {
        let id = prior.instance_id.as_str();
        if let Err(e) = self.panel.power_action(id, signal).await {
            warn!(instance_id = %id, %signal, error = %e, "power action failed, status restored");
            // Removed concurrently: nothing to restore.
            if let Err(restore) = missing_ok(self.registry.restore_status(prior)) {
                warn!(instance_id = %id, error = %restore, "could not restore status");
            }
            return Err(e.into());
        }
        info!(instance_id = %id, %signal, from = %prior.status, "power signal sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fleetgrid_panel::PanelOp;
    use fleetgrid_state::{InstanceStatus, StateError};

    use crate::error::ScaleError;
    use crate::scaler::tests::{controller, seed, test_policy};

    #[tokio::test]
    async fn stop_marks_stopping_and_signals_panel() {
        let (panel, registry, scaler) = controller(test_policy(0, 3));
        seed(&panel, &registry, "a", InstanceStatus::Running, 2, 7777);

        scaler.stop_instance("a").await.unwrap();

        let inst = registry.get("a").unwrap();
        assert_eq!(inst.status, InstanceStatus::Stopping);
        assert!(inst.last_update > 1000);
        assert_eq!(panel.instance("a").unwrap().status, InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_failure_restores_status() {
        let (panel, registry, scaler) = controller(test_policy(0, 3));
        seed(&panel, &registry, "a", InstanceStatus::Running, 0, 7777);
        panel.fail(PanelOp::Power);

        let result = scaler.stop_instance("a").await;
        assert!(matches!(result, Err(ScaleError::Panel(_))));

        let inst = registry.get("a").unwrap();
        assert_eq!(inst.status, InstanceStatus::Running);
        assert_eq!(inst.last_update, 1000);
    }

    #[tokio::test]
    async fn stop_from_stopped_is_invalid() {
        let (panel, registry, scaler) = controller(test_policy(0, 3));
        seed(&panel, &registry, "a", InstanceStatus::Stopped, 0, 7777);

        let result = scaler.stop_instance("a").await;
        assert!(matches!(
            result,
            Err(ScaleError::State(StateError::InvalidState(_)))
        ));
        assert_eq!(panel.calls().power, 0);
    }

    #[tokio::test]
    async fn start_requires_stopped_or_unknown() {
        let (panel, registry, scaler) = controller(test_policy(0, 3));
        seed(&panel, &registry, "a", InstanceStatus::Running, 0, 7777);
        seed(&panel, &registry, "b", InstanceStatus::Unknown, 0, 7778);

        assert!(matches!(
            scaler.start_instance("a").await,
            Err(ScaleError::State(StateError::InvalidState(_)))
        ));

        scaler.start_instance("b").await.unwrap();
        assert_eq!(registry.get("b").unwrap().status, InstanceStatus::Starting);
        assert_eq!(panel.calls().power, 1);
    }

    #[tokio::test]
    async fn power_on_missing_instance_is_not_found() {
        let (_panel, _registry, scaler) = controller(test_policy(0, 3));
        assert!(matches!(
            scaler.start_instance("ghost").await,
            Err(ScaleError::State(StateError::NotFound(_)))
        ));
    }
}
