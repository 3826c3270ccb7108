//! Facade error taxonomy.

use thiserror::Error;

use fleetgrid_autoscale::ScaleError;
use fleetgrid_panel::PanelError;
use fleetgrid_scheduler::AdmissionError;
use fleetgrid_state::StateError;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("instance not found: {0}")]
    NotFound(String),

    /// The operation would break a data-model invariant. Never retried.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No room for another player or instance. Retry later.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("provisioning failed: {0}")]
    Provisioning(PanelError),

    #[error(transparent)]
    Panel(#[from] PanelError),
}

pub type FleetResult<T> = Result<T, FleetError>;

impl FleetError {
    /// Status code reported by the panel, if a panel call caused this.
    pub fn panel_status(&self) -> Option<u16> {
        match self {
            FleetError::Provisioning(e) | FleetError::Panel(e) => e.status,
            _ => None,
        }
    }
}

impl From<StateError> for FleetError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(id) => FleetError::NotFound(id),
            StateError::InvalidState(msg) => FleetError::InvalidState(msg),
        }
    }
}

impl From<ScaleError> for FleetError {
    fn from(err: ScaleError) -> Self {
        match err {
            e @ ScaleError::FleetFull { .. } => FleetError::CapacityExceeded(e.to_string()),
            e @ ScaleError::TargetTooLarge { .. } => FleetError::InvalidState(e.to_string()),
            ScaleError::Provisioning(e) => FleetError::Provisioning(e),
            ScaleError::Panel(e) => FleetError::Panel(e),
            ScaleError::State(e) => e.into(),
        }
    }
}

impl From<AdmissionError> for FleetError {
    fn from(err: AdmissionError) -> Self {
        match err {
            e @ AdmissionError::CapacityExceeded { .. } => {
                FleetError::CapacityExceeded(e.to_string())
            }
            AdmissionError::Provisioning(e) => FleetError::Provisioning(e),
            AdmissionError::State(e) => e.into(),
        }
    }
}
