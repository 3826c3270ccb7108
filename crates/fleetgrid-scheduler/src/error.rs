//! Admission error types.

use thiserror::Error;

use fleetgrid_autoscale::ScaleError;
use fleetgrid_panel::PanelError;
use fleetgrid_state::StateError;

/// Why a join could not be admitted.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Every instance is full and the fleet cannot grow. Retry later.
    #[error("all servers full, retry later (fleet maximum is {max} instances)")]
    CapacityExceeded { max: u32 },

    #[error("provisioning failed: {0}")]
    Provisioning(PanelError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

pub type AdmissionResult<T> = Result<T, AdmissionError>;

impl From<ScaleError> for AdmissionError {
    fn from(err: ScaleError) -> Self {
        match err {
            ScaleError::FleetFull { max } | ScaleError::TargetTooLarge { max, .. } => {
                AdmissionError::CapacityExceeded { max }
            }
            ScaleError::Provisioning(e) | ScaleError::Panel(e) => AdmissionError::Provisioning(e),
            ScaleError::State(e) => AdmissionError::State(e),
        }
    }
}
