//! Scaling error types.

use thiserror::Error;

use fleetgrid_panel::PanelError;
use fleetgrid_state::StateError;

#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("fleet is at its maximum of {max} instances")]
    FleetFull { max: u32 },

    /// Create or allocation call failed. Never retried automatically.
    #[error("provisioning failed: {0}")]
    Provisioning(PanelError),

    #[error("scale target {target} exceeds the maximum of {max} instances")]
    TargetTooLarge { target: u32, max: u32 },

    #[error(transparent)]
    Panel(#[from] PanelError),

    #[error(transparent)]
    State(#[from] StateError),
}

pub type ScaleResult<T> = Result<T, ScaleError>;
