//! fleetgrid-manager — the fleet facade.
//!
//! `FleetManager` composes the registry, the scaling controller, and the
//! admission controller behind one set of operations, and owns the
//! reconciliation that keeps local bookkeeping in line with the panel.
//!
//! # Background loop
//!
//! ```text
//! every reconcile_interval (skipped while a pass is in flight):
//!   1. reconcile    — pull panel list, merge fleet-owned instances,
//!                     promote instances stuck in `starting`
//!   2. idle top-up  — ScalingController::ensure_minimum_idle
//! ```
//!
//! Errors inside the loop are logged and the loop carries on.

pub mod error;
pub mod manager;
pub mod reconcile;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{FleetError, FleetResult};
pub use manager::FleetManager;
pub use reconcile::ReconcileReport;
