//! fleetgrid-state — in-memory fleet bookkeeping.
//!
//! Holds the authoritative local view of the fleet's game-server
//! instances (`FleetRegistry`) and the domain types shared by the
//! scheduler, autoscaler, and manager crates.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{missing_ok, StateError, StateResult};
pub use registry::FleetRegistry;
pub use types::*;
