//! fleetgrid-scheduler — player admission onto fleet instances.
//!
//! The `AdmissionController` maps a joining player to a connectable
//! instance and owns the per-player `QueueEntry` records:
//!
//! - Honors a preferred instance when it is running and has room
//! - Otherwise picks the least-loaded running instance
//! - Provisions exactly one instance when nothing qualifies
//! - Serializes join/leave per player
//!
//! # Architecture
//!
//! ```text
//! AdmissionController
//!   ├── FleetRegistry (read-only snapshot for selection)
//!   ├── ScalingController (synchronous provisioning on a miss)
//!   └── entries: player_id → QueueEntry
//! ```

pub mod admission;
pub mod error;
pub mod selector;

pub use admission::AdmissionController;
pub use error::{AdmissionError, AdmissionResult};
pub use selector::{least_loaded, select_instance};
