//! fleetgrid-autoscale — fleet sizing for game-server instances.
//!
//! The `ScalingController` keeps a floor of idle capacity warm, answers
//! direct scale-to-target requests, and performs the power actions that
//! move instances through their lifecycle.
//!
//! # Sizing rules
//!
//! ```text
//! idle      = running or starting instances with zero players
//! total     = every registered instance (each holds a panel resource)
//!
//! ensure_minimum_idle:
//!     if idle < min_idle and total < max_total:
//!         provision min(min_idle - idle, max_total - total), stop at first failure
//!
//! scale_to(target), against active = instances not stopping/stopped:
//!     target > active  → restart stopped instances, then provision the rest
//!     target < active  → stop (active - target), emptiest first
//! ```
//!
//! Provisioning is serialized behind one async lock so two callers can
//! never both pass the `max_total_instances` guard for the last slot.

pub mod error;
pub mod power;
pub mod scaler;

pub use error::{ScaleError, ScaleResult};
pub use scaler::{ScaleAction, ScaleSummary, ScalingController};
