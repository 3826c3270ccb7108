//! fleetgrid-panel — the hosting panel as a capability.
//!
//! The panel owns the actual compute: it creates, powers, lists, and
//! deletes game-server instances and hands out port allocations. The
//! rest of the workspace only sees the `PanelClient` trait.
//!
//! # Implementations
//!
//! ```text
//! PanelClient (trait)
//!   ├── HttpPanelClient  — panel application + client REST APIs over reqwest
//!   └── InMemoryPanel    — in-process panel for dry runs and tests
//! ```
//!
//! Create payloads are built through `InstanceSpec::builder`, which
//! validates the request once before anything goes on the wire.

pub mod client;
pub mod error;
pub mod http;
pub mod memory;
pub mod spec;
pub mod types;

pub use client::PanelClient;
pub use error::{PanelError, PanelResult};
pub use http::HttpPanelClient;
pub use memory::{CallCounts, InMemoryPanel, PanelOp};
pub use spec::{InstanceSpec, InstanceSpecBuilder, ResourceLimits};
pub use types::{Allocation, CreatedInstance, PanelInstance, PowerSignal};
