//! Panel-side view of instances and allocations.

use serde::{Deserialize, Serialize};

use fleetgrid_state::InstanceStatus;

/// A port binding on the panel node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Panel allocation id, when the panel exposes one.
    pub id: Option<u64>,
    pub ip: String,
    pub port: u16,
}

impl Allocation {
    /// Address players should dial. Wildcard binds fall back to `public`.
    pub fn connect_address(&self, public: &str) -> String {
        match self.ip.as_str() {
            "" | "0.0.0.0" | "::" => public.to_string(),
            ip => ip.to_string(),
        }
    }
}

/// An instance as the panel reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelInstance {
    pub instance_id: String,
    pub name: String,
    pub status: InstanceStatus,
    pub allocations: Vec<Allocation>,
}

impl PanelInstance {
    pub fn primary_allocation(&self) -> Option<&Allocation> {
        self.allocations.first()
    }
}

/// Acknowledgement of a create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInstance {
    pub instance_id: String,
    pub status: InstanceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSignal {
    Start,
    Stop,
}

impl PowerSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerSignal::Start => "start",
            PowerSignal::Stop => "stop",
        }
    }
}

impl std::fmt::Display for PowerSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
