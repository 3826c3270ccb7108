pub mod config;
pub mod duration;

pub use config::{FleetConfig, FleetPolicy, InstanceTemplate, PanelConfig, TimingConfig};
pub use duration::{parse_duration, DurationError};
