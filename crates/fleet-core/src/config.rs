//! fleet.toml configuration parser.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

/// Environment variable that supplies the panel application key when the
/// config file leaves it empty.
pub const PANEL_API_KEY_ENV: &str = "FLEETGRID_PANEL_API_KEY";

/// Environment variable that supplies the panel client key (power actions).
pub const PANEL_CLIENT_KEY_ENV: &str = "FLEETGRID_PANEL_CLIENT_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub policy: FleetPolicy,
    pub panel: PanelConfig,
    pub template: InstanceTemplate,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Sizing rules for the fleet. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetPolicy {
    pub max_players_per_instance: u32,
    pub min_idle_instances: u32,
    pub max_total_instances: u32,
    /// Base port for sequential allocation.
    pub start_port: u16,
    /// Panel instances whose name starts with this prefix belong to the fleet.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Address handed to players when the panel allocation carries none.
    #[serde(default = "default_public_address")]
    pub public_address: String,
}

fn default_name_prefix() -> String {
    "fleet-".to_string()
}

fn default_public_address() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    pub base_url: String,
    /// Application API key (instance CRUD, allocations).
    #[serde(default)]
    pub api_key: String,
    /// Client API key (power actions, live resource state).
    #[serde(default)]
    pub client_api_key: String,
    /// Panel node that hosts the fleet's instances.
    pub node_id: u64,
    #[serde(default = "default_allocation_ip")]
    pub allocation_ip: String,
    #[serde(default = "default_panel_timeout")]
    pub timeout: String,
}

fn default_allocation_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_panel_timeout() -> String {
    "10s".to_string()
}

/// What every provisioned instance looks like on the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceTemplate {
    pub owner_user_id: u64,
    pub egg_id: u64,
    pub docker_image: String,
    pub startup: String,
    pub memory_mb: u64,
    #[serde(default)]
    pub swap_mb: u64,
    pub disk_mb: u64,
    #[serde(default = "default_io_weight")]
    pub io_weight: u32,
    pub cpu_percent: u32,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

fn default_io_weight() -> u32 {
    500
}

/// Background loop cadence and lifecycle timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    pub reconcile_interval: String,
    /// How long an instance may sit in `starting` before it is promoted.
    pub starting_timeout: String,
    pub stop_poll_interval: String,
    pub stop_timeout: String,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: "30s".to_string(),
            starting_timeout: "60s".to_string(),
            stop_poll_interval: "2s".to_string(),
            stop_timeout: "60s".to_string(),
        }
    }
}

impl TimingConfig {
    pub fn reconcile_interval(&self) -> Duration {
        parse_duration(&self.reconcile_interval).unwrap_or(Duration::from_secs(30))
    }

    pub fn starting_timeout(&self) -> Duration {
        parse_duration(&self.starting_timeout).unwrap_or(Duration::from_secs(60))
    }

    pub fn stop_poll_interval(&self) -> Duration {
        parse_duration(&self.stop_poll_interval).unwrap_or(Duration::from_secs(2))
    }

    pub fn stop_timeout(&self) -> Duration {
        parse_duration(&self.stop_timeout).unwrap_or(Duration::from_secs(60))
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (field, value) in [
            ("reconcile_interval", &self.reconcile_interval),
            ("starting_timeout", &self.starting_timeout),
            ("stop_poll_interval", &self.stop_poll_interval),
            ("stop_timeout", &self.stop_timeout),
        ] {
            let parsed = parse_duration(value).with_context(|| format!("timing.{field}"))?;
            if parsed.is_zero() && matches!(field, "reconcile_interval" | "stop_poll_interval") {
                bail!("timing.{field} must be greater than zero");
            }
        }
        Ok(())
    }
}

impl PanelConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(10))
    }

    /// Fill empty keys from the environment.
    fn apply_env(&mut self) {
        if self.api_key.is_empty()
            && let Ok(key) = std::env::var(PANEL_API_KEY_ENV)
        {
            self.api_key = key;
        }
        if self.client_api_key.is_empty()
            && let Ok(key) = std::env::var(PANEL_CLIENT_KEY_ENV)
        {
            self.client_api_key = key;
        }
    }
}

impl FleetPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_players_per_instance == 0 {
            bail!("policy.max_players_per_instance must be greater than zero");
        }
        if self.max_total_instances == 0 {
            bail!("policy.max_total_instances must be greater than zero");
        }
        if self.min_idle_instances > self.max_total_instances {
            bail!(
                "policy.min_idle_instances ({}) exceeds max_total_instances ({})",
                self.min_idle_instances,
                self.max_total_instances
            );
        }
        if u32::from(self.start_port) + self.max_total_instances > u32::from(u16::MAX) {
            bail!(
                "policy.start_port {} leaves no room for {} instances",
                self.start_port,
                self.max_total_instances
            );
        }
        Ok(())
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: FleetConfig = toml::from_str(content)?;
        config.panel.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.policy.validate()?;
        self.timing.validate()?;
        parse_duration(&self.panel.timeout).context("panel.timeout")?;
        if self.panel.base_url.trim().is_empty() {
            bail!("panel.base_url must not be empty");
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Copy with panel keys masked, for printing.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for key in [&mut config.panel.api_key, &mut config.panel.client_api_key] {
            if !key.is_empty() {
                *key = REDACTED.to_string();
            }
        }
        config
    }
}

const REDACTED: &str = "<redacted>";
