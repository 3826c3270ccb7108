//! Typed create-instance request.
//!
//! `InstanceSpec` can only be obtained through `InstanceSpecBuilder::build`,
//! which checks every field once. Adapters serialize the validated spec
//! into their own wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fleet_core::InstanceTemplate;

use crate::error::{PanelError, PanelResult};
use crate::types::Allocation;

/// Per-instance resource limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory_mb: u64,
    pub swap_mb: u64,
    pub disk_mb: u64,
    pub io_weight: u32,
    pub cpu_percent: u32,
}

/// A validated create-instance request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSpec {
    name: String,
    owner_user_id: u64,
    egg_id: u64,
    docker_image: String,
    startup: String,
    limits: ResourceLimits,
    environment: BTreeMap<String, String>,
    allocation_port: u16,
    allocation_id: Option<u64>,
}

impl InstanceSpec {
    pub fn builder(name: impl Into<String>) -> InstanceSpecBuilder {
        InstanceSpecBuilder {
            name: name.into(),
            ..InstanceSpecBuilder::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner_user_id(&self) -> u64 {
        self.owner_user_id
    }

    pub fn egg_id(&self) -> u64 {
        self.egg_id
    }

    pub fn docker_image(&self) -> &str {
        &self.docker_image
    }

    pub fn startup(&self) -> &str {
        &self.startup
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn allocation_port(&self) -> u16 {
        self.allocation_port
    }

    pub fn allocation_id(&self) -> Option<u64> {
        self.allocation_id
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstanceSpecBuilder {
    name: String,
    owner_user_id: u64,
    egg_id: u64,
    docker_image: String,
    startup: String,
    limits: Option<ResourceLimits>,
    environment: BTreeMap<String, String>,
    allocation_port: Option<u16>,
    allocation_id: Option<u64>,
}

impl InstanceSpecBuilder {
    /// Copy image, startup, ownership, limits, and environment from a template.
    pub fn template(mut self, template: &InstanceTemplate) -> Self {
        self.owner_user_id = template.owner_user_id;
        self.egg_id = template.egg_id;
        self.docker_image = template.docker_image.clone();
        self.startup = template.startup.clone();
        self.limits = Some(ResourceLimits {
            memory_mb: template.memory_mb,
            swap_mb: template.swap_mb,
            disk_mb: template.disk_mb,
            io_weight: template.io_weight,
            cpu_percent: template.cpu_percent,
        });
        self.environment.extend(
            template
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn allocation_port(mut self, port: u16) -> Self {
        self.allocation_port = Some(port);
        self
    }

    /// Bind to an allocation the panel already confirmed.
    pub fn allocation(mut self, allocation: &Allocation) -> Self {
        self.allocation_port = Some(allocation.port);
        self.allocation_id = allocation.id;
        self
    }

    pub fn build(self) -> PanelResult<InstanceSpec> {
        let invalid = |what: &str| PanelError::new(format!("invalid instance spec: {what}"));

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.docker_image.trim().is_empty() {
            return Err(invalid("docker image is empty"));
        }
        if self.startup.trim().is_empty() {
            return Err(invalid("startup command is empty"));
        }
        let limits = self.limits.ok_or_else(|| invalid("resource limits missing"))?;
        if limits.memory_mb == 0 || limits.disk_mb == 0 || limits.cpu_percent == 0 {
            return Err(invalid("memory, disk, and cpu limits must be non-zero"));
        }
        let allocation_port = match self.allocation_port {
            Some(port) if port > 0 => port,
            _ => return Err(invalid("allocation port missing")),
        };
        if self.environment.keys().any(|k| k.trim().is_empty()) {
            return Err(invalid("environment variable with empty name"));
        }

        Ok(InstanceSpec {
            name: self.name,
            owner_user_id: self.owner_user_id,
            egg_id: self.egg_id,
            docker_image: self.docker_image,
            startup: self.startup,
            limits,
            environment: self.environment,
            allocation_port,
            allocation_id: self.allocation_id,
        })
    }
}
