//! In-process panel.
//!
//! Behaves like a panel whose servers boot and halt instantly (or on
//! demand), with call counting and per-operation failure injection.
//! `fleetd --memory-panel` runs against it, and so do the controller tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use fleetgrid_state::InstanceStatus;

use crate::client::PanelClient;
use crate::error::{PanelError, PanelResult};
use crate::spec::InstanceSpec;
use crate::types::{Allocation, CreatedInstance, PanelInstance, PowerSignal};

/// Panel operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelOp {
    List,
    Get,
    Create,
    Power,
    Delete,
    Allocation,
}

/// Number of calls made per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: u32,
    pub get: u32,
    pub create: u32,
    pub power: u32,
    pub delete: u32,
    pub allocation: u32,
}

struct MemoryState {
    instances: BTreeMap<String, PanelInstance>,
    allocations: BTreeMap<u16, Allocation>,
    next_id: u64,
    calls: CallCounts,
    failing: HashSet<PanelOp>,
    /// Status a freshly created server reports.
    boot_status: InstanceStatus,
    /// Status a server reports right after a stop signal.
    stop_status: InstanceStatus,
}

pub struct InMemoryPanel {
    ip: String,
    state: Mutex<MemoryState>,
}

impl Default for InMemoryPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPanel {
    pub fn new() -> Self {
        Self {
            // Wildcard bind, so callers substitute their public address.
            ip: "0.0.0.0".to_string(),
            state: Mutex::new(MemoryState {
                instances: BTreeMap::new(),
                allocations: BTreeMap::new(),
                next_id: 1,
                calls: CallCounts::default(),
                failing: HashSet::new(),
                boot_status: InstanceStatus::Starting,
                stop_status: InstanceStatus::Stopped,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call to `op` fail with a 500 until `recover` is called.
    pub fn fail(&self, op: PanelOp) {
        self.lock().failing.insert(op);
    }

    pub fn recover(&self, op: PanelOp) {
        self.lock().failing.remove(&op);
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn set_boot_status(&self, status: InstanceStatus) {
        self.lock().boot_status = status;
    }

    /// `Stopping` here models a panel that takes a while to halt.
    pub fn set_stop_status(&self, status: InstanceStatus) {
        self.lock().stop_status = status;
    }

    /// Seed or overwrite a server.
    pub fn insert(&self, instance: PanelInstance) {
        let mut state = self.lock();
        for alloc in &instance.allocations {
            state.allocations.insert(alloc.port, alloc.clone());
        }
        state.instances.insert(instance.instance_id.clone(), instance);
    }

    pub fn set_status(&self, instance_id: &str, status: InstanceStatus) {
        if let Some(inst) = self.lock().instances.get_mut(instance_id) {
            inst.status = status;
        }
    }

    pub fn instance(&self, instance_id: &str) -> Option<PanelInstance> {
        self.lock().instances.get(instance_id).cloned()
    }

    pub fn instance_count(&self) -> usize {
        self.lock().instances.len()
    }

    /// Count the call, then fail if the operation is marked failing.
    fn enter(state: &mut MemoryState, op: PanelOp) -> PanelResult<()> {
        let calls = &mut state.calls;
        match op {
            PanelOp::List => calls.list += 1,
            PanelOp::Get => calls.get += 1,
            PanelOp::Create => calls.create += 1,
            PanelOp::Power => calls.power += 1,
            PanelOp::Delete => calls.delete += 1,
            PanelOp::Allocation => calls.allocation += 1,
        }
        if state.failing.contains(&op) {
            return Err(PanelError::with_status(500, format!("{op:?} unavailable")));
        }
        Ok(())
    }

    fn allocation_for(&self, state: &mut MemoryState, port: u16) -> Allocation {
        let next = state.allocations.len() as u64 + 1;
        state
            .allocations
            .entry(port)
            .or_insert_with(|| Allocation {
                id: Some(next),
                ip: self.ip.clone(),
                port,
            })
            .clone()
    }
}

#[async_trait]
impl PanelClient for InMemoryPanel {
    async fn list_instances(&self) -> PanelResult<Vec<PanelInstance>> {
        let mut state = self.lock();
        Self::enter(&mut state, PanelOp::List)?;
        Ok(state.instances.values().cloned().collect())
    }

    async fn get_instance(&self, instance_id: &str) -> PanelResult<Option<PanelInstance>> {
        let mut state = self.lock();
        Self::enter(&mut state, PanelOp::Get)?;
        Ok(state.instances.get(instance_id).cloned())
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> PanelResult<CreatedInstance> {
        let mut state = self.lock();
        Self::enter(&mut state, PanelOp::Create)?;

        let port = spec.allocation_port();
        if state
            .instances
            .values()
            .any(|i| i.allocations.iter().any(|a| a.port == port))
        {
            return Err(PanelError::with_status(
                409,
                format!("allocation for port {port} already assigned"),
            ));
        }

        let id = state.next_id.to_string();
        state.next_id += 1;
        let allocation = self.allocation_for(&mut state, port);
        let status = state.boot_status;
        state.instances.insert(
            id.clone(),
            PanelInstance {
                instance_id: id.clone(),
                name: spec.name().to_string(),
                status,
                allocations: vec![allocation],
            },
        );
        debug!(instance_id = %id, port, "in-memory server created");
        Ok(CreatedInstance {
            instance_id: id,
            status,
        })
    }

    async fn power_action(&self, instance_id: &str, signal: PowerSignal) -> PanelResult<()> {
        let mut state = self.lock();
        Self::enter(&mut state, PanelOp::Power)?;
        let next = match signal {
            PowerSignal::Start => state.boot_status,
            PowerSignal::Stop => state.stop_status,
        };
        let inst = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| PanelError::with_status(404, format!("server {instance_id} not found")))?;
        inst.status = next;
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str) -> PanelResult<()> {
        let mut state = self.lock();
        Self::enter(&mut state, PanelOp::Delete)?;
        match state.instances.remove(instance_id) {
            Some(_) => Ok(()),
            None => Err(PanelError::with_status(
                404,
                format!("server {instance_id} not found"),
            )),
        }
    }

    async fn ensure_allocation(&self, port: u16) -> PanelResult<Allocation> {
        let mut state = self.lock();
        Self::enter(&mut state, PanelOp::Allocation)?;
        Ok(self.allocation_for(&mut state, port))
    }
}
