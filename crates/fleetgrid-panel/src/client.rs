//! The panel capability every fleet component depends on.

use async_trait::async_trait;

use crate::error::PanelResult;
use crate::spec::InstanceSpec;
use crate::types::{Allocation, CreatedInstance, PanelInstance, PowerSignal};

/// Hosting panel operations.
///
/// Implementations must be cheap to share behind an `Arc` and safe to
/// call from concurrent tasks.
#[async_trait]
pub trait PanelClient: Send + Sync {
    /// Instances the panel knows about. Clients configured with a name
    /// prefix return only matching ones; others return everything.
    async fn list_instances(&self) -> PanelResult<Vec<PanelInstance>>;

    /// A single instance, or `None` if the panel no longer has it.
    async fn get_instance(&self, instance_id: &str) -> PanelResult<Option<PanelInstance>>;

    async fn create_instance(&self, spec: &InstanceSpec) -> PanelResult<CreatedInstance>;

    async fn power_action(&self, instance_id: &str, signal: PowerSignal) -> PanelResult<()>;

    async fn delete_instance(&self, instance_id: &str) -> PanelResult<()>;

    /// Return the node allocation for `port`, creating it if missing.
    async fn ensure_allocation(&self, port: u16) -> PanelResult<Allocation>;
}
