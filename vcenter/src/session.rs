//! Management endpoint seam
//!
//! A [`Connector`] opens one authenticated [`Session`] per operation. The
//! session exposes just enough of the platform to walk the VM folders and to
//! drive power operations; everything above it is backend independent.

use async_trait::async_trait;
use core::fmt;

use crate::error::Result;
use crate::inventory::{EntityRef, ToolsStatus, VmDetails, VmSummary};

/// State of an asynchronous platform task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Queued | TaskState::Running)
    }

    pub fn is_success(&self) -> bool {
        *self == TaskState::Success
    }

    pub fn is_failed(&self) -> bool {
        *self == TaskState::Error
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Queued => write!(f, "queued"),
            TaskState::Running => write!(f, "running"),
            TaskState::Success => write!(f, "success"),
            TaskState::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of a task as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub state: TaskState,
    /// Platform error text when `state` is `Error`.
    pub error: Option<String>,
}

impl TaskInfo {
    pub fn new(state: TaskState) -> Self {
        Self { state, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: TaskState::Error,
            error: Some(error.into()),
        }
    }
}

/// Handle for an in-flight power operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerTask {
    pub id: String,
    /// VM the task acts on.
    pub vm: EntityRef,
    /// Platform operation name, used in logs.
    pub operation: &'static str,
}

/// An open, authenticated session against the management endpoint.
#[async_trait]
pub trait Session: Send + Sync {
    /// Top-level datacenters in inventory order.
    async fn datacenters(&self) -> Result<Vec<EntityRef>>;

    /// Root VM folder of a datacenter.
    async fn vm_folder(&self, datacenter: &EntityRef) -> Result<EntityRef>;

    /// Direct children of a folder.
    async fn child_entities(&self, folder: &EntityRef) -> Result<Vec<EntityRef>>;

    /// Resource pools nested directly under a pool.
    ///
    /// Backends whose folder listings never yield pools keep the empty default.
    async fn child_pools(&self, _pool: &EntityRef) -> Result<Vec<EntityRef>> {
        Ok(Vec::new())
    }

    /// VMs attached directly to a pool.
    async fn pool_vms(&self, _pool: &EntityRef) -> Result<Vec<EntityRef>> {
        Ok(Vec::new())
    }

    async fn vm_summary(&self, vm: &EntityRef) -> Result<VmSummary>;

    async fn vm_details(&self, vm: &EntityRef) -> Result<VmDetails>;

    async fn tools_status(&self, vm: &EntityRef) -> Result<ToolsStatus>;

    async fn power_on(&self, vm: &EntityRef) -> Result<PowerTask>;

    async fn power_off(&self, vm: &EntityRef) -> Result<PowerTask>;

    /// Ask guest tools for a clean shutdown. Returns once issued.
    async fn shutdown_guest(&self, vm: &EntityRef) -> Result<()>;

    /// Ask guest tools for a reboot. Returns once issued.
    async fn reboot_guest(&self, vm: &EntityRef) -> Result<()>;

    async fn task_info(&self, task: &PowerTask) -> Result<TaskInfo>;

    async fn logout(&self) -> Result<()>;
}

/// Opens sessions against one management endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Session>>;
}
