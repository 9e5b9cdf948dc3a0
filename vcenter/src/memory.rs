//! In-memory management endpoint.
//!
//! Builds a small inventory tree in an arena and serves it through the
//! [`Connector`]/[`Session`] traits. Power calls, session open/close counts and
//! task progress are recorded so tests can assert on what reached the
//! "platform".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, VcError};
use crate::inventory::{
    DiskInfo, EntityKind, EntityRef, PowerState, ToolsStatus, VmDetails, VmSummary,
};
use crate::session::{Connector, PowerTask, Session, TaskInfo, TaskState};

/// How power tasks on a VM finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskBehavior {
    /// Report running once, then succeed.
    Succeed,
    /// Report running once, then fail with the message.
    Fail(String),
    /// Never leave the running state.
    Stall,
}

/// VM definition for [`MemoryInventory::vm`].
#[derive(Debug, Clone)]
pub struct VmSpec {
    name: String,
    power_state: PowerState,
    cpu_count: u32,
    memory_mb: u64,
    guest_os: String,
    ip_address: Option<String>,
    created_time: Option<DateTime<Utc>>,
    tools: ToolsStatus,
    disks: Vec<DiskInfo>,
    tasks: TaskBehavior,
}

impl VmSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            power_state: PowerState::PoweredOff,
            cpu_count: 2,
            memory_mb: 4096,
            guest_os: "Ubuntu Linux (64-bit)".to_string(),
            ip_address: None,
            created_time: None,
            tools: ToolsStatus::ToolsNotRunning,
            disks: Vec::new(),
            tasks: TaskBehavior::Succeed,
        }
    }

    pub fn powered_on(mut self) -> Self {
        self.power_state = PowerState::PoweredOn;
        self
    }

    pub fn suspended(mut self) -> Self {
        self.power_state = PowerState::Suspended;
        self
    }

    pub fn cpus(mut self, count: u32) -> Self {
        self.cpu_count = count;
        self
    }

    pub fn memory_mb(mut self, mb: u64) -> Self {
        self.memory_mb = mb;
        self
    }

    pub fn guest_os(mut self, os: impl Into<String>) -> Self {
        self.guest_os = os.into();
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_time = Some(at);
        self
    }

    pub fn tools(mut self, status: ToolsStatus) -> Self {
        self.tools = status;
        self
    }

    pub fn tools_ok(self) -> Self {
        self.tools(ToolsStatus::ToolsOk)
    }

    pub fn disk_gb(mut self, label: impl Into<String>, gb: u64) -> Self {
        self.disks
            .push(DiskInfo::from_capacity_bytes(label, gb * 1024 * 1024 * 1024));
        self
    }

    pub fn failing_tasks(mut self, message: impl Into<String>) -> Self {
        self.tasks = TaskBehavior::Fail(message.into());
        self
    }

    pub fn stalled_tasks(mut self) -> Self {
        self.tasks = TaskBehavior::Stall;
        self
    }
}

#[derive(Debug)]
struct Node {
    name: String,
    kind: EntityKind,
    /// Folder children, in insertion order.
    children: Vec<usize>,
    /// Pools nested under a pool.
    pools: Vec<usize>,
    /// VMs attached to a pool.
    pool_vms: Vec<usize>,
    vm_folder: Option<usize>,
    vm: Option<VmSpec>,
}

impl Node {
    fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            children: Vec::new(),
            pools: Vec::new(),
            pool_vms: Vec::new(),
            vm_folder: None,
            vm: None,
        }
    }
}

/// Arena-backed inventory tree. Builder methods return node handles.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    nodes: Vec<Node>,
    datacenters: Vec<usize>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a datacenter and return the handle of its VM folder.
    pub fn datacenter(&mut self, name: &str) -> usize {
        let folder = self.push(Node::new("vm", EntityKind::Folder));
        let mut dc = Node::new(name, EntityKind::Datacenter);
        dc.vm_folder = Some(folder);
        let dc = self.push(dc);
        self.datacenters.push(dc);
        folder
    }

    pub fn folder(&mut self, parent: usize, name: &str) -> usize {
        let id = self.push(Node::new(name, EntityKind::Folder));
        self.attach(parent, id);
        id
    }

    /// Pool under a folder (a vApp) or nested under another pool.
    pub fn resource_pool(&mut self, parent: usize, name: &str) -> usize {
        let id = self.push(Node::new(name, EntityKind::ResourcePool));
        self.attach(parent, id);
        id
    }

    pub fn vm(&mut self, parent: usize, spec: VmSpec) -> usize {
        let mut node = Node::new(spec.name.clone(), EntityKind::VirtualMachine);
        node.vm = Some(spec);
        let id = self.push(node);
        self.attach(parent, id);
        id
    }

    /// Entity that is neither a container nor a VM.
    pub fn other(&mut self, parent: usize, name: &str) -> usize {
        let id = self.push(Node::new(name, EntityKind::Other));
        self.attach(parent, id);
        id
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn attach(&mut self, parent: usize, child: usize) {
        let child_kind = self.nodes[child].kind;
        let parent = &mut self.nodes[parent];
        match (parent.kind, child_kind) {
            (EntityKind::ResourcePool, EntityKind::ResourcePool) => parent.pools.push(child),
            (EntityKind::ResourcePool, _) => parent.pool_vms.push(child),
            _ => parent.children.push(child),
        }
    }

    fn entity(&self, idx: usize) -> EntityRef {
        let node = &self.nodes[idx];
        EntityRef::new(format!("mem-{}", idx), node.name.clone(), node.kind)
    }

    fn lookup(&self, entity: &EntityRef) -> Result<usize> {
        entity
            .id
            .strip_prefix("mem-")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|idx| *idx < self.nodes.len())
            .ok_or_else(|| VcError::QueryFailed(format!("Unknown entity: {}", entity.id)))
    }

    fn vm_spec(&self, entity: &EntityRef) -> Result<&VmSpec> {
        let idx = self.lookup(entity)?;
        self.nodes[idx]
            .vm
            .as_ref()
            .ok_or_else(|| VcError::QueryFailed(format!("Not a virtual machine: {}", entity.id)))
    }

    fn vm_spec_mut(&mut self, idx: usize) -> Option<&mut VmSpec> {
        self.nodes[idx].vm.as_mut()
    }
}

#[derive(Debug)]
struct MemTask {
    vm: usize,
    target: PowerState,
    polls: u32,
    behavior: TaskBehavior,
}

#[derive(Debug, Default)]
struct State {
    inventory: MemoryInventory,
    tasks: HashMap<String, MemTask>,
    calls: Vec<String>,
    sessions_opened: usize,
    sessions_closed: usize,
    next_task: u64,
    connect_error: Option<String>,
    query_error: Option<String>,
    listing_summaries: bool,
    summary_lookups: usize,
}

impl State {
    /// Entity as returned by a listing, with its summary attached when the
    /// connector is set to serve listings the way the REST API does.
    fn listed(&self, idx: usize) -> EntityRef {
        let entity = self.inventory.entity(idx);
        match (self.listing_summaries, &self.inventory.nodes[idx].vm) {
            (true, Some(spec)) => entity.with_summary(VmSummary {
                name: spec.name.clone(),
                power_state: spec.power_state,
                cpu_count: spec.cpu_count,
                memory_size: spec.memory_mb,
            }),
            _ => entity,
        }
    }
}

/// Connector serving a [`MemoryInventory`].
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<State>>,
}

impl MemoryConnector {
    pub fn new(inventory: MemoryInventory) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                inventory,
                ..Default::default()
            })),
        }
    }

    /// Make every connect attempt fail.
    pub fn fail_connect(self, message: impl Into<String>) -> Self {
        lock(&self.state).connect_error = Some(message.into());
        self
    }

    /// Make every inventory query fail after connecting.
    pub fn fail_queries(self, message: impl Into<String>) -> Self {
        lock(&self.state).query_error = Some(message.into());
        self
    }

    /// Attach VM summaries to folder and pool listings.
    pub fn with_listing_summaries(self) -> Self {
        lock(&self.state).listing_summaries = true;
        self
    }

    /// Number of per-VM summary lookups served.
    pub fn summary_lookups(&self) -> usize {
        lock(&self.state).summary_lookups
    }

    /// Platform calls issued so far, as `operation:vm-name`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        lock(&self.state).sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        lock(&self.state).sessions_closed
    }

    /// Current power state of the first VM with this name.
    pub fn power_state(&self, name: &str) -> Option<PowerState> {
        let state = lock(&self.state);
        state
            .inventory
            .nodes
            .iter()
            .filter_map(|n| n.vm.as_ref())
            .find(|vm| vm.name == name)
            .map(|vm| vm.power_state)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Session>> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.connect_error {
            return Err(VcError::ConnectionFailed(message.clone()));
        }
        state.sessions_opened += 1;
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
        }))
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct MemorySession {
    state: Arc<Mutex<State>>,
}

impl MemorySession {
    fn query(&self) -> Result<MutexGuard<'_, State>> {
        let state = lock(&self.state);
        if let Some(message) = &state.query_error {
            return Err(VcError::QueryFailed(message.clone()));
        }
        Ok(state)
    }

    fn start_task(&self, vm: &EntityRef, target: PowerState, operation: &'static str) -> Result<PowerTask> {
        let mut state = self.query()?;
        let idx = state.inventory.lookup(vm)?;
        let spec = state.inventory.vm_spec(vm)?;
        let behavior = if spec.power_state == target {
            TaskBehavior::Fail(format!(
                "InvalidPowerState: '{}' is already {}",
                spec.name, target
            ))
        } else {
            spec.tasks.clone()
        };

        state.calls.push(format!("{}:{}", operation, vm.name));
        state.next_task += 1;
        let id = format!("task-{}", state.next_task);
        state.tasks.insert(
            id.clone(),
            MemTask {
                vm: idx,
                target,
                polls: 0,
                behavior,
            },
        );

        Ok(PowerTask {
            id,
            vm: vm.clone(),
            operation,
        })
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn datacenters(&self) -> Result<Vec<EntityRef>> {
        let state = self.query()?;
        Ok(state
            .inventory
            .datacenters
            .iter()
            .map(|idx| state.inventory.entity(*idx))
            .collect())
    }

    async fn vm_folder(&self, datacenter: &EntityRef) -> Result<EntityRef> {
        let state = self.query()?;
        let idx = state.inventory.lookup(datacenter)?;
        let folder = state.inventory.nodes[idx].vm_folder.ok_or_else(|| {
            VcError::QueryFailed(format!("Not a datacenter: {}", datacenter.id))
        })?;
        Ok(state.inventory.entity(folder))
    }

    async fn child_entities(&self, folder: &EntityRef) -> Result<Vec<EntityRef>> {
        let state = self.query()?;
        let idx = state.inventory.lookup(folder)?;
        Ok(state.inventory.nodes[idx]
            .children
            .iter()
            .map(|c| state.listed(*c))
            .collect())
    }

    async fn child_pools(&self, pool: &EntityRef) -> Result<Vec<EntityRef>> {
        let state = self.query()?;
        let idx = state.inventory.lookup(pool)?;
        Ok(state.inventory.nodes[idx]
            .pools
            .iter()
            .map(|c| state.inventory.entity(*c))
            .collect())
    }

    async fn pool_vms(&self, pool: &EntityRef) -> Result<Vec<EntityRef>> {
        let state = self.query()?;
        let idx = state.inventory.lookup(pool)?;
        Ok(state.inventory.nodes[idx]
            .pool_vms
            .iter()
            .map(|c| state.listed(*c))
            .collect())
    }

    async fn vm_summary(&self, vm: &EntityRef) -> Result<VmSummary> {
        let mut state = self.query()?;
        state.summary_lookups += 1;
        let spec = state.inventory.vm_spec(vm)?;
        Ok(VmSummary {
            name: spec.name.clone(),
            power_state: spec.power_state,
            cpu_count: spec.cpu_count,
            memory_size: spec.memory_mb,
        })
    }

    async fn vm_details(&self, vm: &EntityRef) -> Result<VmDetails> {
        let state = self.query()?;
        let spec = state.inventory.vm_spec(vm)?;
        Ok(VmDetails {
            name: spec.name.clone(),
            power_state: spec.power_state,
            cpu_count: spec.cpu_count,
            memory_size: spec.memory_mb,
            os: spec.guest_os.clone(),
            ip_address: spec.ip_address.clone(),
            created_time: spec.created_time,
            vmware_tools_status: spec.tools,
            disk_sizes: spec.disks.clone(),
        })
    }

    async fn tools_status(&self, vm: &EntityRef) -> Result<ToolsStatus> {
        let state = self.query()?;
        Ok(state.inventory.vm_spec(vm)?.tools)
    }

    async fn power_on(&self, vm: &EntityRef) -> Result<PowerTask> {
        self.start_task(vm, PowerState::PoweredOn, "PowerOn")
    }

    async fn power_off(&self, vm: &EntityRef) -> Result<PowerTask> {
        self.start_task(vm, PowerState::PoweredOff, "PowerOff")
    }

    async fn shutdown_guest(&self, vm: &EntityRef) -> Result<()> {
        let mut state = self.query()?;
        state.calls.push(format!("ShutdownGuest:{}", vm.name));
        let idx = state.inventory.lookup(vm)?;
        if let Some(spec) = state.inventory.vm_spec_mut(idx) {
            spec.power_state = PowerState::PoweredOff;
        }
        Ok(())
    }

    async fn reboot_guest(&self, vm: &EntityRef) -> Result<()> {
        let mut state = self.query()?;
        state.calls.push(format!("RebootGuest:{}", vm.name));
        Ok(())
    }

    async fn task_info(&self, task: &PowerTask) -> Result<TaskInfo> {
        let mut state = lock(&self.state);
        let state = &mut *state;
        let mem_task = state
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| VcError::QueryFailed(format!("Unknown task: {}", task.id)))?;

        mem_task.polls += 1;
        if mem_task.polls < 2 || mem_task.behavior == TaskBehavior::Stall {
            return Ok(TaskInfo::new(TaskState::Running));
        }

        match &mem_task.behavior {
            TaskBehavior::Fail(message) => Ok(TaskInfo::failed(message.clone())),
            _ => {
                let (vm, target) = (mem_task.vm, mem_task.target);
                if let Some(spec) = state.inventory.vm_spec_mut(vm) {
                    spec.power_state = target;
                }
                Ok(TaskInfo::new(TaskState::Success))
            }
        }
    }

    async fn logout(&self) -> Result<()> {
        lock(&self.state).sessions_closed += 1;
        Ok(())
    }
}
