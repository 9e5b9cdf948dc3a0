//! vSphere Automation REST backend.
//!
//! One [`VsphereSession`] per `POST /api/session`. Every later call carries the
//! `vmware-api-session-id` header, and logout deletes the session.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::config::VcenterConfig;
use crate::error::{Result, VcError};
use crate::inventory::{
    DiskInfo, EntityKind, EntityRef, PowerState, ToolsStatus, VmDetails, VmSummary,
};
use crate::session::{Connector, PowerTask, Session, TaskInfo, TaskState};

const SESSION_HEADER: &str = "vmware-api-session-id";

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DatacenterSummary {
    datacenter: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DatacenterInfo {
    vm_folder: String,
}

#[derive(Debug, Deserialize)]
struct FolderSummary {
    folder: String,
    name: String,
}

/// Row of `GET /api/vcenter/vm`. The listing already carries the power
/// state and sizing, so listings need no per-VM lookup.
#[derive(Debug, Deserialize)]
struct VmListItem {
    vm: String,
    name: String,
    power_state: ApiPowerState,
    #[serde(default)]
    cpu_count: Option<u32>,
    #[serde(rename = "memory_size_MiB", default)]
    memory_size_mib: Option<u64>,
}

impl VmListItem {
    fn into_entity(self) -> EntityRef {
        let summary = match (self.cpu_count, self.memory_size_mib) {
            (Some(cpu_count), Some(memory_size)) => Some(VmSummary {
                name: self.name.clone(),
                power_state: self.power_state.into(),
                cpu_count,
                memory_size,
            }),
            _ => None,
        };
        let entity = EntityRef::new(self.vm, self.name, EntityKind::VirtualMachine);
        match summary {
            Some(summary) => entity.with_summary(summary),
            None => entity,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum ApiPowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

impl From<ApiPowerState> for PowerState {
    fn from(state: ApiPowerState) -> Self {
        match state {
            ApiPowerState::PoweredOn => PowerState::PoweredOn,
            ApiPowerState::PoweredOff => PowerState::PoweredOff,
            ApiPowerState::Suspended => PowerState::Suspended,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PowerInfo {
    state: ApiPowerState,
}

#[derive(Debug, Deserialize)]
struct CpuInfo {
    count: u32,
}

#[derive(Debug, Deserialize)]
struct MemoryInfo {
    #[serde(rename = "size_MiB")]
    size_mib: u64,
}

#[derive(Debug, Deserialize)]
struct DiskEntry {
    label: String,
    #[serde(default)]
    capacity: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct VmInfo {
    name: String,
    power_state: ApiPowerState,
    cpu: CpuInfo,
    memory: MemoryInfo,
    #[serde(rename = "guest_OS", default)]
    guest_os: Option<String>,
    /// Keyed by device id; ordered so disk listings are stable.
    #[serde(default)]
    disks: BTreeMap<String, DiskEntry>,
}

#[derive(Debug, Deserialize)]
struct LocalizableMessage {
    default_message: String,
}

#[derive(Debug, Default, Deserialize)]
struct GuestIdentity {
    #[serde(default)]
    full_name: Option<LocalizableMessage>,
    #[serde(default)]
    ip_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsInfo {
    #[serde(default)]
    run_state: Option<String>,
    #[serde(default)]
    version_status: Option<String>,
}

impl ToolsInfo {
    fn status(&self) -> ToolsStatus {
        if self.version_status.as_deref() == Some("NOT_INSTALLED") {
            return ToolsStatus::ToolsNotInstalled;
        }
        match self.run_state.as_deref() {
            Some("RUNNING") | Some("EXECUTING_SCRIPTS") => {}
            _ => return ToolsStatus::ToolsNotRunning,
        }
        match self.version_status.as_deref() {
            Some("SUPPORTED_OLD") | Some("TOO_OLD_UNSUPPORTED") | Some("BLACKLISTED") => {
                ToolsStatus::ToolsOld
            }
            _ => ToolsStatus::ToolsOk,
        }
    }
}

fn build_details(info: VmInfo, identity: Option<GuestIdentity>, tools: ToolsStatus) -> VmDetails {
    let identity = identity.unwrap_or_default();
    let os = identity
        .full_name
        .map(|m| m.default_message)
        .or(info.guest_os)
        .unwrap_or_default();

    let disk_sizes = info
        .disks
        .into_values()
        .map(|d| DiskInfo::from_capacity_bytes(d.label, d.capacity.unwrap_or(0)))
        .collect();

    VmDetails {
        name: info.name,
        power_state: info.power_state.into(),
        cpu_count: info.cpu.count,
        memory_size: info.memory.size_mib,
        os,
        ip_address: identity.ip_address,
        // not exposed by the REST API
        created_time: None,
        vmware_tools_status: tools,
        disk_sizes,
    }
}

// ── Connector ───────────────────────────────────────────────────────

/// Opens REST sessions against one vCenter.
pub struct VsphereConnector {
    client: Client,
    base_url: String,
    user: String,
    password: String,
}

impl VsphereConnector {
    /// Build the HTTP client. No network traffic until [`Connector::connect`].
    pub fn new(config: &VcenterConfig) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| VcError::ConnectionFailed(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Connector for VsphereConnector {
    async fn connect(&self) -> Result<Box<dyn Session>> {
        let url = format!("{}/api/session", self.base_url);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(VcError::AuthenticationFailed(format!(
                "vCenter rejected credentials for '{}'",
                self.user
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VcError::ConnectionFailed(format!(
                "Login failed with HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        // returned as a quoted JSON string
        let session_id: String = resp.json().await?;
        tracing::debug!(base_url = %self.base_url, "Opened vCenter session");

        Ok(Box::new(VsphereSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            session_id,
            pending: Mutex::new(HashMap::new()),
        }))
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Authenticated REST session.
pub struct VsphereSession {
    client: Client,
    base_url: String,
    session_id: String,
    /// Power tasks issued on this session, keyed by task id, with their target state.
    pending: Mutex<HashMap<String, PowerState>>,
}

impl VsphereSession {
    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(SESSION_HEADER, &self.session_id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let resp = self
            .request(self.client.get(self.url(path)).query(query))
            .send()
            .await?;
        let resp = check_status(resp, VcError::QueryFailed).await?;
        parse_response(resp).await
    }

    /// GET that tolerates an error status, e.g. guest identity on a VM without tools.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let resp = self.request(self.client.get(self.url(path))).send().await?;
        if !resp.status().is_success() {
            tracing::debug!(path, status = resp.status().as_u16(), "Optional resource unavailable");
            return Ok(None);
        }
        parse_response(resp).await.map(Some)
    }

    async fn post_action(&self, path: &str, action: &str) -> Result<()> {
        let resp = self
            .request(self.client.post(self.url(path)).query(&[("action", action)]))
            .send()
            .await?;
        check_status(resp, VcError::ActionFailed).await?;
        Ok(())
    }

    async fn vm_info(&self, vm: &EntityRef) -> Result<VmInfo> {
        self.get(&format!("/api/vcenter/vm/{}", vm.id), &[]).await
    }

    async fn tools_info(&self, vm: &EntityRef) -> Result<ToolsInfo> {
        Ok(self
            .get_optional(&format!("/api/vcenter/vm/{}/tools", vm.id))
            .await?
            .unwrap_or_default())
    }

    async fn start_power_task(
        &self,
        vm: &EntityRef,
        action: &str,
        target: PowerState,
        operation: &'static str,
    ) -> Result<PowerTask> {
        self.post_action(&format!("/api/vcenter/vm/{}/power", vm.id), action)
            .await?;

        let id = uuid::Uuid::new_v4().to_string();
        self.pending
            .lock()
            .map_err(|_| VcError::ActionFailed("task registry poisoned".into()))?
            .insert(id.clone(), target);

        Ok(PowerTask {
            id,
            vm: vm.clone(),
            operation,
        })
    }
}

async fn check_status(resp: Response, fail: fn(String) -> VcError) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().path().to_string();
    let body = resp.text().await.unwrap_or_default();
    Err(fail(format!("HTTP {} from {}: {}", status.as_u16(), url, body)))
}

async fn parse_response<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        let excerpt: String = text.chars().take(500).collect();
        VcError::JsonError(format!("{e}; body: {excerpt}"))
    })
}

#[async_trait]
impl Session for VsphereSession {
    async fn datacenters(&self) -> Result<Vec<EntityRef>> {
        let list: Vec<DatacenterSummary> = self.get("/api/vcenter/datacenter", &[]).await?;
        Ok(list
            .into_iter()
            .map(|dc| EntityRef::new(dc.datacenter, dc.name, EntityKind::Datacenter))
            .collect())
    }

    async fn vm_folder(&self, datacenter: &EntityRef) -> Result<EntityRef> {
        let info: DatacenterInfo = self
            .get(&format!("/api/vcenter/datacenter/{}", datacenter.id), &[])
            .await?;
        let folders: Vec<FolderSummary> = self
            .get("/api/vcenter/folder", &[("folders", info.vm_folder.as_str())])
            .await?;
        let name = folders
            .into_iter()
            .next()
            .map(|f| f.name)
            .unwrap_or_else(|| "vm".to_string());
        Ok(EntityRef::new(info.vm_folder, name, EntityKind::Folder))
    }

    async fn child_entities(&self, folder: &EntityRef) -> Result<Vec<EntityRef>> {
        let folders: Vec<FolderSummary> = self
            .get(
                "/api/vcenter/folder",
                &[("parent_folders", folder.id.as_str()), ("type", "VIRTUAL_MACHINE")],
            )
            .await?;
        let vms: Vec<VmListItem> = self
            .get("/api/vcenter/vm", &[("folders", folder.id.as_str())])
            .await?;

        let mut children: Vec<EntityRef> = folders
            .into_iter()
            .map(|f| EntityRef::new(f.folder, f.name, EntityKind::Folder))
            .collect();
        children.extend(vms.into_iter().map(VmListItem::into_entity));
        Ok(children)
    }

    async fn vm_summary(&self, vm: &EntityRef) -> Result<VmSummary> {
        let info = self.vm_info(vm).await?;
        Ok(VmSummary {
            name: info.name,
            power_state: info.power_state.into(),
            cpu_count: info.cpu.count,
            memory_size: info.memory.size_mib,
        })
    }

    async fn vm_details(&self, vm: &EntityRef) -> Result<VmDetails> {
        let info = self.vm_info(vm).await?;
        let identity: Option<GuestIdentity> = self
            .get_optional(&format!("/api/vcenter/vm/{}/guest/identity", vm.id))
            .await?;
        let tools = self.tools_info(vm).await?.status();
        Ok(build_details(info, identity, tools))
    }

    async fn tools_status(&self, vm: &EntityRef) -> Result<ToolsStatus> {
        Ok(self.tools_info(vm).await?.status())
    }

    async fn power_on(&self, vm: &EntityRef) -> Result<PowerTask> {
        self.start_power_task(vm, "start", PowerState::PoweredOn, "PowerOn")
            .await
    }

    async fn power_off(&self, vm: &EntityRef) -> Result<PowerTask> {
        self.start_power_task(vm, "stop", PowerState::PoweredOff, "PowerOff")
            .await
    }

    async fn shutdown_guest(&self, vm: &EntityRef) -> Result<()> {
        self.post_action(&format!("/api/vcenter/vm/{}/guest/power", vm.id), "shutdown")
            .await
    }

    async fn reboot_guest(&self, vm: &EntityRef) -> Result<()> {
        self.post_action(&format!("/api/vcenter/vm/{}/guest/power", vm.id), "reboot")
            .await
    }

    async fn task_info(&self, task: &PowerTask) -> Result<TaskInfo> {
        let target = self
            .pending
            .lock()
            .map_err(|_| VcError::QueryFailed("task registry poisoned".into()))?
            .get(&task.id)
            .copied()
            .ok_or_else(|| VcError::QueryFailed(format!("Unknown task: {}", task.id)))?;

        let power: PowerInfo = self
            .get(&format!("/api/vcenter/vm/{}/power", task.vm.id), &[])
            .await?;

        if PowerState::from(power.state) == target {
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&task.id);
            }
            Ok(TaskInfo::new(TaskState::Success))
        } else {
            Ok(TaskInfo::new(TaskState::Running))
        }
    }

    async fn logout(&self) -> Result<()> {
        let resp = self
            .request(self.client.delete(self.url("/api/session")))
            .send()
            .await?;
        check_status(resp, VcError::ConnectionFailed).await?;
        tracing::debug!(base_url = %self.base_url, "Closed vCenter session");
        Ok(())
    }
}
