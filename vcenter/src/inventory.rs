//! Inventory data model
//!
//! Plain data returned by the client: VM summaries and details, plus the
//! hierarchy tree used by the structure listing.

use chrono::{DateTime, Utc};
use core::fmt;
use serde::{Deserialize, Serialize};

/// VM power state as reported by vCenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

impl PowerState {
    pub fn is_on(&self) -> bool {
        matches!(self, PowerState::PoweredOn)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerState::PoweredOn => "poweredOn",
            PowerState::PoweredOff => "poweredOff",
            PowerState::Suspended => "suspended",
        };
        write!(f, "{}", s)
    }
}

/// Guest tools health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolsStatus {
    /// Tools running and current.
    ToolsOk,
    /// Tools running but outdated.
    ToolsOld,
    /// Tools installed but not running.
    ToolsNotRunning,
    /// Tools have never been installed.
    ToolsNotInstalled,
}

impl ToolsStatus {
    /// Only a fully healthy agent may take graceful shutdown/reboot requests.
    pub fn is_healthy(&self) -> bool {
        matches!(self, ToolsStatus::ToolsOk)
    }
}

impl fmt::Display for ToolsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolsStatus::ToolsOk => "toolsOk",
            ToolsStatus::ToolsOld => "toolsOld",
            ToolsStatus::ToolsNotRunning => "toolsNotRunning",
            ToolsStatus::ToolsNotInstalled => "toolsNotInstalled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmSummary {
    pub name: String,
    pub power_state: PowerState,
    pub cpu_count: u32,
    /// Configured memory in MB.
    pub memory_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub disk_label: String,
    pub size_gb: f64,
}

impl DiskInfo {
    pub fn from_capacity_bytes(label: impl Into<String>, bytes: u64) -> Self {
        Self {
            disk_label: label.into(),
            size_gb: bytes as f64 / (1024u64 * 1024 * 1024) as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmDetails {
    pub name: String,
    pub power_state: PowerState,
    pub cpu_count: u32,
    pub memory_size: u64,
    pub os: String,
    pub ip_address: Option<String>,
    pub created_time: Option<DateTime<Utc>>,
    pub vmware_tools_status: ToolsStatus,
    pub disk_sizes: Vec<DiskInfo>,
}

impl VmDetails {
    pub fn summary(&self) -> VmSummary {
        VmSummary {
            name: self.name.clone(),
            power_state: self.power_state,
            cpu_count: self.cpu_count,
            memory_size: self.memory_size,
        }
    }
}

/// Node of the inventory tree returned by the structure listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InventoryNode {
    Datacenter {
        name: String,
        children: Vec<InventoryNode>,
    },
    Folder {
        name: String,
        children: Vec<InventoryNode>,
    },
    ResourcePool {
        name: String,
        children: Vec<InventoryNode>,
    },
    VirtualMachine {
        name: String,
        power_state: PowerState,
    },
}

impl InventoryNode {
    pub fn name(&self) -> &str {
        match self {
            InventoryNode::Datacenter { name, .. }
            | InventoryNode::Folder { name, .. }
            | InventoryNode::ResourcePool { name, .. }
            | InventoryNode::VirtualMachine { name, .. } => name,
        }
    }

    pub fn children(&self) -> &[InventoryNode] {
        match self {
            InventoryNode::Datacenter { children, .. }
            | InventoryNode::Folder { children, .. }
            | InventoryNode::ResourcePool { children, .. } => children,
            InventoryNode::VirtualMachine { .. } => &[],
        }
    }
}

/// Kind of a managed entity met during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Datacenter,
    Folder,
    ResourcePool,
    VirtualMachine,
    /// Anything else found under a folder (hosts, networks, ...).
    Other,
}

/// Reference to a managed entity, as handed out by a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    /// Platform identifier, e.g. `vm-42` or `group-v3`.
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    /// VM summary delivered with the listing, when the backend has one.
    pub summary: Option<VmSummary>,
}

impl EntityRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: VmSummary) -> Self {
        self.summary = Some(summary);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_serialization() {
        assert_eq!(
            serde_json::to_string(&PowerState::PoweredOn).unwrap(),
            "\"poweredOn\""
        );
        assert_eq!(
            serde_json::to_string(&PowerState::Suspended).unwrap(),
            "\"suspended\""
        );
        assert_eq!(PowerState::PoweredOff.to_string(), "poweredOff");
    }

    #[test]
    fn test_tools_status() {
        assert!(ToolsStatus::ToolsOk.is_healthy());
        assert!(!ToolsStatus::ToolsOld.is_healthy());
        assert!(!ToolsStatus::ToolsNotRunning.is_healthy());
        assert_eq!(
            serde_json::to_string(&ToolsStatus::ToolsNotInstalled).unwrap(),
            "\"toolsNotInstalled\""
        );
    }

    #[test]
    fn test_disk_size_in_gb() {
        let disk = DiskInfo::from_capacity_bytes("Hard disk 1", 40 * 1024 * 1024 * 1024);
        assert_eq!(disk.size_gb, 40.0);

        let half = DiskInfo::from_capacity_bytes("Hard disk 2", 512 * 1024 * 1024);
        assert_eq!(half.size_gb, 0.5);
    }

    #[test]
    fn test_inventory_node_json_shape() {
        let tree = InventoryNode::Datacenter {
            name: "DC1".into(),
            children: vec![InventoryNode::Folder {
                name: "vm".into(),
                children: vec![InventoryNode::VirtualMachine {
                    name: "web-01".into(),
                    power_state: PowerState::PoweredOn,
                }],
            }],
        };

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["type"], "Datacenter");
        assert_eq!(json["children"][0]["type"], "Folder");
        assert_eq!(json["children"][0]["children"][0]["type"], "VirtualMachine");
        assert_eq!(json["children"][0]["children"][0]["power_state"], "poweredOn");
        assert!(json["children"][0]["children"][0].get("children").is_none());
    }

    #[test]
    fn test_details_summary() {
        let details = VmDetails {
            name: "db-01".into(),
            power_state: PowerState::PoweredOff,
            cpu_count: 4,
            memory_size: 8192,
            os: "Ubuntu Linux (64-bit)".into(),
            ip_address: None,
            created_time: None,
            vmware_tools_status: ToolsStatus::ToolsNotRunning,
            disk_sizes: vec![],
        };
        let summary = details.summary();
        assert_eq!(summary.name, "db-01");
        assert_eq!(summary.cpu_count, 4);
        assert_eq!(summary.memory_size, 8192);
    }
}
