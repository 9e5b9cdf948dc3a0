//! Data Transfer Objects for API requests and responses

use serde::{Deserialize, Serialize};

use vcenter::{InventoryNode, VmDetails, VmSummary};

#[derive(Debug, Serialize, Deserialize)]
pub struct VmsResponse {
    pub vms: Vec<VmSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StructureResponse {
    pub vm_structure: Vec<InventoryNode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VmDetailsQuery {
    pub vm_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VmDetailsResponse {
    pub vm_details: VmDetails,
}

/// Body of `POST /vms/power`. Both fields are required; absence is reported
/// by the handler rather than as a deserialization error.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PowerRequest {
    #[serde(default)]
    pub vm_name: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
