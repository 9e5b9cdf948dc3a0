//! VM inventory and power handlers

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    Json,
};

use vcenter::{OpContext, PowerOp};

use crate::dto::*;
use crate::response::{ApiError, ApiResult};
use crate::SharedState;

pub async fn list_vms(State(state): State<SharedState>) -> ApiResult<VmsResponse> {
    let vms = state
        .client
        .list_all()
        .await
        .map_err(|e| ApiError::from_client(e, "Failed to retrieve virtual machines"))?;
    Ok(Json(VmsResponse { vms }))
}

pub async fn vm_structure(State(state): State<SharedState>) -> ApiResult<StructureResponse> {
    let vm_structure = state
        .client
        .list_structure()
        .await
        .map_err(|e| ApiError::from_client(e, "Failed to retrieve VM structure"))?;
    Ok(Json(StructureResponse { vm_structure }))
}

pub async fn vm_details(
    State(state): State<SharedState>,
    query: Result<Query<VmDetailsQuery>, QueryRejection>,
) -> ApiResult<VmDetailsResponse> {
    let Query(query) = query.map_err(|rejection| {
        tracing::debug!("Rejected details query: {}", rejection);
        ApiError::bad_request(format!("Invalid query string: {}", rejection.body_text()))
    })?;
    let name = required(query.vm_name).ok_or_else(|| ApiError::bad_request("VM name is required"))?;

    let vm_details = state
        .client
        .get_details(&name)
        .await
        .map_err(|e| ApiError::from_client(e, "Failed to retrieve VM details"))?;
    Ok(Json(VmDetailsResponse { vm_details }))
}

pub async fn vm_power(
    State(state): State<SharedState>,
    body: Result<Json<PowerRequest>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let Json(request) = body.map_err(|rejection| {
        tracing::debug!("Rejected power request body: {}", rejection);
        ApiError::bad_request("Request must be JSON formatted")
    })?;

    let (Some(name), Some(operation)) = (required(request.vm_name), required(request.operation))
    else {
        return Err(ApiError::bad_request(
            "Missing required parameters 'vm_name' or 'operation'",
        ));
    };

    let op: PowerOp = operation
        .parse()
        .map_err(|e| ApiError::from_client(e, "Invalid operation"))?;

    // Runs detached so a dropped connection cannot abandon the task wait or
    // the session logout halfway.
    let ctx = OpContext::new(state.shutdown.child_token());
    let failed = format!("Failed to execute operation '{}' for VM '{}'.", op, name);
    let action = {
        let state = state.clone();
        let name = name.clone();
        tokio::spawn(async move { state.client.power_action(&name, op, &ctx).await })
    };
    action
        .await
        .map_err(|e| {
            tracing::error!(vm = %name, operation = %op, "Power action task aborted: {}", e);
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("An error occurred: {}", e),
            )
        })?
        .map_err(|e| ApiError::from_client(e, &failed))?;

    Ok(Json(MessageResponse {
        message: format!("Operation '{}' executed successfully for VM '{}'.", op, name),
    }))
}

/// Treat empty strings like missing values.
fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
