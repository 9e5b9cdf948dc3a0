//! Route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::SharedState;

pub fn vm_routes() -> Router<SharedState> {
    Router::new()
        // Inventory
        .route("/vms", get(list_vms))
        .route("/vms_structure", get(vm_structure))
        .route("/vm_details", get(vm_details))
        // Power
        .route("/vms/power", post(vm_power))
}
