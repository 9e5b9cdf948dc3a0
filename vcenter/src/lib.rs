//! vCenter inventory and power-action client
//!
//! Lists virtual machines, rebuilds the datacenter/folder/pool hierarchy,
//! returns per-VM details and drives power operations. Each call opens its own
//! session through a [`Connector`] and closes it before returning.
//!
//! ```no_run
//! use vcenter::{InventoryClient, OpContext, PowerOp, VcenterConfig};
//!
//! # async fn run() -> vcenter::Result<()> {
//! let config = VcenterConfig::new("vc.example.com", "administrator@vsphere.local", "secret");
//! let client = InventoryClient::from_config(&config)?;
//!
//! for vm in client.list_all().await? {
//!     println!("{} {}", vm.name, vm.power_state);
//! }
//! client.power_action("web-01", PowerOp::Start, &OpContext::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod inventory;
pub mod power;
pub mod session;
pub mod task;
pub mod traverse;
pub mod vsphere;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use client::InventoryClient;
pub use config::VcenterConfig;
pub use error::{ErrorKind, Result, VcError};
pub use inventory::{
    DiskInfo, EntityKind, EntityRef, InventoryNode, PowerState, ToolsStatus, VmDetails, VmSummary,
};
pub use power::{PowerOp, PowerOutcome, SUPPORTED_OPERATIONS};
pub use session::{Connector, PowerTask, Session, TaskInfo, TaskState};
pub use task::{OpContext, TaskWaitConfig};
pub use vsphere::VsphereConnector;
