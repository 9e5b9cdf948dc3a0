//! Inventory and power-action client.
//!
//! Every call follows the same sequence: connect, query or act, disconnect.
//! Nothing is cached between calls.

use std::sync::Arc;

use crate::config::VcenterConfig;
use crate::error::{Result, VcError};
use crate::inventory::{EntityRef, InventoryNode, VmDetails, VmSummary};
use crate::power::{PowerOp, PowerOutcome};
use crate::session::{Connector, Session};
use crate::task::{OpContext, TaskWaitConfig, TaskWaiter};
use crate::traverse;
use crate::vsphere::VsphereConnector;

pub struct InventoryClient {
    connector: Arc<dyn Connector>,
    wait: TaskWaitConfig,
}

impl InventoryClient {
    pub fn new(connector: Arc<dyn Connector>, wait: TaskWaitConfig) -> Self {
        Self { connector, wait }
    }

    /// Client for the vCenter described by `config`, over the REST API.
    pub fn from_config(config: &VcenterConfig) -> Result<Self> {
        config.validate()?;
        let connector = VsphereConnector::new(config)?;
        tracing::info!(base_url = connector.base_url(), user = %config.user, "vCenter client configured");
        Ok(Self::new(Arc::new(connector), config.task_wait()))
    }

    pub fn wait_config(&self) -> &TaskWaitConfig {
        &self.wait
    }

    /// Summaries of every VM, in depth-first order.
    pub async fn list_all(&self) -> Result<Vec<VmSummary>> {
        let session = self.open().await?;
        let result = traverse::collect_vms(session.get()).await;
        session.close().await;

        match &result {
            Ok(vms) => tracing::debug!(count = vms.len(), "Listed virtual machines"),
            Err(e) => tracing::error!("Failed to list virtual machines: {}", e),
        }
        result
    }

    /// Inventory tree, one node per datacenter.
    pub async fn list_structure(&self) -> Result<Vec<InventoryNode>> {
        let session = self.open().await?;
        let result = traverse::build_structure(session.get()).await;
        session.close().await;

        if let Err(e) = &result {
            tracing::error!("Failed to build inventory structure: {}", e);
        }
        result
    }

    pub async fn get_details(&self, name: &str) -> Result<VmDetails> {
        let session = self.open().await?;
        let result = async {
            let vm = locate(session.get(), name).await?;
            session.get().vm_details(&vm).await
        }
        .await;
        session.close().await;

        if let Err(e) = &result {
            tracing::warn!(vm = name, "Failed to get VM details: {}", e);
        }
        result
    }

    /// Run `op` against the first VM named `name`.
    pub async fn power_action(
        &self,
        name: &str,
        op: PowerOp,
        ctx: &OpContext,
    ) -> Result<PowerOutcome> {
        tracing::info!(vm = name, operation = %op, "Power action requested");

        let session = self.open().await?;
        let result = self.run_power(session.get(), name, op, ctx).await;
        session.close().await;

        match &result {
            Ok(outcome) => {
                tracing::info!(vm = name, operation = %op, ?outcome, "Power action finished")
            }
            Err(e) => tracing::error!(vm = name, operation = %op, "Power action failed: {}", e),
        }
        result
    }

    async fn run_power(
        &self,
        session: &dyn Session,
        name: &str,
        op: PowerOp,
        ctx: &OpContext,
    ) -> Result<PowerOutcome> {
        let vm = locate(session, name).await?;
        let waiter = TaskWaiter::new(session, &self.wait, ctx);

        match op {
            PowerOp::Start => {
                let summary = session.vm_summary(&vm).await?;
                if summary.power_state.is_on() {
                    tracing::info!(vm = name, "VM already powered on");
                    return Ok(PowerOutcome::AlreadyInState);
                }
                ctx.ensure_active("PowerOn", name)?;
                let task = session.power_on(&vm).await?;
                waiter.wait(&task).await?;
                Ok(PowerOutcome::Completed)
            }
            PowerOp::PowerOff => {
                // issued even when already off
                ctx.ensure_active("PowerOff", name)?;
                let task = session.power_off(&vm).await?;
                waiter.wait(&task).await?;
                Ok(PowerOutcome::Completed)
            }
            PowerOp::Shutdown => {
                let tools = session.tools_status(&vm).await?;
                if !tools.is_healthy() {
                    return Err(VcError::ToolsNotReady(format!("{} ({})", name, tools)));
                }
                ctx.ensure_active("ShutdownGuest", name)?;
                session.shutdown_guest(&vm).await?;
                Ok(PowerOutcome::Initiated)
            }
            PowerOp::Restart => {
                let tools = session.tools_status(&vm).await?;
                if tools.is_healthy() {
                    ctx.ensure_active("RebootGuest", name)?;
                    session.reboot_guest(&vm).await?;
                    return Ok(PowerOutcome::Initiated);
                }

                tracing::warn!(vm = name, tools = %tools, "Guest tools unavailable, restarting with power off/on");
                let powered_off = async {
                    ctx.ensure_active("PowerOff", name)?;
                    let task = session.power_off(&vm).await?;
                    waiter.wait(&task).await
                }
                .await;
                match powered_off {
                    Err(e @ VcError::Cancelled(_)) => return Err(e),
                    Err(e) => tracing::warn!(vm = name, "Power off before restart failed: {}", e),
                    Ok(_) => {}
                }

                ctx.ensure_active("PowerOn", name)?;
                let task = session.power_on(&vm).await?;
                waiter.wait(&task).await?;
                Ok(PowerOutcome::Completed)
            }
        }
    }

    async fn open(&self) -> Result<SessionGuard> {
        let session = self.connector.connect().await.map_err(|e| {
            tracing::error!("Failed to open vCenter session: {}", e);
            e
        })?;
        Ok(SessionGuard {
            session: Arc::from(session),
            closed: false,
        })
    }
}

/// Open session that is logged out exactly once. If the owning future is
/// dropped before [`SessionGuard::close`] runs, logout moves to a background
/// task on the current runtime.
struct SessionGuard {
    session: Arc<dyn Session>,
    closed: bool,
}

impl SessionGuard {
    fn get(&self) -> &dyn Session {
        self.session.as_ref()
    }

    async fn close(mut self) {
        self.closed = true;
        if let Err(e) = self.session.logout().await {
            tracing::warn!("Failed to close vCenter session: {}", e);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let session = Arc::clone(&self.session);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Call abandoned, closing vCenter session in the background");
                handle.spawn(async move {
                    if let Err(e) = session.logout().await {
                        tracing::warn!("Failed to close abandoned vCenter session: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("No runtime to close abandoned vCenter session"),
        }
    }
}

async fn locate(session: &dyn Session, name: &str) -> Result<EntityRef> {
    traverse::find_vm(session, name)
        .await?
        .ok_or_else(|| VcError::VmNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::inventory::{PowerState, ToolsStatus};
    use crate::memory::{MemoryConnector, MemoryInventory, VmSpec};
    use std::time::Duration;

    fn fast_wait() -> TaskWaitConfig {
        TaskWaitConfig::with_timeout(Duration::from_secs(5)).with_poll_interval(Duration::from_millis(5))
    }

    fn client_for(connector: &MemoryConnector) -> InventoryClient {
        InventoryClient::new(Arc::new(connector.clone()), fast_wait())
    }

    fn single_vm(spec: VmSpec) -> MemoryConnector {
        let mut inv = MemoryInventory::new();
        let dc = inv.datacenter("DC1");
        inv.vm(dc, spec);
        MemoryConnector::new(inv)
    }

    fn assert_sessions_balanced(connector: &MemoryConnector) {
        assert!(connector.sessions_opened() > 0);
        assert_eq!(connector.sessions_opened(), connector.sessions_closed());
    }

    #[tokio::test]
    async fn test_list_all_and_structure() {
        let mut inv = MemoryInventory::new();
        let dc = inv.datacenter("DC1");
        let folder = inv.folder(dc, "prod");
        inv.vm(folder, VmSpec::new("web-01").powered_on().memory_mb(2048));
        let connector = MemoryConnector::new(inv);
        let client = client_for(&connector);

        let vms = client.list_all().await.unwrap();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].name, "web-01");
        assert_eq!(vms[0].memory_size, 2048);

        let tree = client.list_structure().await.unwrap();
        assert_eq!(tree[0].name(), "DC1");
        assert_sessions_balanced(&connector);
        assert_eq!(connector.sessions_opened(), 2);
    }

    #[tokio::test]
    async fn test_get_details_not_found() {
        let connector = single_vm(VmSpec::new("web-01"));
        let client = client_for(&connector);

        let err = client.get_details("missing").await.unwrap_err();
        assert!(matches!(err, VcError::VmNotFound(ref n) if n == "missing"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_get_details_found() {
        let connector = single_vm(
            VmSpec::new("web-01")
                .tools_ok()
                .ip("10.0.0.5")
                .disk_gb("Hard disk 1", 40),
        );
        let client = client_for(&connector);

        let details = client.get_details("web-01").await.unwrap();
        assert_eq!(details.ip_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(details.vmware_tools_status, ToolsStatus::ToolsOk);
        assert_eq!(details.disk_sizes[0].size_gb, 40.0);
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_query_failure_closes_session() {
        let connector = single_vm(VmSpec::new("web-01")).fail_queries("PropertyCollector fault");
        let client = client_for(&connector);

        let err = client.list_all().await.unwrap_err();
        assert!(matches!(err, VcError::QueryFailed(_)));
        assert_eq!(err.kind(), ErrorKind::OperationFailed);
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let connector = single_vm(VmSpec::new("web-01")).fail_connect("connection refused");
        let client = client_for(&connector);

        let err = client.list_all().await.unwrap_err();
        assert!(matches!(err, VcError::ConnectionFailed(_)));
        assert_eq!(connector.sessions_opened(), 0);
        assert_eq!(connector.sessions_closed(), 0);
    }

    #[tokio::test]
    async fn test_start_already_on_makes_no_call() {
        let connector = single_vm(VmSpec::new("web-01").powered_on());
        let client = client_for(&connector);

        let outcome = client
            .power_action("web-01", PowerOp::Start, &OpContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, PowerOutcome::AlreadyInState);
        assert!(connector.calls().is_empty());
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_start_powers_on() {
        let connector = single_vm(VmSpec::new("web-01"));
        let client = client_for(&connector);

        let outcome = client
            .power_action("web-01", PowerOp::Start, &OpContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, PowerOutcome::Completed);
        assert_eq!(connector.calls(), vec!["PowerOn:web-01"]);
        assert_eq!(connector.power_state("web-01"), Some(PowerState::PoweredOn));
    }

    #[tokio::test]
    async fn test_shutdown_requires_tools() {
        let connector = single_vm(VmSpec::new("web-01").powered_on().tools(ToolsStatus::ToolsOld));
        let client = client_for(&connector);

        let err = client
            .power_action("web-01", PowerOp::Shutdown, &OpContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VcError::ToolsNotReady(_)));
        assert!(connector.calls().is_empty());
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_shutdown_with_tools() {
        let connector = single_vm(VmSpec::new("web-01").powered_on().tools_ok());
        let client = client_for(&connector);

        let outcome = client
            .power_action("web-01", PowerOp::Shutdown, &OpContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, PowerOutcome::Initiated);
        assert_eq!(connector.calls(), vec!["ShutdownGuest:web-01"]);
    }

    #[tokio::test]
    async fn test_poweroff_is_unconditional() {
        // already off: the platform call is still made and its failure surfaces
        let connector = single_vm(VmSpec::new("web-01"));
        let client = client_for(&connector);

        let err = client
            .power_action("web-01", PowerOp::PowerOff, &OpContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VcError::TaskFailed(_)));
        assert_eq!(connector.calls(), vec!["PowerOff:web-01"]);
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_restart_with_tools_reboots_guest() {
        let connector = single_vm(VmSpec::new("web-01").powered_on().tools_ok());
        let client = client_for(&connector);

        let outcome = client
            .power_action("web-01", PowerOp::Restart, &OpContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, PowerOutcome::Initiated);
        assert_eq!(connector.calls(), vec!["RebootGuest:web-01"]);
    }

    #[tokio::test]
    async fn test_restart_fallback_power_cycles() {
        let connector = single_vm(VmSpec::new("web-01").powered_on());
        let client = client_for(&connector);

        let outcome = client
            .power_action("web-01", PowerOp::Restart, &OpContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, PowerOutcome::Completed);
        assert_eq!(connector.calls(), vec!["PowerOff:web-01", "PowerOn:web-01"]);
        assert_eq!(connector.power_state("web-01"), Some(PowerState::PoweredOn));
    }

    #[tokio::test]
    async fn test_restart_fallback_tolerates_failed_power_off() {
        // VM is off, so the power-off task fails; the power-on still runs
        let connector = single_vm(VmSpec::new("web-01"));
        let client = client_for(&connector);

        let outcome = client
            .power_action("web-01", PowerOp::Restart, &OpContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, PowerOutcome::Completed);
        assert_eq!(connector.calls(), vec!["PowerOff:web-01", "PowerOn:web-01"]);
    }

    #[tokio::test]
    async fn test_restart_fallback_fails_when_power_on_fails() {
        // off VM: the power-off fails and is skipped, then the power-on task fails
        let connector = single_vm(VmSpec::new("web-01").failing_tasks("host in maintenance"));
        let client = client_for(&connector);

        let err = client
            .power_action("web-01", PowerOp::Restart, &OpContext::default())
            .await
            .unwrap_err();
        match err {
            VcError::TaskFailed(message) => assert!(message.contains("host in maintenance")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_task_timeout() {
        let connector = single_vm(VmSpec::new("web-01").stalled_tasks());
        let client = InventoryClient::new(
            Arc::new(connector.clone()),
            TaskWaitConfig::with_timeout(Duration::from_millis(50))
                .with_poll_interval(Duration::from_millis(5)),
        );

        let err = client
            .power_action("web-01", PowerOp::Start, &OpContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VcError::Timeout(_)));
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_task_cancelled() {
        let connector = single_vm(VmSpec::new("web-01").stalled_tasks());
        let client = client_for(&connector);
        let ctx = OpContext::default();

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        let err = client
            .power_action("web-01", PowerOp::Start, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, VcError::Cancelled(_)));
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_restart_fallback_stops_when_cancelled() {
        // cancelled while waiting on the power-off: no power-on follows
        let connector = single_vm(VmSpec::new("web-01").powered_on().stalled_tasks());
        let client = client_for(&connector);
        let ctx = OpContext::default();

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        let err = client
            .power_action("web-01", PowerOp::Restart, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, VcError::Cancelled(_)));
        assert_eq!(connector.calls(), vec!["PowerOff:web-01"]);
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_cancelled_context_issues_no_call() {
        let ctx = OpContext::default();
        ctx.cancel.cancel();

        for op in [PowerOp::Start, PowerOp::PowerOff, PowerOp::Restart] {
            let connector = single_vm(VmSpec::new("web-01"));
            let client = client_for(&connector);
            let err = client.power_action("web-01", op, &ctx).await.unwrap_err();
            assert!(matches!(err, VcError::Cancelled(_)), "{}: {:?}", op, err);
            assert!(connector.calls().is_empty(), "{}", op);
            assert_sessions_balanced(&connector);
        }

        let connector = single_vm(VmSpec::new("web-01").powered_on().tools_ok());
        let client = client_for(&connector);
        let err = client
            .power_action("web-01", PowerOp::Shutdown, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, VcError::Cancelled(_)));
        assert!(connector.calls().is_empty());
        assert_eq!(connector.power_state("web-01"), Some(PowerState::PoweredOn));
    }

    #[tokio::test]
    async fn test_dropped_call_still_logs_out() {
        let connector = single_vm(VmSpec::new("web-01").stalled_tasks());
        let client = client_for(&connector);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            client.power_action("web-01", PowerOp::Start, &OpContext::default()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(connector.calls(), vec!["PowerOn:web-01"]);

        // logout runs on a spawned task
        for _ in 0..50 {
            if connector.sessions_closed() == connector.sessions_opened() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_start_suspended_powers_on() {
        let connector = single_vm(VmSpec::new("web-01").suspended());
        let client = client_for(&connector);

        let outcome = client
            .power_action("web-01", PowerOp::Start, &OpContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, PowerOutcome::Completed);
        assert_eq!(connector.calls(), vec!["PowerOn:web-01"]);
        assert_eq!(connector.power_state("web-01"), Some(PowerState::PoweredOn));
        assert_sessions_balanced(&connector);
    }

    #[tokio::test]
    async fn test_power_action_not_found() {
        let connector = single_vm(VmSpec::new("web-01"));
        let client = client_for(&connector);

        let err = client
            .power_action("ghost", PowerOp::PowerOff, &OpContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(connector.calls().is_empty());
        assert_sessions_balanced(&connector);
    }
}
