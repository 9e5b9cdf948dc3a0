//! Depth-first walks over the VM folders of every datacenter.

use futures::future::{BoxFuture, FutureExt};

use crate::error::Result;
use crate::inventory::{EntityKind, EntityRef, InventoryNode, VmSummary};
use crate::session::Session;

/// Direct children of a container. Pools yield nested pools before their VMs.
async fn children_of(session: &dyn Session, entity: &EntityRef) -> Result<Vec<EntityRef>> {
    match entity.kind {
        EntityKind::Folder => session.child_entities(entity).await,
        EntityKind::ResourcePool => {
            let mut children = session.child_pools(entity).await?;
            children.extend(session.pool_vms(entity).await?);
            Ok(children)
        }
        _ => Ok(Vec::new()),
    }
}

fn is_container(kind: EntityKind) -> bool {
    matches!(kind, EntityKind::Folder | EntityKind::ResourcePool)
}

/// Pre-order walk of one datacenter's VM folder. `visit` returns `true` to stop.
async fn walk<F>(session: &dyn Session, root: EntityRef, mut visit: F) -> Result<bool>
where
    F: FnMut(&EntityRef) -> bool,
{
    let mut stack = vec![root];
    while let Some(entity) = stack.pop() {
        if entity.kind == EntityKind::VirtualMachine {
            if visit(&entity) {
                return Ok(true);
            }
        } else if is_container(entity.kind) {
            let children = children_of(session, &entity).await?;
            stack.extend(children.into_iter().rev());
        }
    }
    Ok(false)
}

/// VM references of every datacenter, in traversal order.
pub async fn collect_vm_refs(session: &dyn Session) -> Result<Vec<EntityRef>> {
    let mut vms = Vec::new();
    for datacenter in session.datacenters().await? {
        let root = session.vm_folder(&datacenter).await?;
        walk(session, root, |vm| {
            vms.push(vm.clone());
            false
        })
        .await?;
    }
    Ok(vms)
}

/// Summaries of every VM, in traversal order.
pub async fn collect_vms(session: &dyn Session) -> Result<Vec<VmSummary>> {
    let refs = collect_vm_refs(session).await?;
    let mut summaries = Vec::with_capacity(refs.len());
    for vm in refs {
        summaries.push(summary_of(session, vm).await?);
    }
    Ok(summaries)
}

/// Summary carried by the listing, or fetched when the backend did not supply one.
async fn summary_of(session: &dyn Session, vm: EntityRef) -> Result<VmSummary> {
    match vm.summary {
        Some(summary) => Ok(summary),
        None => session.vm_summary(&vm).await,
    }
}

/// First VM named exactly `name`, searching datacenters in order.
pub async fn find_vm(session: &dyn Session, name: &str) -> Result<Option<EntityRef>> {
    for datacenter in session.datacenters().await? {
        let root = session.vm_folder(&datacenter).await?;
        let mut found = None;
        let stopped = walk(session, root, |vm| {
            if vm.name == name {
                found = Some(vm.clone());
                true
            } else {
                false
            }
        })
        .await?;
        if stopped {
            return Ok(found);
        }
    }
    Ok(None)
}

/// Full hierarchy below every datacenter's VM folder.
pub async fn build_structure(session: &dyn Session) -> Result<Vec<InventoryNode>> {
    let mut tree = Vec::new();
    for datacenter in session.datacenters().await? {
        let root = session.vm_folder(&datacenter).await?;
        let children = build_node(session, root).await?.into_iter().collect();
        tree.push(InventoryNode::Datacenter {
            name: datacenter.name,
            children,
        });
    }
    Ok(tree)
}

fn build_node<'a>(
    session: &'a dyn Session,
    entity: EntityRef,
) -> BoxFuture<'a, Result<Option<InventoryNode>>> {
    async move {
        let node = match entity.kind {
            EntityKind::VirtualMachine => {
                let name = entity.name.clone();
                let summary = summary_of(session, entity).await?;
                Some(InventoryNode::VirtualMachine {
                    name,
                    power_state: summary.power_state,
                })
            }
            EntityKind::Folder | EntityKind::ResourcePool => {
                let mut children = Vec::new();
                for child in children_of(session, &entity).await? {
                    if let Some(node) = build_node(session, child).await? {
                        children.push(node);
                    }
                }
                if entity.kind == EntityKind::Folder {
                    Some(InventoryNode::Folder {
                        name: entity.name,
                        children,
                    })
                } else {
                    Some(InventoryNode::ResourcePool {
                        name: entity.name,
                        children,
                    })
                }
            }
            EntityKind::Datacenter | EntityKind::Other => None,
        };
        Ok(node)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::PowerState;
    use crate::memory::{MemoryConnector, MemoryInventory, VmSpec};
    use crate::session::Connector;

    fn sample() -> MemoryInventory {
        let mut inv = MemoryInventory::new();
        let dc1 = inv.datacenter("DC1");
        let prod = inv.folder(dc1, "prod");
        inv.vm(prod, VmSpec::new("web-01").powered_on());
        inv.vm(prod, VmSpec::new("web-02"));
        let app = inv.resource_pool(prod, "app-pool");
        inv.vm(app, VmSpec::new("app-01").powered_on());
        let nested = inv.resource_pool(app, "nested");
        inv.vm(nested, VmSpec::new("app-02"));
        inv.other(dc1, "template-host");
        inv.vm(dc1, VmSpec::new("db-01"));

        let dc2 = inv.datacenter("DC2");
        inv.vm(dc2, VmSpec::new("web-01").powered_on().cpus(8));
        inv
    }

    #[tokio::test]
    async fn test_collect_order_is_depth_first() {
        let connector = MemoryConnector::new(sample());
        let session = connector.connect().await.unwrap();

        let names: Vec<String> = collect_vms(session.as_ref())
            .await
            .unwrap()
            .into_iter()
            .map(|vm| vm.name)
            .collect();

        // nested pools come before the pool's own VMs
        assert_eq!(
            names,
            vec!["web-01", "web-02", "app-02", "app-01", "db-01", "web-01"]
        );
    }

    #[tokio::test]
    async fn test_listing_summaries_skip_lookups() {
        let connector = MemoryConnector::new(sample());
        let session = connector.connect().await.unwrap();
        let looked_up = collect_vms(session.as_ref()).await.unwrap();
        assert_eq!(connector.summary_lookups(), 6);

        let connector = MemoryConnector::new(sample()).with_listing_summaries();
        let session = connector.connect().await.unwrap();
        let listed = collect_vms(session.as_ref()).await.unwrap();
        build_structure(session.as_ref()).await.unwrap();

        assert_eq!(listed, looked_up);
        assert_eq!(connector.summary_lookups(), 0);
    }

    #[tokio::test]
    async fn test_collect_empty_inventory() {
        let connector = MemoryConnector::new(MemoryInventory::new());
        let session = connector.connect().await.unwrap();
        assert!(collect_vms(session.as_ref()).await.unwrap().is_empty());

        let mut inv = MemoryInventory::new();
        inv.datacenter("Empty");
        let connector = MemoryConnector::new(inv);
        let session = connector.connect().await.unwrap();
        assert!(collect_vms(session.as_ref()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_first_match_wins() {
        let connector = MemoryConnector::new(sample());
        let session = connector.connect().await.unwrap();

        let found = find_vm(session.as_ref(), "web-01").await.unwrap().unwrap();
        let summary = session.vm_summary(&found).await.unwrap();
        // DC1 copy has the default cpu count, DC2 copy has 8
        assert_eq!(summary.cpu_count, 2);

        assert!(find_vm(session.as_ref(), "app-02").await.unwrap().is_some());
        assert!(find_vm(session.as_ref(), "missing").await.unwrap().is_none());
        assert!(find_vm(session.as_ref(), "WEB-01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_structure_shape() {
        let connector = MemoryConnector::new(sample());
        let session = connector.connect().await.unwrap();

        let tree = build_structure(session.as_ref()).await.unwrap();
        assert_eq!(tree.len(), 2);

        let dc1 = &tree[0];
        assert_eq!(dc1.name(), "DC1");
        assert_eq!(dc1.children().len(), 1);

        let vm_folder = &dc1.children()[0];
        assert!(matches!(vm_folder, InventoryNode::Folder { .. }));
        assert_eq!(vm_folder.name(), "vm");
        // the "other" entity is dropped
        let names: Vec<&str> = vm_folder.children().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["prod", "db-01"]);

        let prod = &vm_folder.children()[0];
        let pool = &prod.children()[2];
        assert!(matches!(pool, InventoryNode::ResourcePool { .. }));
        let pool_children: Vec<&str> = pool.children().iter().map(|n| n.name()).collect();
        assert_eq!(pool_children, vec!["nested", "app-01"]);

        match &prod.children()[0] {
            InventoryNode::VirtualMachine { name, power_state } => {
                assert_eq!(name, "web-01");
                assert_eq!(*power_state, PowerState::PoweredOn);
            }
            other => panic!("expected VM, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_structure_empty_datacenter() {
        let mut inv = MemoryInventory::new();
        inv.datacenter("DC1");
        let connector = MemoryConnector::new(inv);
        let session = connector.connect().await.unwrap();

        let tree = build_structure(session.as_ref()).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children().len(), 1);
        assert!(tree[0].children()[0].children().is_empty());
    }
}
