use crate::event::{ErrorKind, EventError, PruneOperation};
use crate::options::Options;
use kapply_schema::ResourceId;
use kapply_store::{can_prune, InventoryInfo, ResourceStore};

/// Delete one object if this inventory may, returning the operation and,
/// for skips and failures, the reason.
pub(crate) async fn prune_object(
    store: &dyn ResourceStore,
    inventory: &InventoryInfo,
    id: &ResourceId,
    options: &Options,
) -> (PruneOperation, Option<EventError>) {
    let live = match store.get(id).await {
        Ok(live) => live,
        Err(e) if e.is_not_found() => return (PruneOperation::Pruned, None),
        Err(e) => return (PruneOperation::Errored, Some(EventError::from(&e))),
    };

    if !can_prune(&inventory.id, &live, options.inventory_policy) {
        let reason = match live.owning_inventory() {
            Some(owner) => format!("{id} is owned by inventory '{owner}', not '{}'", inventory.id),
            None => format!("{id} is not owned by any inventory"),
        };
        let reason = EventError::new(ErrorKind::OwnershipConflict, reason);
        return (PruneOperation::Skipped, Some(reason));
    }
    if options.dry_run {
        return (PruneOperation::Pruned, None);
    }

    let expected_owner = live.owning_inventory().map(|_| &inventory.id);
    match store.delete(id, expected_owner).await {
        Ok(()) => (PruneOperation::Pruned, None),
        Err(e) if e.is_not_found() => (PruneOperation::Pruned, None),
        Err(e) => (PruneOperation::Errored, Some(EventError::from(&e))),
    }
}
