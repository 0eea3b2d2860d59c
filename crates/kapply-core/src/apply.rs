use crate::event::{ApplyOperation, ErrorKind, EventError};
use crate::options::Options;
use kapply_schema::Resource;
use kapply_store::{can_apply, InventoryInfo, ResourceStore};

/// Create or update one object, stamping it with the inventory's id.
///
/// Every failure is confined to this object and returned as an
/// [`EventError`]. In dry-run mode nothing is written but the operation that
/// would have happened is reported.
pub(crate) async fn apply_object(
    store: &dyn ResourceStore,
    inventory: &InventoryInfo,
    desired: &Resource,
    options: &Options,
) -> Result<ApplyOperation, EventError> {
    let id = desired
        .id()
        .map_err(|e| EventError::new(ErrorKind::Unsupported, e.to_string()))?;

    let live = match store.get(&id).await {
        Ok(live) => Some(live),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(EventError::from(&e)),
    };
    check_ownership(inventory, live.as_ref(), options)?;

    let mut object = desired.clone();
    object.set_owning_inventory(&inventory.id);

    let Some(live) = live else {
        if options.dry_run {
            return Ok(ApplyOperation::Created);
        }
        return match store.create(&object).await {
            Ok(_) => Ok(ApplyOperation::Created),
            Err(e) if e.is_already_exists() => {
                tracing::debug!("{id} appeared before create; updating instead");
                let live = store.get(&id).await.map_err(|e| EventError::from(&e))?;
                check_ownership(inventory, Some(&live), options)?;
                update_existing(store, &object, &live, options).await
            }
            Err(e) => Err(EventError::from(&e)),
        };
    };
    update_existing(store, &object, &live, options).await
}

fn check_ownership(
    inventory: &InventoryInfo,
    live: Option<&Resource>,
    options: &Options,
) -> Result<(), EventError> {
    can_apply(&inventory.id, live, options.inventory_policy)
        .map_err(|e| EventError::new(ErrorKind::OwnershipConflict, e.to_string()))
}

async fn update_existing(
    store: &dyn ResourceStore,
    object: &Resource,
    live: &Resource,
    options: &Options,
) -> Result<ApplyOperation, EventError> {
    if object.same_content(live) {
        return Ok(ApplyOperation::Unchanged);
    }
    if options.dry_run {
        return Ok(ApplyOperation::Updated);
    }
    let expected = live.resource_version().unwrap_or_default();
    store
        .update(object, &expected)
        .await
        .map_err(|e| EventError::from(&e))?;
    Ok(ApplyOperation::Updated)
}
