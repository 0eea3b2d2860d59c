use crate::event::{ErrorKind, EventError};
use crate::options::Options;
use crate::CoreError;
use kapply_schema::{IdSet, ResourceSet, INVENTORY_ID_LABEL};
use kapply_store::InventoryInfo;

/// Result of diffing a desired set against an inventory ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prepared {
    /// Desired resources to apply, in input order.
    pub apply: ResourceSet,
    /// Identifiers of `apply`.
    pub desired: IdSet,
    /// Ledger members no longer desired, in reverse ledger order.
    pub prune: IdSet,
    /// Desired objects that cannot be identified. Reported, never applied.
    pub unsupported: Vec<EventError>,
}

/// Compute the apply and prune sets for a run.
///
/// Pure: nothing is read from or written to any store. Fails with
/// [`CoreError::InvalidInput`] when the inventory is invalid, when a desired
/// object is the inventory's own storage object or carries the inventory-id
/// label, or when two desired objects share an identifier.
pub fn prepare_objects(
    inventory: &InventoryInfo,
    ledger: &IdSet,
    desired: &ResourceSet,
    options: &Options,
) -> Result<Prepared, CoreError> {
    inventory
        .validate()
        .map_err(|e| CoreError::InvalidInput(e.to_string()))?;

    let inventory_object = inventory.object_id();
    let mut prepared = Prepared::default();
    for resource in desired {
        let id = match resource.id() {
            Ok(id) => id,
            Err(e) => {
                prepared
                    .unsupported
                    .push(EventError::new(ErrorKind::Unsupported, e.to_string()));
                continue;
            }
        };
        if id == inventory_object {
            return Err(CoreError::InvalidInput(format!(
                "inventory object {id} cannot be one of the applied resources"
            )));
        }
        if resource.label(INVENTORY_ID_LABEL).is_some() {
            return Err(CoreError::InvalidInput(format!(
                "{id} carries the {INVENTORY_ID_LABEL} label reserved for inventory objects"
            )));
        }
        if !prepared.desired.insert(id.clone()) {
            return Err(CoreError::InvalidInput(format!("duplicate resource: {id}")));
        }
        prepared.apply.push(resource.clone());
    }

    if !options.no_prune {
        prepared.prune = ledger.difference(&prepared.desired).reversed();
    }
    Ok(prepared)
}
