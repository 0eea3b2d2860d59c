use kapply_schema::{InventoryId, Resource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How an apply treats live objects that another inventory, or none, owns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InventoryPolicy {
    /// Only touch objects already owned by this inventory.
    #[default]
    MustMatch,
    /// Also take ownership of objects that carry no owner.
    AdoptIfNoInventory,
    /// Take ownership regardless of the current owner.
    AdoptAll,
}

impl fmt::Display for InventoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryPolicy::MustMatch => write!(f, "must-match"),
            InventoryPolicy::AdoptIfNoInventory => write!(f, "adopt-if-no-inventory"),
            InventoryPolicy::AdoptAll => write!(f, "adopt-all"),
        }
    }
}

impl FromStr for InventoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "must-match" => Ok(Self::MustMatch),
            "adopt-if-no-inventory" => Ok(Self::AdoptIfNoInventory),
            "adopt-all" => Ok(Self::AdoptAll),
            other => Err(format!(
                "unknown inventory policy '{other}' (expected must-match, adopt-if-no-inventory or adopt-all)"
            )),
        }
    }
}

/// Relation between a live object's owner annotation and an inventory id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMatch {
    /// The object carries no owner.
    Empty,
    Match,
    NoMatch,
}

pub fn id_match(inventory: &InventoryId, object: &Resource) -> IdMatch {
    match object.owning_inventory() {
        None => IdMatch::Empty,
        Some(owner) if owner == inventory.as_str() => IdMatch::Match,
        Some(_) => IdMatch::NoMatch,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("{object} is not owned by any inventory; adopt it with the adopt-if-no-inventory or adopt-all policy")]
    NeedAdoption { object: String },
    #[error("{object} is owned by inventory '{owner}', not '{inventory}'")]
    Overlap {
        object: String,
        owner: String,
        inventory: String,
    },
}

/// Whether applying over `live` is allowed for `inventory` under `policy`.
/// A missing live object can always be applied.
pub fn can_apply(
    inventory: &InventoryId,
    live: Option<&Resource>,
    policy: InventoryPolicy,
) -> Result<(), OwnershipError> {
    let Some(live) = live else {
        return Ok(());
    };
    match (id_match(inventory, live), policy) {
        (IdMatch::Match, _)
        | (IdMatch::Empty, InventoryPolicy::AdoptIfNoInventory | InventoryPolicy::AdoptAll)
        | (IdMatch::NoMatch, InventoryPolicy::AdoptAll) => Ok(()),
        (IdMatch::Empty, InventoryPolicy::MustMatch) => Err(OwnershipError::NeedAdoption {
            object: live.summary(),
        }),
        (IdMatch::NoMatch, _) => Err(OwnershipError::Overlap {
            object: live.summary(),
            owner: live.owning_inventory().unwrap_or_default().to_owned(),
            inventory: inventory.to_string(),
        }),
    }
}

/// Whether `inventory` may delete `live`. Objects owned by another inventory
/// are never pruned; unowned objects only when the policy adopts them.
pub fn can_prune(inventory: &InventoryId, live: &Resource, policy: InventoryPolicy) -> bool {
    match id_match(inventory, live) {
        IdMatch::Match => true,
        IdMatch::Empty => policy != InventoryPolicy::MustMatch,
        IdMatch::NoMatch => false,
    }
}
