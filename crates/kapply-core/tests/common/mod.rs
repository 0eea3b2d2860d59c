#![allow(dead_code)]

use kapply_core::{ApplyOperation, Event, GroupPhase, PruneOperation, WaitOperation};
use kapply_schema::{InventoryId, Resource, ResourceId};
use kapply_store::{InventoryInfo, MemoryInventory, MemoryStore, ScriptedPoller};
use serde_json::json;
use std::sync::Arc;

pub fn inv() -> InventoryInfo {
    InventoryInfo::new("inventory-obj", "default", "test")
}

pub fn deployment(name: &str) -> Resource {
    let mut d = Resource::new("apps/v1", "Deployment", "default", name);
    d.set_field(&["spec", "replicas"], json!(1));
    d
}

pub fn secret(name: &str) -> Resource {
    let mut s = Resource::new("v1", "Secret", "default", name);
    s.set_field(&["data", "key"], json!("dmFsdWU="));
    s
}

pub fn owned_by(mut resource: Resource, owner: &str) -> Resource {
    resource.set_owning_inventory(&InventoryId::new(owner));
    resource
}

pub fn id_of(resource: &Resource) -> ResourceId {
    resource.id().unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub inventory: Arc<MemoryInventory>,
    pub poller: Arc<ScriptedPoller>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_poller(ScriptedPoller::new())
    }

    pub fn with_poller(poller: ScriptedPoller) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            inventory: Arc::new(MemoryInventory::new()),
            poller: Arc::new(poller),
        }
    }

    pub fn applier(&self) -> kapply_core::Applier {
        kapply_core::Applier::new(
            self.store.clone(),
            self.inventory.clone(),
            self.poller.clone(),
        )
    }

    pub fn destroyer(&self) -> kapply_core::Destroyer {
        kapply_core::Destroyer::new(
            self.store.clone(),
            self.inventory.clone(),
            self.poller.clone(),
        )
    }
}

/// `(group, phase)` for every group boundary, in order.
pub fn group_phases(events: &[Event]) -> Vec<(String, GroupPhase)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ActionGroup { group, phase, .. } => Some((group.clone(), *phase)),
            _ => None,
        })
        .collect()
}

pub fn started_groups(events: &[Event]) -> Vec<String> {
    group_phases(events)
        .into_iter()
        .filter(|(_, phase)| *phase == GroupPhase::Started)
        .map(|(group, _)| group)
        .collect()
}

pub fn apply_ops(events: &[Event]) -> Vec<(String, ApplyOperation)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Apply { id, operation, .. } => Some((id.name.clone(), *operation)),
            _ => None,
        })
        .collect()
}

pub fn prune_ops(events: &[Event]) -> Vec<(String, PruneOperation)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Prune { id, operation, .. } => Some((id.name.clone(), *operation)),
            _ => None,
        })
        .collect()
}

pub fn wait_ops(events: &[Event]) -> Vec<(String, WaitOperation)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Wait { id, operation, .. } => Some((id.name.clone(), *operation)),
            _ => None,
        })
        .collect()
}

/// Every `Started` has exactly one `Finished`, groups never overlap, and
/// every per-object event sits inside its own group.
pub fn assert_well_formed(events: &[Event]) {
    let mut open: Option<String> = None;
    for event in events {
        match event {
            Event::ActionGroup {
                group,
                phase: GroupPhase::Started,
                ..
            } => {
                assert!(open.is_none(), "{group} started inside {open:?}");
                open = Some(group.clone());
            }
            Event::ActionGroup {
                group,
                phase: GroupPhase::Finished,
                ..
            } => {
                assert_eq!(open.as_deref(), Some(group.as_str()));
                open = None;
            }
            other => {
                if let Some(group) = other.group() {
                    assert_eq!(open.as_deref(), Some(group), "{other} outside its group");
                }
            }
        }
    }
    assert!(open.is_none(), "{open:?} never finished");
}
