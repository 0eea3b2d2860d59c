use crate::event::{ActionKind, GroupInfo};
use crate::options::Options;
use crate::ordering::{apply_batches, prune_batches, ApplyOrdering};
use crate::prepare::Prepared;
use crate::wait::WaitCondition;
use kapply_schema::{IdSet, ResourceSet};
use std::collections::HashMap;
use std::time::Duration;

/// One action group of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// Add the desired ids to the in-memory working ledger.
    InventoryAdd { group: String },
    Apply { group: String, objects: ResourceSet },
    Wait {
        group: String,
        ids: IdSet,
        condition: WaitCondition,
        timeout: Duration,
    },
    Prune { group: String, ids: IdSet },
    /// Persist the working ledger.
    InventorySet { group: String },
    /// Remove the ledger, keeping only ids that could not be pruned.
    DeleteInventory { group: String },
}

impl Task {
    pub fn group(&self) -> &str {
        match self {
            Task::InventoryAdd { group }
            | Task::Apply { group, .. }
            | Task::Wait { group, .. }
            | Task::Prune { group, .. }
            | Task::InventorySet { group }
            | Task::DeleteInventory { group } => group,
        }
    }

    pub fn action(&self) -> ActionKind {
        match self {
            Task::InventoryAdd { .. } | Task::InventorySet { .. } | Task::DeleteInventory { .. } => {
                ActionKind::Inventory
            }
            Task::Apply { .. } => ActionKind::Apply,
            Task::Wait { .. } => ActionKind::Wait,
            Task::Prune { .. } => ActionKind::Prune,
        }
    }
}

/// Numbers groups per action name: `apply-0`, `apply-1`, `wait-0`, ...
#[derive(Debug, Default)]
struct GroupNames {
    counters: HashMap<&'static str, usize>,
}

impl GroupNames {
    fn next(&mut self, prefix: &'static str) -> String {
        let counter = self.counters.entry(prefix).or_insert(0);
        let name = format!("{prefix}-{counter}");
        *counter += 1;
        name
    }
}

/// Ordered action groups, executed strictly one after another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQueue {
    tasks: Vec<Task>,
}

impl TaskQueue {
    /// inventory-add, apply batches (each followed by a wait when waits are
    /// enabled), prune batches (likewise), inventory-set.
    pub fn for_apply(prepared: &Prepared, ordering: &dyn ApplyOrdering, options: &Options) -> Self {
        let mut names = GroupNames::default();
        let mut tasks = vec![Task::InventoryAdd {
            group: names.next("inventory-add"),
        }];

        for batch in apply_batches(&prepared.apply, ordering) {
            let ids: IdSet = batch.iter().filter_map(|r| r.id().ok()).collect();
            tasks.push(Task::Apply {
                group: names.next("apply"),
                objects: batch,
            });
            push_wait(&mut tasks, &mut names, ids, WaitCondition::Current, options);
        }

        push_prunes(&mut tasks, &mut names, &prepared.prune, ordering, options);

        tasks.push(Task::InventorySet {
            group: names.next("inventory-set"),
        });
        Self { tasks }
    }

    /// Prune every ledger member (reverse ledger order), then delete the ledger.
    pub fn for_destroy(ledger: &IdSet, ordering: &dyn ApplyOrdering, options: &Options) -> Self {
        let mut names = GroupNames::default();
        let mut tasks = Vec::new();
        push_prunes(&mut tasks, &mut names, &ledger.reversed(), ordering, options);
        tasks.push(Task::DeleteInventory {
            group: names.next("delete-inventory"),
        });
        Self { tasks }
    }

    pub fn groups(&self) -> Vec<GroupInfo> {
        self.tasks
            .iter()
            .map(|t| GroupInfo {
                action: t.action(),
                name: t.group().to_owned(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }
}

impl IntoIterator for TaskQueue {
    type Item = Task;
    type IntoIter = std::vec::IntoIter<Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}

fn push_prunes(
    tasks: &mut Vec<Task>,
    names: &mut GroupNames,
    prune: &IdSet,
    ordering: &dyn ApplyOrdering,
    options: &Options,
) {
    for batch in prune_batches(prune, ordering) {
        tasks.push(Task::Prune {
            group: names.next("prune"),
            ids: batch.clone(),
        });
        push_wait(tasks, names, batch, WaitCondition::NotFound, options);
    }
}

fn push_wait(
    tasks: &mut Vec<Task>,
    names: &mut GroupNames,
    ids: IdSet,
    condition: WaitCondition,
    options: &Options,
) {
    if !options.waits_enabled() || ids.is_empty() {
        return;
    }
    tasks.push(Task::Wait {
        group: names.next("wait"),
        ids,
        condition,
        timeout: options.reconcile_timeout,
    });
}
