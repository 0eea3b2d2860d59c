use kapply_schema::{Resource, ResourceId};
use kapply_store::{ResourceStatus, Status, StoreError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActionKind {
    Inventory,
    Apply,
    Prune,
    Wait,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Inventory => write!(f, "inventory"),
            ActionKind::Apply => write!(f, "apply"),
            ActionKind::Prune => write!(f, "prune"),
            ActionKind::Wait => write!(f, "wait"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupPhase {
    Started,
    Finished,
}

/// A queued action group as listed by [`Event::Init`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub action: ActionKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplyOperation {
    Created,
    Updated,
    Unchanged,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PruneOperation {
    Pruned,
    Skipped,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitOperation {
    Pending,
    Reconciled,
    Skipped,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// The call itself is malformed. Fatal before any group runs.
    InvalidInput,
    /// The live object belongs to another inventory, or to none.
    OwnershipConflict,
    /// Optimistic concurrency failure reported by the store.
    StoreConflict,
    Timeout,
    Cancelled,
    /// The object cannot be mapped to a store type.
    Unsupported,
    /// Any other store failure.
    Store,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "invalid input"),
            ErrorKind::OwnershipConflict => write!(f, "ownership conflict"),
            ErrorKind::StoreConflict => write!(f, "store conflict"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Unsupported => write!(f, "unsupported"),
            ErrorKind::Store => write!(f, "store error"),
        }
    }
}

/// Error payload carried by events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct EventError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EventError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&StoreError> for EventError {
    fn from(e: &StoreError) -> Self {
        let kind = match e {
            StoreError::Conflict { .. } | StoreError::OwnerMismatch { .. } => {
                ErrorKind::StoreConflict
            }
            StoreError::Resource(_) => ErrorKind::Unsupported,
            StoreError::InventoryIdMismatch { .. } | StoreError::InvalidInventory(_) => {
                ErrorKind::InvalidInput
            }
            _ => ErrorKind::Store,
        };
        Self::new(kind, e.to_string())
    }
}

/// Everything a run reports, in order.
///
/// For every group the `Started` event precedes the group's per-object
/// events, which precede its `Finished` event, and groups appear in queue
/// order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    Init {
        groups: Vec<GroupInfo>,
    },
    ActionGroup {
        action: ActionKind,
        group: String,
        phase: GroupPhase,
    },
    Apply {
        group: String,
        id: ResourceId,
        operation: ApplyOperation,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<EventError>,
    },
    Prune {
        group: String,
        id: ResourceId,
        operation: PruneOperation,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<EventError>,
    },
    Wait {
        group: String,
        id: ResourceId,
        operation: WaitOperation,
    },
    Status {
        id: ResourceId,
        status: Status,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        resource: Option<Resource>,
    },
    Error {
        error: EventError,
    },
}

impl Event {
    pub fn group(&self) -> Option<&str> {
        match self {
            Event::ActionGroup { group, .. }
            | Event::Apply { group, .. }
            | Event::Prune { group, .. }
            | Event::Wait { group, .. } => Some(group),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&EventError> {
        match self {
            Event::Apply { error, .. } | Event::Prune { error, .. } => error.as_ref(),
            Event::Error { error } => Some(error),
            _ => None,
        }
    }

    pub(crate) fn status(update: ResourceStatus) -> Self {
        Event::Status {
            id: update.id,
            status: update.status,
            message: update.message,
            resource: update.resource,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Init { groups } => {
                let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
                write!(f, "init: {}", names.join(", "))
            }
            Event::ActionGroup { group, phase, .. } => write!(f, "{group} {phase:?}"),
            Event::Apply {
                id,
                operation,
                error,
                ..
            } => match error {
                Some(e) => write!(f, "{id} apply {operation:?}: {e}"),
                None => write!(f, "{id} {operation:?}"),
            },
            Event::Prune {
                id,
                operation,
                error,
                ..
            } => match error {
                Some(e) => write!(f, "{id} prune {operation:?}: {e}"),
                None => write!(f, "{id} {operation:?}"),
            },
            Event::Wait { id, operation, .. } => write!(f, "{id} wait {operation:?}"),
            Event::Status {
                id,
                status,
                message,
                ..
            } => {
                if message.is_empty() {
                    write!(f, "{id} is {status}")
                } else {
                    write!(f, "{id} is {status}: {message}")
                }
            }
            Event::Error { error } => write!(f, "error ({}): {error}", error.kind),
        }
    }
}

/// Drain a run's event stream until it closes.
pub async fn collect_events(mut rx: mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Per-operation counts folded from an event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub apply_errors: usize,
    pub pruned: usize,
    pub prune_skipped: usize,
    pub prune_errors: usize,
    pub reconciled: usize,
    pub wait_failed: usize,
    pub wait_timeouts: usize,
    pub errors: usize,
}

impl RunSummary {
    pub fn observe(&mut self, event: &Event) {
        match event {
            Event::Apply { operation, .. } => match operation {
                ApplyOperation::Created => self.created += 1,
                ApplyOperation::Updated => self.updated += 1,
                ApplyOperation::Unchanged => self.unchanged += 1,
                ApplyOperation::Errored => self.apply_errors += 1,
            },
            Event::Prune { operation, .. } => match operation {
                PruneOperation::Pruned => self.pruned += 1,
                PruneOperation::Skipped => self.prune_skipped += 1,
                PruneOperation::Errored => self.prune_errors += 1,
            },
            Event::Wait { operation, .. } => match operation {
                WaitOperation::Reconciled => self.reconciled += 1,
                WaitOperation::Failed => self.wait_failed += 1,
                WaitOperation::Timeout => self.wait_timeouts += 1,
                WaitOperation::Pending | WaitOperation::Skipped => {}
            },
            Event::Error { .. } => self.errors += 1,
            Event::Init { .. } | Event::ActionGroup { .. } | Event::Status { .. } => {}
        }
    }

    /// True when any object failed or the run reported an error.
    pub fn has_failures(&self) -> bool {
        self.apply_errors
            + self.prune_errors
            + self.wait_failed
            + self.wait_timeouts
            + self.errors
            > 0
    }
}

impl<'a> FromIterator<&'a Event> for RunSummary {
    fn from_iter<I: IntoIterator<Item = &'a Event>>(iter: I) -> Self {
        let mut summary = RunSummary::default();
        for event in iter {
            summary.observe(event);
        }
        summary
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} unchanged, {} apply failed; {} pruned, {} prune skipped, {} prune failed",
            self.created,
            self.updated,
            self.unchanged,
            self.apply_errors,
            self.pruned,
            self.prune_skipped,
            self.prune_errors
        )?;
        if self.reconciled + self.wait_failed + self.wait_timeouts > 0 {
            write!(
                f,
                "; {} reconciled, {} failed, {} timed out",
                self.reconciled, self.wait_failed, self.wait_timeouts
            )?;
        }
        Ok(())
    }
}
