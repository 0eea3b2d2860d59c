use kapply_schema::Resource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Reconciliation status of a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    InProgress,
    Current,
    Failed,
    Terminating,
    NotFound,
    Unknown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::InProgress => write!(f, "InProgress"),
            Status::Current => write!(f, "Current"),
            Status::Failed => write!(f, "Failed"),
            Status::Terminating => write!(f, "Terminating"),
            Status::NotFound => write!(f, "NotFound"),
            Status::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Evaluate a live resource's status from its raw fields.
///
/// Rules, first match wins:
/// - `metadata.deletionTimestamp` set: `Terminating`
/// - condition `Stalled=True`: `Failed`
/// - condition `Reconciling=True` or `Ready=False`: `InProgress`
/// - `status.observedGeneration` behind `metadata.generation`: `InProgress`
/// - otherwise `Current`
///
/// Returns the status and a short human readable message.
pub fn compute_status(resource: &Resource) -> (Status, String) {
    if resource
        .field(&["metadata", "deletionTimestamp"])
        .is_some_and(|v| !v.is_null())
    {
        return (Status::Terminating, "resource scheduled for deletion".to_owned());
    }

    if let Some(reason) = condition(resource, "Stalled", "True") {
        return (Status::Failed, reason);
    }
    if let Some(reason) = condition(resource, "Reconciling", "True") {
        return (Status::InProgress, reason);
    }
    if let Some(reason) = condition(resource, "Ready", "False") {
        return (Status::InProgress, reason);
    }

    if let (Some(generation), Some(observed)) = (
        resource.generation(),
        resource
            .field(&["status", "observedGeneration"])
            .and_then(Value::as_i64),
    ) {
        if observed < generation {
            return (
                Status::InProgress,
                format!("observed generation {observed} behind generation {generation}"),
            );
        }
    }

    (Status::Current, "resource is current".to_owned())
}

/// Message of the first condition of `kind` whose status equals `status`.
fn condition(resource: &Resource, kind: &str, status: &str) -> Option<String> {
    let conditions = resource.field(&["status", "conditions"])?.as_array()?;
    conditions.iter().find_map(|c| {
        let matches = c.get("type").and_then(Value::as_str) == Some(kind)
            && c.get("status").and_then(Value::as_str) == Some(status);
        matches.then(|| {
            c.get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .map_or_else(|| format!("{kind} is {status}"), str::to_owned)
        })
    })
}
