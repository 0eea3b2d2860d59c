//! Collaborators consumed by the kapply engine.
//!
//! This crate defines the contracts the orchestration core talks to and the
//! reference implementations used by the CLI and the test suites: the
//! `ResourceStore` CRUD service (with the in-process `MemoryStore`), inventory
//! ledger persistence (`InventoryStorage`, `MemoryInventory`, `FileInventory`),
//! ownership policy checks, the resource status model, and status polling
//! (`StatusPoller`, `StorePoller`, `ScriptedPoller`).

pub mod inventory;
pub mod layout;
pub mod memory;
pub mod mock;
pub mod ownership;
pub mod poller;
pub mod status;

pub use inventory::{
    FileInventory, InventoryInfo, InventoryRecord, InventoryStorage, MemoryInventory,
    INVENTORY_KIND,
};
pub use layout::{StateLayout, STATE_FORMAT_VERSION};
pub use memory::{MemoryStore, StoreOp};
pub use mock::ScriptedPoller;
pub use ownership::{can_apply, can_prune, id_match, IdMatch, InventoryPolicy, OwnershipError};
pub use poller::{PollEvent, PollOptions, ResourceStatus, StatusPoller, StorePoller};
pub use status::{compute_status, Status};

use async_trait::async_trait;
use kapply_schema::{
    GroupKind, InventoryId, Resource, ResourceError, ResourceId, ResourceSet, ResourceVersion,
};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Write `content` to `dest` through a temp file in `dir`, then rename.
pub(crate) fn write_atomic(dir: &Path, dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("resource not found: {0}")]
    NotFound(ResourceId),
    #[error("resource already exists: {0}")]
    AlreadyExists(ResourceId),
    #[error("conflict on {id}: expected resourceVersion {expected}, found {found}")]
    Conflict {
        id: ResourceId,
        expected: String,
        found: String,
    },
    #[error("owner mismatch on {id}: expected {expected}, found {found}")]
    OwnerMismatch {
        id: ResourceId,
        expected: String,
        found: String,
    },
    #[error("invalid resource: {0}")]
    Resource(#[from] ResourceError),
    #[error("inventory {key} has id {found}, expected {expected}")]
    InventoryIdMismatch {
        key: String,
        expected: String,
        found: String,
    },
    #[error("integrity check failed for '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("state format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid inventory: {0}")]
    InvalidInventory(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::OwnerMismatch { .. })
    }
}

/// Selection criteria for [`ResourceStore::list`]. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub namespace: Option<String>,
    pub group_kind: Option<GroupKind>,
    pub label: Option<(String, String)>,
}

impl ListFilter {
    #[must_use]
    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_owned());
        self
    }

    #[must_use]
    pub fn of_kind(mut self, group_kind: GroupKind) -> Self {
        self.group_kind = Some(group_kind);
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.label = Some((key.to_owned(), value.to_owned()));
        self
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        if let Some(ns) = &self.namespace {
            if resource.namespace() != ns {
                return false;
            }
        }
        if let Some(gk) = &self.group_kind {
            if resource.group_kind() != *gk {
                return false;
            }
        }
        if let Some((key, value)) = &self.label {
            if resource.label(key) != Some(value.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The remote control-plane store, consumed as a CRUD service.
///
/// Every call is independent; a failure on one object says nothing about
/// another. Writes are optimistically concurrent: `update` only succeeds when
/// the stored resource version equals `expected`.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, id: &ResourceId) -> Result<Resource, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] when the id is taken.
    async fn create(&self, resource: &Resource) -> Result<Resource, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the stored version moved.
    async fn update(
        &self,
        resource: &Resource,
        expected: &ResourceVersion,
    ) -> Result<Resource, StoreError>;

    /// Delete the resource. With `expected_owner`, the delete only happens
    /// when the stored owning-inventory annotation matches.
    async fn delete(
        &self,
        id: &ResourceId,
        expected_owner: Option<&InventoryId>,
    ) -> Result<(), StoreError>;

    async fn list(&self, filter: &ListFilter) -> Result<ResourceSet, StoreError>;
}
