use crate::{write_atomic, ListFilter, ResourceStore, StoreError};
use async_trait::async_trait;
use kapply_schema::{InventoryId, Resource, ResourceId, ResourceSet, ResourceVersion};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Operation a scripted fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<ResourceId, Resource>,
    next_version: u64,
    next_uid: u64,
    faults: HashMap<(StoreOp, ResourceId), String>,
    races: HashSet<ResourceId>,
    writes: usize,
}

impl MemoryState {
    fn bump_version(&mut self) -> ResourceVersion {
        self.next_version += 1;
        ResourceVersion::new(self.next_version.to_string())
    }

    fn fault(&self, op: StoreOp, id: &ResourceId) -> Result<(), StoreError> {
        match self.faults.get(&(op, id.clone())) {
            Some(message) => Err(StoreError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }
}

/// In-process [`ResourceStore`].
///
/// Behaves like a control-plane store: create assigns `uid`, `generation` and
/// `creationTimestamp`, every write bumps `resourceVersion`, updates check the
/// expected version and keep `status`, and generation only moves when the
/// declared content changes. Faults can be scripted per operation and id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`MemoryStore::save`]. A missing file yields
    /// an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let store = Self::new();
        if !path.exists() {
            return Ok(store);
        }
        let content = fs::read_to_string(path)?;
        let set: ResourceSet = serde_json::from_str(&content)?;
        {
            let mut state = store.lock();
            for resource in set {
                let id = resource.id()?;
                if let Some(rv) = resource
                    .resource_version()
                    .and_then(|rv| rv.parse::<u64>().ok())
                {
                    state.next_version = state.next_version.max(rv);
                }
                state.next_uid += 1;
                state.objects.insert(id, resource);
            }
        }
        Ok(store)
    }

    /// Persist every stored object atomically as a JSON array.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        write_atomic(dir, path, content.as_bytes())
    }

    /// Store a resource as-is, as if another client had created it.
    pub fn insert(&self, resource: Resource) -> Result<Resource, StoreError> {
        let id = resource.id()?;
        let mut state = self.lock();
        let stored = stamp_new(&mut state, resource);
        state.objects.insert(id, stored.clone());
        Ok(stored)
    }

    /// Overwrite the `status` of a stored object without bumping its version.
    pub fn set_status(&self, id: &ResourceId, status: Value) -> Result<(), StoreError> {
        let mut state = self.lock();
        let object = state
            .objects
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        object.set_field(&["status"], status);
        Ok(())
    }

    /// Remove a stored object without any checks.
    pub fn remove(&self, id: &ResourceId) -> Option<Resource> {
        self.lock().objects.remove(id)
    }

    /// Make `op` on `id` fail with [`StoreError::Unavailable`].
    pub fn inject_fault(&self, op: StoreOp, id: &ResourceId, message: &str) {
        self.lock()
            .faults
            .insert((op, id.clone()), message.to_owned());
    }

    /// Bump the version of `id` right after the next `get` returns it, as if
    /// another client wrote the object in between.
    pub fn race_next_get(&self, id: &ResourceId) {
        self.lock().races.insert(id.clone());
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.faults.clear();
        state.races.clear();
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.lock().objects.contains_key(id)
    }

    pub fn peek(&self, id: &ResourceId) -> Option<Resource> {
        self.lock().objects.get(id).cloned()
    }

    /// Number of successful create, update and delete calls.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn snapshot(&self) -> ResourceSet {
        self.lock().objects.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn stamp_new(state: &mut MemoryState, mut resource: Resource) -> Resource {
    state.next_uid += 1;
    let uid = format!("uid-{}", state.next_uid);
    let rv = state.bump_version();
    resource.set_field(&["metadata", "uid"], Value::String(uid));
    resource.set_field(&["metadata", "generation"], Value::from(1));
    resource.set_field(
        &["metadata", "creationTimestamp"],
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    resource.set_resource_version(&rv);
    resource
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, id: &ResourceId) -> Result<Resource, StoreError> {
        let mut state = self.lock();
        state.fault(StoreOp::Get, id)?;
        let found = state
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if state.races.remove(id) {
            let rv = state.bump_version();
            if let Some(live) = state.objects.get_mut(id) {
                live.set_resource_version(&rv);
            }
        }
        Ok(found)
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, StoreError> {
        let id = resource.id()?;
        let mut state = self.lock();
        state.fault(StoreOp::Create, &id)?;
        if state.objects.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        let stored = stamp_new(&mut state, resource.without_server_fields());
        state.objects.insert(id, stored.clone());
        state.writes += 1;
        Ok(stored)
    }

    async fn update(
        &self,
        resource: &Resource,
        expected: &ResourceVersion,
    ) -> Result<Resource, StoreError> {
        let id = resource.id()?;
        let mut state = self.lock();
        state.fault(StoreOp::Update, &id)?;
        let live = state
            .objects
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let found = live.resource_version().unwrap_or_default();
        if found != *expected {
            return Err(StoreError::Conflict {
                id,
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }

        let mut next = resource.without_server_fields();
        for field in ["uid", "creationTimestamp"] {
            if let Some(value) = live.field(&["metadata", field]) {
                next.set_field(&["metadata", field], value.clone());
            }
        }
        let generation = live.generation().unwrap_or(1);
        let spec_changed = strip_metadata(&next) != strip_metadata(&live.without_server_fields());
        let generation = if spec_changed { generation + 1 } else { generation };
        next.set_field(&["metadata", "generation"], Value::from(generation));
        if let Some(status) = live.field(&["status"]) {
            next.set_field(&["status"], status.clone());
        }
        let rv = state.bump_version();
        next.set_resource_version(&rv);

        state.objects.insert(id, next.clone());
        state.writes += 1;
        Ok(next)
    }

    async fn delete(
        &self,
        id: &ResourceId,
        expected_owner: Option<&InventoryId>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.fault(StoreOp::Delete, id)?;
        let live = state
            .objects
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if let Some(owner) = expected_owner {
            let found = live.owning_inventory().unwrap_or_default();
            if found != owner.as_str() {
                return Err(StoreError::OwnerMismatch {
                    id: id.clone(),
                    expected: owner.to_string(),
                    found: found.to_owned(),
                });
            }
        }
        state.objects.remove(id);
        state.writes += 1;
        Ok(())
    }

    async fn list(&self, filter: &ListFilter) -> Result<ResourceSet, StoreError> {
        Ok(self
            .lock()
            .objects
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}

/// Content with `metadata` removed, used to decide whether generation moves.
fn strip_metadata(resource: &Resource) -> Resource {
    let mut copy = resource.clone();
    copy.remove_field(&["metadata"]);
    copy
}
