use crate::layout::StateLayout;
use crate::{write_atomic, StoreError};
use async_trait::async_trait;
use kapply_schema::{IdSet, InventoryId, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Kind of the storage object that represents an inventory in the store.
pub const INVENTORY_KIND: &str = "ConfigMap";

/// Where an inventory lives and the id stamped on every object it owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryInfo {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub id: InventoryId,
}

impl InventoryInfo {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        id: impl Into<InventoryId>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Identifier of the inventory's own storage object.
    pub fn object_id(&self) -> ResourceId {
        ResourceId::new("", INVENTORY_KIND, self.namespace.clone(), self.name.clone())
    }

    /// Storage key: `namespace_name`, or `name` when cluster-scoped. Keys of
    /// valid inventories are unique since `_` is not allowed in either part.
    pub fn key(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}_{}", self.namespace, self.name)
        }
    }

    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty() || self.id.trim().is_empty()
    }

    /// Name and id are set, and name and namespace are lowercase
    /// alphanumerics, `-` and `.`, beginning and ending alphanumeric.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.is_blank() {
            return Err(StoreError::InvalidInventory(
                "name and id must not be empty".to_owned(),
            ));
        }
        for (field, value) in [("name", &self.name), ("namespace", &self.namespace)] {
            if !value.is_empty() && !is_object_name(value) {
                return Err(StoreError::InvalidInventory(format!(
                    "{field} '{value}' may only hold lowercase alphanumerics, '-' and '.'"
                )));
            }
        }
        Ok(())
    }
}

fn is_object_name(value: &str) -> bool {
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    value.starts_with(alnum)
        && value.ends_with(alnum)
        && value.chars().all(|c| alnum(c) || c == '-' || c == '.')
}

/// Persisted ledger of one inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub info: InventoryInfo,
    pub objects: IdSet,
    pub updated_at: String,
    /// blake3 checksum over the record without this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl InventoryRecord {
    pub fn new(info: InventoryInfo, objects: IdSet) -> Self {
        Self {
            info,
            objects,
            updated_at: chrono::Utc::now().to_rfc3339(),
            checksum: None,
        }
    }

    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    fn check_owner(&self, info: &InventoryInfo) -> Result<(), StoreError> {
        if self.info.id != info.id {
            return Err(StoreError::InventoryIdMismatch {
                key: info.key(),
                expected: info.id.to_string(),
                found: self.info.id.to_string(),
            });
        }
        Ok(())
    }
}

/// Durable storage for inventory ledgers.
///
/// `load` returns `None` for an inventory that was never saved and fails with
/// [`StoreError::InventoryIdMismatch`] when the stored record belongs to a
/// different inventory id.
#[async_trait]
pub trait InventoryStorage: Send + Sync {
    async fn load(&self, info: &InventoryInfo) -> Result<Option<InventoryRecord>, StoreError>;
    async fn save(&self, info: &InventoryInfo, objects: &IdSet) -> Result<(), StoreError>;
    async fn delete(&self, info: &InventoryInfo) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryInventoryState {
    records: BTreeMap<String, InventoryRecord>,
    fail_saves: bool,
    saves: usize,
}

/// In-process inventory storage.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    state: Mutex<MemoryInventoryState>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a ledger without going through `save`.
    pub fn seed(&self, info: &InventoryInfo, objects: IdSet) {
        let mut state = self.lock();
        state
            .records
            .insert(info.key(), InventoryRecord::new(info.clone(), objects));
    }

    pub fn objects(&self, info: &InventoryInfo) -> Option<IdSet> {
        self.lock()
            .records
            .get(&info.key())
            .map(|r| r.objects.clone())
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    /// Make every following `save` fail with [`StoreError::Unavailable`].
    pub fn fail_saves(&self, fail: bool) {
        self.lock().fail_saves = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInventoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl InventoryStorage for MemoryInventory {
    async fn load(&self, info: &InventoryInfo) -> Result<Option<InventoryRecord>, StoreError> {
        let state = self.lock();
        let Some(record) = state.records.get(&info.key()) else {
            return Ok(None);
        };
        record.check_owner(info)?;
        Ok(Some(record.clone()))
    }

    async fn save(&self, info: &InventoryInfo, objects: &IdSet) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.fail_saves {
            return Err(StoreError::Unavailable(format!(
                "inventory {} is read-only",
                info.key()
            )));
        }
        if let Some(existing) = state.records.get(&info.key()) {
            existing.check_owner(info)?;
        }
        state
            .records
            .insert(info.key(), InventoryRecord::new(info.clone(), objects.clone()));
        state.saves += 1;
        Ok(())
    }

    async fn delete(&self, info: &InventoryInfo) -> Result<(), StoreError> {
        self.lock().records.remove(&info.key());
        Ok(())
    }
}

/// Inventory storage backed by one JSON file per inventory under a state
/// directory. Writes are atomic and carry a blake3 checksum verified on load.
#[derive(Debug, Clone)]
pub struct FileInventory {
    layout: StateLayout,
}

impl FileInventory {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    fn path(&self, info: &InventoryInfo) -> Result<PathBuf, StoreError> {
        info.validate()?;
        Ok(self.layout.inventory_dir().join(format!("{}.json", info.key())))
    }

    fn read(&self, info: &InventoryInfo) -> Result<Option<InventoryRecord>, StoreError> {
        let path = self.path(info)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let record: InventoryRecord = serde_json::from_str(&content)?;

        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    key: info.key(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        record.check_owner(info)?;
        Ok(Some(record))
    }

    fn write(&self, info: &InventoryInfo, objects: &IdSet) -> Result<(), StoreError> {
        if let Some(existing) = self.read(info)? {
            existing.check_owner(info)?;
        }
        let mut record = InventoryRecord::new(info.clone(), objects.clone());
        record.checksum = Some(record.compute_checksum()?);
        let content = serde_json::to_string_pretty(&record)?;

        let dir = self.layout.inventory_dir();
        fs::create_dir_all(&dir)?;
        write_atomic(&dir, &self.path(info)?, content.as_bytes())?;
        tracing::debug!(
            "saved inventory {} with {} objects",
            info.key(),
            objects.len()
        );
        Ok(())
    }
}

#[async_trait]
impl InventoryStorage for FileInventory {
    async fn load(&self, info: &InventoryInfo) -> Result<Option<InventoryRecord>, StoreError> {
        self.read(info)
    }

    async fn save(&self, info: &InventoryInfo, objects: &IdSet) -> Result<(), StoreError> {
        self.write(info, objects)
    }

    async fn delete(&self, info: &InventoryInfo) -> Result<(), StoreError> {
        let path = self.path(info)?;
        if path.exists() {
            fs::remove_file(path)?;
            tracing::debug!("deleted inventory {}", info.key());
        }
        Ok(())
    }
}
