use crate::id::{GroupKind, ResourceId};
use crate::types::{InventoryId, ResourceVersion};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Annotation recording which inventory owns a stored resource.
pub const OWNING_INVENTORY_ANNOTATION: &str = "config.k8s.io/owning-inventory";

/// Label carried by an inventory's own storage object.
pub const INVENTORY_ID_LABEL: &str = "cli-utils.sigs.k8s.io/inventory-id";

/// Metadata fields owned by the store. They are ignored when deciding
/// whether a desired resource differs from its live counterpart.
const SERVER_METADATA_FIELDS: &[&str] = &[
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "managedFields",
];

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("unsupported resource type ({0}): apiVersion and kind are required")]
    Unsupported(String),
    #[error("resource {0} has no metadata.name")]
    MissingName(String),
    #[error("expected a resource object, found {0}")]
    NotAnObject(String),
    #[error("duplicate resource: {0}")]
    DuplicateId(ResourceId),
}

/// A resource in generic attribute-map form.
///
/// Accessors follow the `apiVersion` / `kind` / `metadata` / `spec` / `status`
/// layout of a control-plane object and never fail: missing fields read as
/// empty. Only [`Resource::id`] validates that the resource is addressable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource {
    object: Map<String, Value>,
}

impl Resource {
    pub fn new(api_version: &str, kind: &str, namespace: &str, name: &str) -> Self {
        let mut metadata = Map::new();
        metadata.insert("name".to_owned(), Value::String(name.to_owned()));
        if !namespace.is_empty() {
            metadata.insert("namespace".to_owned(), Value::String(namespace.to_owned()));
        }
        let mut object = Map::new();
        object.insert(
            "apiVersion".to_owned(),
            Value::String(api_version.to_owned()),
        );
        object.insert("kind".to_owned(), Value::String(kind.to_owned()));
        object.insert("metadata".to_owned(), Value::Object(metadata));
        Self { object }
    }

    pub fn from_map(object: Map<String, Value>) -> Self {
        Self { object }
    }

    pub fn from_value(value: Value) -> Result<Self, ResourceError> {
        match value {
            Value::Object(object) => Ok(Self { object }),
            other => Err(ResourceError::NotAnObject(value_type(&other).to_owned())),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.object
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.object)
    }

    pub fn api_version(&self) -> &str {
        self.str_field(&["apiVersion"])
    }

    pub fn kind(&self) -> &str {
        self.str_field(&["kind"])
    }

    /// Group part of `apiVersion`. The core group (`v1`) is the empty string.
    pub fn group(&self) -> &str {
        self.api_version()
            .split_once('/')
            .map_or("", |(group, _)| group)
    }

    pub fn version(&self) -> &str {
        let api_version = self.api_version();
        api_version
            .split_once('/')
            .map_or(api_version, |(_, version)| version)
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group(), self.kind())
    }

    pub fn name(&self) -> &str {
        self.str_field(&["metadata", "name"])
    }

    pub fn namespace(&self) -> &str {
        self.str_field(&["metadata", "namespace"])
    }

    pub fn uid(&self) -> &str {
        self.str_field(&["metadata", "uid"])
    }

    pub fn resource_version(&self) -> Option<ResourceVersion> {
        let rv = self.str_field(&["metadata", "resourceVersion"]);
        (!rv.is_empty()).then(|| ResourceVersion::new(rv))
    }

    pub fn generation(&self) -> Option<i64> {
        self.field(&["metadata", "generation"])
            .and_then(Value::as_i64)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.field(&["metadata", "annotations", key])
            .and_then(Value::as_str)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.field(&["metadata", "labels", key])
            .and_then(Value::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.set_field(
            &["metadata", "annotations", key],
            Value::String(value.to_owned()),
        );
    }

    pub fn set_label(&mut self, key: &str, value: &str) {
        self.set_field(&["metadata", "labels", key], Value::String(value.to_owned()));
    }

    /// Owner recorded on the resource, `None` when unowned or blank.
    pub fn owning_inventory(&self) -> Option<&str> {
        self.annotation(OWNING_INVENTORY_ANNOTATION)
            .filter(|owner| !owner.is_empty())
    }

    pub fn set_owning_inventory(&mut self, id: &InventoryId) {
        self.set_annotation(OWNING_INVENTORY_ANNOTATION, id.as_str());
    }

    pub fn set_resource_version(&mut self, rv: &ResourceVersion) {
        self.set_field(
            &["metadata", "resourceVersion"],
            Value::String(rv.to_string()),
        );
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.set_field(
            &["metadata", "namespace"],
            Value::String(namespace.to_owned()),
        );
    }

    /// Nested field lookup. Returns `None` when any segment is missing or an
    /// intermediate value is not an object.
    pub fn field(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.object.get(*first)?;
        for segment in rest {
            current = current.as_object()?.get(*segment)?;
        }
        Some(current)
    }

    /// Set a nested field, creating (or replacing non-object) intermediate maps.
    pub fn set_field(&mut self, path: &[&str], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut current = &mut self.object;
        for segment in parents {
            let entry = current
                .entry((*segment).to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(map) = entry else {
                return;
            };
            current = map;
        }
        current.insert((*last).to_owned(), value);
    }

    pub fn remove_field(&mut self, path: &[&str]) -> Option<Value> {
        let (last, parents) = path.split_last()?;
        let mut current = &mut self.object;
        for segment in parents {
            current = current.get_mut(*segment)?.as_object_mut()?;
        }
        current.remove(*last)
    }

    /// Derive the resource's identifier.
    pub fn id(&self) -> Result<ResourceId, ResourceError> {
        if self.api_version().is_empty() || self.kind().is_empty() {
            return Err(ResourceError::Unsupported(self.summary()));
        }
        if self.name().is_empty() {
            return Err(ResourceError::MissingName(self.summary()));
        }
        Ok(ResourceId {
            group_kind: self.group_kind(),
            namespace: self.namespace().to_owned(),
            name: self.name().to_owned(),
        })
    }

    /// Human readable `apiVersion.kind[namespace/name]` summary for messages.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if !self.api_version().is_empty() || !self.kind().is_empty() {
            out.push_str(&format!("{}.{}", self.api_version(), self.kind()));
        }
        if !self.name().is_empty() {
            out.push_str(&format!("[{}/{}]", self.namespace(), self.name()));
        }
        if out.is_empty() {
            out.push_str("(unknown)");
        }
        out
    }

    /// Copy without store-managed metadata and without `status`.
    pub fn without_server_fields(&self) -> Resource {
        let mut copy = self.clone();
        for field in SERVER_METADATA_FIELDS {
            copy.remove_field(&["metadata", field]);
        }
        copy.object.remove("status");
        copy
    }

    /// True when both resources declare the same content, ignoring
    /// store-managed metadata and status.
    pub fn same_content(&self, other: &Resource) -> bool {
        self.without_server_fields() == other.without_server_fields()
    }

    fn str_field(&self, path: &[&str]) -> &str {
        self.field(path).and_then(Value::as_str).unwrap_or("")
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
