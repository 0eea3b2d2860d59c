use crate::id::is_list_kind;
use crate::resource::{Resource, ResourceError};
use crate::set::ResourceSet;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest JSON: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("failed to parse manifest TOML: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported manifest file '{0}', expected a .json or .toml extension")]
    UnknownFormat(String),
    #[error("invalid resource in manifest: {0}")]
    Resource(#[from] ResourceError),
    #[error("list {0} has no items array")]
    InvalidList(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// One or more concatenated JSON documents. Each document is a resource,
    /// an array of resources, or a `*List` object with `items`.
    Json,
    /// A table with a `resources` array of tables, or a single resource table.
    Toml,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(Self::Json),
            Some("toml") => Some(Self::Toml),
            _ => None,
        }
    }
}

pub fn parse_manifest_str(input: &str, format: ManifestFormat) -> Result<ResourceSet, ManifestError> {
    let mut set = ResourceSet::new();
    match format {
        ManifestFormat::Json => {
            for doc in serde_json::Deserializer::from_str(input).into_iter::<Value>() {
                collect_document(doc?, &mut set)?;
            }
        }
        ManifestFormat::Toml => {
            let table: toml::Table = toml::from_str(input)?;
            let mut doc = serde_json::to_value(table)?;
            if let Some(resources) = doc.get_mut("resources").map(Value::take) {
                collect_document(resources, &mut set)?;
            } else if doc.get("kind").is_some() {
                collect_document(doc, &mut set)?;
            }
        }
    }
    Ok(set)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<ResourceSet, ManifestError> {
    let path = path.as_ref();
    let format = ManifestFormat::from_path(path)
        .ok_or_else(|| ManifestError::UnknownFormat(path.display().to_string()))?;
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content, format)
}

/// Parse every path in order. Directories contribute their `.json` and
/// `.toml` entries (non-recursive) sorted by file name.
pub fn parse_manifest_paths(paths: &[PathBuf]) -> Result<ResourceSet, ManifestError> {
    let mut set = ResourceSet::new();
    for path in paths {
        if path.is_dir() {
            let mut files = Vec::new();
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                let file = entry.path();
                if file.is_file() && ManifestFormat::from_path(&file).is_some() {
                    files.push(file);
                }
            }
            files.sort();
            for file in files {
                set.extend(parse_manifest_file(&file)?);
            }
        } else {
            set.extend(parse_manifest_file(path)?);
        }
    }
    Ok(set)
}

fn collect_document(doc: Value, set: &mut ResourceSet) -> Result<(), ManifestError> {
    match doc {
        Value::Null => Ok(()),
        Value::Array(items) => {
            for item in items {
                collect_document(item, set)?;
            }
            Ok(())
        }
        Value::Object(_) => {
            let resource = Resource::from_value(doc)?;
            let kind = resource.kind();
            if kind == "List" || is_list_kind(kind) {
                let Some(Value::Array(items)) = resource.field(&["items"]).cloned() else {
                    return Err(ManifestError::InvalidList(resource.summary()));
                };
                for item in items {
                    collect_document(item, set)?;
                }
            } else {
                set.push(resource);
            }
            Ok(())
        }
        other => Err(ResourceError::NotAnObject(other.to_string()).into()),
    }
}
