//! Resource identity and representation for kapply.
//!
//! This crate defines the leaf layer every other crate builds on: the
//! `{group, kind, namespace, name}` identifier (`ResourceId`), the generic
//! attribute-map resource (`Resource`), ordered collections of resources and
//! identifiers (`ResourceSet`, `IdSet`), and parsing of JSON/TOML manifest
//! documents into a `ResourceSet`.

pub mod id;
pub mod manifest;
pub mod resource;
pub mod set;
pub mod types;

pub use id::{is_list_kind, item_kind, list_kind, GroupKind, ResourceId, LIST_SUFFIX};
pub use manifest::{
    parse_manifest_file, parse_manifest_paths, parse_manifest_str, ManifestError, ManifestFormat,
};
pub use resource::{Resource, ResourceError, INVENTORY_ID_LABEL, OWNING_INVENTORY_ANNOTATION};
pub use set::{IdSet, ResourceSet};
pub use types::{InventoryId, ResourceVersion};
