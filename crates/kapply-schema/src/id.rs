use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix carried by every collection kind (`ConfigMapList`, `PodList`, ...).
pub const LIST_SUFFIX: &str = "List";

/// API group plus kind, without a version. Two resources with the same
/// `GroupKind` are the same type regardless of the version they were written in.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKind {
    #[serde(default)]
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty() && self.kind.is_empty()
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Unique key of a resource in the store: `{group, kind, namespace, name}`.
///
/// Cluster-scoped resources have an empty namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    #[serde(flatten)]
    pub group_kind: GroupKind,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group_kind: GroupKind::new(group, kind),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[inline]
    pub fn group(&self) -> &str {
        &self.group_kind.group
    }

    #[inline]
    pub fn kind(&self) -> &str {
        &self.group_kind.kind
    }

    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }

    /// Underscore-joined `group_kind_namespace_name` form with a lowercased kind.
    /// The namespace segment is omitted for cluster-scoped resources.
    ///
    /// The format is persisted on resources, so it must not change.
    pub fn gknn(&self) -> String {
        let kind = self.group_kind.kind.to_lowercase();
        if self.namespace.is_empty() {
            format!("{}_{}_{}", self.group_kind.group, kind, self.name)
        } else {
            format!(
                "{}_{}_{}_{}",
                self.group_kind.group, kind, self.namespace, self.name
            )
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}/{}", self.group_kind, self.namespace, self.name)
    }
}

pub fn is_list_kind(kind: &str) -> bool {
    kind.len() > LIST_SUFFIX.len() && kind.ends_with(LIST_SUFFIX)
}

/// `PodList` -> `Pod`. Kinds without the suffix are returned unchanged.
pub fn item_kind(list_kind: &str) -> &str {
    list_kind.strip_suffix(LIST_SUFFIX).unwrap_or(list_kind)
}

/// `Pod` -> `PodList`.
pub fn list_kind(item_kind: &str) -> String {
    format!("{item_kind}{LIST_SUFFIX}")
}
