use crate::id::ResourceId;
use crate::resource::{Resource, ResourceError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered collection of resources.
///
/// Order is preserved from construction; it is the order objects are applied
/// in within a batch and the order their events are emitted in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceSet {
    resources: Vec<Resource>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn extend(&mut self, other: ResourceSet) {
        self.resources.extend(other.resources);
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.resources.iter()
    }

    pub fn as_slice(&self) -> &[Resource] {
        &self.resources
    }

    /// Identifiers of every resource, in order. Fails on the first resource
    /// that cannot be identified or that repeats an earlier identifier.
    pub fn ids(&self) -> Result<IdSet, ResourceError> {
        let mut ids = IdSet::new();
        for resource in &self.resources {
            let id = resource.id()?;
            if !ids.insert(id.clone()) {
                return Err(ResourceError::DuplicateId(id));
            }
        }
        Ok(ids)
    }

    pub fn find(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| r.id().is_ok_and(|rid| rid == *id))
    }
}

impl From<Vec<Resource>> for ResourceSet {
    fn from(resources: Vec<Resource>) -> Self {
        Self { resources }
    }
}

impl FromIterator<Resource> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        Self {
            resources: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ResourceSet {
    type Item = Resource;
    type IntoIter = std::vec::IntoIter<Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResourceSet {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}

/// Insertion-ordered set of resource identifiers.
///
/// The inventory ledger stores its membership as an `IdSet`; insertion order
/// is the order objects were first recorded, which prune reverses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ResourceId>", into = "Vec<ResourceId>")]
pub struct IdSet {
    ids: Vec<ResourceId>,
    index: HashSet<ResourceId>,
}

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at the end. Returns `false` (and keeps the original position)
    /// when the id is already present.
    pub fn insert(&mut self, id: ResourceId) -> bool {
        if self.index.contains(&id) {
            return false;
        }
        self.index.insert(id.clone());
        self.ids.push(id);
        true
    }

    pub fn remove(&mut self, id: &ResourceId) -> bool {
        if !self.index.remove(id) {
            return false;
        }
        self.ids.retain(|existing| existing != id);
        true
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResourceId> {
        self.ids.iter()
    }

    pub fn as_slice(&self) -> &[ResourceId] {
        &self.ids
    }

    /// Members of `self` followed by members of `other` not already present.
    #[must_use]
    pub fn union(&self, other: &IdSet) -> IdSet {
        let mut out = self.clone();
        for id in other {
            out.insert(id.clone());
        }
        out
    }

    /// Members of `self` not in `other`, in `self`'s order.
    #[must_use]
    pub fn difference(&self, other: &IdSet) -> IdSet {
        self.iter()
            .filter(|id| !other.contains(id))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn intersection(&self, other: &IdSet) -> IdSet {
        self.iter().filter(|id| other.contains(id)).cloned().collect()
    }

    #[must_use]
    pub fn reversed(&self) -> IdSet {
        self.ids.iter().rev().cloned().collect()
    }
}

impl PartialEq for IdSet {
    fn eq(&self, other: &Self) -> bool {
        self.ids == other.ids
    }
}

impl Eq for IdSet {}

impl From<Vec<ResourceId>> for IdSet {
    fn from(ids: Vec<ResourceId>) -> Self {
        ids.into_iter().collect()
    }
}

impl From<IdSet> for Vec<ResourceId> {
    fn from(set: IdSet) -> Self {
        set.ids
    }
}

impl FromIterator<ResourceId> for IdSet {
    fn from_iter<I: IntoIterator<Item = ResourceId>>(iter: I) -> Self {
        let mut set = IdSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl<'a> IntoIterator for &'a IdSet {
    type Item = &'a ResourceId;
    type IntoIter = std::slice::Iter<'a, ResourceId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}

impl IntoIterator for IdSet {
    type Item = ResourceId;
    type IntoIter = std::vec::IntoIter<ResourceId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ResourceId {
        ResourceId::new("", "ConfigMap", "ns", name)
    }

    #[test]
    fn insert_keeps_first_position() {
        let mut set = IdSet::new();
        assert!(set.insert(id("a")));
        assert!(set.insert(id("b")));
        assert!(!set.insert(id("a")));
        assert_eq!(set.as_slice(), &[id("a"), id("b")]);
    }

    #[test]
    fn difference_preserves_order() {
        let ledger: IdSet = vec![id("a"), id("b"), id("c")].into();
        let desired: IdSet = vec![id("b")].into();
        let prune = ledger.difference(&desired);
        assert_eq!(prune.as_slice(), &[id("a"), id("c")]);
        assert_eq!(prune.reversed().as_slice(), &[id("c"), id("a")]);
    }

    #[test]
    fn union_appends_new_members() {
        let a: IdSet = vec![id("a"), id("b")].into();
        let b: IdSet = vec![id("c"), id("a")].into();
        assert_eq!(a.union(&b).as_slice(), &[id("a"), id("b"), id("c")]);
        assert_eq!(a.intersection(&b).as_slice(), &[id("a")]);
    }

    #[test]
    fn remove_updates_index() {
        let mut set: IdSet = vec![id("a"), id("b")].into();
        assert!(set.remove(&id("a")));
        assert!(!set.contains(&id("a")));
        assert!(!set.remove(&id("a")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn deserialization_drops_duplicates() {
        let json = serde_json::to_string(&vec![id("a"), id("a"), id("b")]).unwrap();
        let set: IdSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn resource_set_ids_rejects_duplicates() {
        let set = ResourceSet::from(vec![
            Resource::new("v1", "ConfigMap", "ns", "a"),
            Resource::new("v1", "ConfigMap", "ns", "a"),
        ]);
        assert!(matches!(set.ids(), Err(ResourceError::DuplicateId(_))));
    }

    #[test]
    fn resource_set_find_by_id() {
        let set = ResourceSet::from(vec![
            Resource::new("v1", "ConfigMap", "ns", "a"),
            Resource::new("v1", "ConfigMap", "ns", "b"),
        ]);
        assert_eq!(set.find(&id("b")).map(Resource::name), Some("b"));
        assert!(set.find(&id("z")).is_none());
    }
}
