use kapply_schema::{GroupKind, IdSet, ResourceId, ResourceSet};

/// Splits apply and prune work into dependency-respecting batches.
///
/// Objects with a lower phase are applied in an earlier batch; prune
/// visits phases in reverse. Objects sharing a phase have no ordering
/// dependency on each other.
pub trait ApplyOrdering: Send + Sync {
    fn phase(&self, id: &ResourceId) -> u32;
}

/// Everything in one batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleBatch;

impl ApplyOrdering for SingleBatch {
    fn phase(&self, _id: &ResourceId) -> u32 {
        0
    }
}

/// Caller-supplied phases by kind. Kinds not listed land in a final phase
/// after every listed one.
#[derive(Debug, Clone, Default)]
pub struct KindPhases {
    phases: Vec<Vec<GroupKind>>,
}

impl KindPhases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a phase holding `kinds`.
    #[must_use]
    pub fn then(mut self, kinds: impl IntoIterator<Item = GroupKind>) -> Self {
        self.phases.push(kinds.into_iter().collect());
        self
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

impl ApplyOrdering for KindPhases {
    fn phase(&self, id: &ResourceId) -> u32 {
        self.phases
            .iter()
            .position(|kinds| kinds.contains(&id.group_kind))
            .unwrap_or(self.phases.len()) as u32
    }
}

/// Parse `Kind` or `Kind.group` (the form `GroupKind` displays as).
pub fn parse_group_kind(s: &str) -> Option<GroupKind> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Some(match s.split_once('.') {
        Some((kind, group)) => GroupKind::new(group, kind),
        None => GroupKind::new("", s),
    })
}

/// Stable split of `resources` into batches by ascending phase.
pub(crate) fn apply_batches(
    resources: &ResourceSet,
    ordering: &dyn ApplyOrdering,
) -> Vec<ResourceSet> {
    let mut phased: Vec<(u32, ResourceSet)> = Vec::new();
    for resource in resources {
        let phase = resource.id().map_or(0, |id| ordering.phase(&id));
        match phased.iter_mut().find(|(p, _)| *p == phase) {
            Some((_, batch)) => batch.push(resource.clone()),
            None => phased.push((phase, ResourceSet::from(vec![resource.clone()]))),
        }
    }
    phased.sort_by_key(|(phase, _)| *phase);
    phased.into_iter().map(|(_, batch)| batch).collect()
}

/// Stable split of `ids` into batches by descending phase.
pub(crate) fn prune_batches(ids: &IdSet, ordering: &dyn ApplyOrdering) -> Vec<IdSet> {
    let mut phased: Vec<(u32, IdSet)> = Vec::new();
    for id in ids {
        let phase = ordering.phase(id);
        match phased.iter_mut().find(|(p, _)| *p == phase) {
            Some((_, batch)) => {
                batch.insert(id.clone());
            }
            None => phased.push((phase, vec![id.clone()].into())),
        }
    }
    phased.sort_by_key(|(phase, _)| std::cmp::Reverse(*phase));
    phased.into_iter().map(|(_, batch)| batch).collect()
}
