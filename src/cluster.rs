//! Equivalence clustering with a disjoint-set forest.
//!
//! Entries joined by chains of `equivalent` edges end up in one component.
//! A component is identified by its smallest member entry id, so the result
//! does not depend on the order edges are processed in.

use crate::models::{AlignmentEdge, AlignmentType, AnomalyKind, ComponentId, Entry, SchemaError};
use crate::review::ReviewLog;
use std::collections::{BTreeMap, HashMap};

/// Array-backed union-find with union by size and path compression.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            size: vec![1; len],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Compress the path
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merge the sets of `a` and `b`. Returns false if they were already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }
        let (big, small) = if self.size[root_a] >= self.size[root_b] {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        true
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

/// Entry -> component assignment plus member lists.
#[derive(Debug, Clone, Default)]
pub struct ComponentMap {
    by_entry: HashMap<String, ComponentId>,
    /// Members per component, sorted by entry id
    members: BTreeMap<ComponentId, Vec<String>>,
}

impl ComponentMap {
    pub fn component_of(&self, entry_id: &str) -> Option<&ComponentId> {
        self.by_entry.get(entry_id)
    }

    pub fn members(&self, component: &ComponentId) -> &[String] {
        self.members
            .get(component)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Components in id order.
    pub fn components(&self) -> impl Iterator<Item = &ComponentId> {
        self.members.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ComponentId, &Vec<String>)> {
        self.members.iter()
    }

    pub fn component_count(&self) -> usize {
        self.members.len()
    }

    pub fn entry_count(&self) -> usize {
        self.by_entry.len()
    }
}

/// Partition entries into equivalence components.
///
/// Fails with [`SchemaError::DuplicateEntry`] when an entry id occurs twice.
/// Equivalent edges naming unknown entries are dropped and recorded.
pub fn cluster_equivalents(
    entries: &[Entry],
    edges: &[AlignmentEdge],
    review: &mut ReviewLog,
) -> Result<ComponentMap, SchemaError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        if index.insert(entry.id.as_str(), i).is_some() {
            return Err(SchemaError::DuplicateEntry(entry.id.clone()));
        }
    }

    let mut sets = DisjointSet::new(entries.len());

    for edge in edges
        .iter()
        .filter(|e| e.alignment_type == AlignmentType::Equivalent)
    {
        match (index.get(edge.entry_a.as_str()), index.get(edge.entry_b.as_str())) {
            (Some(&a), Some(&b)) => {
                sets.union(a, b);
            }
            _ => review.record(
                AnomalyKind::ReferenceError,
                unknown_ends(edge, &index),
                format!(
                    "equivalent edge {} = {} references an unknown entry; dropped",
                    edge.entry_a, edge.entry_b
                ),
            ),
        }
    }

    // Smallest member id per root
    let mut root_min: HashMap<usize, &str> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        let root = sets.find(i);
        root_min
            .entry(root)
            .and_modify(|m| {
                if entry.id.as_str() < *m {
                    *m = entry.id.as_str();
                }
            })
            .or_insert(entry.id.as_str());
    }

    let mut map = ComponentMap::default();
    for (i, entry) in entries.iter().enumerate() {
        let root = sets.find(i);
        let component = ComponentId(root_min[&root].to_string());
        map.members
            .entry(component.clone())
            .or_default()
            .push(entry.id.clone());
        map.by_entry.insert(entry.id.clone(), component);
    }
    for members in map.members.values_mut() {
        members.sort();
    }

    tracing::debug!(
        entries = map.entry_count(),
        components = map.component_count(),
        "clustered equivalents"
    );

    Ok(map)
}

/// Sorted, deduplicated list of the edge ends missing from the index.
fn unknown_ends<V>(edge: &AlignmentEdge, index: &HashMap<&str, V>) -> Vec<String> {
    let mut ends: Vec<String> = [&edge.entry_a, &edge.entry_b]
        .into_iter()
        .filter(|id| !index.contains_key(id.as_str()))
        .cloned()
        .collect();
    ends.sort();
    ends.dedup();
    ends
}
