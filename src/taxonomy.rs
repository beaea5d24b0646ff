//! Anatomical structure taxonomy
//!
//! Structures are stored in an arena owned by [`Taxonomy`]; parent and child
//! links are structure ids resolved through the arena.

use crate::error::{Error, Result, ServiceError};
use crate::service::TaxonomySource;
use crate::types::{GraphSelector, Rgb};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// One structure as delivered by the ontology service. Fields the service
/// sends beyond these are ignored on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureRecord {
    pub id: u32,
    pub name: String,
    pub acronym: String,
    pub parent_structure_id: Option<u32>,
    /// Six hex digits, no leading `#`
    pub color_hex_triplet: String,
    #[serde(default)]
    pub depth: Option<u32>,
    #[serde(default)]
    pub graph_order: Option<u32>,
    #[serde(default)]
    pub st_level: Option<u32>,
    #[serde(default)]
    pub structure_id_path: Option<String>,
    #[serde(default)]
    pub safe_name: Option<String>,
}

impl StructureRecord {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        acronym: impl Into<String>,
        parent_structure_id: Option<u32>,
        color_hex_triplet: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            acronym: acronym.into(),
            parent_structure_id,
            color_hex_triplet: color_hex_triplet.into(),
            depth: None,
            graph_order: None,
            st_level: None,
            structure_id_path: None,
            safe_name: None,
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_graph_order(mut self, graph_order: u32) -> Self {
        self.graph_order = Some(graph_order);
        self
    }
}

/// A structure in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyNode {
    record: StructureRecord,
    color: Rgb,
    parent: Option<u32>,
    children: Vec<u32>,
}

impl TaxonomyNode {
    fn new(record: StructureRecord) -> Self {
        let color = Rgb::from_hex(&record.color_hex_triplet).unwrap_or_else(|| {
            warn!(
                id = record.id,
                color = %record.color_hex_triplet,
                "invalid structure color, using black"
            );
            Rgb::BLACK
        });
        Self {
            record,
            color,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.record.id
    }

    pub fn record(&self) -> &StructureRecord {
        &self.record
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn acronym(&self) -> &str {
        &self.record.acronym
    }

    pub fn color(&self) -> Rgb {
        self.color
    }

    /// Linked parent id; `None` for roots and for nodes whose parent is
    /// missing from the record set
    pub fn parent(&self) -> Option<u32> {
        self.parent
    }

    /// Child ids in link order
    pub fn children(&self) -> &[u32] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Parent/child tree of anatomical structures with id-indexed colors
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    nodes: Vec<TaxonomyNode>,
    by_id: HashMap<u32, usize>,
}

impl Taxonomy {
    /// Build the tree: one node per record, then link every node to the
    /// parent its record names.
    pub fn build(records: impl IntoIterator<Item = StructureRecord>) -> Self {
        let mut taxonomy = Self::default();
        for record in records {
            if taxonomy.by_id.contains_key(&record.id) {
                warn!(id = record.id, "duplicate structure id, keeping the first record");
                continue;
            }
            taxonomy.by_id.insert(record.id, taxonomy.nodes.len());
            taxonomy.nodes.push(TaxonomyNode::new(record));
        }
        taxonomy.link();
        taxonomy
    }

    /// Fetch the records of a structure graph and build the tree
    pub async fn fetch<S>(source: &S, graph: GraphSelector) -> std::result::Result<Self, ServiceError>
    where
        S: TaxonomySource + ?Sized,
    {
        let records = source.fetch_structures(graph).await?;
        debug!(?graph, structures = records.len(), "fetched structure graph");
        Ok(Self::build(records))
    }

    fn link(&mut self) {
        let pairs: Vec<(u32, u32)> = self
            .nodes
            .iter()
            .filter_map(|node| node.record.parent_structure_id.map(|p| (node.id(), p)))
            .collect();
        for (child, parent) in pairs {
            if !self.by_id.contains_key(&parent) {
                debug!(id = child, parent, "parent structure not in taxonomy, node stays a root");
                continue;
            }
            self.connect(child, parent);
        }
    }

    /// Link `child` under `parent`. The first link wins: a node that already
    /// has a parent is left untouched. Returns whether a link was made.
    pub fn connect(&mut self, child: u32, parent: u32) -> bool {
        if child == parent {
            return false;
        }
        let (Some(&child_idx), Some(&parent_idx)) = (self.by_id.get(&child), self.by_id.get(&parent))
        else {
            return false;
        };
        if self.nodes[child_idx].parent.is_some() {
            return false;
        }
        self.nodes[child_idx].parent = Some(parent);
        let siblings = &mut self.nodes[parent_idx].children;
        if !siblings.contains(&child) {
            siblings.push(child);
        }
        true
    }

    /// Get a structure by id
    pub fn get(&self, id: u32) -> Result<&TaxonomyNode> {
        self.find(id).ok_or(Error::StructureNotFound(id))
    }

    pub fn find(&self, id: u32) -> Option<&TaxonomyNode> {
        self.by_id.get(&id).map(|&idx| &self.nodes[idx])
    }

    pub fn contains(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn find_by_acronym(&self, acronym: &str) -> Option<&TaxonomyNode> {
        self.nodes.iter().find(|node| node.acronym() == acronym)
    }

    /// Color of a structure; black when the id is unknown
    pub fn color_of(&self, id: u32) -> Rgb {
        self.find(id).map(TaxonomyNode::color).unwrap_or(Rgb::BLACK)
    }

    /// All nodes in record order
    pub fn iter(&self) -> impl Iterator<Item = &TaxonomyNode> {
        self.nodes.iter()
    }

    pub fn roots(&self) -> impl Iterator<Item = &TaxonomyNode> {
        self.nodes.iter().filter(|node| node.is_root())
    }

    pub fn parent(&self, id: u32) -> Option<&TaxonomyNode> {
        self.find(id)?.parent.and_then(|p| self.find(p))
    }

    pub fn children(&self, id: u32) -> Vec<&TaxonomyNode> {
        self.find(id)
            .map(|node| node.children.iter().filter_map(|&c| self.find(c)).collect())
            .unwrap_or_default()
    }

    /// Ids from the parent of `id` up to its root
    pub fn ancestors(&self, id: u32) -> Vec<u32> {
        let mut path = Vec::new();
        let mut current = self.find(id).and_then(TaxonomyNode::parent);
        while let Some(parent) = current {
            if parent == id || path.contains(&parent) || path.len() >= self.nodes.len() {
                break;
            }
            path.push(parent);
            current = self.find(parent).and_then(TaxonomyNode::parent);
        }
        path
    }

    /// Ids of every structure below `id`, depth first
    pub fn descendants(&self, id: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut stack: Vec<u32> = self
            .find(id)
            .map(|node| node.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            out.push(next);
            if let Some(node) = self.find(next) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<'a> IntoIterator for &'a Taxonomy {
    type Item = &'a TaxonomyNode;
    type IntoIter = std::slice::Iter<'a, TaxonomyNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
