//! Typed multi-subsystem resource graph.
//!
//! Pools live in a directed graph whose edges carry a subsystem and a
//! relation label. A pool may appear in several subsystems with different
//! paths; each subsystem has exactly one root. Every forward containment
//! edge has a reverse edge in the same subsystem, so the graph can be
//! walked down (dominant descent) and up (auxiliary upwalk) without
//! auxiliary maps.

use std::collections::HashMap;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::interner::{Relation, ResourceType, Subsystem};
use crate::{JobId, Time};

pub mod errors;
pub mod pool;
pub mod reader;

pub use errors::GraphError;
pub use pool::{PoolSpec, ResourcePool, ResourceStatus};

/// A time value far enough out to stand for "no expiration".
pub const NO_EXPIRATION: Time = i64::MAX / 4;

/// One directed membership edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEdge {
    pub subsystem: Subsystem,
    pub relation: Relation,
    /// True for parent-to-child ("contains"-like) direction.
    pub forward: bool,
}

/// Wall-clock bounds of the resource graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphDuration {
    pub start: Time,
    /// Exclusive end; [`NO_EXPIRATION`] when the graph never expires.
    pub end: Time,
}

impl GraphDuration {
    pub fn span(&self) -> u64 {
        (self.end - self.start).max(0) as u64
    }
}

/// Lookup indices and counters over the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphMetadata {
    pub roots: HashMap<Subsystem, NodeIndex>,
    pub by_type: HashMap<ResourceType, Vec<NodeIndex>>,
    pub by_path: HashMap<Subsystem, HashMap<String, Vec<NodeIndex>>>,
    pub by_name: HashMap<String, Vec<NodeIndex>>,
    pub by_rank: HashMap<i64, Vec<NodeIndex>>,
    /// Count of UP node-type vertices, kept current by status changes.
    pub nodes_up: u64,
}

/// Translates reader-local logical ids (e.g. hardware-discovery core
/// indices) into graph-global ids. Remappings must be registered before
/// load; a duplicate registration is a hard error.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRemapper {
    map: HashMap<(i64, ResourceType, u64), u64>,
}

impl NamespaceRemapper {
    pub fn register(
        &mut self,
        rank: i64,
        rtype: ResourceType,
        from: u64,
        to: u64,
    ) -> Result<(), GraphError> {
        if self.map.contains_key(&(rank, rtype, from)) {
            return Err(GraphError::RemapExists {
                rank,
                rtype: rtype.as_str().to_owned(),
                from,
            });
        }
        self.map.insert((rank, rtype, from), to);
        Ok(())
    }

    pub fn query(&self, rank: i64, rtype: ResourceType, from: u64) -> Option<u64> {
        self.map.get(&(rank, rtype, from)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// The resource graph and its indices.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    g: StableDiGraph<ResourcePool, GraphEdge>,
    pub metadata: GraphMetadata,
    pub graph_duration: GraphDuration,
    pub remapper: NamespaceRemapper,
    next_uniq_id: u64,
}

impl ResourceGraph {
    pub fn new(graph_duration: GraphDuration) -> Self {
        Self {
            g: StableDiGraph::default(),
            metadata: GraphMetadata::default(),
            graph_duration,
            remapper: NamespaceRemapper::default(),
            next_uniq_id: 0,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.g.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.g.edge_count()
    }

    pub fn pool(&self, v: NodeIndex) -> &ResourcePool {
        &self.g[v]
    }

    pub fn pool_mut(&mut self, v: NodeIndex) -> &mut ResourcePool {
        &mut self.g[v]
    }

    pub fn contains(&self, v: NodeIndex) -> bool {
        self.g.contains_node(v)
    }

    pub fn vertices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.g.node_indices()
    }

    pub fn known_subsystem(&self, subsystem: Subsystem) -> bool {
        self.metadata.roots.contains_key(&subsystem)
    }

    pub fn root(&self, subsystem: Subsystem) -> Result<NodeIndex, GraphError> {
        self.metadata
            .roots
            .get(&subsystem)
            .copied()
            .ok_or_else(|| GraphError::UnknownSubsystem(subsystem.as_str().to_owned()))
    }

    /// Creates the root vertex of a subsystem.
    pub fn add_root(&mut self, subsystem: Subsystem, spec: PoolSpec) -> Result<NodeIndex, GraphError> {
        if self.known_subsystem(subsystem) {
            return Err(GraphError::MalformedSpec(format!(
                "subsystem {subsystem} already has a root"
            )));
        }
        let v = self.new_vertex(spec);
        let path = format!("/{}", self.g[v].name);
        self.register_path(v, subsystem, path);
        self.metadata.roots.insert(subsystem, v);
        Ok(v)
    }

    /// Creates a vertex as a child of `parent` within `subsystem`, wiring
    /// both edge directions and deriving the child path from the parent's.
    pub fn add_child(
        &mut self,
        parent: NodeIndex,
        subsystem: Subsystem,
        spec: PoolSpec,
    ) -> Result<NodeIndex, GraphError> {
        if !self.g.contains_node(parent) {
            return Err(GraphError::InvalidVertex);
        }
        let v = self.new_vertex(spec);
        self.add_membership(parent, v, subsystem)?;
        Ok(v)
    }

    /// Joins an existing vertex to `subsystem` as a child of `parent`,
    /// adding the forward/reverse edge pair and the subsystem path.
    pub fn add_membership(
        &mut self,
        parent: NodeIndex,
        child: NodeIndex,
        subsystem: Subsystem,
    ) -> Result<(), GraphError> {
        let parent_path = self
            .g
            .node_weight(parent)
            .and_then(|p| p.path_in(subsystem))
            .ok_or_else(|| GraphError::UnknownSubsystem(subsystem.as_str().to_owned()))?
            .to_owned();
        let path = format!("{}/{}", parent_path, self.g[child].name);
        self.g.add_edge(
            parent,
            child,
            GraphEdge {
                subsystem,
                relation: Relation::contains(),
                forward: true,
            },
        );
        self.g.add_edge(
            child,
            parent,
            GraphEdge {
                subsystem,
                relation: Relation::within(),
                forward: false,
            },
        );
        self.register_path(child, subsystem, path);
        Ok(())
    }

    fn new_vertex(&mut self, spec: PoolSpec) -> NodeIndex {
        let uniq_id = self.next_uniq_id;
        self.next_uniq_id += 1;
        let pool = ResourcePool::new(
            uniq_id,
            spec,
            self.graph_duration.start,
            self.graph_duration.span(),
        );
        let v = self.g.add_node(pool);
        let pool = &self.g[v];
        self.metadata.by_type.entry(pool.rtype).or_default().push(v);
        self.metadata
            .by_name
            .entry(pool.name.clone())
            .or_default()
            .push(v);
        if pool.rank >= 0 {
            self.metadata.by_rank.entry(pool.rank).or_default().push(v);
        }
        if pool.rtype == ResourceType::node() && pool.is_up() {
            self.metadata.nodes_up += 1;
        }
        v
    }

    fn register_path(&mut self, v: NodeIndex, subsystem: Subsystem, path: String) {
        self.g[v].paths.insert(subsystem, path.clone());
        self.metadata
            .by_path
            .entry(subsystem)
            .or_default()
            .entry(path)
            .or_default()
            .push(v);
    }

    /// Vertices registered at a subsystem path.
    pub fn by_path(&self, subsystem: Subsystem, path: &str) -> &[NodeIndex] {
        self.metadata
            .by_path
            .get(&subsystem)
            .and_then(|m| m.get(path))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn by_type(&self, rtype: ResourceType) -> &[NodeIndex] {
        self.metadata
            .by_type
            .get(&rtype)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn by_name(&self, name: &str) -> &[NodeIndex] {
        self.metadata
            .by_name
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn by_rank(&self, rank: i64) -> &[NodeIndex] {
        self.metadata
            .by_rank
            .get(&rank)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Children of `v` along forward edges of `subsystem`, in insertion
    /// order (petgraph returns newest-first; reversed here so traversal
    /// order matches load order).
    pub fn children(&self, v: NodeIndex, subsystem: Subsystem) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self
            .g
            .edges_directed(v, Direction::Outgoing)
            .filter(|e| e.weight().subsystem == subsystem && e.weight().forward)
            .map(|e| e.target())
            .collect();
        out.reverse();
        out
    }

    /// Parents of `v` along reverse edges of `subsystem`.
    pub fn parents(&self, v: NodeIndex, subsystem: Subsystem) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self
            .g
            .edges_directed(v, Direction::Outgoing)
            .filter(|e| e.weight().subsystem == subsystem && !e.weight().forward)
            .map(|e| e.target())
            .collect();
        out.reverse();
        out
    }

    /// All edges as (source, target, weight) triples, for writers.
    pub fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex, &GraphEdge)> + '_ {
        self.g
            .edge_indices()
            .filter_map(|e| self.g.edge_endpoints(e).map(|(a, b)| (a, b, &self.g[e])))
    }

    /// Pre-order subtree of `v` within `subsystem`, `v` first.
    pub fn subtree(&self, v: NodeIndex, subsystem: Subsystem) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut stack = vec![v];
        while let Some(u) = stack.pop() {
            out.push(u);
            let mut kids = self.children(u, subsystem);
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    /// Flips status on the subtree rooted at `v` in the dominant subsystem.
    /// Returns the vertices whose status actually changed. The nodes-up
    /// counter follows node-type vertices only.
    pub fn mark_subtree(
        &mut self,
        v: NodeIndex,
        subsystem: Subsystem,
        status: ResourceStatus,
    ) -> Vec<NodeIndex> {
        let mut changed = Vec::new();
        for u in self.subtree(v, subsystem) {
            let pool = &mut self.g[u];
            if pool.status == status {
                continue;
            }
            pool.status = status;
            if pool.rtype == ResourceType::node() {
                match status {
                    ResourceStatus::Up => self.metadata.nodes_up += 1,
                    ResourceStatus::Down => self.metadata.nodes_up -= 1,
                }
            }
            changed.push(u);
        }
        changed
    }

    /// Removes the subtree rooted at `v` (shrink). Jobs holding spans on
    /// removed vertices keep their remaining spans elsewhere.
    pub fn remove_subtree(&mut self, v: NodeIndex, subsystem: Subsystem) -> usize {
        let doomed = self.subtree(v, subsystem);
        for &u in &doomed {
            self.unindex(u);
        }
        for u in doomed.iter().rev() {
            self.g.remove_node(*u);
        }
        doomed.len()
    }

    fn unindex(&mut self, v: NodeIndex) {
        let pool = &self.g[v];
        let (rtype, name, rank, paths, is_node, up) = (
            pool.rtype,
            pool.name.clone(),
            pool.rank,
            pool.paths.clone(),
            pool.rtype == ResourceType::node(),
            pool.is_up(),
        );
        if let Some(list) = self.metadata.by_type.get_mut(&rtype) {
            list.retain(|&u| u != v);
        }
        if let Some(list) = self.metadata.by_name.get_mut(&name) {
            list.retain(|&u| u != v);
        }
        if let Some(list) = self.metadata.by_rank.get_mut(&rank) {
            list.retain(|&u| u != v);
        }
        for (subsystem, path) in paths {
            if let Some(map) = self.metadata.by_path.get_mut(&subsystem) {
                if let Some(list) = map.get_mut(&path) {
                    list.retain(|&u| u != v);
                    if list.is_empty() {
                        map.remove(&path);
                    }
                }
            }
            if self.metadata.roots.get(&subsystem) == Some(&v) {
                self.metadata.roots.remove(&subsystem);
            }
        }
        if is_node && up {
            self.metadata.nodes_up -= 1;
        }
    }

    /// Ingests one batch of resources from a reader. The only sanctioned
    /// way to grow the graph.
    pub fn load(
        &mut self,
        text: &str,
        reader: &mut dyn reader::ResourceReader,
        rank: i64,
    ) -> Result<(), GraphError> {
        reader.unpack(self, text, rank)
    }

    /// Sum of granules of `jobid` across all pools (for existence scans).
    pub fn total_allocated(&self, jobid: JobId) -> u64 {
        self.g
            .node_indices()
            .map(|v| self.g[v].allocated_to(jobid))
            .sum()
    }
}
