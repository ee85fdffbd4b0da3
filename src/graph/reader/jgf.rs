//! Reader for graph-exact JSON (JGF).
//!
//! JGF carries the graph verbatim: one entry per vertex with its full
//! metadata (type, name, size, rank, per-subsystem paths, properties) and
//! one entry per edge. Vertices are stitched back together from their
//! paths, so a JGF document emitted by the matching writer round-trips
//! into an identical topology.

use std::collections::HashMap;

use serde::Deserialize;

use crate::graph::pool::PoolSpec;
use crate::graph::{GraphError, ResourceGraph};
use crate::interner::{ResourceType, Subsystem};

use super::{ResolvedItem, ResolvedSet, ResourceReader};

#[derive(Debug, Default)]
pub struct JgfReader;

#[derive(Deserialize)]
struct WireJgf {
    graph: WireGraph,
}

#[derive(Deserialize)]
struct WireGraph {
    nodes: Vec<WireNode>,
    #[serde(default)]
    #[allow(dead_code)]
    edges: Vec<WireEdge>,
}

#[derive(Deserialize)]
struct WireNode {
    #[allow(dead_code)]
    id: String,
    metadata: WireNodeMeta,
}

#[derive(Deserialize)]
struct WireNodeMeta {
    #[serde(rename = "type")]
    rtype: String,
    basename: String,
    #[serde(default = "default_id")]
    id: i64,
    #[serde(default = "default_size")]
    size: u64,
    #[serde(default = "default_id")]
    rank: i64,
    paths: HashMap<String, String>,
    #[serde(default)]
    properties: HashMap<String, String>,
    #[serde(default)]
    exclusive: Option<bool>,
}

fn default_id() -> i64 {
    -1
}

fn default_size() -> u64 {
    1
}

// Edges are carried for graph-exactness; topology is rebuilt from paths,
// which already encode every containment edge.
#[derive(Deserialize)]
struct WireEdge {
    #[allow(dead_code)]
    source: String,
    #[allow(dead_code)]
    target: String,
}

fn parse_jgf(text: &str) -> Result<WireJgf, GraphError> {
    serde_json::from_str(text).map_err(|e| GraphError::MalformedSpec(e.to_string()))
}

fn path_depth(path: &str) -> usize {
    path.chars().filter(|&c| c == '/').count()
}

fn parent_path(path: &str) -> Option<&str> {
    let cut = path.rfind('/')?;
    if cut == 0 {
        None
    } else {
        Some(&path[..cut])
    }
}

impl ResourceReader for JgfReader {
    fn format(&self) -> &'static str {
        "jgf"
    }

    fn unpack(&mut self, g: &mut ResourceGraph, text: &str, _rank: i64) -> Result<(), GraphError> {
        let wire = parse_jgf(text)?;

        // Shallowest-first so parents exist before their children.
        let mut nodes: Vec<&WireNode> = wire.graph.nodes.iter().collect();
        nodes.sort_by_key(|n| {
            n.metadata
                .paths
                .values()
                .map(|p| path_depth(p))
                .min()
                .unwrap_or(usize::MAX)
        });

        for node in nodes {
            let meta = &node.metadata;
            if meta.paths.is_empty() {
                return Err(GraphError::MalformedSpec(format!(
                    "vertex {} has no paths",
                    meta.basename
                )));
            }
            let spec = PoolSpec {
                rtype: ResourceType::intern(&meta.rtype),
                basename: meta.basename.clone(),
                id: meta.id,
                size: meta.size,
                rank: meta.rank,
            };
            let mut vertex = None;
            let mut memberships: Vec<(Subsystem, &str)> = meta
                .paths
                .iter()
                .map(|(s, p)| (Subsystem::intern(s), p.as_str()))
                .collect();
            memberships.sort_by_key(|(_, p)| path_depth(p));
            for (subsystem, path) in memberships {
                match parent_path(path) {
                    None => {
                        let v = g.add_root(subsystem, spec.clone())?;
                        vertex = Some(v);
                    }
                    Some(parent) => {
                        let parent = *g
                            .by_path(subsystem, parent)
                            .first()
                            .ok_or_else(|| GraphError::UnknownPath(parent.to_owned()))?;
                        match vertex {
                            None => {
                                vertex = Some(g.add_child(parent, subsystem, spec.clone())?);
                            }
                            Some(v) => g.add_membership(parent, v, subsystem)?,
                        }
                    }
                }
            }
            if let Some(v) = vertex {
                let registered = g.pool(v).path_in(Subsystem::intern(
                    meta.paths.keys().next().expect("paths checked non-empty"),
                ));
                if registered.is_none() {
                    return Err(GraphError::MalformedSpec(format!(
                        "vertex {} path registration failed",
                        meta.basename
                    )));
                }
                g.pool_mut(v).properties.extend(
                    meta.properties
                        .iter()
                        .map(|(k, val)| (k.clone(), val.clone())),
                );
            }
        }
        Ok(())
    }

    fn resolve(&self, g: &ResourceGraph, text: &str) -> Result<ResolvedSet, GraphError> {
        let wire = parse_jgf(text)?;
        let mut set = ResolvedSet::default();
        for node in &wire.graph.nodes {
            let meta = &node.metadata;
            let mut found = None;
            for (subsystem, path) in &meta.paths {
                let subsystem = Subsystem::intern(subsystem);
                if let Some(&v) = g.by_path(subsystem, path).first() {
                    found = Some(v);
                    break;
                }
            }
            let vertex =
                found.ok_or_else(|| GraphError::UnknownPath(format!("{:?}", meta.paths)))?;
            set.items.push(ResolvedItem {
                vertex,
                qty: meta.size,
                exclusive: meta.exclusive.unwrap_or(false),
            });
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphDuration;
    use serde_json::json;

    fn jgf_doc() -> String {
        json!({
            "graph": {
                "nodes": [
                    {"id": "0", "metadata": {"type": "cluster", "basename": "cluster",
                     "id": 0, "size": 1, "rank": -1,
                     "paths": {"containment": "/cluster0"}}},
                    {"id": "1", "metadata": {"type": "node", "basename": "node",
                     "id": 0, "size": 1, "rank": 0,
                     "paths": {"containment": "/cluster0/node0"},
                     "properties": {"bigmem": ""}}},
                    {"id": "2", "metadata": {"type": "core", "basename": "core",
                     "id": 0, "size": 1, "rank": 0,
                     "paths": {"containment": "/cluster0/node0/core0"}}},
                    {"id": "3", "metadata": {"type": "core", "basename": "core",
                     "id": 1, "size": 1, "rank": 0,
                     "paths": {"containment": "/cluster0/node0/core1"}}}
                ],
                "edges": [
                    {"source": "0", "target": "1"},
                    {"source": "1", "target": "2"},
                    {"source": "1", "target": "3"}
                ]
            }
        })
        .to_string()
    }

    #[test]
    fn unpack_rebuilds_topology_from_paths() {
        let mut g = ResourceGraph::new(GraphDuration { start: 0, end: 1000 });
        let mut reader = JgfReader;
        reader.unpack(&mut g, &jgf_doc(), -1).unwrap();
        assert_eq!(g.vertex_count(), 4);
        let containment = Subsystem::containment();
        let node = g.by_path(containment, "/cluster0/node0")[0];
        assert_eq!(g.children(node, containment).len(), 2);
        assert!(g.pool(node).properties.contains_key("bigmem"));
        assert_eq!(g.root(containment).unwrap(), g.by_path(containment, "/cluster0")[0]);
    }

    #[test]
    fn unpack_rejects_orphan_paths() {
        let mut g = ResourceGraph::new(GraphDuration { start: 0, end: 1000 });
        let mut reader = JgfReader;
        let text = json!({
            "graph": {"nodes": [
                {"id": "0", "metadata": {"type": "core", "basename": "core",
                 "id": 0, "paths": {"containment": "/cluster0/node0/core0"}}}
            ], "edges": []}
        })
        .to_string();
        assert!(matches!(
            reader.unpack(&mut g, &text, -1),
            Err(GraphError::UnknownPath(_))
        ));
    }

    #[test]
    fn resolve_maps_paths_to_vertices() {
        let mut g = ResourceGraph::new(GraphDuration { start: 0, end: 1000 });
        let mut reader = JgfReader;
        reader.unpack(&mut g, &jgf_doc(), -1).unwrap();
        let subset = json!({
            "graph": {"nodes": [
                {"id": "2", "metadata": {"type": "core", "basename": "core",
                 "id": 0, "size": 1, "rank": 0,
                 "paths": {"containment": "/cluster0/node0/core0"}}}
            ], "edges": []}
        })
        .to_string();
        let set = reader.resolve(&g, &subset).unwrap();
        assert_eq!(set.items.len(), 1);
        assert_eq!(set.items[0].qty, 1);
        assert_eq!(g.pool(set.items[0].vertex).name, "core0");
    }
}
