//! Reader for version-1 executable resource sets.
//!
//! The initial resource acquisition arrives in this shape: a flat list of
//! rank entries with per-rank core/gpu id sets plus a node list. Unpacking
//! synthesizes the containment hierarchy (cluster, nodes, cores, gpus);
//! resolving maps the rank entries back onto live vertices.

use serde::Deserialize;

use crate::graph::pool::PoolSpec;
use crate::graph::{GraphError, ResourceGraph};
use crate::interner::{ResourceType, Subsystem};
use crate::{hostlist, idset};

use super::{ResolvedItem, ResolvedSet, ResourceReader};

#[derive(Debug, Default)]
pub struct Rv1ExecReader;

#[derive(Deserialize)]
struct WireRv1 {
    version: u64,
    execution: WireExecution,
}

#[derive(Deserialize)]
struct WireExecution {
    #[serde(rename = "R_lite")]
    r_lite: Vec<WireRlite>,
    #[serde(default)]
    nodelist: Vec<String>,
    #[serde(default)]
    starttime: Option<f64>,
    #[serde(default)]
    expiration: Option<f64>,
    #[serde(default)]
    properties: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Deserialize)]
struct WireRlite {
    rank: String,
    #[serde(default)]
    children: serde_json::Map<String, serde_json::Value>,
}

fn parse_rv1(text: &str) -> Result<WireRv1, GraphError> {
    let wire: WireRv1 =
        serde_json::from_str(text).map_err(|e| GraphError::MalformedSpec(e.to_string()))?;
    if wire.version != 1 {
        return Err(GraphError::MalformedSpec(format!(
            "unsupported version: {}",
            wire.version
        )));
    }
    Ok(wire)
}

fn children_sets(
    entry: &WireRlite,
) -> Result<Vec<(ResourceType, Vec<u64>)>, GraphError> {
    let mut out = Vec::new();
    for (kind, ids) in &entry.children {
        let ids = ids
            .as_str()
            .ok_or_else(|| GraphError::MalformedSpec(format!("children.{kind} not a string")))?;
        let set = idset::parse(ids)
            .map_err(|e| GraphError::MalformedSpec(format!("children.{kind}: {e}")))?;
        out.push((ResourceType::intern(kind), set.into_iter().collect()));
    }
    Ok(out)
}

impl ResourceReader for Rv1ExecReader {
    fn format(&self) -> &'static str {
        "rv1exec"
    }

    fn unpack(&mut self, g: &mut ResourceGraph, text: &str, _rank: i64) -> Result<(), GraphError> {
        let wire = parse_rv1(text)?;
        let containment = Subsystem::containment();
        let hosts: Vec<String> = {
            let mut expanded = Vec::new();
            for elem in &wire.execution.nodelist {
                expanded.extend(
                    hostlist::expand(elem)
                        .map_err(|e| GraphError::MalformedSpec(format!("nodelist: {e}")))?,
                );
            }
            expanded
        };

        let root = match g.metadata.roots.get(&containment) {
            Some(&root) => root,
            None => g.add_root(
                containment,
                PoolSpec {
                    rtype: ResourceType::intern("cluster"),
                    basename: "cluster".to_owned(),
                    id: 0,
                    size: 1,
                    rank: -1,
                },
            )?,
        };

        let mut host_cursor = 0usize;
        for entry in &wire.execution.r_lite {
            let ranks = idset::parse(&entry.rank)
                .map_err(|e| GraphError::MalformedSpec(format!("rank: {e}")))?;
            let children = children_sets(entry)?;
            for rank in ranks {
                let hostname = hosts.get(host_cursor).cloned().unwrap_or_else(|| {
                    format!("node{rank}")
                });
                host_cursor += 1;
                let (basename, id) = split_hostname(&hostname);
                let node = g.add_child(
                    root,
                    containment,
                    PoolSpec {
                        rtype: ResourceType::node(),
                        basename,
                        id,
                        size: 1,
                        rank: rank as i64,
                    },
                )?;
                for (rtype, ids) in &children {
                    for &logical in ids {
                        let id = g
                            .remapper
                            .query(rank as i64, *rtype, logical)
                            .unwrap_or(logical);
                        g.add_child(
                            node,
                            containment,
                            PoolSpec {
                                rtype: *rtype,
                                basename: rtype.as_str().to_owned(),
                                id: id as i64,
                                size: 1,
                                rank: rank as i64,
                            },
                        )?;
                    }
                }
            }
        }

        if let Some(props) = &wire.execution.properties {
            for (name, ranks) in props {
                let ranks = ranks.as_str().ok_or_else(|| {
                    GraphError::MalformedSpec(format!("properties.{name} not a string"))
                })?;
                let ranks = idset::parse(ranks)
                    .map_err(|e| GraphError::MalformedSpec(format!("properties.{name}: {e}")))?;
                for rank in ranks {
                    for v in g.by_rank(rank as i64).to_vec() {
                        if g.pool(v).rtype == ResourceType::node() {
                            g.pool_mut(v).properties.insert(name.clone(), String::new());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, g: &ResourceGraph, text: &str) -> Result<ResolvedSet, GraphError> {
        let wire = parse_rv1(text)?;
        let containment = Subsystem::containment();
        let mut set = ResolvedSet {
            starttime: wire.execution.starttime.map(|t| t as i64),
            expiration: wire.execution.expiration.map(|t| t as i64),
            ..Default::default()
        };
        for entry in &wire.execution.r_lite {
            let ranks = idset::parse(&entry.rank)
                .map_err(|e| GraphError::MalformedSpec(format!("rank: {e}")))?;
            let children = children_sets(entry)?;
            for rank in ranks {
                let node = g
                    .by_rank(rank as i64)
                    .iter()
                    .copied()
                    .find(|&v| g.pool(v).rtype == ResourceType::node())
                    .ok_or_else(|| GraphError::UnknownPath(format!("rank {rank}")))?;
                if children.is_empty() {
                    // A bare rank entry names the node itself.
                    set.items.push(ResolvedItem {
                        vertex: node,
                        qty: g.pool(node).size,
                        exclusive: false,
                    });
                    continue;
                }
                for (rtype, ids) in &children {
                    for &id in ids {
                        let child = g
                            .children(node, containment)
                            .into_iter()
                            .find(|&c| {
                                g.pool(c).rtype == *rtype && g.pool(c).id == id as i64
                            })
                            .ok_or_else(|| {
                                GraphError::UnknownPath(format!(
                                    "rank {rank} {rtype}{id}"
                                ))
                            })?;
                        set.items.push(ResolvedItem {
                            vertex: child,
                            qty: g.pool(child).size,
                            exclusive: false,
                        });
                    }
                }
            }
        }
        Ok(set)
    }
}

fn split_hostname(hostname: &str) -> (String, i64) {
    let digits = hostname.len()
        - hostname
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .count();
    if digits == hostname.len() {
        (hostname.to_owned(), -1)
    } else {
        match hostname[digits..].parse() {
            Ok(id) => (hostname[..digits].to_owned(), id),
            Err(_) => (hostname.to_owned(), -1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphDuration;
    use serde_json::json;

    fn rv1(nodes: u64, cores_per_node: u64) -> String {
        json!({
            "version": 1,
            "execution": {
                "R_lite": [{
                    "rank": idset::encode(0..nodes),
                    "children": {"core": idset::encode(0..cores_per_node)}
                }],
                "nodelist": [format!("node[0-{}]", nodes - 1)],
                "starttime": 0.0,
                "expiration": 1000.0
            }
        })
        .to_string()
    }

    fn fresh_graph() -> ResourceGraph {
        ResourceGraph::new(GraphDuration { start: 0, end: 1000 })
    }

    #[test]
    fn unpack_builds_containment_hierarchy() {
        let mut g = fresh_graph();
        let mut reader = Rv1ExecReader;
        reader.unpack(&mut g, &rv1(2, 2), -1).unwrap();
        assert_eq!(g.vertex_count(), 7);
        assert_eq!(g.by_type(ResourceType::node()).len(), 2);
        assert_eq!(g.by_type(ResourceType::core()).len(), 4);
        assert_eq!(g.by_path(Subsystem::containment(), "/cluster0/node1/core1").len(), 1);
        assert_eq!(g.metadata.nodes_up, 2);
    }

    #[test]
    fn unpack_applies_rank_properties() {
        let mut g = fresh_graph();
        let mut reader = Rv1ExecReader;
        let text = json!({
            "version": 1,
            "execution": {
                "R_lite": [{"rank": "0-1", "children": {"core": "0"}}],
                "nodelist": ["node[0-1]"],
                "properties": {"bigmem": "1"}
            }
        })
        .to_string();
        reader.unpack(&mut g, &text, -1).unwrap();
        let node1 = g.by_name("node1")[0];
        assert!(g.pool(node1).properties.contains_key("bigmem"));
        let node0 = g.by_name("node0")[0];
        assert!(!g.pool(node0).properties.contains_key("bigmem"));
    }

    #[test]
    fn resolve_maps_ranks_to_vertices() {
        let mut g = fresh_graph();
        let mut reader = Rv1ExecReader;
        reader.unpack(&mut g, &rv1(2, 2), -1).unwrap();
        let r = json!({
            "version": 1,
            "execution": {
                "R_lite": [{"rank": "0", "children": {"core": "0-1"}}],
                "starttime": 0.0,
                "expiration": 10.0
            }
        })
        .to_string();
        let set = reader.resolve(&g, &r).unwrap();
        assert_eq!(set.items.len(), 2);
        assert_eq!(set.starttime, Some(0));
        assert_eq!(set.expiration, Some(10));
        for item in &set.items {
            assert_eq!(g.pool(item.vertex).rtype, ResourceType::core());
            assert_eq!(g.pool(item.vertex).rank, 0);
        }
    }

    #[test]
    fn resolve_unknown_rank_fails() {
        let mut g = fresh_graph();
        let mut reader = Rv1ExecReader;
        reader.unpack(&mut g, &rv1(1, 1), -1).unwrap();
        let r = json!({
            "version": 1,
            "execution": {"R_lite": [{"rank": "9", "children": {"core": "0"}}]}
        })
        .to_string();
        assert!(matches!(
            reader.resolve(&g, &r),
            Err(GraphError::UnknownPath(_))
        ));
    }

    #[test]
    fn bad_version_rejected() {
        let mut g = fresh_graph();
        let mut reader = Rv1ExecReader;
        let text = json!({"version": 2, "execution": {"R_lite": []}}).to_string();
        assert!(matches!(
            reader.unpack(&mut g, &text, -1),
            Err(GraphError::MalformedSpec(_))
        ));
    }
}
