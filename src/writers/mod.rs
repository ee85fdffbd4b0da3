//! R-set writers.
//!
//! A writer receives the vertices (and, for graph-exact formats, the edges)
//! of a match while the chosen subtree is walked, then emits the canonical
//! R document. Three formats are supported: `rv1_nosched` (rank-oriented,
//! scheduling-free), `rv1exec` (rank-oriented plus node list, losslessly
//! invertible) and `jgf` (graph-exact).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use petgraph::stable_graph::NodeIndex;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::graph::ResourceGraph;
use crate::idset;
use crate::interner::ResourceType;
use crate::{hostlist, Time};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WriterError {
    #[error("unknown match format: {0}")]
    UnknownFormat(String),

    #[error("emission failed: {0}")]
    Emit(String),
}

/// Pluggable R emitter fed by the traverser.
pub trait MatchWriters: Debug {
    fn format(&self) -> &'static str;

    /// Records one chosen vertex. `qty` is the taken quantity; structural
    /// path vertices arrive with qty 0 so rank/name context is available.
    fn emit_vtx(&mut self, g: &ResourceGraph, v: NodeIndex, qty: u64, exclusive: bool);

    /// Records one containment edge between recorded vertices.
    fn emit_edg(&mut self, _g: &ResourceGraph, _src: NodeIndex, _dst: NodeIndex) {}

    /// Produces the R document for the recorded set and clears the writer.
    fn emit(&mut self, starttime: Time, expiration: Time) -> Result<String, WriterError>;
}

/// Creates a writer by `match-format` name.
pub fn create_match_writers(format: &str) -> Result<Box<dyn MatchWriters>, WriterError> {
    match format {
        "rv1_nosched" => Ok(Box::new(Rv1Writer::nosched())),
        "rv1exec" | "rv1" => Ok(Box::new(Rv1Writer::exec())),
        "jgf" => Ok(Box::new(JgfWriter::default())),
        other => Err(WriterError::UnknownFormat(other.to_owned())),
    }
}

#[derive(Debug, Default)]
struct RankEntry {
    hostname: Option<String>,
    node_taken: bool,
    children: BTreeMap<String, BTreeSet<u64>>,
}

/// Rank-oriented writer covering both rv1 flavors.
#[derive(Debug)]
pub struct Rv1Writer {
    with_nodelist: bool,
    ranks: BTreeMap<i64, RankEntry>,
}

impl Rv1Writer {
    pub fn nosched() -> Self {
        Self {
            with_nodelist: false,
            ranks: BTreeMap::new(),
        }
    }

    pub fn exec() -> Self {
        Self {
            with_nodelist: true,
            ranks: BTreeMap::new(),
        }
    }
}

impl MatchWriters for Rv1Writer {
    fn format(&self) -> &'static str {
        if self.with_nodelist {
            "rv1exec"
        } else {
            "rv1_nosched"
        }
    }

    fn emit_vtx(&mut self, g: &ResourceGraph, v: NodeIndex, qty: u64, exclusive: bool) {
        let pool = g.pool(v);
        if pool.rank < 0 {
            return;
        }
        if pool.rtype == ResourceType::node() {
            let entry = self.ranks.entry(pool.rank).or_default();
            entry.hostname = Some(pool.name.clone());
            entry.node_taken |= qty > 0;
            if qty > 0 && exclusive {
                // Whole-node exclusive take claims every granule child.
                let dom = crate::interner::Subsystem::containment();
                for child in g.children(v, dom) {
                    let cp = g.pool(child);
                    if cp.id >= 0 && cp.rtype != ResourceType::node() {
                        entry
                            .children
                            .entry(cp.rtype.as_str().to_owned())
                            .or_default()
                            .insert(cp.id as u64);
                    }
                }
            }
        } else if qty > 0 && pool.id >= 0 {
            self.ranks
                .entry(pool.rank)
                .or_default()
                .children
                .entry(pool.rtype.as_str().to_owned())
                .or_default()
                .insert(pool.id as u64);
        }
    }

    fn emit(&mut self, starttime: Time, expiration: Time) -> Result<String, WriterError> {
        // Ranks with identical children fold into one R_lite entry.
        let mut grouped: Vec<(String, Vec<i64>)> = Vec::new();
        let mut hostnames: Vec<(i64, String)> = Vec::new();
        for (rank, entry) in &self.ranks {
            if entry.children.is_empty() && !entry.node_taken {
                // Structural node context only; keep it out of R_lite.
                if let Some(host) = &entry.hostname {
                    hostnames.push((*rank, host.clone()));
                }
                continue;
            }
            let mut children = Map::new();
            for (kind, ids) in &entry.children {
                children.insert(
                    kind.clone(),
                    Value::String(idset::encode(ids.iter().copied())),
                );
            }
            let signature = Value::Object(children).to_string();
            match grouped.iter_mut().find(|(sig, _)| *sig == signature) {
                Some((_, ranks)) => ranks.push(*rank),
                None => grouped.push((signature, vec![*rank])),
            }
            if let Some(host) = &entry.hostname {
                hostnames.push((*rank, host.clone()));
            }
        }

        let r_lite: Vec<Value> = grouped
            .into_iter()
            .map(|(signature, ranks)| {
                let children: Value =
                    serde_json::from_str(&signature).unwrap_or_else(|_| json!({}));
                json!({
                    "rank": idset::encode(ranks.into_iter().map(|r| r as u64)),
                    "children": children,
                })
            })
            .collect();

        let mut execution = Map::new();
        execution.insert("R_lite".to_owned(), Value::Array(r_lite));
        if self.with_nodelist {
            hostnames.sort();
            let hosts: Vec<String> = hostnames.into_iter().map(|(_, h)| h).collect();
            execution.insert(
                "nodelist".to_owned(),
                json!(if hosts.is_empty() {
                    Vec::<String>::new()
                } else {
                    vec![hostlist::fold(&hosts)]
                }),
            );
        }
        execution.insert("starttime".to_owned(), json!(starttime));
        execution.insert("expiration".to_owned(), json!(expiration));

        let doc = json!({"version": 1, "execution": Value::Object(execution)});
        self.ranks.clear();
        Ok(doc.to_string())
    }
}

/// Graph-exact writer: vertices with full metadata plus typed edges.
#[derive(Debug, Default)]
pub struct JgfWriter {
    nodes: Vec<Value>,
    seen: BTreeSet<usize>,
    edges: Vec<Value>,
}

impl MatchWriters for JgfWriter {
    fn format(&self) -> &'static str {
        "jgf"
    }

    fn emit_vtx(&mut self, g: &ResourceGraph, v: NodeIndex, qty: u64, exclusive: bool) {
        if !self.seen.insert(v.index()) {
            return;
        }
        let pool = g.pool(v);
        let paths: Map<String, Value> = pool
            .paths
            .iter()
            .map(|(s, p)| (s.as_str().to_owned(), Value::String(p.clone())))
            .collect();
        let mut metadata = json!({
            "type": pool.rtype.as_str(),
            "basename": pool.basename,
            "name": pool.name,
            "id": pool.id,
            "uniq_id": pool.uniq_id,
            "rank": pool.rank,
            "size": if qty > 0 { qty } else { pool.size },
            "paths": Value::Object(paths),
        });
        if exclusive {
            metadata["exclusive"] = json!(true);
        }
        if !pool.properties.is_empty() {
            metadata["properties"] = json!(pool.properties);
        }
        self.nodes.push(json!({
            "id": pool.uniq_id.to_string(),
            "metadata": metadata,
        }));
    }

    fn emit_edg(&mut self, g: &ResourceGraph, src: NodeIndex, dst: NodeIndex) {
        self.edges.push(json!({
            "source": g.pool(src).uniq_id.to_string(),
            "target": g.pool(dst).uniq_id.to_string(),
        }));
    }

    fn emit(&mut self, _starttime: Time, _expiration: Time) -> Result<String, WriterError> {
        let doc = json!({
            "graph": {
                "nodes": std::mem::take(&mut self.nodes),
                "edges": std::mem::take(&mut self.edges),
            }
        });
        self.seen.clear();
        Ok(doc.to_string())
    }
}
