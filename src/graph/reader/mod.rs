//! Byte-stream to graph constructors.
//!
//! Readers are the only sanctioned way to grow the graph. A reader is a
//! stateful visitor: `unpack` ingests a serialized resource description and
//! emits vertices and edges into the graph; `resolve` maps a serialized R
//! set back onto concrete vertices so allocations can be replayed
//! (update) or subtracted (partial cancel).

use std::fmt;

use petgraph::stable_graph::NodeIndex;

use crate::graph::{GraphError, ResourceGraph};
use crate::Time;

pub mod jgf;
pub mod rv1exec;

pub use jgf::JgfReader;
pub use rv1exec::Rv1ExecReader;

/// One vertex named by an R set, with the quantity it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedItem {
    pub vertex: NodeIndex,
    pub qty: u64,
    pub exclusive: bool,
}

/// An R set mapped onto the live graph.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSet {
    pub items: Vec<ResolvedItem>,
    pub starttime: Option<Time>,
    pub expiration: Option<Time>,
}

/// Stateful visitor that deserializes external resource formats.
pub trait ResourceReader: fmt::Debug {
    /// Wire-format name this reader handles.
    fn format(&self) -> &'static str;

    /// Ingests one batch of resources into the graph. `rank` is the
    /// execution-target rank the batch belongs to, or -1 for whole-graph
    /// descriptions.
    fn unpack(&mut self, g: &mut ResourceGraph, text: &str, rank: i64)
        -> Result<(), GraphError>;

    /// Maps a serialized R set onto the graph's vertices.
    fn resolve(&self, g: &ResourceGraph, text: &str) -> Result<ResolvedSet, GraphError>;
}

/// Creates a reader by format name. Hardware-discovery input is produced by
/// an external collaborator and is not deserialized here.
pub fn create_reader(format: &str) -> Result<Box<dyn ResourceReader>, GraphError> {
    match format {
        "jgf" => Ok(Box::new(JgfReader::default())),
        "rv1exec" | "rv1_nosched" | "rv1" => Ok(Box::new(Rv1ExecReader::default())),
        "hwloc" => Err(GraphError::Unsupported(
            "hwloc discovery is handled by an external reader".to_owned(),
        )),
        other => Err(GraphError::MalformedSpec(format!("unknown format: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_recognizes_formats() {
        assert_eq!(create_reader("jgf").unwrap().format(), "jgf");
        assert_eq!(create_reader("rv1exec").unwrap().format(), "rv1exec");
        assert!(matches!(
            create_reader("hwloc"),
            Err(GraphError::Unsupported(_))
        ));
        assert!(matches!(
            create_reader("xml"),
            Err(GraphError::MalformedSpec(_))
        ));
    }
}
