//! Stable ID newtypes for graph and cluster entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that a `VertexId` cannot be accidentally used where an `EdgeId` is
//! expected. Vertex ids are dense: a finalized graph with `V` vertices uses
//! exactly the ids `0..V`.

use std::fmt;

use petgraph::graph::{EdgeIndex, NodeIndex};
use serde::{Deserialize, Serialize};

/// Dense vertex identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexId(pub u32);

/// Edge identifier. Maps to a petgraph `EdgeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

/// Vertex color assigned by a graph coloring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Color(pub u32);

/// Rank of a process in a distributed deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcId(pub u32);

impl VertexId {
    /// The inner id as a usize index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl EdgeId {
    /// The inner id as a usize index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ProcId {
    /// The inner rank as a usize index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// Display implementations -- just print the inner value.

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridges between the id newtypes and petgraph's index types.

impl From<NodeIndex<u32>> for VertexId {
    fn from(idx: NodeIndex<u32>) -> Self {
        VertexId(idx.index() as u32)
    }
}

impl From<VertexId> for NodeIndex<u32> {
    fn from(id: VertexId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

impl From<EdgeIndex<u32>> for EdgeId {
    fn from(idx: EdgeIndex<u32>) -> Self {
        EdgeId(idx.index() as u32)
    }
}

impl From<EdgeId> for EdgeIndex<u32> {
    fn from(id: EdgeId) -> Self {
        EdgeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_id_to_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(42);
        let vertex = VertexId::from(idx);
        assert_eq!(vertex.0, 42);

        let back: NodeIndex<u32> = vertex.into();
        assert_eq!(back.index(), 42);
    }

    #[test]
    fn edge_id_to_edge_index_roundtrip() {
        let idx = EdgeIndex::<u32>::new(17);
        let edge = EdgeId::from(idx);
        assert_eq!(edge.0, 17);

        let back: EdgeIndex<u32> = edge.into();
        assert_eq!(back.index(), 17);
    }

    #[test]
    fn id_display() {
        assert_eq!(format!("{}", VertexId(7)), "7");
        assert_eq!(format!("{}", EdgeId(99)), "99");
        assert_eq!(format!("{}", Color(2)), "2");
        assert_eq!(format!("{}", ProcId(0)), "0");
    }

    #[test]
    fn ids_order_by_inner_value() {
        // Lock acquisition sorts by vertex id; the derived ordering must
        // agree with the numeric ordering of the inner value.
        let mut ids = vec![VertexId(5), VertexId(1), VertexId(3)];
        ids.sort();
        assert_eq!(ids, vec![VertexId(1), VertexId(3), VertexId(5)]);
    }

    #[test]
    fn serde_roundtrip() {
        let vertex = VertexId(42);
        let json = serde_json::to_string(&vertex).unwrap();
        let back: VertexId = serde_json::from_str(&json).unwrap();
        assert_eq!(vertex, back);

        let proc = ProcId(3);
        let json = serde_json::to_string(&proc).unwrap();
        let back: ProcId = serde_json::from_str(&json).unwrap();
        assert_eq!(proc, back);
    }
}
