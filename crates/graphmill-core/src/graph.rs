//! The directed graph a vertex program executes over.
//!
//! [`DirectedGraph`] wraps a petgraph `Graph` for topology and keeps vertex
//! and edge payloads in dense side tables indexed by [`VertexId`] /
//! [`EdgeId`]. The side tables let the execution layer temporarily take
//! ownership of all payloads for the duration of a run (the scope factory
//! guards them with per-vertex locks) and hand them back afterwards,
//! without touching the topology.
//!
//! A graph moves through two phases:
//! - **Construction**: `add_vertex` / `add_edge` / `set_color` build the
//!   topology. Adjacency queries are not available yet.
//! - **Finalized**: `finalize()` freezes the topology and builds the
//!   ordered in/out adjacency and neighbor tables. Any further structural
//!   mutation is a [`CoreError::Finalized`]. Execution requires a
//!   finalized graph, and the graph never mutates during execution.

use petgraph::graph::{EdgeIndex, Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Directed;

use crate::error::CoreError;
use crate::id::{Color, EdgeId, VertexId};

/// A directed graph with user payloads on vertices and edges, dense `u32`
/// ids, and an optional vertex coloring.
pub struct DirectedGraph<V, E> {
    topology: Graph<(), (), Directed, u32>,
    vertex_data: Vec<V>,
    edge_data: Vec<E>,
    colors: Vec<Color>,
    /// In-edge ids per vertex, ascending. Built by `finalize()`.
    in_edges: Vec<Vec<EdgeId>>,
    /// Out-edge ids per vertex, ascending. Built by `finalize()`.
    out_edges: Vec<Vec<EdgeId>>,
    /// Deduplicated union of in- and out-neighbors, ascending.
    neighbors: Vec<Vec<VertexId>>,
    finalized: bool,
}

impl<V, E> Default for DirectedGraph<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> DirectedGraph<V, E> {
    /// Creates an empty graph.
    pub fn new() -> Self {
        DirectedGraph {
            topology: Graph::default(),
            vertex_data: Vec::new(),
            edge_data: Vec::new(),
            colors: Vec::new(),
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            neighbors: Vec::new(),
            finalized: false,
        }
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.topology.node_count()
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.topology.edge_count()
    }

    /// Whether `finalize()` has been called.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Adds a vertex carrying `data`, with color 0.
    pub fn add_vertex(&mut self, data: V) -> Result<VertexId, CoreError> {
        if self.finalized {
            return Err(CoreError::Finalized);
        }
        let idx = self.topology.add_node(());
        self.vertex_data.push(data);
        self.colors.push(Color(0));
        Ok(VertexId::from(idx))
    }

    /// Adds a directed edge from `src` to `dst` carrying `data`.
    ///
    /// Self edges are rejected: a scope would have to hold the same vertex
    /// lock twice.
    pub fn add_edge(&mut self, src: VertexId, dst: VertexId, data: E) -> Result<EdgeId, CoreError> {
        if self.finalized {
            return Err(CoreError::Finalized);
        }
        if src == dst {
            return Err(CoreError::SelfEdge { vertex: src });
        }
        self.check_vertex(src)?;
        self.check_vertex(dst)?;
        let idx = self
            .topology
            .add_edge(NodeIndex::from(src), NodeIndex::from(dst), ());
        self.edge_data.push(data);
        Ok(EdgeId::from(idx))
    }

    /// Assigns a color to a vertex. Colors may only change before
    /// finalization; the coloring is fixed for the lifetime of a run.
    pub fn set_color(&mut self, vertex: VertexId, color: Color) -> Result<(), CoreError> {
        if self.finalized {
            return Err(CoreError::Finalized);
        }
        self.check_vertex(vertex)?;
        self.colors[vertex.index()] = color;
        Ok(())
    }

    /// The color of a vertex.
    pub fn color(&self, vertex: VertexId) -> Result<Color, CoreError> {
        self.check_vertex(vertex)?;
        Ok(self.colors[vertex.index()])
    }

    /// One past the highest color in use.
    pub fn num_colors(&self) -> usize {
        self.colors.iter().map(|c| c.0 as usize + 1).max().unwrap_or(0)
    }

    /// Verifies that no edge connects two vertices of equal color.
    pub fn valid_coloring(&self) -> bool {
        self.topology.edge_references().all(|e| {
            self.colors[e.source().index()] != self.colors[e.target().index()]
        })
    }

    /// Assigns a valid coloring greedily in vertex order, replacing any
    /// existing color assignment. Returns the number of colors used.
    pub fn greedy_color(&mut self) -> Result<usize, CoreError> {
        if self.finalized {
            return Err(CoreError::Finalized);
        }
        let n = self.num_vertices();
        let mut used = 0usize;
        for v in 0..n {
            let idx = NodeIndex::<u32>::new(v);
            // Only neighbors already visited constrain the choice.
            let mut taken: Vec<u32> = self
                .topology
                .neighbors_undirected(idx)
                .filter(|nb| nb.index() < v)
                .map(|nb| self.colors[nb.index()].0)
                .collect();
            taken.sort_unstable();
            taken.dedup();
            // Smallest color not taken by any already-colored neighbor.
            let mut color = 0u32;
            for t in taken {
                if t == color {
                    color += 1;
                } else if t > color {
                    break;
                }
            }
            self.colors[v] = Color(color);
            used = used.max(color as usize + 1);
        }
        Ok(used)
    }

    /// Freezes the topology and builds the adjacency tables.
    ///
    /// Idempotent: finalizing twice is a no-op.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        let n = self.num_vertices();
        self.in_edges = vec![Vec::new(); n];
        self.out_edges = vec![Vec::new(); n];
        self.neighbors = vec![Vec::new(); n];
        for e in self.topology.edge_references() {
            let id = EdgeId::from(e.id());
            self.out_edges[e.source().index()].push(id);
            self.in_edges[e.target().index()].push(id);
            self.neighbors[e.source().index()].push(VertexId(e.target().index() as u32));
            self.neighbors[e.target().index()].push(VertexId(e.source().index() as u32));
        }
        for v in 0..n {
            self.in_edges[v].sort_unstable();
            self.out_edges[v].sort_unstable();
            self.neighbors[v].sort_unstable();
            self.neighbors[v].dedup();
        }
        self.finalized = true;
    }

    /// Finalizes and validates the coloring in one step.
    pub fn finalize_colored(&mut self) -> Result<(), CoreError> {
        if let Some(bad) = self
            .topology
            .edge_references()
            .find(|e| self.colors[e.source().index()] == self.colors[e.target().index()])
        {
            return Err(CoreError::InvalidColoring {
                edge: EdgeId::from(bad.id()),
                color: self.colors[bad.source().index()],
            });
        }
        self.finalize();
        Ok(())
    }

    /// Ids of edges pointing into `vertex`, ascending.
    pub fn in_edge_ids(&self, vertex: VertexId) -> Result<&[EdgeId], CoreError> {
        self.require_finalized()?;
        self.check_vertex(vertex)?;
        Ok(&self.in_edges[vertex.index()])
    }

    /// Ids of edges leaving `vertex`, ascending.
    pub fn out_edge_ids(&self, vertex: VertexId) -> Result<&[EdgeId], CoreError> {
        self.require_finalized()?;
        self.check_vertex(vertex)?;
        Ok(&self.out_edges[vertex.index()])
    }

    /// Deduplicated union of in- and out-neighbors of `vertex`, ascending.
    pub fn neighbor_ids(&self, vertex: VertexId) -> Result<&[VertexId], CoreError> {
        self.require_finalized()?;
        self.check_vertex(vertex)?;
        Ok(&self.neighbors[vertex.index()])
    }

    /// Source vertex of an edge.
    pub fn source(&self, edge: EdgeId) -> Result<VertexId, CoreError> {
        let (s, _) = self
            .topology
            .edge_endpoints(EdgeIndex::from(edge))
            .ok_or(CoreError::EdgeNotFound { id: edge })?;
        Ok(VertexId::from(s))
    }

    /// Target vertex of an edge.
    pub fn target(&self, edge: EdgeId) -> Result<VertexId, CoreError> {
        let (_, t) = self
            .topology
            .edge_endpoints(EdgeIndex::from(edge))
            .ok_or(CoreError::EdgeNotFound { id: edge })?;
        Ok(VertexId::from(t))
    }

    /// The payload of a vertex.
    pub fn vertex_data(&self, vertex: VertexId) -> Result<&V, CoreError> {
        self.check_vertex(vertex)?;
        Ok(&self.vertex_data[vertex.index()])
    }

    /// Mutable payload of a vertex.
    pub fn vertex_data_mut(&mut self, vertex: VertexId) -> Result<&mut V, CoreError> {
        self.check_vertex(vertex)?;
        Ok(&mut self.vertex_data[vertex.index()])
    }

    /// The payload of an edge.
    pub fn edge_data(&self, edge: EdgeId) -> Result<&E, CoreError> {
        self.check_edge(edge)?;
        Ok(&self.edge_data[edge.index()])
    }

    /// Mutable payload of an edge.
    pub fn edge_data_mut(&mut self, edge: EdgeId) -> Result<&mut E, CoreError> {
        self.check_edge(edge)?;
        Ok(&mut self.edge_data[edge.index()])
    }

    /// Moves all payloads out of the graph, leaving it data-empty.
    ///
    /// Execution-layer plumbing: the scope factory owns the payloads for
    /// the duration of a run and hands them back via
    /// [`restore_payloads`](Self::restore_payloads). The graph must not be
    /// read through the payload accessors in between.
    pub fn take_payloads(&mut self) -> (Vec<V>, Vec<E>) {
        (
            std::mem::take(&mut self.vertex_data),
            std::mem::take(&mut self.edge_data),
        )
    }

    /// Restores payload tables previously taken with
    /// [`take_payloads`](Self::take_payloads).
    pub fn restore_payloads(&mut self, vertices: Vec<V>, edges: Vec<E>) -> Result<(), CoreError> {
        if vertices.len() != self.num_vertices() {
            return Err(CoreError::PayloadMismatch {
                expected: self.num_vertices(),
                actual: vertices.len(),
            });
        }
        if edges.len() != self.num_edges() {
            return Err(CoreError::PayloadMismatch {
                expected: self.num_edges(),
                actual: edges.len(),
            });
        }
        self.vertex_data = vertices;
        self.edge_data = edges;
        Ok(())
    }

    fn check_vertex(&self, vertex: VertexId) -> Result<(), CoreError> {
        if vertex.index() < self.num_vertices() {
            Ok(())
        } else {
            Err(CoreError::VertexNotFound { id: vertex })
        }
    }

    fn check_edge(&self, edge: EdgeId) -> Result<(), CoreError> {
        if edge.index() < self.num_edges() {
            Ok(())
        } else {
            Err(CoreError::EdgeNotFound { id: edge })
        }
    }

    fn require_finalized(&self) -> Result<(), CoreError> {
        if self.finalized {
            Ok(())
        } else {
            Err(CoreError::NotFinalized)
        }
    }
}
