//! The per-vertex consistency window handed to update functions.

use std::collections::HashMap;

use graphmill_core::config::ScopeRange;
use graphmill_core::deferred_rwlock::LockKind;
use graphmill_core::graph::DirectedGraph;
use graphmill_core::id::{EdgeId, VertexId};

use super::DataTables;
use crate::error::EngineError;

/// A snapshot of a payload plus whether it has been written.
struct Cell<T> {
    value: T,
    dirty: bool,
}

/// A consistency window around one vertex.
///
/// Created, used, committed and released within a single worker iteration.
/// Reads and writes are checked against the scope's range; accessing data
/// the range does not cover is an [`EngineError::ScopeViolation`].
pub struct VertexScope<'f, V, E> {
    graph: &'f DirectedGraph<V, E>,
    tables: &'f DataTables<V, E>,
    center: VertexId,
    range: ScopeRange,
    in_edges: &'f [EdgeId],
    out_edges: &'f [EdgeId],
    neighbors: &'f [VertexId],
    center_data: Option<Cell<V>>,
    neighbor_data: HashMap<VertexId, Cell<V>>,
    edge_data: HashMap<EdgeId, Cell<E>>,
    /// Sorted lock acquisition plan; walked in reverse on release.
    pub(crate) plan: Vec<(VertexId, LockKind)>,
}

impl<'f, V: Clone, E: Clone> VertexScope<'f, V, E> {
    /// Snapshots the payloads covered by `range`. The factory has already
    /// acquired every lock in `plan` when this runs.
    pub(crate) fn snapshot(
        graph: &'f DirectedGraph<V, E>,
        tables: &'f DataTables<V, E>,
        center: VertexId,
        range: ScopeRange,
        plan: Vec<(VertexId, LockKind)>,
    ) -> Self {
        let in_edges = graph.in_edge_ids(center).unwrap_or(&[]);
        let out_edges = graph.out_edge_ids(center).unwrap_or(&[]);
        let neighbors = graph.neighbor_ids(center).unwrap_or(&[]);

        let center_data = (range >= ScopeRange::VertexRead).then(|| Cell {
            value: tables.vertices[center.index()].lock().clone(),
            dirty: false,
        });

        let mut neighbor_data = HashMap::new();
        let mut edge_data = HashMap::new();
        if range >= ScopeRange::Edge {
            for &n in neighbors {
                neighbor_data.insert(
                    n,
                    Cell {
                        value: tables.vertices[n.index()].lock().clone(),
                        dirty: false,
                    },
                );
            }
            for &e in in_edges.iter().chain(out_edges) {
                edge_data.insert(
                    e,
                    Cell {
                        value: tables.edges[e.index()].lock().clone(),
                        dirty: false,
                    },
                );
            }
        }

        VertexScope {
            graph,
            tables,
            center,
            range,
            in_edges,
            out_edges,
            neighbors,
            center_data,
            neighbor_data,
            edge_data,
            plan,
        }
    }

    /// The vertex at the center of this scope.
    pub fn center(&self) -> VertexId {
        self.center
    }

    /// The consistency range this scope holds.
    pub fn range(&self) -> ScopeRange {
        self.range
    }

    /// Ids of edges pointing into the center, ascending.
    pub fn in_edge_ids(&self) -> &[EdgeId] {
        self.in_edges
    }

    /// Ids of edges leaving the center, ascending.
    pub fn out_edge_ids(&self) -> &[EdgeId] {
        self.out_edges
    }

    /// Deduplicated neighbors of the center, ascending.
    pub fn neighbor_ids(&self) -> &[VertexId] {
        self.neighbors
    }

    /// Source vertex of an incident edge.
    pub fn source(&self, edge: EdgeId) -> Result<VertexId, EngineError> {
        self.check_incident(edge)?;
        Ok(self.graph.source(edge)?)
    }

    /// Target vertex of an incident edge.
    pub fn target(&self, edge: EdgeId) -> Result<VertexId, EngineError> {
        self.check_incident(edge)?;
        Ok(self.graph.target(edge)?)
    }

    /// Reads the center vertex payload. Requires at least `VertexRead`.
    pub fn vertex_data(&self) -> Result<&V, EngineError> {
        match &self.center_data {
            Some(cell) => Ok(&cell.value),
            None => Err(self.violation(ScopeRange::VertexRead)),
        }
    }

    /// Writes the center vertex payload. Requires at least `VertexWrite`.
    pub fn vertex_data_mut(&mut self) -> Result<&mut V, EngineError> {
        if self.range < ScopeRange::VertexWrite {
            return Err(self.violation(ScopeRange::VertexWrite));
        }
        let held = self.range;
        match self.center_data.as_mut() {
            Some(cell) => {
                cell.dirty = true;
                Ok(&mut cell.value)
            }
            None => Err(EngineError::ScopeViolation {
                needed: ScopeRange::VertexWrite,
                held,
            }),
        }
    }

    /// Reads a neighbor's payload. Requires at least `Edge`.
    pub fn neighbor_data(&self, vertex: VertexId) -> Result<&V, EngineError> {
        if self.range < ScopeRange::Edge {
            return Err(self.violation(ScopeRange::Edge));
        }
        self.neighbor_data
            .get(&vertex)
            .map(|cell| &cell.value)
            .ok_or(EngineError::NotNeighbor {
                vertex,
                center: self.center,
            })
    }

    /// Writes a neighbor's payload. Requires `Full`.
    pub fn neighbor_data_mut(&mut self, vertex: VertexId) -> Result<&mut V, EngineError> {
        if self.range < ScopeRange::Full {
            return Err(self.violation(ScopeRange::Full));
        }
        let center = self.center;
        self.neighbor_data
            .get_mut(&vertex)
            .map(|cell| {
                cell.dirty = true;
                &mut cell.value
            })
            .ok_or(EngineError::NotNeighbor { vertex, center })
    }

    /// Reads an incident edge's payload. Requires at least `Edge`.
    pub fn edge_data(&self, edge: EdgeId) -> Result<&E, EngineError> {
        if self.range < ScopeRange::Edge {
            return Err(self.violation(ScopeRange::Edge));
        }
        self.edge_data
            .get(&edge)
            .map(|cell| &cell.value)
            .ok_or(EngineError::NotIncident {
                edge,
                center: self.center,
            })
    }

    /// Writes an incident edge's payload. Requires at least `Edge`.
    pub fn edge_data_mut(&mut self, edge: EdgeId) -> Result<&mut E, EngineError> {
        if self.range < ScopeRange::Edge {
            return Err(self.violation(ScopeRange::Edge));
        }
        let center = self.center;
        self.edge_data
            .get_mut(&edge)
            .map(|cell| {
                cell.dirty = true;
                &mut cell.value
            })
            .ok_or(EngineError::NotIncident { edge, center })
    }

    /// Writes every mutated snapshot back to the shared tables.
    ///
    /// Must run before the factory releases the scope's locks; the engine
    /// commits unconditionally after each update invocation.
    pub fn commit(&mut self) {
        if let Some(cell) = &mut self.center_data {
            if cell.dirty {
                *self.tables.vertices[self.center.index()].lock() = cell.value.clone();
                cell.dirty = false;
            }
        }
        for (&v, cell) in &mut self.neighbor_data {
            if cell.dirty {
                *self.tables.vertices[v.index()].lock() = cell.value.clone();
                cell.dirty = false;
            }
        }
        for (&e, cell) in &mut self.edge_data {
            if cell.dirty {
                *self.tables.edges[e.index()].lock() = cell.value.clone();
                cell.dirty = false;
            }
        }
    }

    fn check_incident(&self, edge: EdgeId) -> Result<(), EngineError> {
        if self.in_edges.contains(&edge) || self.out_edges.contains(&edge) {
            Ok(())
        } else {
            Err(EngineError::NotIncident {
                edge,
                center: self.center,
            })
        }
    }

    fn violation(&self, needed: ScopeRange) -> EngineError {
        EngineError::ScopeViolation {
            needed,
            held: self.range,
        }
    }
}
