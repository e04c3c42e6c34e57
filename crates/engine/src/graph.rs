//! A directed graph keyed by node id.
//!
//! Used twice: at save time to prove a workflow is acyclic, and at view
//! time to walk the DAG level by level.
//!
//! # Design
//!
//! Nodes live in an arena (`HashMap<K, Vertex>`); each vertex keeps its
//! payload plus both adjacency lists, so predecessors and successors are
//! O(1) away and no node ever holds a reference to another. Insertion order
//! is recorded so every query answers deterministically.
//!
//! Cycle detection and topological sort both use Kahn's algorithm over a
//! private in-degree table: O(V+E), and the graph itself is never mutated.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use crate::EngineError;

#[derive(Debug, Clone)]
struct Vertex<K, N> {
    payload: N,
    /// Incoming arcs.
    predecessors: Vec<K>,
    /// Outgoing arcs.
    successors: Vec<K>,
}

/// Directed graph over node ids of type `K` carrying payloads of type `N`.
#[derive(Debug, Clone)]
pub struct Graph<K, N> {
    vertices: HashMap<K, Vertex<K, N>>,
    insertion_order: Vec<K>,
    edge_count: usize,
}

impl<K, N> Default for Graph<K, N> {
    fn default() -> Self {
        Self {
            vertices: HashMap::new(),
            insertion_order: Vec::new(),
            edge_count: 0,
        }
    }
}

impl<K, N> Graph<K, N>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Registers a node. Re-adding an id overwrites its payload and keeps
    /// its arcs: payloads are immutable for the lifetime of one save.
    pub fn add_node(&mut self, id: K, payload: N) {
        match self.vertices.get_mut(&id) {
            Some(vertex) => vertex.payload = payload,
            None => {
                self.insertion_order.push(id.clone());
                self.vertices.insert(
                    id,
                    Vertex {
                        payload,
                        predecessors: Vec::new(),
                        successors: Vec::new(),
                    },
                );
            }
        }
    }

    /// Adds the arc `from -> to`.
    ///
    /// Returns `false`, leaving the graph untouched, when either endpoint is
    /// unknown or the arc is already present. Arcs that close a cycle
    /// (self-loops included) are accepted; [`Graph::has_cycle`] judges them.
    pub fn add_edge(&mut self, from: &K, to: &K) -> bool {
        if !self.vertices.contains_key(from) || !self.vertices.contains_key(to) {
            return false;
        }
        if self.vertices[from].successors.contains(to) {
            return false;
        }

        if let Some(vertex) = self.vertices.get_mut(from) {
            vertex.successors.push(to.clone());
        }
        if let Some(vertex) = self.vertices.get_mut(to) {
            vertex.predecessors.push(from.clone());
        }
        self.edge_count += 1;
        true
    }

    pub fn contains_node(&self, id: &K) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn contains_edge(&self, from: &K, to: &K) -> bool {
        self.vertices
            .get(from)
            .is_some_and(|vertex| vertex.successors.contains(to))
    }

    pub fn node(&self, id: &K) -> Option<&N> {
        self.vertices.get(id).map(|vertex| &vertex.payload)
    }

    /// Node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &K> {
        self.insertion_order.iter()
    }

    /// Nodes with in-degree zero, in insertion order.
    pub fn begin_nodes(&self) -> Vec<K> {
        self.filter_nodes(|vertex| vertex.predecessors.is_empty())
    }

    /// Nodes with out-degree zero, in insertion order.
    pub fn end_nodes(&self) -> Vec<K> {
        self.filter_nodes(|vertex| vertex.successors.is_empty())
    }

    /// Direct successors of `id`; empty for an unknown id.
    pub fn subsequent_nodes(&self, id: &K) -> &[K] {
        self.vertices
            .get(id)
            .map_or(&[], |vertex| vertex.successors.as_slice())
    }

    /// Direct predecessors of `id`; empty for an unknown id.
    pub fn previous_nodes(&self, id: &K) -> &[K] {
        self.vertices
            .get(id)
            .map_or(&[], |vertex| vertex.predecessors.as_slice())
    }

    pub fn in_degree(&self, id: &K) -> Option<usize> {
        self.vertices.get(id).map(|vertex| vertex.predecessors.len())
    }

    pub fn out_degree(&self, id: &K) -> Option<usize> {
        self.vertices.get(id).map(|vertex| vertex.successors.len())
    }

    /// Whether any cycle exists, self-loops included.
    pub fn has_cycle(&self) -> bool {
        self.kahn_order().len() != self.vertices.len()
    }

    /// A topological ordering; ties broken by insertion order.
    ///
    /// # Errors
    /// [`EngineError::CycleDetected`] if the graph is cyclic.
    pub fn topological_sort(&self) -> Result<Vec<K>, EngineError> {
        let order = self.kahn_order();
        if order.len() != self.vertices.len() {
            return Err(EngineError::CycleDetected);
        }
        Ok(order)
    }

    /// Kahn's algorithm. Returns fewer ids than there are nodes iff the
    /// graph has a cycle.
    fn kahn_order(&self) -> Vec<K> {
        let mut in_degree: HashMap<&K, usize> = self
            .vertices
            .iter()
            .map(|(id, vertex)| (id, vertex.predecessors.len()))
            .collect();

        // Seed the queue with nodes that have no incoming edges.
        let mut queue: VecDeque<&K> = self
            .insertion_order
            .iter()
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut sorted = Vec::with_capacity(self.vertices.len());

        while let Some(id) = queue.pop_front() {
            sorted.push(id.clone());

            for successor in &self.vertices[id].successors {
                if let Some(degree) = in_degree.get_mut(successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(successor);
                    }
                }
            }
        }

        sorted
    }

    fn filter_nodes(&self, keep: impl Fn(&Vertex<K, N>) -> bool) -> Vec<K> {
        self.insertion_order
            .iter()
            .filter(|id| self.vertices.get(*id).is_some_and(&keep))
            .cloned()
            .collect()
    }
}
