//! Control flow graph over code blocks and proxy blocks.
//!
//! The CFG is a directed multigraph keyed by node identifier. It does not
//! own blocks: the IR registers every CodeBlock and ProxyBlock as a node when
//! it is attached and unregisters it on removal. Parallel edges between the
//! same pair of nodes are allowed as long as their labels differ; inserting
//! an exact duplicate is a no-op.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::Bound;
use uuid::Uuid;

use crate::error::{IrError, Result};

/// Kind of control transfer an edge represents.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Encode,
    Decode,
)]
pub enum EdgeType {
    /// Conditional or unconditional branch
    Branch,
    /// Function call
    Call,
    /// Fallthrough to the next block
    Fallthrough,
    /// Function return
    Return,
    /// System call
    Syscall,
    /// Return from a system call
    Sysret,
}

impl EdgeType {
    pub fn value(&self) -> &str {
        match self {
            EdgeType::Branch => "branch",
            EdgeType::Call => "call",
            EdgeType::Fallthrough => "fallthrough",
            EdgeType::Return => "return",
            EdgeType::Syscall => "syscall",
            EdgeType::Sysret => "sysret",
        }
    }
}

/// Label carried by a typed edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EdgeLabel {
    pub edge_type: EdgeType,
    /// Taken only when some condition holds
    pub conditional: bool,
    /// Target is encoded in the instruction rather than computed
    pub direct: bool,
}

impl EdgeLabel {
    pub fn new(edge_type: EdgeType, conditional: bool, direct: bool) -> Self {
        Self {
            edge_type,
            conditional,
            direct,
        }
    }

    /// Unconditional, direct edge of the given type.
    pub fn unconditional(edge_type: EdgeType) -> Self {
        Self::new(edge_type, false, true)
    }
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.edge_type.value(),
            if self.conditional { ",conditional" } else { "" },
            if self.direct { ",direct" } else { ",indirect" }
        )
    }
}

/// Edge in the control flow graph. `label == None` is an untyped edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Edge {
    pub source: Uuid,
    pub target: Uuid,
    pub label: Option<EdgeLabel>,
}

impl Edge {
    pub fn new(source: Uuid, target: Uuid, label: Option<EdgeLabel>) -> Self {
        Self {
            source,
            target,
            label,
        }
    }

    pub fn edge_type(&self) -> Option<EdgeType> {
        self.label.map(|l| l.edge_type)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} -> {} ({})", self.source, self.target, label),
            None => write!(f, "{} -> {}", self.source, self.target),
        }
    }
}

// Reverse index key: ordered by target first for incoming-edge range scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReverseKey {
    target: Uuid,
    source: Uuid,
    label: Option<EdgeLabel>,
}

impl From<&Edge> for ReverseKey {
    fn from(edge: &Edge) -> Self {
        Self {
            target: edge.target,
            source: edge.source,
            label: edge.label,
        }
    }
}

impl From<&ReverseKey> for Edge {
    fn from(key: &ReverseKey) -> Self {
        Edge::new(key.source, key.target, key.label)
    }
}

/// Directed multigraph over CodeBlock and ProxyBlock identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cfg {
    nodes: BTreeSet<Uuid>,
    edges: BTreeSet<Edge>,
    incoming: BTreeSet<ReverseKey>,
}

impl Cfg {
    /// Create a new empty control flow graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vertex. Returns `false` if it was already present.
    pub fn add_node(&mut self, id: Uuid) -> bool {
        self.nodes.insert(id)
    }

    /// Unregister a vertex. Fails while any edge still touches it.
    pub fn remove_node(&mut self, id: &Uuid) -> Result<bool> {
        let edges = self.degree(id);
        if edges > 0 {
            return Err(IrError::NodeHasEdges { id: *id, edges });
        }
        Ok(self.nodes.remove(id))
    }

    pub fn contains_node(&self, id: &Uuid) -> bool {
        self.nodes.contains(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Uuid> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Add an edge between two registered nodes.
    ///
    /// Returns `Ok(false)` if an identical edge already exists.
    pub fn add_edge(&mut self, source: Uuid, target: Uuid, label: Option<EdgeLabel>) -> Result<bool> {
        for id in [source, target] {
            if !self.nodes.contains(&id) {
                return Err(IrError::UnknownNode(id));
            }
        }
        let edge = Edge::new(source, target, label);
        if !self.edges.insert(edge) {
            return Ok(false);
        }
        self.incoming.insert(ReverseKey::from(&edge));
        Ok(true)
    }

    /// Remove one edge. Returns `false` if it was not present.
    pub fn remove_edge(&mut self, edge: &Edge) -> bool {
        if !self.edges.remove(edge) {
            return false;
        }
        self.incoming.remove(&ReverseKey::from(edge));
        true
    }

    /// Remove every edge touching `id`, returning how many were dropped.
    pub fn remove_edges_of(&mut self, id: &Uuid) -> usize {
        let doomed: Vec<Edge> = self
            .outgoing_edges(id)
            .chain(self.incoming_edges(id))
            .collect();
        doomed.iter().filter(|e| self.remove_edge(e)).count()
    }

    pub fn contains_edge(&self, edge: &Edge) -> bool {
        self.edges.contains(edge)
    }

    /// All edges, ordered by source, target, then label.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Edges leaving `id`, ordered by target then label.
    pub fn outgoing_edges<'a>(&'a self, id: &Uuid) -> impl Iterator<Item = Edge> + 'a {
        let id = *id;
        let lower = Edge::new(id, Uuid::nil(), None);
        self.edges
            .range((Bound::Included(lower), Bound::Unbounded))
            .take_while(move |e| e.source == id)
            .copied()
    }

    /// Edges entering `id`, ordered by source then label.
    pub fn incoming_edges<'a>(&'a self, id: &Uuid) -> impl Iterator<Item = Edge> + 'a {
        let id = *id;
        let lower = ReverseKey {
            target: id,
            source: Uuid::nil(),
            label: None,
        };
        self.incoming
            .range((Bound::Included(lower), Bound::Unbounded))
            .take_while(move |k| k.target == id)
            .map(Edge::from)
    }

    /// All parallel edges from `source` to `target`.
    pub fn find_edges<'a>(&'a self, source: &Uuid, target: &Uuid) -> impl Iterator<Item = Edge> + 'a {
        let (source, target) = (*source, *target);
        let lower = Edge::new(source, target, None);
        self.edges
            .range((Bound::Included(lower), Bound::Unbounded))
            .take_while(move |e| e.source == source && e.target == target)
            .copied()
    }

    /// Number of edges touching `id`; a self-loop counts twice.
    pub fn degree(&self, id: &Uuid) -> usize {
        self.outgoing_edges(id).count() + self.incoming_edges(id).count()
    }

    /// Distinct successor nodes of `id`.
    pub fn successors(&self, id: &Uuid) -> Vec<Uuid> {
        let mut out: Vec<Uuid> = self.outgoing_edges(id).map(|e| e.target).collect();
        out.dedup();
        out
    }

    /// Distinct predecessor nodes of `id`.
    pub fn predecessors(&self, id: &Uuid) -> Vec<Uuid> {
        let mut out: Vec<Uuid> = self.incoming_edges(id).map(|e| e.source).collect();
        out.dedup();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Nodes with no incoming edges.
    pub fn entry_nodes(&self) -> Vec<Uuid> {
        self.nodes
            .iter()
            .filter(|id| self.incoming_edges(id).next().is_none())
            .copied()
            .collect()
    }

    /// Nodes with no outgoing edges.
    pub fn exit_nodes(&self) -> Vec<Uuid> {
        self.nodes
            .iter()
            .filter(|id| self.outgoing_edges(id).next().is_none())
            .copied()
            .collect()
    }

    /// Whether any directed cycle exists; a self-loop counts.
    ///
    /// Iterative depth-first search, so chain length is bounded by memory
    /// rather than the thread stack.
    pub fn has_cycles(&self) -> bool {
        let mut colour: HashMap<Uuid, Colour> = HashMap::with_capacity(self.nodes.len());
        for &root in &self.nodes {
            if colour.contains_key(&root) {
                continue;
            }
            colour.insert(root, Colour::Grey);
            let mut stack = vec![(root, self.successors(&root).into_iter())];
            while let Some((node, successors)) = stack.last_mut() {
                match successors.next() {
                    Some(next) => match colour.get(&next) {
                        Some(Colour::Grey) => return true,
                        Some(Colour::Black) => {}
                        None => {
                            colour.insert(next, Colour::Grey);
                            stack.push((next, self.successors(&next).into_iter()));
                        }
                    },
                    None => {
                        colour.insert(*node, Colour::Black);
                        stack.pop();
                    }
                }
            }
        }
        false
    }

    /// Get statistics about the graph
    pub fn statistics(&self) -> CfgStatistics {
        let mut edge_type_counts = HashMap::new();
        let mut untyped_edges = 0;
        for edge in &self.edges {
            match edge.edge_type() {
                Some(t) => *edge_type_counts.entry(t).or_insert(0) += 1,
                None => untyped_edges += 1,
            }
        }

        CfgStatistics {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            entry_nodes: self.entry_nodes().len(),
            exit_nodes: self.exit_nodes().len(),
            has_cycles: self.has_cycles(),
            edge_type_counts,
            untyped_edges,
        }
    }
}

// Unvisited nodes are absent from the colour map.
#[derive(Clone, Copy)]
enum Colour {
    /// On the current search path
    Grey,
    /// Fully explored
    Black,
}

/// Statistics about a control flow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfgStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub entry_nodes: usize,
    pub exit_nodes: usize,
    pub has_cycles: bool,
    pub edge_type_counts: HashMap<EdgeType, usize>,
    pub untyped_edges: usize,
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cfg(nodes={}, edges={})",
            self.nodes.len(),
            self.edges.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn create_test_cfg() -> Cfg {
        let mut cfg = Cfg::new();
        for n in 1..=4 {
            cfg.add_node(id(n));
        }
        let branch = Some(EdgeLabel::new(EdgeType::Branch, true, true));
        let fall = Some(EdgeLabel::unconditional(EdgeType::Fallthrough));
        // entry -> header -> {body, exit}; body -> header
        cfg.add_edge(id(1), id(2), fall).unwrap();
        cfg.add_edge(id(2), id(3), fall).unwrap();
        cfg.add_edge(id(2), id(4), branch).unwrap();
        cfg.add_edge(id(3), id(2), Some(EdgeLabel::unconditional(EdgeType::Branch)))
            .unwrap();
        cfg
    }

    #[test]
    fn test_cfg_creation() {
        let cfg = Cfg::new();
        assert!(cfg.is_empty());
        assert_eq!(cfg.edge_count(), 0);
    }

    #[test]
    fn test_add_edge_requires_known_nodes() {
        let mut cfg = Cfg::new();
        cfg.add_node(id(1));
        let err = cfg.add_edge(id(1), id(2), None).unwrap_err();
        assert_eq!(err, IrError::UnknownNode(id(2)));
        assert_eq!(cfg.edge_count(), 0);
    }

    #[test]
    fn test_parallel_edges_and_duplicates() {
        let mut cfg = Cfg::new();
        cfg.add_node(id(1));
        cfg.add_node(id(2));
        let branch = Some(EdgeLabel::new(EdgeType::Branch, true, true));
        let fall = Some(EdgeLabel::unconditional(EdgeType::Fallthrough));
        assert!(cfg.add_edge(id(1), id(2), branch).unwrap());
        assert!(cfg.add_edge(id(1), id(2), fall).unwrap());
        assert!(!cfg.add_edge(id(1), id(2), fall).unwrap());
        assert!(cfg.add_edge(id(1), id(2), None).unwrap());

        assert_eq!(cfg.find_edges(&id(1), &id(2)).count(), 3);
        assert_eq!(cfg.successors(&id(1)), vec![id(2)]);
        assert_eq!(cfg.incoming_edges(&id(2)).count(), 3);
    }

    #[test]
    fn test_outgoing_and_incoming() {
        let cfg = create_test_cfg();
        let out: Vec<Uuid> = cfg.outgoing_edges(&id(2)).map(|e| e.target).collect();
        assert_eq!(out, vec![id(3), id(4)]);
        let inc: Vec<Uuid> = cfg.incoming_edges(&id(2)).map(|e| e.source).collect();
        assert_eq!(inc, vec![id(1), id(3)]);
        assert_eq!(cfg.predecessors(&id(4)), vec![id(2)]);
        assert_eq!(cfg.degree(&id(2)), 4);
    }

    #[test]
    fn test_remove_node_requires_no_edges() {
        let mut cfg = create_test_cfg();
        assert!(matches!(
            cfg.remove_node(&id(4)),
            Err(IrError::NodeHasEdges { edges: 1, .. })
        ));
        let edge = cfg.incoming_edges(&id(4)).next().unwrap();
        assert!(cfg.remove_edge(&edge));
        assert!(!cfg.remove_edge(&edge));
        assert!(cfg.remove_node(&id(4)).unwrap());
        assert!(!cfg.contains_node(&id(4)));
    }

    #[test]
    fn test_remove_edges_of() {
        let mut cfg = create_test_cfg();
        assert_eq!(cfg.remove_edges_of(&id(2)), 4);
        assert_eq!(cfg.edge_count(), 0);
        assert!(cfg.remove_node(&id(2)).is_ok());
    }

    #[test]
    fn test_entry_exit_and_cycles() {
        let cfg = create_test_cfg();
        assert_eq!(cfg.entry_nodes(), vec![id(1)]);
        assert_eq!(cfg.exit_nodes(), vec![id(4)]);
        assert!(cfg.has_cycles());

        let mut acyclic = Cfg::new();
        acyclic.add_node(id(1));
        acyclic.add_node(id(2));
        acyclic.add_edge(id(1), id(2), None).unwrap();
        assert!(!acyclic.has_cycles());
    }

    #[test]
    fn test_cycles_self_loop_and_diamond() {
        let mut diamond = Cfg::new();
        for n in 1..=4 {
            diamond.add_node(id(n));
        }
        // Two paths reach node 4; revisiting it is not a cycle.
        for (a, b) in [(1, 2), (1, 3), (2, 4), (3, 4)] {
            diamond.add_edge(id(a), id(b), None).unwrap();
        }
        assert!(!diamond.has_cycles());

        diamond.add_edge(id(3), id(3), None).unwrap();
        assert!(diamond.has_cycles());
    }

    #[test]
    fn test_cycles_on_long_chain() {
        let mut cfg = Cfg::new();
        let chain: Vec<Uuid> = (1..=200_000u128).map(id).collect();
        for node in &chain {
            cfg.add_node(*node);
        }
        let fall = Some(EdgeLabel::unconditional(EdgeType::Fallthrough));
        for pair in chain.windows(2) {
            cfg.add_edge(pair[0], pair[1], fall).unwrap();
        }
        assert!(!cfg.has_cycles());

        cfg.add_edge(chain[chain.len() - 1], chain[0], None).unwrap();
        assert!(cfg.statistics().has_cycles);
    }

    #[test]
    fn test_statistics() {
        let cfg = create_test_cfg();
        let stats = cfg.statistics();
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.edge_count, 4);
        assert_eq!(stats.entry_nodes, 1);
        assert_eq!(stats.exit_nodes, 1);
        assert!(stats.has_cycles);
        assert_eq!(stats.edge_type_counts[&EdgeType::Branch], 2);
        assert_eq!(stats.edge_type_counts[&EdgeType::Fallthrough], 2);
        assert_eq!(stats.untyped_edges, 0);
    }
}
