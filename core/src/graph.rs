//! Link graph. PageRank runs on an immutable [`GraphSnapshot`] copied from
//! the live [`LinkGraph`].

use parking_lot::RwLock;
use serde::Serialize;

use crate::DocId;

#[derive(Default)]
struct GraphInner {
    /// Sorted, deduplicated outlinks per node.
    outlinks: Vec<Vec<DocId>>,
    edges: usize,
    version: u64,
}

impl GraphInner {
    fn ensure_node(&mut self, id: DocId) {
        let needed = id as usize + 1;
        if self.outlinks.len() < needed {
            self.outlinks.resize_with(needed, Vec::new);
        }
    }
}

#[derive(Default)]
pub struct LinkGraph {
    inner: RwLock<GraphInner>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a graph from per-node outlink lists.
    pub fn from_adjacency(adjacency: Vec<Vec<DocId>>) -> Self {
        let graph = Self::new();
        {
            let mut inner = graph.inner.write();
            let nodes = adjacency.len();
            inner.outlinks.resize_with(nodes, Vec::new);
            for (src, links) in adjacency.into_iter().enumerate() {
                if !links.is_empty() {
                    Self::replace(&mut *inner, src as DocId, links);
                }
            }
        }
        graph
    }

    /// Registers a node with no outlinks if it is not known yet.
    pub fn ensure_node(&self, id: DocId) {
        let known = (id as usize) < self.inner.read().outlinks.len();
        if !known {
            let mut inner = self.inner.write();
            inner.ensure_node(id);
            inner.version += 1;
        }
    }

    /// Replaces the outlink set of `src`. A recrawl that drops a link removes
    /// the edge.
    pub fn set_outlinks<I>(&self, src: DocId, targets: I)
    where
        I: IntoIterator<Item = DocId>,
    {
        let targets: Vec<DocId> = targets.into_iter().collect();
        let mut inner = self.inner.write();
        Self::replace(&mut *inner, src, targets);
    }

    fn replace(inner: &mut GraphInner, src: DocId, mut targets: Vec<DocId>) {
        targets.sort_unstable();
        targets.dedup();
        inner.ensure_node(src);
        if let Some(&max) = targets.last() {
            inner.ensure_node(max);
        }
        let old = std::mem::replace(&mut inner.outlinks[src as usize], targets);
        inner.edges = inner.edges + inner.outlinks[src as usize].len() - old.len();
        inner.version += 1;
    }

    pub fn outlinks(&self, src: DocId) -> Vec<DocId> {
        self.inner.read().outlinks.get(src as usize).cloned().unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().outlinks.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().edges
    }

    /// Bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn adjacency(&self) -> Vec<Vec<DocId>> {
        self.inner.read().outlinks.clone()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let inner = self.inner.read();
        let mut offsets = Vec::with_capacity(inner.outlinks.len() + 1);
        let mut targets = Vec::with_capacity(inner.edges);
        offsets.push(0);
        for links in &inner.outlinks {
            targets.extend_from_slice(links);
            offsets.push(targets.len());
        }
        GraphSnapshot { offsets, targets, version: inner.version }
    }
}

/// Immutable compressed-sparse-row copy of the link graph.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    offsets: Vec<usize>,
    targets: Vec<DocId>,
    version: u64,
}

impl GraphSnapshot {
    /// Builds a snapshot directly from adjacency lists. Targets beyond the
    /// last source are added as nodes.
    pub fn from_adjacency(adjacency: &[Vec<DocId>]) -> Self {
        LinkGraph::from_adjacency(adjacency.to_vec()).snapshot()
    }

    pub fn node_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn edge_count(&self) -> usize {
        self.targets.len()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn outlinks(&self, node: usize) -> &[DocId] {
        &self.targets[self.offsets[node]..self.offsets[node + 1]]
    }

    pub fn out_degree(&self, node: usize) -> usize {
        self.offsets[node + 1] - self.offsets[node]
    }

    pub fn stats(&self) -> GraphStats {
        let nodes = self.node_count();
        let edges = self.edge_count();
        let mut has_incoming = vec![false; nodes];
        for &t in &self.targets {
            has_incoming[t as usize] = true;
        }
        let dangling = (0..nodes).filter(|&n| self.out_degree(n) == 0).count();
        let no_incoming = has_incoming.iter().filter(|&&b| !b).count();
        let (avg_out_degree, density) = if nodes > 0 {
            (edges as f64 / nodes as f64, edges as f64 / (nodes as f64 * nodes as f64))
        } else {
            (0.0, 0.0)
        };
        GraphStats { nodes, edges, dangling, no_incoming, avg_out_degree, density }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    /// Nodes without outlinks, placeholders included.
    pub dangling: usize,
    pub no_incoming: usize,
    pub avg_out_degree: f64,
    pub density: f64,
}
