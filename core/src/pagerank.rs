//! PageRank by power iteration. Dangling mass is spread evenly; hitting the
//! iteration cap is reported as [`Convergence::TimedOut`].

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PageRankConfig;
use crate::graph::GraphSnapshot;
use crate::DocId;

/// Per-document authority, indexed by document ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorityTable {
    scores: Vec<f64>,
    min: f64,
    max: f64,
}

impl AuthorityTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_scores(scores: Vec<f64>) -> Self {
        let (min, max) = if scores.is_empty() {
            (0.0, 0.0)
        } else {
            scores
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)))
        };
        Self { scores, min, max }
    }

    pub fn get(&self, doc_id: DocId) -> Option<f64> {
        self.scores.get(doc_id as usize).copied()
    }

    /// Score for `doc_id`; documents that were not ranked yet get the table
    /// minimum (0 for an empty table).
    pub fn score_or_min(&self, doc_id: DocId) -> f64 {
        self.get(doc_id).unwrap_or(self.min)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.scores.iter().sum()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.scores
    }

    /// Highest-scoring documents, ties broken by ascending ID.
    pub fn top(&self, n: usize) -> Vec<(DocId, f64)> {
        let mut ranked: Vec<(DocId, f64)> = self
            .scores
            .iter()
            .enumerate()
            .map(|(id, &s)| (id as DocId, s))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}

/// Holder of the current authority table. Readers clone the `Arc` and keep
/// using that table for as long as they like; a recomputation replaces the
/// whole table in one pointer swap.
#[derive(Debug, Default)]
pub struct AuthorityCell {
    current: RwLock<Arc<AuthorityTable>>,
    generation: AtomicU64,
}

impl AuthorityCell {
    pub fn new(table: AuthorityTable) -> Self {
        Self { current: RwLock::new(Arc::new(table)), generation: AtomicU64::new(0) }
    }

    pub fn load(&self) -> Arc<AuthorityTable> {
        self.current.read().clone()
    }

    /// Installs `table` and returns the new generation number.
    pub fn store(&self, table: AuthorityTable) -> u64 {
        let table = Arc::new(table);
        *self.current.write() = table;
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of swaps since construction.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Convergence {
    Converged { iterations: usize },
    /// Iteration cap reached before the tolerance; the last vector is used.
    TimedOut { iterations: usize, residual: f64 },
}

impl Convergence {
    pub fn iterations(&self) -> usize {
        match *self {
            Convergence::Converged { iterations } | Convergence::TimedOut { iterations, .. } => iterations,
        }
    }

    pub fn converged(&self) -> bool {
        matches!(self, Convergence::Converged { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageRankReport {
    pub convergence: Convergence,
    pub nodes: usize,
    pub edges: usize,
    /// L1 distance between the last two vectors.
    pub residual: f64,
    pub elapsed: Duration,
    pub graph_version: u64,
}

#[derive(Clone, Copy)]
enum Teleport<'a> {
    Uniform,
    Seeds(&'a [usize]),
}

fn power_iterate(graph: &GraphSnapshot, config: &PageRankConfig, teleport: Teleport<'_>) -> (Vec<f64>, Convergence, f64) {
    let n = graph.node_count();
    if n == 0 {
        return (Vec::new(), Convergence::Converged { iterations: 0 }, 0.0);
    }
    let alpha = config.damping;
    let uniform = 1.0 / n as f64;

    let mut teleport_vec = vec![0.0; n];
    match teleport {
        Teleport::Uniform => teleport_vec.fill(uniform),
        Teleport::Seeds(seeds) => {
            let share = 1.0 / seeds.len() as f64;
            for &s in seeds {
                teleport_vec[s] += share;
            }
        }
    }

    let mut scores = match teleport {
        Teleport::Uniform => vec![uniform; n],
        Teleport::Seeds(_) => teleport_vec.clone(),
    };
    let mut next = vec![0.0; n];
    let mut residual = f64::INFINITY;

    for iteration in 1..=config.max_iterations {
        next.fill(0.0);
        let mut dangling = 0.0;
        for u in 0..n {
            let degree = graph.out_degree(u);
            if degree == 0 {
                dangling += scores[u];
                continue;
            }
            let share = alpha * scores[u] / degree as f64;
            for &v in graph.outlinks(u) {
                next[v as usize] += share;
            }
        }
        let dangling_share = alpha * dangling * uniform;
        for (v, value) in next.iter_mut().enumerate() {
            *value += dangling_share + (1.0 - alpha) * teleport_vec[v];
        }

        residual = scores.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
        std::mem::swap(&mut scores, &mut next);
        if residual < config.tolerance {
            return (scores, Convergence::Converged { iterations: iteration }, residual);
        }
    }
    let iterations = config.max_iterations;
    (scores, Convergence::TimedOut { iterations, residual }, residual)
}

/// Global PageRank over the snapshot.
pub fn compute(graph: &GraphSnapshot, config: &PageRankConfig) -> (AuthorityTable, PageRankReport) {
    let start = Instant::now();
    let (scores, convergence, residual) = power_iterate(graph, config, Teleport::Uniform);
    let report = PageRankReport {
        convergence,
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        residual,
        elapsed: start.elapsed(),
        graph_version: graph.version(),
    };
    match convergence {
        Convergence::Converged { iterations } => {
            tracing::info!(nodes = report.nodes, edges = report.edges, iterations, residual, "pagerank converged");
        }
        Convergence::TimedOut { iterations, residual } => {
            tracing::warn!(
                nodes = report.nodes,
                edges = report.edges,
                iterations,
                residual,
                tolerance = config.tolerance,
                "pagerank hit iteration cap before converging; using best-so-far scores"
            );
        }
    }
    (AuthorityTable::from_scores(scores), report)
}

/// PageRank with teleportation restricted to `seeds`. Seeds outside the
/// graph are ignored; with no valid seed the result is empty.
pub fn personalized(graph: &GraphSnapshot, config: &PageRankConfig, seeds: &[DocId]) -> (Vec<f64>, Convergence) {
    let n = graph.node_count();
    let mut valid: Vec<usize> = seeds.iter().map(|&s| s as usize).filter(|&s| s < n).collect();
    valid.sort_unstable();
    valid.dedup();
    if valid.is_empty() {
        tracing::warn!(requested = seeds.len(), "no valid seeds for personalized pagerank");
        return (Vec::new(), Convergence::Converged { iterations: 0 });
    }
    let (scores, convergence, _) = power_iterate(graph, config, Teleport::Seeds(&valid));
    (scores, convergence)
}
