
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::documents::{normalize_locator, DocumentRegistry, DocumentStatus};
use crate::error::Result;
use crate::graph::{GraphStats, LinkGraph};
use crate::index::{IngestOutcome, PostingsStore};
use crate::pagerank::{self, AuthorityCell, AuthorityTable, Convergence, PageRankReport};
use crate::persist::{self, DocumentsFile, IndexImage, IndexStore, MetaFile};
use crate::query::{CancellationToken, QueryProcessor, QueryStatus};
use crate::scorer::Scorer;
use crate::tokenizer::{Tokenizer, Tokens};
use crate::DocId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub doc_id: DocId,
    pub outcome: IngestOutcome,
    /// Distinct outlink targets recorded for the document.
    pub outlinks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub locator: String,
    pub score: f64,
    pub snippet_hint: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub hits: Vec<SearchHit>,
    pub status: QueryStatus,
    pub total_candidates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub documents: u64,
    pub placeholders: usize,
    pub unique_terms: usize,
    pub total_postings: u64,
    pub average_document_length: f64,
    pub authority_generation: u64,
}

pub struct SearchEngine {
    config: EngineConfig,
    tokenizer: Tokenizer,
    documents: DocumentRegistry,
    postings: PostingsStore,
    graph: LinkGraph,
    authority: AuthorityCell,
    recompute_lock: Mutex<()>,
}

impl SearchEngine {
    /// Empty engine. Fails only on invalid configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let tokenizer = Tokenizer::new(&config.analysis);
        Ok(Self {
            config,
            tokenizer,
            documents: DocumentRegistry::new(),
            postings: PostingsStore::new(),
            graph: LinkGraph::new(),
            authority: AuthorityCell::default(),
            recompute_lock: Mutex::new(()),
        })
    }

    /// Loads a persisted index. The analysis settings in `config` must match
    /// the ones the index was built with for queries to match.
    pub fn open(config: EngineConfig, store: &dyn IndexStore) -> Result<Self> {
        config.validate()?;
        let image = persist::read_index(store)?;
        let indexed: Vec<DocId> = image
            .documents
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == DocumentStatus::Indexed)
            .map(|(id, _)| id as DocId)
            .collect();
        let node_count = image.documents.records.len();

        let graph = LinkGraph::from_adjacency(image.documents.outlinks);
        if node_count > 0 {
            graph.ensure_node((node_count - 1) as DocId);
        }
        let engine = Self {
            tokenizer: Tokenizer::new(&config.analysis),
            config,
            documents: DocumentRegistry::from_records(image.documents.records),
            postings: PostingsStore::from_parts(image.terms, &indexed),
            graph,
            authority: AuthorityCell::new(image.authority),
            recompute_lock: Mutex::new(()),
        };
        tracing::info!(
            documents = engine.postings.total_documents(),
            terms = engine.postings.term_count(),
            nodes = engine.graph.node_count(),
            "engine opened"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn documents(&self) -> &DocumentRegistry {
        &self.documents
    }

    pub fn postings(&self) -> &PostingsStore {
        &self.postings
    }

    pub fn graph(&self) -> &LinkGraph {
        &self.graph
    }

    /// The authority table queries are currently scored against.
    pub fn authority_table(&self) -> Arc<AuthorityTable> {
        self.authority.load()
    }

    /// Indexes a fetched document and records its outlinks.
    ///
    /// Outlinks that were never submitted become placeholder documents so the
    /// link graph can point at them. Resubmitting a locator replaces its
    /// content and outlinks; of two racing submissions for one locator the one
    /// that called in last wins.
    pub fn submit_document<S: AsRef<str>>(&self, locator: &str, raw_text: &str, outlinks: &[S]) -> SubmitReceipt {
        self.submit_tokens(locator, self.tokenizer.tokens(raw_text), outlinks)
    }

    /// Like [`submit_document`](Self::submit_document) for bytes of unknown
    /// encoding; invalid UTF-8 is replaced rather than rejected.
    pub fn submit_document_bytes<S: AsRef<str>>(&self, locator: &str, raw: &[u8], outlinks: &[S]) -> SubmitReceipt {
        self.submit_tokens(locator, self.tokenizer.tokens_from_bytes(raw), outlinks)
    }

    fn submit_tokens<S: AsRef<str>>(&self, locator: &str, tokens: Tokens<'_>, outlinks: &[S]) -> SubmitReceipt {
        let sequence = self.postings.next_sequence();
        let doc_id = self.resolve_node(&normalize_locator(locator));

        let mut targets: Vec<DocId> = outlinks
            .iter()
            .map(|l| normalize_locator(l.as_ref()))
            .filter(|l| !l.is_empty())
            .map(|l| self.resolve_node(&l))
            .collect();
        targets.sort_unstable();
        targets.dedup();
        let outlink_count = targets.len();

        let outcome = self.postings.ingest_at(doc_id, tokens, sequence, || {
            self.graph.set_outlinks(doc_id, targets);
            self.documents.mark_indexed(doc_id);
        });
        SubmitReceipt { doc_id, outcome, outlinks: outlink_count }
    }

    fn resolve_node(&self, locator: &str) -> DocId {
        let id = self.documents.resolve(locator);
        self.graph.ensure_node(id);
        id
    }

    /// Runs a query against the current index and authority snapshot. `k` is
    /// clamped to the configured maximum.
    pub fn query(&self, text: &str, k: usize, cancel: &CancellationToken) -> QueryResponse {
        let k = k.min(self.config.query.max_k);
        let processor =
            QueryProcessor::new(&self.postings, &self.tokenizer, self.scorer()).with_documents(&self.documents);
        let outcome = processor.execute(text, k, cancel);
        let hits = outcome
            .hits
            .into_iter()
            .map(|h| SearchHit {
                doc_id: h.doc_id,
                locator: self.documents.locator(h.doc_id).unwrap_or_default(),
                score: h.score,
                snippet_hint: h.snippet_hint,
            })
            .collect();
        QueryResponse { hits, status: outcome.status, total_candidates: outcome.candidates }
    }

    /// [`query`](Self::query) with the configured default `k` and no
    /// cancellation.
    pub fn search(&self, text: &str) -> QueryResponse {
        self.query(text, self.config.query.default_k, &CancellationToken::new())
    }

    fn scorer(&self) -> Scorer {
        Scorer::new(self.config.scoring.clone(), self.authority.load(), self.postings.total_documents())
    }

    /// `score(term, document)` for a single analyzed term. Zero when the term
    /// is a stop word, unseen, or absent from the document.
    pub fn score_term(&self, term: &str, doc_id: DocId) -> f64 {
        let Some((analyzed, _)) = self.tokenizer.tokens(term).next() else {
            return 0.0;
        };
        let list = self.postings.lookup(&analyzed);
        match list.get(doc_id) {
            Some(posting) => {
                let length = self.postings.document_length(doc_id).unwrap_or(0);
                self.scorer().score(posting, length, list.len() as u32)
            }
            None => 0.0,
        }
    }

    /// Recomputes PageRank over a snapshot of the current graph and swaps the
    /// result in. Concurrent calls run one after the other; queries keep
    /// using the previous table until the swap.
    pub fn recompute_authority(&self) -> PageRankReport {
        let _guard = self.recompute_lock.lock();
        let snapshot = self.graph.snapshot();
        let (table, report) = pagerank::compute(&snapshot, &self.config.pagerank);
        let generation = self.authority.store(table);
        tracing::info!(generation, graph_version = report.graph_version, elapsed = ?report.elapsed, "authority table swapped");
        report
    }

    pub fn recompute_authority_in_background(self: &Arc<Self>) -> Result<JoinHandle<PageRankReport>> {
        let engine = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("authority-recompute".into())
            .spawn(move || engine.recompute_authority())?;
        Ok(handle)
    }

    /// Starts a thread that recomputes authority every `interval` while the
    /// link graph keeps changing. It stops when the returned handle is
    /// stopped or dropped, or when the engine is gone.
    pub fn start_authority_refresher(self: &Arc<Self>, interval: Duration) -> Result<AuthorityRefresher> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let engine: Weak<Self> = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name("authority-refresher".into())
            .spawn(move || {
                let mut last_version: Option<u64> = None;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(engine) = engine.upgrade() else {
                        break;
                    };
                    let version = engine.graph.version();
                    if last_version == Some(version) {
                        continue;
                    }
                    let report = engine.recompute_authority();
                    last_version = Some(report.graph_version);
                }
                tracing::debug!("authority refresher stopped");
            })?;
        Ok(AuthorityRefresher { stop: Some(stop_tx), handle: Some(handle) })
    }

    /// Current authority for a locator; `None` for unknown locators, the
    /// table minimum for documents not ranked yet.
    pub fn authority(&self, locator: &str) -> Option<f64> {
        let id = self.documents.lookup(&normalize_locator(locator))?;
        Some(self.authority.load().score_or_min(id))
    }

    pub fn top_authorities(&self, n: usize) -> Vec<(String, f64)> {
        self.authority
            .load()
            .top(n)
            .into_iter()
            .filter_map(|(id, score)| self.documents.locator(id).map(|l| (l, score)))
            .collect()
    }

    /// PageRank with random jumps restricted to `seeds`, best `n` first.
    /// Unknown seeds are ignored; no known seed gives an empty result. The
    /// shared authority table is left untouched.
    pub fn personalized_authority<S: AsRef<str>>(&self, seeds: &[S], n: usize) -> (Vec<(String, f64)>, Convergence) {
        let seed_ids: Vec<DocId> = seeds
            .iter()
            .filter_map(|s| self.documents.lookup(&normalize_locator(s.as_ref())))
            .collect();
        let snapshot = self.graph.snapshot();
        let (scores, convergence) = pagerank::personalized(&snapshot, &self.config.pagerank, &seed_ids);
        let ranked = AuthorityTable::from_scores(scores)
            .top(n)
            .into_iter()
            .filter_map(|(id, score)| self.documents.locator(id).map(|l| (l, score)))
            .collect();
        (ranked, convergence)
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            documents: self.postings.total_documents(),
            placeholders: self.documents.placeholder_count(),
            unique_terms: self.postings.term_count(),
            total_postings: self.postings.total_postings(),
            average_document_length: self.postings.average_document_length(),
            authority_generation: self.authority.generation(),
        }
    }

    pub fn graph_stats(&self) -> GraphStats {
        self.graph.snapshot().stats()
    }

    /// Writes the whole index to `store`. Ingests running concurrently may or
    /// may not be included. Postings are exported while no ingest is touching
    /// term lists, so each document is written with one complete version of
    /// its content; its outlinks may belong to an adjacent version.
    pub fn save(&self, store: &dyn IndexStore) -> Result<()> {
        // Read order matters: every ID referenced by postings or the graph
        // must already be in the registry copy.
        let terms: Vec<(String, _)> = self
            .postings
            .export_terms()
            .into_iter()
            .map(|(term, list)| (term, Arc::unwrap_or_clone(list)))
            .collect();
        let outlinks = self.graph.adjacency();
        let records = self.documents.records();
        let meta = MetaFile::new(self.postings.total_documents(), terms.len() as u64);
        let image = IndexImage {
            meta,
            terms,
            authority: (*self.authority.load()).clone(),
            documents: DocumentsFile { records, outlinks },
        };
        persist::write_index(store, &image)
    }

    /// Persists the index and consumes the engine.
    pub fn shutdown(self, store: &dyn IndexStore) -> Result<()> {
        self.save(store)?;
        tracing::info!(documents = self.postings.total_documents(), "engine shut down");
        Ok(())
    }
}

/// Handle to the periodic authority refresher thread.
pub struct AuthorityRefresher {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AuthorityRefresher {
    /// Signals the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("authority refresher panicked");
            }
        }
    }
}

impl Drop for AuthorityRefresher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;

    const NONE: &[&str] = &[];

    fn engine() -> SearchEngine {
        SearchEngine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.pagerank.damping = 1.5;
        assert!(SearchEngine::new(config).is_err());
    }

    #[test]
    fn outlinks_create_placeholders() {
        let e = engine();
        let receipt = e.submit_document("https://a.example/", "alpha", &["https://b.example/", "https://b.example/#x"]);
        assert_eq!(receipt.outlinks, 1);
        let b = e.documents().lookup("https://b.example/").unwrap();
        assert_eq!(e.documents().status(b), Some(DocumentStatus::Placeholder));
        assert_eq!(e.stats().documents, 1);
        assert_eq!(e.stats().placeholders, 1);

        e.submit_document("https://b.example", "beta", NONE);
        assert_eq!(e.documents().status(b), Some(DocumentStatus::Indexed));
        assert_eq!(e.stats().placeholders, 0);
    }

    #[test]
    fn resubmission_replaces_outlinks() {
        let e = engine();
        e.submit_document("a", "text", &["b", "c"]);
        e.submit_document("a", "text", &["c"]);
        let a = e.documents().lookup("a").unwrap();
        let c = e.documents().lookup("c").unwrap();
        assert_eq!(e.graph().outlinks(a), vec![c]);
    }

    #[test]
    fn query_resolves_locators_and_clamps_k() {
        let mut config = EngineConfig::default();
        config.query.max_k = 1;
        config.query.default_k = 1;
        let e = SearchEngine::new(config).unwrap();
        e.submit_document("doc-1", "rust search engine", NONE);
        e.submit_document("doc-2", "rust compiler", NONE);
        let response = e.query("rust", 10, &CancellationToken::new());
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.total_candidates, 2);
        assert_eq!(response.hits[0].locator, "doc-1");
    }

    #[test]
    fn authority_is_swapped_after_recompute() {
        let e = engine();
        e.submit_document("a", "x", &["b"]);
        e.submit_document("b", "y", NONE);
        assert_eq!(e.authority("a"), Some(0.0));
        let report = e.recompute_authority();
        assert!(report.convergence.converged());
        assert!(e.authority("b").unwrap() > e.authority("a").unwrap());
        assert_eq!(e.top_authorities(1)[0].0, "b");
        assert_eq!(e.authority("missing"), None);
        assert_eq!(e.stats().authority_generation, 1);
    }

    #[test]
    fn personalized_ignores_unknown_seeds() {
        let e = engine();
        e.submit_document("a", "x", &["b"]);
        e.submit_document("c", "z", &["d"]);
        let (ranked, _) = e.personalized_authority(&["a", "nowhere"], 10);
        let top: Vec<&str> = ranked.iter().take(2).map(|(l, _)| l.as_str()).collect();
        assert!(top.contains(&"a") && top.contains(&"b"));
        let (empty, _) = e.personalized_authority(&["nowhere"], 10);
        assert!(empty.is_empty());
    }

    #[test]
    fn background_recompute_and_refresher() {
        let e = Arc::new(engine());
        e.submit_document("a", "x", &["b"]);
        let report = e.recompute_authority_in_background().unwrap().join().unwrap();
        assert_eq!(report.nodes, 2);

        let refresher = e.start_authority_refresher(Duration::from_millis(5)).unwrap();
        e.submit_document("b", "y", &["a"]);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while e.stats().authority_generation < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        refresher.stop();
        assert!(e.stats().authority_generation >= 2);
    }

    #[test]
    fn save_and_open_round_trip() {
        let e = engine();
        e.submit_document("a", "cat dog cat", &["b"]);
        e.submit_document("b", "dog dog fish", NONE);
        e.submit_document("c", "the and of", &["z"]);
        e.recompute_authority();
        let before = e.search("dog");

        let store = MemoryStore::new();
        e.shutdown(&store).unwrap();
        let reopened = SearchEngine::open(EngineConfig::default(), &store).unwrap();
        assert_eq!(reopened.search("dog").hits, before.hits);
        assert_eq!(reopened.stats().documents, 3);
        assert_eq!(reopened.stats().placeholders, 1);
        assert_eq!(reopened.graph().node_count(), 4);
    }

    #[test]
    fn score_term_analyzes_its_input() {
        let e = engine();
        let r = e.submit_document("a", "running cats", NONE);
        e.submit_document("b", "other words", NONE);
        assert!(e.score_term("Cats", r.doc_id) > 0.0);
        assert_eq!(e.score_term("the", r.doc_id), 0.0);
        assert_eq!(e.score_term("zebra", r.doc_id), 0.0);
    }
}
