use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::documents::DocumentRegistry;
use crate::index::PostingsStore;
use crate::postings::{difference, intersect, union, Posting, PostingsList};
use crate::query::ast::{PhraseTerm, Query};
use crate::query::topk::TopK;
use crate::query::{parser, CancellationToken, QueryStatus, Stage};
use crate::scorer::Scorer;
use crate::tokenizer::Tokenizer;
use crate::DocId;

/// How many candidates are scored between two cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 256;

type Lists = HashMap<String, Arc<PostingsList>>;
type SiteCheck<'f> = &'f dyn Fn(DocId, &str) -> bool;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f64,
    /// Positions of the first query term found in the document.
    pub snippet_hint: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    /// Descending by score, ties by ascending doc ID.
    pub hits: Vec<ScoredDoc>,
    pub status: QueryStatus,
    /// Documents that survived merge/filter.
    pub candidates: usize,
}

impl QueryOutcome {
    fn empty(status: QueryStatus) -> Self {
        Self { hits: Vec::new(), status, candidates: 0 }
    }
}

/// Runs one query against a postings store with a fixed scorer.
pub struct QueryProcessor<'a> {
    store: &'a PostingsStore,
    tokenizer: &'a Tokenizer,
    scorer: Scorer,
    documents: Option<&'a DocumentRegistry>,
}

impl<'a> QueryProcessor<'a> {
    pub fn new(store: &'a PostingsStore, tokenizer: &'a Tokenizer, scorer: Scorer) -> Self {
        Self { store, tokenizer, scorer, documents: None }
    }

    /// Registry used to resolve `site:` filters. Without one they match
    /// nothing.
    pub fn with_documents(mut self, documents: &'a DocumentRegistry) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn execute(&self, text: &str, k: usize, cancel: &CancellationToken) -> QueryOutcome {
        if cancel.is_cancelled() {
            return QueryOutcome::empty(QueryStatus::Cancelled { stage: Stage::Parse });
        }
        let query = match parser::parse(text, self.tokenizer) {
            Some(q) if k > 0 => q,
            _ => return QueryOutcome::empty(QueryStatus::Complete),
        };
        self.run(&query, k, cancel)
    }

    /// Evaluates an already-parsed query.
    pub fn run(&self, query: &Query, k: usize, cancel: &CancellationToken) -> QueryOutcome {
        let lists: Lists = query
            .terms()
            .into_iter()
            .map(|t| {
                let list = self.store.lookup(&t);
                (t, list)
            })
            .collect();
        if cancel.is_cancelled() {
            return QueryOutcome::empty(QueryStatus::Cancelled { stage: Stage::Retrieve });
        }

        let on_site = |doc_id: DocId, site: &str| self.documents.is_some_and(|d| d.is_on_site(doc_id, site));
        let candidates = evaluate(query, &lists, &on_site);
        if cancel.is_cancelled() {
            return QueryOutcome::empty(QueryStatus::Cancelled { stage: Stage::Merge });
        }

        let positive: Vec<&Arc<PostingsList>> = query
            .positive_terms()
            .iter()
            .filter_map(|t| lists.get(t))
            .collect();
        let outcome = self.score_candidates(&candidates, &positive, k, cancel);
        tracing::debug!(candidates = candidates.len(), status = ?outcome.status, "query evaluated");
        outcome
    }

    /// Scores `candidates` into the top `k`. The token is checked every
    /// [`CANCEL_CHECK_INTERVAL`] candidates; on cancellation the documents
    /// ranked so far are returned.
    fn score_candidates(
        &self,
        candidates: &[DocId],
        positive: &[&Arc<PostingsList>],
        k: usize,
        cancel: &CancellationToken,
    ) -> QueryOutcome {
        let mut top = TopK::new(k);
        let mut status = QueryStatus::Complete;
        for (i, &doc_id) in candidates.iter().enumerate() {
            if i > 0 && i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                status = QueryStatus::Cancelled { stage: Stage::Score };
                break;
            }
            top.push(doc_id, self.score_document(doc_id, positive));
        }
        let hits = top
            .into_sorted_vec()
            .into_iter()
            .map(|(doc_id, score)| ScoredDoc { doc_id, score, snippet_hint: snippet_hint(doc_id, positive) })
            .collect();
        QueryOutcome { hits, status, candidates: candidates.len() }
    }

    fn score_document(&self, doc_id: DocId, positive: &[&Arc<PostingsList>]) -> f64 {
        let length = self.store.document_length(doc_id).unwrap_or(0);
        positive
            .iter()
            .filter_map(|list| list.get(doc_id).map(|p| (p, list.len() as u32)))
            .map(|(posting, df)| self.scorer.score(posting, length, df))
            .sum()
    }
}

fn snippet_hint(doc_id: DocId, positive: &[&Arc<PostingsList>]) -> Vec<u32> {
    positive
        .iter()
        .find_map(|list| list.get(doc_id))
        .map(|p| p.positions.clone())
        .unwrap_or_default()
}

fn doc_ids(term: &str, lists: &Lists) -> Vec<DocId> {
    lists.get(term).map(|l| l.doc_ids().collect()).unwrap_or_default()
}

fn is_filter(query: &Query) -> bool {
    matches!(query, Query::Not(_) | Query::Site(_))
}

/// Candidate document IDs, ascending. Negations and `site:` only narrow what
/// their siblings match: on their own they match nothing.
pub(crate) fn evaluate(query: &Query, lists: &Lists, on_site: SiteCheck<'_>) -> Vec<DocId> {
    match query {
        Query::Term(t) => doc_ids(t, lists),
        Query::Phrase(terms) => phrase_matches(terms, lists),
        Query::And(children) => {
            let (filters, required): (Vec<&Query>, Vec<&Query>) = children.iter().partition(|c| is_filter(c));
            let mut required = required.into_iter();
            let Some(first) = required.next() else {
                return Vec::new();
            };
            let mut acc = evaluate(first, lists, on_site);
            for child in required {
                if acc.is_empty() {
                    return acc;
                }
                acc = intersect(&acc, &evaluate(child, lists, on_site));
            }
            for filter in filters {
                match filter {
                    Query::Site(site) => acc.retain(|&d| on_site(d, site.as_str())),
                    Query::Not(inner) => match inner.as_ref() {
                        Query::Site(site) => acc.retain(|&d| !on_site(d, site.as_str())),
                        inner => acc = difference(&acc, &evaluate(inner, lists, on_site)),
                    },
                    _ => {}
                }
            }
            acc
        }
        Query::Or(children) => children
            .iter()
            .fold(Vec::new(), |acc, child| union(&acc, &evaluate(child, lists, on_site))),
        Query::Not(_) | Query::Site(_) => Vec::new(),
    }
}

fn phrase_matches(terms: &[PhraseTerm], lists: &Lists) -> Vec<DocId> {
    let Some((first, rest)) = terms.split_first() else {
        return Vec::new();
    };
    let mut docs = doc_ids(&first.term, lists);
    for pt in rest {
        if docs.is_empty() {
            break;
        }
        docs = intersect(&docs, &doc_ids(&pt.term, lists));
    }
    docs.retain(|&doc_id| phrase_in_document(doc_id, terms, lists));
    docs
}

fn phrase_in_document(doc_id: DocId, terms: &[PhraseTerm], lists: &Lists) -> bool {
    let postings: Option<Vec<&Posting>> = terms
        .iter()
        .map(|pt| lists.get(&pt.term).and_then(|l| l.get(doc_id)))
        .collect();
    let Some(postings) = postings else {
        return false;
    };
    let base = terms[0].offset;
    postings[0].positions.iter().any(|&start| {
        terms.iter().zip(&postings).skip(1).all(|(pt, posting)| {
            start
                .checked_add(pt.offset - base)
                .is_some_and(|pos| posting.has_position(pos))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::pagerank::AuthorityTable;

    fn store_with(docs: &[&str]) -> (PostingsStore, Tokenizer) {
        let tokenizer = Tokenizer::default();
        let store = PostingsStore::new();
        for (id, text) in docs.iter().enumerate() {
            store.ingest(id as DocId, tokenizer.tokens(text));
        }
        (store, tokenizer)
    }

    fn run(store: &PostingsStore, tokenizer: &Tokenizer, q: &str, k: usize) -> QueryOutcome {
        let scorer = Scorer::new(ScoringConfig::default(), Arc::new(AuthorityTable::empty()), store.total_documents());
        QueryProcessor::new(store, tokenizer, scorer).execute(q, k, &CancellationToken::new())
    }

    fn ids(outcome: &QueryOutcome) -> Vec<DocId> {
        let mut ids: Vec<DocId> = outcome.hits.iter().map(|h| h.doc_id).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn phrase_requires_adjacent_positions() {
        let (store, tok) = store_with(&["hello world", "hello big world", "world hello", "unrelated"]);
        let outcome = run(&store, &tok, "\"hello world\"", 10);
        assert_eq!(ids(&outcome), vec![0]);
    }

    #[test]
    fn boolean_operators() {
        let (store, tok) = store_with(&["cat dog", "cat fish", "dog fish", "bird"]);
        assert_eq!(ids(&run(&store, &tok, "cat dog", 10)), vec![0]);
        assert_eq!(ids(&run(&store, &tok, "cat OR bird", 10)), vec![0, 1, 3]);
        assert_eq!(ids(&run(&store, &tok, "fish -cat", 10)), vec![2]);
        assert_eq!(ids(&run(&store, &tok, "(cat OR dog) NOT fish", 10)), vec![0]);
        assert!(run(&store, &tok, "-cat", 10).hits.is_empty());
    }

    #[test]
    fn unknown_and_empty_queries_are_empty_not_errors() {
        let (store, tok) = store_with(&["cat dog"]);
        let outcome = run(&store, &tok, "zebra", 10);
        assert!(outcome.hits.is_empty());
        assert_eq!(outcome.status, QueryStatus::Complete);
        assert!(run(&store, &tok, "", 10).hits.is_empty());
        assert!(run(&store, &tok, "cat", 0).hits.is_empty());
    }

    #[test]
    fn snippet_hint_points_at_first_query_term() {
        let (store, tok) = store_with(&["alpha beta gamma beta"]);
        let outcome = run(&store, &tok, "beta gamma", 10);
        assert_eq!(outcome.hits[0].snippet_hint, vec![1, 3]);
    }

    #[test]
    fn lowercase_operators() {
        let (store, tok) = store_with(&["cat dog", "bird song"]);
        assert_eq!(ids(&run(&store, &tok, "cat or bird", 10)), vec![0, 1]);
        assert!(run(&store, &tok, "cat not dog", 10).hits.is_empty());
        assert_eq!(ids(&run(&store, &tok, "song and bird", 10)), vec![1]);
    }

    #[test]
    fn site_filter_restricts_hosts() {
        let (store, tok) = store_with(&["cat one", "cat two", "cat three"]);
        let registry = DocumentRegistry::new();
        for locator in ["https://a.example/x", "https://b.example/y", "https://blog.a.example/z"] {
            registry.resolve(locator);
        }
        let scorer = Scorer::new(ScoringConfig::default(), Arc::new(AuthorityTable::empty()), 3);
        let processor = QueryProcessor::new(&store, &tok, scorer).with_documents(&registry);
        let query = |q: &str| {
            let mut ids: Vec<DocId> =
                processor.execute(q, 10, &CancellationToken::new()).hits.iter().map(|h| h.doc_id).collect();
            ids.sort_unstable();
            ids
        };
        assert_eq!(query("cat site:a.example"), vec![0, 2]);
        assert_eq!(query("cat -site:a.example"), vec![1]);
        assert_eq!(query("site:a.example"), Vec::<DocId>::new());

        let scorer = Scorer::new(ScoringConfig::default(), Arc::new(AuthorityTable::empty()), 3);
        let unresolved = QueryProcessor::new(&store, &tok, scorer);
        assert!(unresolved.execute("cat site:a.example", 10, &CancellationToken::new()).hits.is_empty());
    }

    #[test]
    fn cancelling_while_scoring_keeps_partial_top_k() {
        let texts = vec!["needle hay"; 600];
        let (store, tok) = store_with(&texts);
        let scorer = Scorer::new(ScoringConfig::default(), Arc::new(AuthorityTable::empty()), 600);
        let processor = QueryProcessor::new(&store, &tok, scorer);
        let needle = store.lookup(&tok.tokenize("needle")[0].0);
        let candidates: Vec<DocId> = needle.doc_ids().collect();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = processor.score_candidates(&candidates, &[&needle], 10, &cancel);
        assert_eq!(outcome.status, QueryStatus::Cancelled { stage: Stage::Score });
        assert_eq!(outcome.candidates, 600);
        assert_eq!(outcome.hits.len(), 10);
        assert!(outcome.hits.iter().all(|h| (h.doc_id as usize) < CANCEL_CHECK_INTERVAL));
    }

    #[test]
    fn query_is_not_held_up_by_an_open_ingest() {
        use std::sync::mpsc;
        use std::time::{Duration, Instant};

        let tok = Tokenizer::default();
        let store = Arc::new(PostingsStore::new());
        store.ingest(0, tok.tokens("cat dog"));
        let (started, wait) = mpsc::channel();
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let tok = Tokenizer::default();
                let seq = store.next_sequence();
                store.ingest_at(0, tok.tokens("cat dog zebra"), seq, || {
                    started.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(1500));
                })
            })
        };
        wait.recv().unwrap();
        let t = Instant::now();
        let outcome = run(&store, &tok, "cat", 10);
        assert!(t.elapsed() < Duration::from_millis(500), "query waited {:?}", t.elapsed());
        assert_eq!(outcome.hits.len(), 1);
        writer.join().unwrap();
    }

    #[test]
    fn cancelled_before_start_returns_nothing() {
        let (store, tok) = store_with(&["cat"]);
        let scorer = Scorer::new(ScoringConfig::default(), Arc::new(AuthorityTable::empty()), 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = QueryProcessor::new(&store, &tok, scorer).execute("cat", 5, &cancel);
        assert_eq!(outcome.status, QueryStatus::Cancelled { stage: Stage::Parse });
        assert!(outcome.hits.is_empty());
    }
}
