//! Concurrent inverted index. Each term's list sits behind its own
//! `RwLock<Arc<PostingsList>>` and is written copy-on-write, so readers keep
//! whole snapshots. Each document has a mutex held for its whole ingest; the
//! submission sequence decides which of two racing ingests wins. Readers
//! never take that mutex: lengths are published to a separate table.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::postings::{Posting, PostingsList};
use crate::{DocId, TermId};

struct TermSlot {
    term: String,
    list: RwLock<Arc<PostingsList>>,
}

#[derive(Default)]
struct DocState {
    /// Sequence of the ingest currently applied; 0 when loaded from disk.
    sequence: u64,
    indexed: bool,
    length: u32,
    terms: Vec<TermId>,
}

/// Result of one ingest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Applied { terms: usize, replaced: bool },
    /// A newer submission for the same document was already applied.
    Superseded { applied_sequence: u64 },
}

impl IngestOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, IngestOutcome::Applied { .. })
    }
}

pub struct PostingsStore {
    dictionary: RwLock<HashMap<String, TermId>>,
    terms: RwLock<Vec<Arc<TermSlot>>>,
    docs: RwLock<HashMap<DocId, Arc<Mutex<DocState>>>>,
    /// Length of every indexed document, for readers.
    lengths: RwLock<HashMap<DocId, u32>>,
    /// Shared by ingests while they touch term lists, exclusive for exports.
    apply_gate: RwLock<()>,
    indexed_docs: AtomicU64,
    total_length: AtomicU64,
    total_postings: AtomicU64,
    next_sequence: AtomicU64,
}

impl Default for PostingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PostingsStore {
    pub fn new() -> Self {
        Self {
            dictionary: RwLock::new(HashMap::new()),
            terms: RwLock::new(Vec::new()),
            docs: RwLock::new(HashMap::new()),
            lengths: RwLock::new(HashMap::new()),
            apply_gate: RwLock::new(()),
            indexed_docs: AtomicU64::new(0),
            total_length: AtomicU64::new(0),
            total_postings: AtomicU64::new(0),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Reserves the next submission sequence number. Later numbers win.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Indexes `tokens` as the full content of `doc_id`, replacing any
    /// previous content. Re-ingesting identical tokens leaves the index
    /// unchanged.
    pub fn ingest<I>(&self, doc_id: DocId, tokens: I) -> IngestOutcome
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        let sequence = self.next_sequence();
        self.ingest_at(doc_id, tokens, sequence, || {})
    }

    /// Ingest with an explicit submission sequence. `on_applied` runs while the
    /// document lock is still held, so side effects tied to the same document
    /// (its outlinks, for instance) are ordered exactly like the postings.
    pub fn ingest_at<I, F>(&self, doc_id: DocId, tokens: I, sequence: u64, on_applied: F) -> IngestOutcome
    where
        I: IntoIterator<Item = (String, u32)>,
        F: FnOnce(),
    {
        let mut grouped: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        let mut length = 0u32;
        for (term, pos) in tokens {
            grouped.entry(term).or_default().push(pos);
            length += 1;
        }

        let slot = self.doc_slot(doc_id);
        let mut state = slot.lock();
        if state.indexed && sequence < state.sequence {
            tracing::debug!(doc_id, sequence, applied = state.sequence, "stale ingest superseded");
            return IngestOutcome::Superseded { applied_sequence: state.sequence };
        }
        let applying = self.apply_gate.read();

        let mut new_terms: Vec<TermId> = Vec::with_capacity(grouped.len());
        for (term, positions) in grouped {
            let (term_id, term_slot) = self.term_slot_or_insert(term);
            new_terms.push(term_id);
            let mut guard = term_slot.list.write();
            Arc::make_mut(&mut *guard).upsert(Posting::new(doc_id, positions));
        }
        new_terms.sort_unstable();

        let stale: Vec<TermId> = state
            .terms
            .iter()
            .copied()
            .filter(|t| new_terms.binary_search(t).is_err())
            .collect();
        if !stale.is_empty() {
            let terms = self.terms.read();
            for term_id in &stale {
                if let Some(term_slot) = terms.get(*term_id as usize) {
                    let mut guard = term_slot.list.write();
                    Arc::make_mut(&mut *guard).remove(doc_id);
                }
            }
        }

        let replaced = state.indexed;
        if replaced {
            self.total_length.fetch_sub(state.length as u64, Ordering::SeqCst);
            self.total_postings.fetch_sub(state.terms.len() as u64, Ordering::SeqCst);
        } else {
            self.indexed_docs.fetch_add(1, Ordering::SeqCst);
        }
        self.total_length.fetch_add(length as u64, Ordering::SeqCst);
        self.total_postings.fetch_add(new_terms.len() as u64, Ordering::SeqCst);

        let term_count = new_terms.len();
        *state = DocState { sequence, indexed: true, length, terms: new_terms };
        self.lengths.write().insert(doc_id, length);
        drop(applying);
        on_applied();
        drop(state);

        tracing::debug!(doc_id, sequence, terms = term_count, length, replaced, "ingested document");
        IngestOutcome::Applied { terms: term_count, replaced }
    }

    /// Snapshot of the postings list for `term`; empty for unseen terms.
    pub fn lookup(&self, term: &str) -> Arc<PostingsList> {
        match self.slot_for(term) {
            Some(slot) => slot.list.read().clone(),
            None => Arc::new(PostingsList::new()),
        }
    }

    pub fn term_id(&self, term: &str) -> Option<TermId> {
        self.dictionary.read().get(term).copied()
    }

    pub fn document_frequency(&self, term: &str) -> u32 {
        self.slot_for(term).map(|s| s.list.read().len() as u32).unwrap_or(0)
    }

    /// Number of documents with indexed content (placeholders excluded).
    pub fn total_documents(&self) -> u64 {
        self.indexed_docs.load(Ordering::SeqCst)
    }

    pub fn average_document_length(&self) -> f64 {
        let docs = self.total_documents();
        if docs == 0 {
            return 0.0;
        }
        self.total_length.load(Ordering::SeqCst) as f64 / docs as f64
    }

    pub fn document_length(&self, doc_id: DocId) -> Option<u32> {
        self.lengths.read().get(&doc_id).copied()
    }

    pub fn is_indexed(&self, doc_id: DocId) -> bool {
        self.document_length(doc_id).is_some()
    }

    pub fn term_count(&self) -> usize {
        self.terms.read().len()
    }

    pub fn total_postings(&self) -> u64 {
        self.total_postings.load(Ordering::SeqCst)
    }

    /// Every term with a snapshot of its list, in term-ID order. Waits for
    /// in-flight ingests so no document is exported half-replaced.
    pub fn export_terms(&self) -> Vec<(String, Arc<PostingsList>)> {
        let _quiesced = self.apply_gate.write();
        self.terms
            .read()
            .iter()
            .map(|slot| (slot.term.clone(), slot.list.read().clone()))
            .collect()
    }

    /// IDs of documents with indexed content, ascending.
    pub fn indexed_documents(&self) -> Vec<DocId> {
        let mut ids: Vec<DocId> = self.lengths.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Rebuilds a store from persisted parts. `terms` is in term-ID order;
    /// per-document lengths and term sets are recovered from the postings.
    pub fn from_parts(terms: Vec<(String, PostingsList)>, indexed_docs: &[DocId]) -> Self {
        let store = Self::new();
        let mut doc_states: HashMap<DocId, DocState> = indexed_docs
            .iter()
            .map(|&id| (id, DocState { indexed: true, ..DocState::default() }))
            .collect();
        let mut total_postings = 0u64;
        {
            let mut dictionary = store.dictionary.write();
            let mut slots = store.terms.write();
            for (term_id, (term, list)) in terms.into_iter().enumerate() {
                let term_id = term_id as TermId;
                for posting in list.iter() {
                    let state = doc_states
                        .entry(posting.doc_id)
                        .or_insert_with(|| DocState { indexed: true, ..DocState::default() });
                    state.length += posting.term_frequency();
                    state.terms.push(term_id);
                }
                total_postings += list.len() as u64;
                dictionary.insert(term.clone(), term_id);
                slots.push(Arc::new(TermSlot { term, list: RwLock::new(Arc::new(list)) }));
            }
        }
        let total_length: u64 = doc_states.values().map(|s| s.length as u64).sum();
        store.indexed_docs.store(doc_states.len() as u64, Ordering::SeqCst);
        store.total_length.store(total_length, Ordering::SeqCst);
        store.total_postings.store(total_postings, Ordering::SeqCst);
        *store.lengths.write() = doc_states.iter().map(|(id, state)| (*id, state.length)).collect();
        *store.docs.write() = doc_states
            .into_iter()
            .map(|(id, state)| (id, Arc::new(Mutex::new(state))))
            .collect();
        store
    }

    fn slot_for(&self, term: &str) -> Option<Arc<TermSlot>> {
        let term_id = self.term_id(term)?;
        self.terms.read().get(term_id as usize).cloned()
    }

    fn term_slot_or_insert(&self, term: String) -> (TermId, Arc<TermSlot>) {
        if let Some(term_id) = self.term_id(&term) {
            if let Some(slot) = self.terms.read().get(term_id as usize) {
                return (term_id, slot.clone());
            }
        }
        let mut dictionary = self.dictionary.write();
        if let Some(&term_id) = dictionary.get(&term) {
            let slot = self.terms.read()[term_id as usize].clone();
            return (term_id, slot);
        }
        let mut terms = self.terms.write();
        let term_id = terms.len() as TermId;
        let slot = Arc::new(TermSlot { term: term.clone(), list: RwLock::new(Arc::new(PostingsList::new())) });
        terms.push(slot.clone());
        dictionary.insert(term, term_id);
        (term_id, slot)
    }

    fn doc_slot(&self, doc_id: DocId) -> Arc<Mutex<DocState>> {
        if let Some(slot) = self.docs.read().get(&doc_id) {
            return slot.clone();
        }
        self.docs.write().entry(doc_id).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    #[test]
    fn ingest_builds_postings_and_stats() {
        let store = PostingsStore::new();
        store.ingest(0, tokenize("cat dog cat"));
        store.ingest(1, tokenize("dog dog fish"));

        let cat = store.lookup("cat");
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.get(0).unwrap().positions, vec![0, 2]);
        assert_eq!(store.document_frequency("dog"), 2);
        assert_eq!(store.document_frequency("unicorn"), 0);
        assert_eq!(store.total_documents(), 2);
        assert_eq!(store.average_document_length(), 3.0);
        assert_eq!(store.total_postings(), 4);
    }

    #[test]
    fn reingest_overwrites_instead_of_appending() {
        let store = PostingsStore::new();
        store.ingest(7, tokenize("alpha beta"));
        let outcome = store.ingest(7, tokenize("beta gamma gamma"));
        assert_eq!(outcome, IngestOutcome::Applied { terms: 2, replaced: true });

        assert!(store.lookup("alpha").is_empty());
        assert_eq!(store.lookup("beta").get(7).unwrap().positions, vec![0]);
        assert_eq!(store.lookup("gamma").get(7).unwrap().term_frequency(), 2);
        assert_eq!(store.total_documents(), 1);
        assert_eq!(store.document_length(7), Some(3));
        assert_eq!(store.total_postings(), 2);
    }

    #[test]
    fn older_sequence_is_superseded() {
        let store = PostingsStore::new();
        let first = store.next_sequence();
        let second = store.next_sequence();
        assert!(store.ingest_at(3, tokenize("newer text"), second, || {}).is_applied());
        let outcome = store.ingest_at(3, tokenize("older words"), first, || panic!("must not run"));
        assert_eq!(outcome, IngestOutcome::Superseded { applied_sequence: second });
        assert!(store.lookup("older").is_empty());
        assert_eq!(store.lookup("newer").len(), 1);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_writes() {
        let store = PostingsStore::new();
        store.ingest(1, tokenize("shared term"));
        let snapshot = store.lookup("share");
        store.ingest(2, tokenize("shared again"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.lookup("share").len(), 2);
    }

    #[test]
    fn lengths_are_readable_while_an_ingest_is_held_open() {
        use std::sync::mpsc;
        use std::time::{Duration, Instant};

        let store = Arc::new(PostingsStore::new());
        store.ingest(0, tokenize("cat dog"));
        let (started, wait) = mpsc::channel();
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let seq = store.next_sequence();
                store.ingest_at(0, tokenize("cat dog zebra"), seq, || {
                    started.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(1500));
                })
            })
        };
        wait.recv().unwrap();
        let t = Instant::now();
        assert_eq!(store.document_length(0), Some(3));
        assert!(store.is_indexed(0));
        assert_eq!(store.lookup("cat").len(), 1);
        assert!(t.elapsed() < Duration::from_millis(500));
        assert!(writer.join().unwrap().is_applied());
    }

    #[test]
    fn export_never_sees_a_half_replaced_document() {
        let store = Arc::new(PostingsStore::new());
        store.ingest(0, tokenize("alpha beta"));
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..300 {
                    let text = if i % 2 == 0 { "gamma delta epsilon zeta" } else { "alpha beta" };
                    store.ingest(0, tokenize(text));
                }
            })
        };
        for _ in 0..100 {
            let terms = store.export_terms().into_iter().map(|(t, l)| (t, (*l).clone())).collect();
            let rebuilt = PostingsStore::from_parts(terms, &[0]);
            let length = rebuilt.document_length(0);
            assert!(length == Some(2) || length == Some(4), "length {length:?}");
        }
        writer.join().unwrap();
    }

    #[test]
    fn from_parts_recovers_statistics() {
        let store = PostingsStore::new();
        store.ingest(0, tokenize("cat dog cat"));
        store.ingest(1, tokenize("dog dog fish"));
        store.ingest(2, tokenize("the and of"));

        let terms = store.export_terms().into_iter().map(|(t, l)| (t, (*l).clone())).collect();
        let rebuilt = PostingsStore::from_parts(terms, &store.indexed_documents());
        assert_eq!(rebuilt.total_documents(), 3);
        assert_eq!(rebuilt.average_document_length(), store.average_document_length());
        assert_eq!(rebuilt.document_length(2), Some(0));
        assert_eq!(rebuilt.lookup("dog"), store.lookup("dog"));
        assert_eq!(rebuilt.term_id("fish"), store.term_id("fish"));
    }
}
