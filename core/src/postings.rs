use serde::{Deserialize, Serialize};

use crate::DocId;

/// Occurrences of one term in one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    /// Ascending token positions.
    pub positions: Vec<u32>,
}

impl Posting {
    pub fn new(doc_id: DocId, mut positions: Vec<u32>) -> Self {
        positions.sort_unstable();
        positions.dedup();
        Self { doc_id, positions }
    }

    pub fn term_frequency(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn has_position(&self, position: u32) -> bool {
        self.positions.binary_search(&position).is_ok()
    }
}

/// Postings sorted by document ID, no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingsList {
    postings: Vec<Posting>,
}

impl PostingsList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from postings already in strictly increasing doc order.
    /// Returns `None` if the order is violated.
    pub fn from_sorted(postings: Vec<Posting>) -> Option<Self> {
        if postings.windows(2).all(|w| w[0].doc_id < w[1].doc_id) {
            Some(Self { postings })
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Posting> {
        self.postings.iter()
    }

    pub fn as_slice(&self) -> &[Posting] {
        &self.postings
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.postings.iter().map(|p| p.doc_id)
    }

    pub fn get(&self, doc_id: DocId) -> Option<&Posting> {
        self.postings
            .binary_search_by_key(&doc_id, |p| p.doc_id)
            .ok()
            .map(|i| &self.postings[i])
    }

    /// Inserts the posting, or overwrites the existing posting for the same
    /// document. Returns the replaced posting, if any.
    pub fn upsert(&mut self, posting: Posting) -> Option<Posting> {
        match self.postings.binary_search_by_key(&posting.doc_id, |p| p.doc_id) {
            Ok(i) => Some(std::mem::replace(&mut self.postings[i], posting)),
            Err(i) => {
                self.postings.insert(i, posting);
                None
            }
        }
    }

    pub fn remove(&mut self, doc_id: DocId) -> Option<Posting> {
        self.postings
            .binary_search_by_key(&doc_id, |p| p.doc_id)
            .ok()
            .map(|i| self.postings.remove(i))
    }

    /// Sum of term frequencies across the list.
    pub fn total_frequency(&self) -> u64 {
        self.postings.iter().map(|p| p.term_frequency() as u64).sum()
    }
}

impl<'a> IntoIterator for &'a PostingsList {
    type Item = &'a Posting;
    type IntoIter = std::slice::Iter<'a, Posting>;

    fn into_iter(self) -> Self::IntoIter {
        self.postings.iter()
    }
}

/// Merge-intersection of two ascending ID lists.
pub fn intersect(a: &[DocId], b: &[DocId]) -> Vec<DocId> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Merge-union of two ascending ID lists.
pub fn union(a: &[DocId], b: &[DocId]) -> Vec<DocId> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// IDs in `a` that are not in `b`; both ascending.
pub fn difference(a: &[DocId], b: &[DocId]) -> Vec<DocId> {
    let mut out = Vec::with_capacity(a.len());
    let mut j = 0;
    for &id in a {
        while j < b.len() && b[j] < id {
            j += 1;
        }
        if j >= b.len() || b[j] != id {
            out.push(id);
        }
    }
    out
}
