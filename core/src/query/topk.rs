//! Bounded top-K selection.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::DocId;

#[derive(Debug, Clone, Copy)]
struct Entry {
    doc_id: DocId,
    score: f64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    /// "Greater" means "ranks lower": smaller score, then larger doc ID. The
    /// heap top is therefore the entry to evict first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.doc_id.cmp(&other.doc_id))
    }
}

/// Keeps the `k` best (score desc, doc ID asc) documents seen so far in
/// O(k) memory.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    heap: BinaryHeap<Entry>,
    seen: usize,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self { k, heap: BinaryHeap::with_capacity(k.min(1024) + 1), seen: 0 }
    }

    pub fn push(&mut self, doc_id: DocId, score: f64) {
        self.seen += 1;
        if self.k == 0 {
            return;
        }
        let entry = Entry { doc_id, score };
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(worst) = self.heap.peek() {
            if entry < *worst {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of documents offered, kept or not.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Best first.
    pub fn into_sorted_vec(self) -> Vec<(DocId, f64)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| (e.doc_id, e.score))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_best_k_in_order() {
        let mut top = TopK::new(3);
        for (doc, score) in [(1, 0.5), (2, 2.0), (3, 0.1), (4, 1.0), (5, 3.0)] {
            top.push(doc, score);
        }
        assert_eq!(top.seen(), 5);
        assert_eq!(top.into_sorted_vec(), vec![(5, 3.0), (2, 2.0), (4, 1.0)]);
    }

    #[test]
    fn ties_prefer_lower_doc_id() {
        let mut top = TopK::new(2);
        for doc in [9, 3, 7, 1] {
            top.push(doc, 1.0);
        }
        assert_eq!(top.into_sorted_vec(), vec![(1, 1.0), (3, 1.0)]);
    }

    #[test]
    fn zero_k_keeps_nothing() {
        let mut top = TopK::new(0);
        top.push(1, 1.0);
        assert!(top.is_empty());
    }
}
