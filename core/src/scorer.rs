//! `score(term, doc) = tf_idf(term, doc) * (1 + β · authority(doc))`

use std::sync::Arc;

use crate::config::{AuthorityNormalization, IdfMode, ScoringConfig, TfWeighting};
use crate::pagerank::AuthorityTable;
use crate::postings::Posting;
use crate::DocId;

/// Scores against one authority snapshot and one corpus size, so every
/// document in a query is scored under the same conditions.
#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
    authority: Arc<AuthorityTable>,
    total_documents: u64,
}

impl Scorer {
    pub fn new(config: ScoringConfig, authority: Arc<AuthorityTable>, total_documents: u64) -> Self {
        Self { config, authority, total_documents }
    }

    /// Zero when the term is unseen, rather than a division by zero.
    pub fn idf(&self, document_frequency: u32) -> f64 {
        if document_frequency == 0 || self.total_documents == 0 {
            return 0.0;
        }
        let ratio = self.total_documents as f64 / document_frequency as f64;
        match self.config.idf {
            IdfMode::Plain => ratio.ln(),
            IdfMode::Smoothed => (1.0 + ratio).ln(),
        }
    }

    pub fn tf(&self, term_frequency: u32, document_length: u32) -> f64 {
        if term_frequency == 0 {
            return 0.0;
        }
        let tf = term_frequency as f64;
        match self.config.tf {
            TfWeighting::Raw => tf,
            TfWeighting::LogNormalized => 1.0 + tf.ln(),
            TfWeighting::DoubleNormalized => {
                if document_length == 0 {
                    0.0
                } else {
                    0.5 + 0.5 * tf / document_length as f64
                }
            }
        }
    }

    pub fn tf_idf(&self, term_frequency: u32, document_length: u32, document_frequency: u32) -> f64 {
        self.tf(term_frequency, document_length) * self.idf(document_frequency)
    }

    /// Authority after normalization. Unranked documents get the table
    /// minimum.
    pub fn authority(&self, doc_id: DocId) -> f64 {
        let raw = self.authority.score_or_min(doc_id);
        match self.config.authority {
            AuthorityNormalization::Probability => raw,
            AuthorityNormalization::MaxScaled => {
                let max = self.authority.max();
                if max > 0.0 {
                    raw / max
                } else {
                    0.0
                }
            }
        }
    }

    pub fn score(&self, posting: &Posting, document_length: u32, document_frequency: u32) -> f64 {
        let lexical = self.tf_idf(posting.term_frequency(), document_length, document_frequency);
        lexical * (1.0 + self.config.beta * self.authority(posting.doc_id))
    }

    pub fn total_documents(&self) -> u64 {
        self.total_documents
    }
}
