//! Query parsing and evaluation.

pub mod ast;
pub mod parser;
pub mod processor;
pub mod topk;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use ast::{PhraseTerm, Query};
pub use parser::parse;
pub use processor::{QueryOutcome, QueryProcessor, ScoredDoc};

/// Caller-owned flag that aborts a running query.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Where a cancelled query stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    Retrieve,
    Merge,
    Score,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryStatus {
    Complete,
    /// Aborted by the caller; hits are whatever was ranked before `stage`.
    Cancelled { stage: Stage },
}

impl QueryStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, QueryStatus::Complete)
    }
}
