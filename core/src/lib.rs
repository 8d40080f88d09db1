pub mod codec;
pub mod config;
pub mod documents;
pub mod engine;
pub mod error;
pub mod graph;
pub mod index;
pub mod pagerank;
pub mod persist;
pub mod postings;
pub mod query;
pub mod scorer;
pub mod tokenizer;

pub type TermId = u32;
pub type DocId = u32;

pub use config::EngineConfig;
pub use engine::{IndexStats, QueryResponse, SearchEngine, SearchHit, SubmitReceipt};
pub use error::{EngineError, Result};
pub use query::{CancellationToken, QueryStatus};
