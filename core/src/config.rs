use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analysis: AnalysisConfig,
    pub pagerank: PageRankConfig,
    pub scoring: ScoringConfig,
    pub query: QueryConfig,
}

/// Which stop-word list the tokenizer drops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopWords {
    /// Built-in English list.
    #[default]
    Default,
    None,
    Custom(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Tokens shorter than this (in chars, before stemming) are dropped.
    pub min_term_len: usize,
    pub max_term_len: usize,
    pub stemming: bool,
    pub stop_words: StopWords,
    /// Added on top of `stop_words`.
    pub extra_stop_words: Vec<String>,
    pub strip_urls_and_emails: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_term_len: 2,
            max_term_len: 100,
            stemming: true,
            stop_words: StopWords::Default,
            extra_stop_words: vec![
                "would".into(),
                "could".into(),
                "should".into(),
                "might".into(),
                "must".into(),
            ],
            strip_urls_and_emails: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRankConfig {
    /// Probability α of following an outlink rather than teleporting.
    pub damping: f64,
    /// Stop once the L1 distance between successive vectors drops below this.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self { damping: 0.85, tolerance: 1e-6, max_iterations: 50 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdfMode {
    /// ln(N / df)
    #[default]
    Plain,
    /// ln(1 + N / df)
    Smoothed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TfWeighting {
    #[default]
    Raw,
    /// 1 + ln(tf)
    LogNormalized,
    /// 0.5 + 0.5 * tf / doc_len
    DoubleNormalized,
}

/// How a raw PageRank score is mapped before blending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityNormalization {
    /// Use the stationary probability as is (sums to 1 over the corpus).
    Probability,
    /// Divide by the largest score so the top document gets 1.0.
    #[default]
    MaxScaled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Blend weight β: score = tf_idf * (1 + β * authority).
    pub beta: f64,
    pub idf: IdfMode,
    pub tf: TfWeighting,
    pub authority: AuthorityNormalization,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            beta: 1.0,
            idf: IdfMode::Plain,
            tf: TfWeighting::Raw,
            authority: AuthorityNormalization::MaxScaled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_k: usize,
    /// Requested K values above this are clamped.
    pub max_k: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { default_k: 10, max_k: 1000 }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let pr = &self.pagerank;
        if !(pr.damping > 0.0 && pr.damping < 1.0) {
            return Err(EngineError::invalid_config(format!(
                "pagerank.damping must be in (0, 1), got {}",
                pr.damping
            )));
        }
        if !(pr.tolerance.is_finite() && pr.tolerance > 0.0) {
            return Err(EngineError::invalid_config(format!(
                "pagerank.tolerance must be a positive number, got {}",
                pr.tolerance
            )));
        }
        if pr.max_iterations == 0 {
            return Err(EngineError::invalid_config("pagerank.max_iterations must be at least 1"));
        }
        let beta = self.scoring.beta;
        if !(beta.is_finite() && beta >= 0.0) {
            return Err(EngineError::invalid_config(format!(
                "scoring.beta must be a non-negative number, got {beta}"
            )));
        }
        let an = &self.analysis;
        if an.min_term_len == 0 || an.min_term_len > an.max_term_len {
            return Err(EngineError::invalid_config(format!(
                "analysis term length bounds are invalid: min={} max={}",
                an.min_term_len, an.max_term_len
            )));
        }
        let q = &self.query;
        if q.max_k == 0 || q.default_k == 0 || q.default_k > q.max_k {
            return Err(EngineError::invalid_config(format!(
                "query bounds are invalid: default_k={} max_k={}",
                q.default_k, q.max_k
            )));
        }
        Ok(())
    }
}
