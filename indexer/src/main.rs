use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use linkdex_core::persist::{DirectoryStore, IndexStore, SledStore};
use linkdex_core::{CancellationToken, EngineConfig, SearchEngine};
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One crawled page as written by the crawler.
#[derive(Debug, Deserialize)]
struct InputDoc {
    #[serde(alias = "id")]
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    outlinks: Vec<String>,
}

impl InputDoc {
    fn text(&self) -> String {
        match &self.title {
            Some(title) if !title.is_empty() => format!("{title}\n{}", self.body),
            _ => self.body.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// One file per blob
    Dir,
    /// A sled database
    Sled,
}

#[derive(Parser)]
#[command(name = "linkdex")]
#[command(about = "Build and query a link-aware TF-IDF search index", long_about = None)]
struct Cli {
    /// Engine configuration (JSON); defaults apply to anything missing
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Storage backend of the index
    #[arg(long, value_enum, default_value_t = Backend::Dir, global = true)]
    backend: Backend,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from crawler JSON/JSONL files or a directory of them
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
        /// Output index location
        #[arg(long)]
        output: PathBuf,
        /// PageRank damping factor
        #[arg(long)]
        damping: Option<f64>,
        /// Weight of link authority against text relevance
        #[arg(long)]
        beta: Option<f64>,
        /// PageRank iteration cap
        #[arg(long)]
        max_iterations: Option<usize>,
    },
    /// Run a query against a built index
    Query {
        #[arg(long)]
        index: PathBuf,
        /// Query text; supports "phrases", OR, NOT / -term, site:host and parentheses
        query: String,
        /// Number of results
        #[arg(short, long)]
        k: Option<usize>,
        /// Emit JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print index and link-graph statistics
    Stats {
        #[arg(long)]
        index: PathBuf,
    },
    /// List the most authoritative pages, optionally personalized to seeds
    Rank {
        #[arg(long)]
        index: PathBuf,
        #[arg(short, long, default_value_t = 10)]
        n: usize,
        /// Restrict random jumps to these locators
        #[arg(long)]
        seed: Vec<String>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Build { input, output, damping, beta, max_iterations } => {
            if let Some(d) = damping {
                config.pagerank.damping = d;
            }
            if let Some(b) = beta {
                config.scoring.beta = b;
            }
            if let Some(m) = max_iterations {
                config.pagerank.max_iterations = m;
            }
            build_index(config, &input, &output, cli.backend)
        }
        Commands::Query { index, query, k, json } => {
            let engine = open_engine(config, &index, cli.backend)?;
            run_query(&engine, &query, k, json)
        }
        Commands::Stats { index } => {
            let engine = open_engine(config, &index, cli.backend)?;
            let report = serde_json::json!({
                "index": engine.stats(),
                "graph": engine.graph_stats(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Rank { index, n, seed } => {
            let engine = open_engine(config, &index, cli.backend)?;
            let ranked = if seed.is_empty() {
                engine.top_authorities(n)
            } else {
                let (ranked, convergence) = engine.personalized_authority(seed.as_slice(), n);
                tracing::info!(?convergence, seeds = seed.len(), "personalized ranking");
                ranked
            };
            if ranked.is_empty() {
                println!("no ranked documents");
            }
            for (i, (locator, score)) in ranked.iter().enumerate() {
                println!("{:>3}. {score:.6}  {locator}", i + 1);
            }
            Ok(())
        }
    }
}

fn open_store(path: &Path, backend: Backend) -> Result<Box<dyn IndexStore>> {
    Ok(match backend {
        Backend::Dir => Box::new(DirectoryStore::new(path)),
        Backend::Sled => Box::new(SledStore::open(path).with_context(|| format!("opening {}", path.display()))?),
    })
}

fn open_engine(config: EngineConfig, index: &Path, backend: Backend) -> Result<SearchEngine> {
    let store = open_store(index, backend)?;
    SearchEngine::open(config, store.as_ref()).with_context(|| format!("loading index {}", index.display()))
}

fn build_index(config: EngineConfig, input: &Path, output: &Path, backend: Backend) -> Result<()> {
    let engine = SearchEngine::new(config)?;
    let files = input_files(input)?;
    let mut submitted = 0usize;
    let mut skipped = 0usize;

    for file in &files {
        for doc in read_docs(file, &mut skipped)? {
            engine.submit_document(&doc.url, &doc.text(), doc.outlinks.as_slice());
            submitted += 1;
        }
    }
    let stats = engine.stats();
    tracing::info!(
        files = files.len(),
        submitted,
        skipped,
        documents = stats.documents,
        placeholders = stats.placeholders,
        terms = stats.unique_terms,
        "ingested documents"
    );

    let report = engine.recompute_authority();
    if !report.convergence.converged() {
        tracing::warn!(iterations = report.convergence.iterations(), "authority did not converge");
    }

    let store = open_store(output, backend)?;
    engine.shutdown(store.as_ref())?;
    tracing::info!(output = %output.display(), "index build complete");
    Ok(())
}

fn input_files(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("input {} does not exist", input.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")))
        .collect();
    files.sort();
    Ok(files)
}

/// Reads every record of a JSON (object or array) or JSONL file. Records that
/// fail to parse are logged and counted in `skipped`.
fn read_docs(file: &Path, skipped: &mut usize) -> Result<Vec<InputDoc>> {
    let reader = BufReader::new(File::open(file).with_context(|| format!("opening {}", file.display()))?);
    let mut docs = Vec::new();
    if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<InputDoc>(&line) {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    tracing::warn!(file = %file.display(), line = n + 1, error = %e, "skipping malformed record");
                    *skipped += 1;
                }
            }
        }
        return Ok(docs);
    }

    let values = match serde_json::from_reader(reader)? {
        serde_json::Value::Array(arr) => arr,
        obj @ serde_json::Value::Object(_) => vec![obj],
        _ => Vec::new(),
    };
    for v in values {
        match serde_json::from_value::<InputDoc>(v) {
            Ok(doc) => docs.push(doc),
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "skipping malformed record");
                *skipped += 1;
            }
        }
    }
    Ok(docs)
}

fn run_query(engine: &SearchEngine, query: &str, k: Option<usize>, json: bool) -> Result<()> {
    let k = k.unwrap_or(engine.config().query.default_k);
    let response = engine.query(query, k, &CancellationToken::new());
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    if response.hits.is_empty() {
        println!("no results");
    }
    for (i, hit) in response.hits.iter().enumerate() {
        println!("{:>3}. {:.4}  {}  positions={:?}", i + 1, hit.score, hit.locator, hit.snippet_hint);
    }
    println!("{} of {} matching documents", response.hits.len(), response.total_candidates);
    Ok(())
}
