use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use juror_concept_graph::config::load_config;
use juror_concept_graph::embed::{embed_with_cache, EmbeddingCache, EvictionPolicy, HttpEmbedder};
use juror_concept_graph::export::write_bundle;
use juror_concept_graph::render::render_summary_markdown;
use juror_concept_graph::{run_analysis, AnalysisConfig, Bm25Model, SentenceRecord, Vector};

/// Juror Concept Graph - cluster juror feedback into an explainable concept graph
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input JSON: {"sentences": [...], "vectors"?: [...], "bm25"?: {...}, "config"?: {...}}
    #[arg(short, long)]
    input: PathBuf,

    /// Analysis config JSON (overrides JCG_CONFIG and any config inside the input)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory; results land in <output_dir>/<YYYY-MM-DD>
    #[arg(short, long, default_value = "out")]
    output_dir: PathBuf,

    /// OpenAI-compatible embeddings base URL, used when the input carries no vectors
    #[arg(long)]
    embed_endpoint: Option<String>,

    /// Embedding model name sent to the endpoint
    #[arg(long, default_value = "text-embedding-3-small")]
    embed_model: String,

    /// Print the Markdown summary to stdout
    #[arg(long)]
    summary: bool,
}

#[derive(Debug, Deserialize)]
struct InputDocument {
    sentences: Vec<SentenceRecord>,
    #[serde(default)]
    vectors: Vec<Vector>,
    #[serde(default)]
    bm25: Bm25Model,
    #[serde(default)]
    config: Option<AnalysisConfig>,
}

fn resolve_config(args: &Args, inline: Option<AnalysisConfig>) -> Result<AnalysisConfig> {
    // 1) --config, 2) JCG_CONFIG, 3) inline, 4) defaults
    let path = args
        .config
        .clone()
        .or_else(|| std::env::var("JCG_CONFIG").ok().map(PathBuf::from));
    match (path, inline) {
        (Some(p), _) => {
            debug!("Using config file: {}", p.display());
            load_config(&p)
        }
        (None, Some(cfg)) => {
            debug!("Using config embedded in input");
            Ok(cfg)
        }
        (None, None) => Ok(AnalysisConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(true)
        .init();

    info!("Starting juror-concept-graph");
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.input).with_context(|| format!("Reading input {}", args.input.display()))?;
    let doc: InputDocument =
        serde_json::from_str(&raw).with_context(|| format!("Decoding input {}", args.input.display()))?;
    let mut config = resolve_config(&args, doc.config)?;
    let mut vectors = doc.vectors;
    info!("Input loaded - sentences={}, vectors={}", doc.sentences.len(), vectors.len());

    let needs_anchor_seeds = config
        .anchor_axes
        .iter()
        .any(|a| a.positive.vectors.is_empty() || a.negative.vectors.is_empty());

    if vectors.is_empty() || needs_anchor_seeds {
        match &args.embed_endpoint {
            Some(endpoint) => {
                let api_key = std::env::var("JCG_EMBED_API_KEY").ok();
                let embedder = HttpEmbedder::new(endpoint, args.embed_model.clone(), api_key)?;
                let mut cache = EmbeddingCache::new(EvictionPolicy::Unbounded);

                if vectors.is_empty() {
                    let texts: Vec<String> = doc.sentences.iter().map(|s| s.text.clone()).collect();
                    vectors = embed_with_cache(&embedder, &mut cache, &texts).await?;
                }
                for axis in config.anchor_axes.iter_mut() {
                    for pole in [&mut axis.positive, &mut axis.negative] {
                        if pole.vectors.is_empty() && !pole.seeds.is_empty() {
                            pole.vectors = embed_with_cache(&embedder, &mut cache, &pole.seeds).await?;
                        }
                    }
                }
                debug!("Embedding cache - entries={}, hits={}, misses={}", cache.len(), cache.hits(), cache.misses());
            }
            None if vectors.is_empty() && !doc.sentences.is_empty() => {
                bail!("Input has no vectors and no --embed-endpoint was given");
            }
            None => warn!("Anchor axes without vectors will be skipped - no --embed-endpoint given"),
        }
    }

    let result = run_analysis(&doc.sentences, &vectors, &doc.bm25, &config)?;

    let out_dir = args.output_dir.join(Utc::now().format("%Y-%m-%d").to_string());
    write_bundle(&out_dir, &result)?;

    if args.summary {
        println!("{}", render_summary_markdown(&result));
    }
    info!("Done - output_dir={}", out_dir.display());
    Ok(())
}
