//! Juror feedback in, explainable concept graph out.
//!
//! [`run_analysis`] is the whole pipeline: clustering (k-means, Auto-K,
//! hierarchical cuts, two-layer hierarchy), quality gating, concept
//! post-processing, PCA layout and graph assembly. Embedding lives behind
//! [`embed::EmbeddingProvider`] so the core stays synchronous.

pub mod auto_k;
pub mod axes;
pub mod concepts;
pub mod config;
pub mod embed;
pub mod evidence;
pub mod export;
pub mod graph;
pub mod hierarchy;
pub mod kmeans;
pub mod labeling;
pub mod models;
pub mod orchestrator;
pub mod pca;
pub mod quality;
pub mod render;
pub mod rng;
pub mod similarity;
pub mod text;
pub mod two_layer;
pub mod union_find;

#[cfg(test)]
mod testutil;

pub use config::AnalysisConfig;
pub use models::{AnalysisResult, Bm25Model, SentenceRecord, Stance, Vector};
pub use orchestrator::run_analysis;
