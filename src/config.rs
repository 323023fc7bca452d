use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::axes::AnchorAxisInput;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusteringMode {
    #[default]
    Kmeans,
    Hierarchical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutType {
    #[default]
    Count,
    Granularity,
}

impl CutType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CutType::Count => "count",
            CutType::Granularity => "granularity",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionMode {
    #[default]
    Manual,
    Elbow,
    Threshold,
}

/// Gate applied to every candidate cut.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityConstraints {
    pub min_effective_mass_per_concept: f64,
    pub min_juror_support_per_concept: usize,
    pub imbalance_weight: f64,
    pub redundancy_weight: f64,
}

impl Default for QualityConstraints {
    fn default() -> Self {
        Self {
            min_effective_mass_per_concept: 3.0,
            min_juror_support_per_concept: 2,
            imbalance_weight: 0.4,
            redundancy_weight: 0.3,
        }
    }
}

impl QualityConstraints {
    /// Detail layer: any non-empty cluster passes.
    pub fn relaxed() -> Self {
        Self {
            min_effective_mass_per_concept: 1.0,
            min_juror_support_per_concept: 1,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoKOptions {
    pub stability: bool,
    pub stability_weight: f64,
    pub complexity_penalty: f64,
    pub dominance_threshold: f64,
    pub dominance_penalty_weight: f64,
    pub epsilon: f64,
}

impl Default for AutoKOptions {
    fn default() -> Self {
        Self {
            stability: false,
            stability_weight: 0.15,
            complexity_penalty: 0.01,
            dominance_threshold: 0.35,
            dominance_penalty_weight: 2.0,
            epsilon: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeOptions {
    pub enabled: bool,
    pub similarity_threshold: f64,
    /// Clusters above this share of the corpus are never merged with each other.
    pub max_size_ratio: f64,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.85,
            max_size_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoftMembershipOptions {
    pub top_n: usize,
    pub min_weight: f64,
    pub entropy_cap: f64,
}

impl Default for SoftMembershipOptions {
    fn default() -> Self {
        Self {
            top_n: 3,
            min_weight: 0.10,
            entropy_cap: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvidenceWeights {
    pub semantic: f64,
    pub frequency: f64,
    pub top_k: usize,
}

impl Default for EvidenceWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            frequency: 0.3,
            top_k: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisConfig {
    pub k_concepts: usize,
    pub similarity_threshold: f64,
    pub clustering_mode: ClusteringMode,
    pub auto_k: bool,
    pub k_min: usize,
    pub k_max: usize,
    pub auto_k_options: AutoKOptions,
    pub kmeans_iterations: usize,
    pub soft_membership: bool,
    pub soft_top_n: usize,
    pub soft_options: SoftMembershipOptions,
    pub cut_type: CutType,
    pub granularity_percent: f64,
    pub seed: u64,
    pub num_dimensions: usize,
    pub dimension_mode: DimensionMode,
    pub variance_threshold: f64,
    pub use_two_layer: bool,
    pub primary_granularity: f64,
    pub detail_granularity: f64,
    /// `[min, max]` granularity sweep for the detail layer.
    pub detail_auto_range: Option<[f64; 2]>,
    pub detail_step: f64,
    pub juror_dampening: bool,
    pub quality: QualityConstraints,
    pub merge: MergeOptions,
    pub evidence: EvidenceWeights,
    pub juror_link_threshold: f64,
    pub detail_jitter: f64,
    pub layout_scale: f64,
    pub label_terms: usize,
    pub anchor_axes: Vec<AnchorAxisInput>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            k_concepts: 5,
            similarity_threshold: 0.6,
            clustering_mode: ClusteringMode::Kmeans,
            auto_k: false,
            k_min: 3,
            k_max: 10,
            auto_k_options: AutoKOptions::default(),
            kmeans_iterations: 25,
            soft_membership: false,
            soft_top_n: 3,
            soft_options: SoftMembershipOptions::default(),
            cut_type: CutType::Count,
            granularity_percent: 50.0,
            seed: 42,
            num_dimensions: 3,
            dimension_mode: DimensionMode::Manual,
            variance_threshold: 0.9,
            use_two_layer: false,
            primary_granularity: 70.0,
            detail_granularity: 30.0,
            detail_auto_range: None,
            detail_step: 10.0,
            juror_dampening: false,
            quality: QualityConstraints::default(),
            merge: MergeOptions::default(),
            evidence: EvidenceWeights::default(),
            juror_link_threshold: 0.05,
            detail_jitter: 0.15,
            layout_scale: 10.0,
            label_terms: 5,
            anchor_axes: Vec::new(),
        }
    }
}

fn check_percent(name: &str, v: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&v) {
        bail!("{} must be within 0..=100, got {}", name, v);
    }
    Ok(())
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        check_percent("granularityPercent", self.granularity_percent)?;
        check_percent("primaryGranularity", self.primary_granularity)?;
        check_percent("detailGranularity", self.detail_granularity)?;
        if let Some([lo, hi]) = self.detail_auto_range {
            check_percent("detailAutoRange[0]", lo)?;
            check_percent("detailAutoRange[1]", hi)?;
            if lo > hi {
                bail!("detailAutoRange is inverted: {} > {}", lo, hi);
            }
            if self.detail_step <= 0.0 {
                bail!("detailStep must be positive, got {}", self.detail_step);
            }
        }
        if self.k_min == 0 || self.k_min > self.k_max {
            bail!("kMin/kMax invalid: kMin={}, kMax={}", self.k_min, self.k_max);
        }
        if self.k_concepts == 0 && !self.auto_k {
            bail!("kConcepts must be at least 1 when autoK is off");
        }
        if self.soft_top_n == 0 {
            bail!("softTopN must be at least 1");
        }
        if !(self.variance_threshold > 0.0 && self.variance_threshold <= 1.0) {
            bail!("varianceThreshold must be within (0, 1], got {}", self.variance_threshold);
        }
        if self.num_dimensions == 0 {
            bail!("numDimensions must be at least 1");
        }
        Ok(())
    }

    /// Soft-membership knobs with `softTopN` applied on top.
    pub fn soft(&self) -> SoftMembershipOptions {
        SoftMembershipOptions {
            top_n: self.soft_top_n,
            ..self.soft_options
        }
    }
}

pub fn load_config(path: &Path) -> Result<AnalysisConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Reading config {}", path.display()))?;
    let cfg: AnalysisConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Decoding config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
