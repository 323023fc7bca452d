use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::auto_k::KCandidate;
use crate::quality::CutQualityScore;

/// One sentence embedding, unit L2 norm.
pub type Vector = Vec<f64>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Praise,
    Critique,
    Suggestion,
    #[default]
    Neutral,
}

impl Stance {
    pub const ALL: [Stance; 4] = [Stance::Praise, Stance::Critique, Stance::Suggestion, Stance::Neutral];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stance::Praise => "praise",
            Stance::Critique => "critique",
            Stance::Suggestion => "suggestion",
            Stance::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMembership {
    pub concept_id: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceRecord {
    pub id: String,
    pub juror: String,
    pub text: String,
    #[serde(default)]
    pub stance: Stance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_membership: Option<Vec<ConceptMembership>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_concept_id: Option<String>,
}

impl SentenceRecord {
    pub fn new(id: impl Into<String>, juror: impl Into<String>, text: impl Into<String>, stance: Stance) -> Self {
        Self {
            id: id.into(),
            juror: juror.into(),
            text: text.into(),
            stance,
            concept_id: None,
            concept_membership: None,
            detail_concept_id: None,
        }
    }
}

/// Term source produced by the external BM25 / n-gram model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bm25Model {
    #[serde(default)]
    pub ngram_vocab: Vec<String>,
    #[serde(default)]
    pub scores: HashMap<String, f64>,
}

impl Bm25Model {
    pub fn score(&self, term: &str) -> f64 {
        self.scores.get(term).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.ngram_vocab.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptLayer {
    Primary,
    Detail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSentence {
    pub sentence_id: String,
    pub score: f64,
    pub semantic: f64,
    pub frequency: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub id: String,
    /// Position of this concept in its layer's assignment space.
    pub index: usize,
    pub label: String,
    pub layer: ConceptLayer,
    pub size: usize,
    /// Soft mass: sum of membership weights pointing here.
    pub weight: f64,
    pub top_terms: Vec<String>,
    pub representative_sentences: Vec<EvidenceSentence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub juror_support: usize,
    #[serde(skip)]
    pub centroid: Vector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Juror,
    Concept,
}

/// Per-kind node payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeMeta {
    #[serde(rename_all = "camelCase")]
    Juror {
        sentence_count: usize,
        stance_counts: BTreeMap<Stance, usize>,
        top_concepts: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Concept {
        layer: ConceptLayer,
        weight: f64,
        top_terms: Vec<String>,
        evidence_ids: Vec<String>,
        juror_support: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<ConceptLayer>,
    pub position: [f64; 3],
    pub pca_coords: Vec<f64>,
    pub size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    JurorConcept,
    JurorJuror,
    ConceptConcept,
    ParentChild,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphLink {
    pub source: String,
    pub target: String,
    pub kind: LinkKind,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stance: Option<Stance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisLabel {
    pub axis: usize,
    pub negative: String,
    pub positive: String,
    pub variance_ratio: f64,
    pub meaningful: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VarianceStats {
    pub eigenvalues: Vec<f64>,
    pub explained_variance_ratio: Vec<f64>,
    pub cumulative_variance_ratio: Vec<f64>,
    pub meaningful_dimensions: usize,
    pub layout_dimensions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorProjection {
    pub axis_id: String,
    pub negative_label: String,
    pub positive_label: String,
    pub concept_scores: BTreeMap<String, f64>,
    pub juror_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JurorVector {
    pub juror: String,
    pub primary: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detail: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub stage: String,
    pub count: usize,
    pub at: chrono::DateTime<chrono::Utc>,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    InputTooSmall,
    InvalidCut,
    DegenerateCluster,
    NumericDegeneracy,
}

/// A recovered failure: the pipeline carried on, but a reader should know.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStats {
    pub total_sentences: usize,
    pub total_jurors: usize,
    pub total_concepts: usize,
    pub total_detail_concepts: usize,
    pub total_links: usize,
    pub chosen_k: usize,
    pub quality_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
    pub concepts: Vec<Concept>,
    pub detail_concepts: Vec<Concept>,
    pub sentences: Vec<SentenceRecord>,
    pub juror_vectors: Vec<JurorVector>,
    pub variance: VarianceStats,
    pub axis_labels: Vec<AxisLabel>,
    pub anchor_projections: Vec<AnchorProjection>,
    pub checkpoints: Vec<Checkpoint>,
    pub reasoning: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<CutQualityScore>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub k_candidates: Vec<KCandidate>,
    pub stats: AnalysisStats,
}
