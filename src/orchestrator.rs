use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::auto_k::{find_optimal_k, AutoKParams, KCandidate};
use crate::axes::{label_axes, project_anchor_axes};
use crate::concepts::{
    assign_stable_ids, compute_centroids, compute_soft_membership, hard_membership, juror_dampening_weights,
    semantic_merge_concepts, Membership,
};
use crate::config::{AnalysisConfig, ClusteringMode, CutType};
use crate::evidence::rank_evidence;
use crate::graph::{assemble_graph, GraphContext, GraphOptions, Layout};
use crate::hierarchy::{build_dendrogram, cut_dendrogram_by_count, cut_dendrogram_by_threshold, QualityGuard};
use crate::kmeans::kmeans_cosine;
use crate::labeling::label_concept;
use crate::models::{
    AnalysisResult, AnalysisStats, Bm25Model, Checkpoint, Concept, ConceptLayer, ConceptMembership, Diagnostic,
    DiagnosticKind, JurorVector, SentenceRecord, VarianceStats, Vector,
};
use crate::pca::{axis_directions, normalize_coordinates, pca_power_iteration, project_to_3d, select_dimensions};
use crate::quality::evaluate_cut_quality;
use crate::similarity::{l2_norm, mean_vector, normalize, relabel_contiguous, NORM_EPS};
use crate::two_layer::{build_two_layer, TwoLayerOptions};

struct DetailLayer {
    assignments: Vec<usize>,
    k: usize,
    /// `detail id -> primary id`
    parent_map: Vec<usize>,
}

struct ClusterOutcome {
    assignments: Vec<usize>,
    k: usize,
    cut_label: &'static str,
    detail: Option<DetailLayer>,
    k_candidates: Vec<KCandidate>,
}

/// Collects the recovered failures and the human-readable trail of a run.
#[derive(Default)]
struct RunLog {
    reasoning: Vec<String>,
    diagnostics: Vec<Diagnostic>,
    checkpoints: Vec<Checkpoint>,
}

impl RunLog {
    fn diagnose(&mut self, kind: DiagnosticKind, reason: String) {
        warn!("Recovered - kind={:?}, reason={}", kind, reason);
        self.diagnostics.push(Diagnostic { kind, reason });
    }

    fn checkpoint(&mut self, stage: &str, count: usize, note: String) {
        debug!("Checkpoint - stage={}, count={}", stage, count);
        self.checkpoints.push(Checkpoint {
            stage: stage.to_string(),
            count,
            at: Utc::now(),
            note,
        });
    }
}

fn check_inputs(sentences: &[SentenceRecord], vectors: &[Vector]) -> Result<()> {
    if sentences.len() != vectors.len() {
        bail!(
            "Expected one vector per sentence - sentences={}, vectors={}",
            sentences.len(),
            vectors.len()
        );
    }
    if let Some(first) = vectors.first() {
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != first.len()) {
            bail!("Vector {} has dimension {}, expected {}", i, v.len(), first.len());
        }
    }
    Ok(())
}

fn kmeans_outcome(vectors: &[Vector], k: usize, config: &AnalysisConfig, log: &mut RunLog) -> (Vec<usize>, usize) {
    let res = kmeans_cosine(vectors, k, config.kmeans_iterations, config.seed);
    let (assignments, found) = relabel_contiguous(&res.assignments);
    if found < res.k {
        log.diagnose(
            DiagnosticKind::DegenerateCluster,
            format!("k-means left {} of {} clusters empty; kept {}", res.k - found, res.k, found),
        );
    }
    debug!("k-means finished - k={}, iterations={}", found, res.iterations_run);
    (assignments, found)
}

fn cluster_primary(vectors: &[Vector], jurors: &[String], config: &AnalysisConfig, log: &mut RunLog) -> ClusterOutcome {
    let n = vectors.len();

    if config.use_two_layer {
        let opts = TwoLayerOptions {
            primary_granularity: config.primary_granularity,
            detail_granularity: config.detail_granularity,
            detail_auto_range: config.detail_auto_range,
            detail_step: config.detail_step,
            primary_constraints: config.quality,
            ..TwoLayerOptions::default()
        };
        let res = build_two_layer(vectors, jurors, &opts);
        if !res.primary_cut.is_valid() {
            log.diagnose(
                DiagnosticKind::InvalidCut,
                format!(
                    "primary cut failed the quality gate even at granularity {}",
                    res.primary_cut.granularity_used
                ),
            );
        }
        log.reasoning.extend(res.reasoning);
        return ClusterOutcome {
            assignments: res.primary_assignments,
            k: res.primary_k,
            cut_label: "primary",
            detail: Some(DetailLayer {
                assignments: res.detail_assignments,
                k: res.detail_k,
                parent_map: res.parent_map,
            }),
            k_candidates: Vec::new(),
        };
    }

    let granular = config.clustering_mode == ClusteringMode::Hierarchical && config.cut_type == CutType::Granularity;
    let cut_label = match config.clustering_mode {
        ClusteringMode::Kmeans => "kmeans",
        ClusteringMode::Hierarchical => config.cut_type.as_str(),
    };

    if granular {
        let dendrogram = build_dendrogram(vectors);
        let guard = QualityGuard {
            vectors,
            jurors,
            constraints: config.quality,
        };
        let cut = cut_dendrogram_by_threshold(&dendrogram, config.granularity_percent, Some(&guard));
        if !cut.is_valid() {
            log.diagnose(
                DiagnosticKind::InvalidCut,
                format!("threshold cut still invalid at granularity {}", cut.granularity_used),
            );
        }
        log.reasoning.push(format!(
            "hierarchical cut at granularity {} (requested {}) gave {} concept(s)",
            cut.granularity_used, cut.requested_granularity, cut.k
        ));
        return ClusterOutcome {
            assignments: cut.assignments,
            k: cut.k,
            cut_label,
            detail: None,
            k_candidates: Vec::new(),
        };
    }

    // Count-based: K is either configured or searched for.
    let mut k_candidates = Vec::new();
    let mut searched: Option<(Vec<usize>, usize)> = None;
    let k = if config.auto_k {
        let params = AutoKParams {
            k_min: config.k_min,
            k_max: config.k_max,
            iterations: config.kmeans_iterations,
            seed: config.seed,
            options: config.auto_k_options,
            constraints: config.quality,
        };
        let res = find_optimal_k(vectors, jurors, &params);
        if res.short_circuited {
            log.diagnose(DiagnosticKind::InputTooSmall, res.reasoning.clone());
        } else if res.fallback {
            log.diagnose(DiagnosticKind::InvalidCut, res.reasoning.clone());
        }
        log.reasoning.push(format!("auto-K: {}", res.reasoning));
        k_candidates = res.candidates;
        let k = res.k;
        if res.short_circuited || config.clustering_mode == ClusteringMode::Kmeans {
            let (assignments, found) = relabel_contiguous(&res.assignments);
            searched = Some((assignments, found));
        }
        k
    } else {
        if config.k_concepts > n {
            log.diagnose(
                DiagnosticKind::InputTooSmall,
                format!("kConcepts={} exceeds corpus of {}; using {}", config.k_concepts, n, n),
            );
        }
        config.k_concepts.min(n)
    };

    let (assignments, k) = match searched {
        Some(found) => found,
        None => match config.clustering_mode {
            ClusteringMode::Kmeans => kmeans_outcome(vectors, k, config, log),
            ClusteringMode::Hierarchical => {
                let assignments = cut_dendrogram_by_count(vectors, k);
                let (assignments, found) = relabel_contiguous(&assignments);
                (assignments, found)
            }
        },
    };
    if !config.auto_k {
        log.reasoning.push(format!("{} clustering with K={}", cut_label, k));
    }
    ClusterOutcome {
        assignments,
        k,
        cut_label,
        detail: None,
        k_candidates,
    }
}

struct LayerInputs<'a> {
    layer: ConceptLayer,
    assignments: &'a [usize],
    k: usize,
    parents: Vec<Option<String>>,
    cut_label: &'a str,
}

fn build_concepts(
    layer: &LayerInputs,
    sentences: &[SentenceRecord],
    vectors: &[Vector],
    bm25: &Bm25Model,
    config: &AnalysisConfig,
    weights: Option<&[f64]>,
) -> Vec<Concept> {
    let centroids = compute_centroids(vectors, layer.assignments, layer.k, weights);
    let ids = assign_stable_ids(&centroids, &layer.parents, layer.cut_label);
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); layer.k];
    for (i, &a) in layer.assignments.iter().enumerate() {
        if a < layer.k {
            members[a].push(i);
        }
    }

    centroids
        .into_iter()
        .zip(ids)
        .enumerate()
        .map(|(c, (centroid, id))| {
            let texts: Vec<&str> = members[c].iter().map(|&i| sentences[i].text.as_str()).collect();
            let label = label_concept(&texts, bm25, config.label_terms, c);
            let evidence = rank_evidence(
                &members[c],
                sentences,
                vectors,
                &centroid,
                &label.top_terms,
                bm25,
                &config.evidence,
            );
            let juror_support = members[c]
                .iter()
                .map(|&i| sentences[i].juror.as_str())
                .collect::<HashSet<_>>()
                .len();
            Concept {
                id,
                index: c,
                label: label.label,
                layer: layer.layer,
                size: members[c].len(),
                weight: members[c].len() as f64,
                top_terms: label.top_terms,
                representative_sentences: evidence,
                parent_id: layer.parents.get(c).cloned().flatten(),
                juror_support,
                centroid,
            }
        })
        .collect()
}

/// Per juror, the share of their membership mass landing in each concept.
fn juror_weights(sentence_juror: &[usize], juror_count: usize, memberships: &[Vec<Membership>], k: usize) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0.0; k]; juror_count];
    for (s, ms) in memberships.iter().enumerate() {
        let j = sentence_juror[s];
        for m in ms.iter().filter(|m| m.concept < k) {
            out[j][m.concept] += m.weight;
        }
    }
    for row in out.iter_mut() {
        let total: f64 = row.iter().sum();
        if total > 0.0 {
            row.iter_mut().for_each(|w| *w /= total);
        }
    }
    out
}

struct LayoutOutcome {
    variance: VarianceStats,
    juror_layout: Vec<Layout>,
    concept_layout: Vec<Layout>,
    concept_coords: Vec<Vec<f64>>,
}

/// PCA over juror profiles; each concept sits where its pure one-hot profile
/// projects.
fn compute_layout(primary: &[Vec<f64>], k: usize, config: &AnalysisConfig) -> LayoutOutcome {
    let pca = pca_power_iteration(primary, k);
    let (meaningful, layout_dims) = select_dimensions(
        config.dimension_mode,
        config.num_dimensions,
        &pca.eigenvalues,
        &pca.explained_variance_ratio,
        config.variance_threshold,
    );
    let directions = axis_directions(layout_dims);

    let juror_coords: Vec<Vec<f64>> = pca
        .projections
        .iter()
        .map(|p| p.iter().take(layout_dims).copied().collect())
        .collect();
    let concept_coords: Vec<Vec<f64>> = (0..k)
        .map(|c| {
            let mut basis = vec![0.0; k];
            basis[c] = 1.0;
            if pca.components.is_empty() {
                Vec::new()
            } else {
                pca.project(&basis).into_iter().take(layout_dims).collect()
            }
        })
        .collect();

    let mut points: Vec<[f64; 3]> = juror_coords
        .iter()
        .chain(concept_coords.iter())
        .map(|c| project_to_3d(c, &directions))
        .collect();
    normalize_coordinates(&mut points, config.layout_scale);
    let (jp, cp) = points.split_at(juror_coords.len());

    let juror_layout = jp
        .iter()
        .zip(juror_coords)
        .map(|(p, c)| Layout { position: *p, coords: c })
        .collect();
    let concept_layout = cp
        .iter()
        .zip(concept_coords.iter())
        .map(|(p, c)| Layout {
            position: *p,
            coords: c.clone(),
        })
        .collect();

    let variance = VarianceStats {
        cumulative_variance_ratio: pca.cumulative_variance_ratio(),
        eigenvalues: pca.eigenvalues,
        explained_variance_ratio: pca.explained_variance_ratio,
        meaningful_dimensions: meaningful,
        layout_dimensions: layout_dims,
    };
    LayoutOutcome {
        variance,
        juror_layout,
        concept_layout,
        concept_coords,
    }
}

fn empty_result(log: RunLog) -> AnalysisResult {
    AnalysisResult {
        nodes: Vec::new(),
        links: Vec::new(),
        concepts: Vec::new(),
        detail_concepts: Vec::new(),
        sentences: Vec::new(),
        juror_vectors: Vec::new(),
        variance: VarianceStats::default(),
        axis_labels: Vec::new(),
        anchor_projections: Vec::new(),
        checkpoints: log.checkpoints,
        reasoning: log.reasoning,
        diagnostics: log.diagnostics,
        quality: None,
        k_candidates: Vec::new(),
        stats: AnalysisStats::default(),
    }
}

/// Sentences plus their embeddings in, concept graph out.
///
/// Only contract violations (mismatched lengths or dimensions, bad config)
/// return `Err`. Every algorithmic degradation is recovered and reported in
/// `diagnostics` so the caller always gets something to render.
pub fn run_analysis(
    sentences: &[SentenceRecord],
    vectors: &[Vector],
    bm25: &Bm25Model,
    config: &AnalysisConfig,
) -> Result<AnalysisResult> {
    let run_start = Instant::now();
    config.validate()?;
    check_inputs(sentences, vectors)?;

    let mut log = RunLog::default();
    let n = sentences.len();
    info!("Analysis started - sentences={}, mode={:?}, two_layer={}", n, config.clustering_mode, config.use_two_layer);
    log.checkpoint("sentences", n, "input accepted".to_string());

    if n == 0 {
        log.diagnose(DiagnosticKind::InputTooSmall, "no sentences to analyse".to_string());
        log.checkpoint("final", 0, "empty input".to_string());
        return Ok(empty_result(log));
    }

    // 1) renormalise; zero vectors stay zero and are reported
    let degenerate = vectors.iter().filter(|v| l2_norm(v) < NORM_EPS).count();
    if degenerate > 0 {
        log.diagnose(
            DiagnosticKind::NumericDegeneracy,
            format!("{} zero-norm vector(s) kept as zero", degenerate),
        );
    }
    let vectors: Vec<Vector> = vectors.iter().map(|v| normalize(v)).collect();

    let sentence_jurors: Vec<String> = sentences.iter().map(|s| s.juror.clone()).collect();
    let mut juror_index: HashMap<&str, usize> = HashMap::new();
    let mut jurors: Vec<String> = Vec::new();
    let sentence_juror: Vec<usize> = sentences
        .iter()
        .map(|s| {
            *juror_index.entry(s.juror.as_str()).or_insert_with(|| {
                jurors.push(s.juror.clone());
                jurors.len() - 1
            })
        })
        .collect();

    // 2) cluster
    let cluster_start = Instant::now();
    let mut outcome = cluster_primary(&vectors, &sentence_jurors, config, &mut log);
    let dampening = if config.juror_dampening {
        Some(juror_dampening_weights(&sentence_jurors))
    } else {
        None
    };

    // 3) fold near-duplicate concepts
    if config.merge.enabled && outcome.k > 1 {
        let centroids = compute_centroids(&vectors, &outcome.assignments, outcome.k, dampening.as_deref());
        let merged = semantic_merge_concepts(&outcome.assignments, &centroids, &config.merge);
        if merged.merged_count > 0 {
            log.reasoning.push(format!(
                "merged {} near-duplicate concept(s): {} -> {}",
                merged.merged_count, outcome.k, merged.k
            ));
            if let Some(detail) = outcome.detail.as_mut() {
                for p in detail.parent_map.iter_mut() {
                    *p = merged.mapping.get(*p).copied().unwrap_or(*p);
                }
            }
            outcome.assignments = merged.assignments;
            outcome.k = merged.k;
        }
    }

    // 4) quality of the final primary cut, reported but not acted on
    let primary_centroids = compute_centroids(&vectors, &outcome.assignments, outcome.k, dampening.as_deref());
    let quality = evaluate_cut_quality(&outcome.assignments, &sentence_jurors, &primary_centroids, &config.quality);
    info!(
        "Clustering completed - duration={:.2}s, k={}, detail_k={}, quality={:.3}, valid={}",
        cluster_start.elapsed().as_secs_f32(),
        outcome.k,
        outcome.detail.as_ref().map(|d| d.k).unwrap_or(0),
        quality.score,
        quality.is_valid
    );
    if !quality.is_valid {
        if let Some(reason) = quality.reason.clone() {
            log.reasoning.push(format!("final cut is below the quality gate: {}", reason));
        }
    }
    log.checkpoint(
        "clusters",
        outcome.k,
        format!("{} cut, quality {:.3}", outcome.cut_label, quality.score),
    );

    // 5) concepts per layer
    let concept_start = Instant::now();
    let primary_inputs = LayerInputs {
        layer: ConceptLayer::Primary,
        assignments: &outcome.assignments,
        k: outcome.k,
        parents: vec![None; outcome.k],
        cut_label: outcome.cut_label,
    };
    let mut primary = build_concepts(&primary_inputs, sentences, &vectors, bm25, config, dampening.as_deref());

    let primary_membership: Vec<Vec<Membership>> = if config.soft_membership {
        let centroids: Vec<Vector> = primary.iter().map(|c| c.centroid.clone()).collect();
        compute_soft_membership(&vectors, &centroids, &config.soft())
    } else {
        hard_membership(&outcome.assignments)
    };
    if config.soft_membership {
        for c in primary.iter_mut() {
            c.weight = 0.0;
        }
        for ms in &primary_membership {
            for m in ms {
                if let Some(c) = primary.get_mut(m.concept) {
                    c.weight += m.weight;
                }
            }
        }
    }

    let (detail, detail_membership) = match &outcome.detail {
        Some(d) => {
            let parents = d
                .parent_map
                .iter()
                .map(|&p| primary.get(p).map(|c| c.id.clone()))
                .collect();
            let inputs = LayerInputs {
                layer: ConceptLayer::Detail,
                assignments: &d.assignments,
                k: d.k,
                parents,
                cut_label: "detail",
            };
            (
                build_concepts(&inputs, sentences, &vectors, bm25, config, dampening.as_deref()),
                hard_membership(&d.assignments),
            )
        }
        None => (Vec::new(), Vec::new()),
    };
    info!(
        "Concepts built - duration={:.2}s, primary={}, detail={}",
        concept_start.elapsed().as_secs_f32(),
        primary.len(),
        detail.len()
    );
    log.checkpoint("concepts", primary.len() + detail.len(), format!("{} primary, {} detail", primary.len(), detail.len()));

    // 6) juror profiles
    let primary_weights = juror_weights(&sentence_juror, jurors.len(), &primary_membership, primary.len());
    let detail_weights = juror_weights(&sentence_juror, jurors.len(), &detail_membership, detail.len());
    let juror_vectors: Vec<JurorVector> = jurors
        .iter()
        .enumerate()
        .map(|(j, name)| JurorVector {
            juror: name.clone(),
            primary: primary_weights[j].clone(),
            detail: detail_weights[j].clone(),
        })
        .collect();

    // 7) layout
    let layout = compute_layout(&primary_weights, primary.len(), config);
    let labels: Vec<String> = primary.iter().map(|c| c.label.clone()).collect();
    let axis_labels = label_axes(
        &layout.concept_coords,
        &labels,
        &layout.variance.explained_variance_ratio,
        layout.variance.meaningful_dimensions,
        layout.variance.layout_dimensions,
    );
    info!(
        "Layout computed - meaningful_dims={}, layout_dims={}",
        layout.variance.meaningful_dimensions, layout.variance.layout_dimensions
    );
    log.checkpoint(
        "layout",
        layout.variance.layout_dimensions,
        format!("{} meaningful dimension(s)", layout.variance.meaningful_dimensions),
    );

    // 8) graph
    let ctx = GraphContext {
        sentences,
        jurors: &jurors,
        sentence_juror: &sentence_juror,
        juror_vectors: &juror_vectors,
        primary: &primary,
        primary_membership: &primary_membership,
        detail: &detail,
        detail_membership: &detail_membership,
        juror_layout: &layout.juror_layout,
        concept_layout: &layout.concept_layout,
    };
    let opts = GraphOptions {
        similarity_threshold: config.similarity_threshold,
        juror_link_threshold: config.juror_link_threshold,
        detail_jitter: config.detail_jitter * config.layout_scale,
        seed: config.seed,
    };
    let (nodes, links) = assemble_graph(&ctx, &opts);

    // 9) anchor axes
    let anchor_projections = if config.anchor_axes.is_empty() {
        Vec::new()
    } else {
        let concept_vectors: Vec<(String, Vector)> = primary
            .iter()
            .chain(detail.iter())
            .map(|c| (c.id.clone(), c.centroid.clone()))
            .collect();
        let juror_aggregates: Vec<(String, Vector)> = jurors
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let own: Vec<Vector> = sentence_juror
                    .iter()
                    .enumerate()
                    .filter(|(_, &o)| o == j)
                    .map(|(s, _)| vectors[s].clone())
                    .collect();
                (name.clone(), normalize(&mean_vector(&own)))
            })
            .collect();
        project_anchor_axes(&config.anchor_axes, &concept_vectors, &juror_aggregates, &mut log.diagnostics)
    };

    // 10) sentences with their assignments attached
    let sentences_out: Vec<SentenceRecord> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let mut s = s.clone();
            let top = primary_membership[i]
                .iter()
                .max_by(|a, b| a.weight.total_cmp(&b.weight).then(b.concept.cmp(&a.concept)))
                .and_then(|m| primary.get(m.concept));
            s.concept_id = top.map(|c| c.id.clone());
            if config.soft_membership {
                s.concept_membership = Some(
                    primary_membership[i]
                        .iter()
                        .filter_map(|m| {
                            primary.get(m.concept).map(|c| ConceptMembership {
                                concept_id: c.id.clone(),
                                weight: m.weight,
                            })
                        })
                        .collect(),
                );
            }
            s.detail_concept_id = detail_membership
                .get(i)
                .and_then(|ms| ms.first())
                .and_then(|m| detail.get(m.concept))
                .map(|c| c.id.clone());
            s
        })
        .collect();

    let stats = AnalysisStats {
        total_sentences: n,
        total_jurors: jurors.len(),
        total_concepts: primary.len(),
        total_detail_concepts: detail.len(),
        total_links: links.len(),
        chosen_k: outcome.k,
        quality_score: Some(quality.score),
    };
    log.checkpoint("final", nodes.len(), format!("{} nodes, {} links", nodes.len(), links.len()));
    info!(
        "Analysis completed - duration={:.2}s, concepts={}, nodes={}, links={}, diagnostics={}",
        run_start.elapsed().as_secs_f32(),
        stats.total_concepts,
        nodes.len(),
        links.len(),
        log.diagnostics.len()
    );

    Ok(AnalysisResult {
        nodes,
        links,
        concepts: primary,
        detail_concepts: detail,
        sentences: sentences_out,
        juror_vectors,
        variance: layout.variance,
        axis_labels,
        anchor_projections,
        checkpoints: log.checkpoints,
        reasoning: log.reasoning,
        diagnostics: log.diagnostics,
        quality: Some(quality),
        k_candidates: outcome.k_candidates,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoftMembershipOptions;
    use crate::models::Stance;
    use crate::testutil::{blobs, round_robin_jurors};

    fn corpus(groups: usize, per: usize, jurors: usize) -> (Vec<SentenceRecord>, Vec<Vector>) {
        let (vectors, truth) = blobs(groups, per, 8, 0.05, 11);
        let names = round_robin_jurors(vectors.len(), jurors);
        let sentences = truth
            .iter()
            .enumerate()
            .map(|(i, g)| SentenceRecord::new(format!("s{}", i), names[i].clone(), format!("theme{} remark {}", g, i), Stance::Neutral))
            .collect();
        (sentences, vectors)
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let (sentences, vectors) = corpus(2, 3, 2);
        let err = run_analysis(&sentences, &vectors[1..], &Bm25Model::default(), &AnalysisConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn empty_input_is_soft() {
        let res = run_analysis(&[], &[], &Bm25Model::default(), &AnalysisConfig::default()).unwrap();
        assert!(res.nodes.is_empty());
        assert_eq!(res.diagnostics[0].kind, DiagnosticKind::InputTooSmall);
        assert_eq!(res.checkpoints.last().map(|c| c.stage.as_str()), Some("final"));
    }

    #[test]
    fn oversized_k_is_clamped_and_reported() {
        let (sentences, vectors) = corpus(2, 2, 2);
        let cfg = AnalysisConfig {
            k_concepts: 10,
            ..AnalysisConfig::default()
        };
        let res = run_analysis(&sentences, &vectors, &Bm25Model::default(), &cfg).unwrap();
        assert!(res.stats.total_concepts <= 4);
        assert!(res.diagnostics.iter().any(|d| d.kind == DiagnosticKind::InputTooSmall));
    }

    #[test]
    fn two_layer_links_detail_to_primary() {
        let (sentences, vectors) = corpus(3, 8, 4);
        let cfg = AnalysisConfig {
            clustering_mode: ClusteringMode::Hierarchical,
            use_two_layer: true,
            ..AnalysisConfig::default()
        };
        let res = run_analysis(&sentences, &vectors, &Bm25Model::default(), &cfg).unwrap();
        let primary_ids: HashSet<&str> = res.concepts.iter().map(|c| c.id.as_str()).collect();
        assert!(!res.detail_concepts.is_empty());
        for d in &res.detail_concepts {
            assert!(primary_ids.contains(d.parent_id.as_deref().unwrap_or("")));
        }
        assert!(res.sentences.iter().all(|s| s.detail_concept_id.is_some()));
    }

    #[test]
    fn soft_membership_weights_sum_to_one() {
        let (sentences, vectors) = corpus(3, 6, 3);
        let cfg = AnalysisConfig {
            k_concepts: 3,
            soft_membership: true,
            ..AnalysisConfig::default()
        };
        let res = run_analysis(&sentences, &vectors, &Bm25Model::default(), &cfg).unwrap();
        for s in &res.sentences {
            let ms = s.concept_membership.as_ref().unwrap();
            let total: f64 = ms.iter().map(|m| m.weight).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn bridging_sentences_split_their_mass() {
        let (mut sentences, mut vectors) = corpus(2, 6, 3);
        for i in 0..3 {
            let mut v = vec![0.0; 8];
            v[0] = 1.0;
            v[1] = 0.5 + 0.05 * i as f64;
            vectors.push(normalize(&v));
            let idx = sentences.len();
            sentences.push(SentenceRecord::new(format!("s{}", idx), "juror-0", format!("bridge remark {}", i), Stance::Neutral));
        }
        let cfg = AnalysisConfig {
            k_concepts: 2,
            soft_membership: true,
            soft_top_n: 2,
            soft_options: SoftMembershipOptions {
                entropy_cap: 0.99,
                ..SoftMembershipOptions::default()
            },
            ..AnalysisConfig::default()
        };
        let res = run_analysis(&sentences, &vectors, &Bm25Model::default(), &cfg).unwrap();

        let multi = res
            .sentences
            .iter()
            .filter(|s| s.concept_membership.as_ref().map(Vec::len).unwrap_or(0) >= 2)
            .count();
        assert!(multi >= 1, "no sentence kept a split membership");

        let mut mass: HashMap<&str, f64> = HashMap::new();
        for s in &res.sentences {
            for m in s.concept_membership.as_deref().unwrap_or(&[]) {
                *mass.entry(m.concept_id.as_str()).or_insert(0.0) += m.weight;
            }
        }
        for c in &res.concepts {
            let expected = mass.get(c.id.as_str()).copied().unwrap_or(0.0);
            assert!((c.weight - expected).abs() < 1e-9, "{}: weight {} vs mass {}", c.id, c.weight, expected);
        }
        assert!(res.concepts.iter().any(|c| (c.weight - c.size as f64).abs() > 1e-6));
    }

    #[test]
    fn default_centroids_are_plain_member_means() {
        let (sentences, vectors) = corpus(3, 6, 3);
        let cfg = AnalysisConfig {
            k_concepts: 3,
            ..AnalysisConfig::default()
        };
        let res = run_analysis(&sentences, &vectors, &Bm25Model::default(), &cfg).unwrap();

        let index_of: HashMap<&str, usize> = res.concepts.iter().map(|c| (c.id.as_str(), c.index)).collect();
        let assignments: Vec<usize> = res
            .sentences
            .iter()
            .map(|s| s.concept_id.as_deref().and_then(|id| index_of.get(id)).copied().unwrap())
            .collect();
        let plain = compute_centroids(&vectors, &assignments, res.concepts.len(), None);
        for c in &res.concepts {
            for (a, b) in c.centroid.iter().zip(plain[c.index].iter()) {
                assert!((a - b).abs() < 1e-9);
            }
        }
    }
}
