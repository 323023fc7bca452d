use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::concepts::compute_centroids;
use crate::config::QualityConstraints;
use crate::hierarchy::{build_dendrogram, cut_dendrogram_by_threshold, QualityGuard, ThresholdCut};
use crate::models::Vector;
use crate::quality::{evaluate_cut_quality, CutQualityScore};
use crate::similarity::cluster_count;

#[derive(Debug, Clone)]
pub struct TwoLayerOptions {
    pub primary_granularity: f64,
    pub detail_granularity: f64,
    /// Sweep `[min, max]` in `step` increments instead of a fixed detail cut.
    pub detail_auto_range: Option<[f64; 2]>,
    pub detail_step: f64,
    pub primary_constraints: QualityConstraints,
    pub detail_constraints: QualityConstraints,
}

impl Default for TwoLayerOptions {
    fn default() -> Self {
        Self {
            primary_granularity: 70.0,
            detail_granularity: 30.0,
            detail_auto_range: None,
            detail_step: 10.0,
            primary_constraints: QualityConstraints::default(),
            detail_constraints: QualityConstraints::relaxed(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailChoice {
    pub primary: usize,
    pub granularity: f64,
    pub clusters: usize,
    pub valid: bool,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoLayerResult {
    pub primary_assignments: Vec<usize>,
    pub primary_k: usize,
    pub primary_cut: ThresholdCut,
    /// Global detail ids, unique across all primaries.
    pub detail_assignments: Vec<usize>,
    pub detail_k: usize,
    /// `detail id -> primary id`
    pub parent_map: Vec<usize>,
    pub detail_choices: Vec<DetailChoice>,
    pub reasoning: Vec<String>,
}

fn granularity_steps(lo: f64, hi: f64, step: f64) -> Vec<f64> {
    let mut out = Vec::new();
    let mut g = lo;
    while g <= hi + 1e-9 {
        out.push(g.min(100.0));
        g += step;
    }
    out
}

fn sweep_detail(
    vectors: &[Vector],
    jurors: &[String],
    range: [f64; 2],
    step: f64,
) -> (Vec<usize>, f64, Option<CutQualityScore>) {
    let dendrogram = build_dendrogram(vectors);
    let steps = granularity_steps(range[0], range[1], step.max(1.0));
    let constraints = QualityConstraints::default();

    let scored: Vec<(f64, Vec<usize>, CutQualityScore)> = steps
        .par_iter()
        .map(|&g| {
            let cut = cut_dendrogram_by_threshold(&dendrogram, g, None);
            let centroids = compute_centroids(vectors, &cut.assignments, cut.k, None);
            let q = evaluate_cut_quality(&cut.assignments, jurors, &centroids, &constraints);
            (g, cut.assignments, q)
        })
        .collect();

    // A detail cut that does not split anything adds nothing, so it never wins.
    let mut best: Option<usize> = None;
    for (i, (_, assignments, q)) in scored.iter().enumerate() {
        if !q.is_valid || cluster_count(assignments) < 2 {
            continue;
        }
        match best {
            Some(b) if q.score <= scored[b].2.score => {}
            _ => best = Some(i),
        }
    }
    let pick = best.unwrap_or(scored.len().saturating_sub(1));
    match scored.into_iter().nth(pick) {
        Some((g, assignments, q)) => (assignments, g, Some(q)),
        None => (vec![0; vectors.len()], range[0], None),
    }
}

/// Coarse primary cut over everything, then an independent detail cut inside
/// each primary cluster.
pub fn build_two_layer(vectors: &[Vector], jurors: &[String], opts: &TwoLayerOptions) -> TwoLayerResult {
    let n = vectors.len();
    let mut reasoning = Vec::new();

    let dendrogram = build_dendrogram(vectors);
    let guard = QualityGuard {
        vectors,
        jurors,
        constraints: opts.primary_constraints,
    };
    let primary_cut = cut_dendrogram_by_threshold(&dendrogram, opts.primary_granularity, Some(&guard));
    let primary_k = primary_cut.k;
    reasoning.push(format!(
        "primary cut at granularity {} (requested {}) gave {} concept(s) after {} attempt(s){}",
        primary_cut.granularity_used,
        primary_cut.requested_granularity,
        primary_k,
        primary_cut.attempts,
        if primary_cut.is_valid() { "" } else { ", still below the quality gate" }
    ));

    let mut detail_assignments = vec![0usize; n];
    let mut parent_map = Vec::new();
    let mut detail_choices = Vec::with_capacity(primary_k);

    for p in 0..primary_k {
        let members: Vec<usize> = (0..n).filter(|&i| primary_cut.assignments[i] == p).collect();
        let sub_vectors: Vec<Vector> = members.iter().map(|&i| vectors[i].clone()).collect();
        let sub_jurors: Vec<String> = members.iter().map(|&i| jurors[i].clone()).collect();

        let (local, granularity, quality) = if members.len() < 2 {
            (vec![0; members.len()], opts.detail_granularity, None)
        } else if let Some(range) = opts.detail_auto_range {
            sweep_detail(&sub_vectors, &sub_jurors, range, opts.detail_step)
        } else {
            let sub_dendrogram = build_dendrogram(&sub_vectors);
            let sub_guard = QualityGuard {
                vectors: &sub_vectors,
                jurors: &sub_jurors,
                constraints: opts.detail_constraints,
            };
            let cut = cut_dendrogram_by_threshold(&sub_dendrogram, opts.detail_granularity, Some(&sub_guard));
            (cut.assignments, cut.granularity_used, cut.quality)
        };

        let local_k = cluster_count(&local);
        let offset = parent_map.len();
        for (m, &l) in members.iter().zip(local.iter()) {
            detail_assignments[*m] = offset + l;
        }
        parent_map.extend(std::iter::repeat(p).take(local_k));
        debug!("Detail cut - primary={}, members={}, detail_k={}, granularity={}", p, members.len(), local_k, granularity);

        detail_choices.push(DetailChoice {
            primary: p,
            granularity,
            clusters: local_k,
            valid: quality.as_ref().map(|q| q.is_valid).unwrap_or(true),
            score: quality.map(|q| q.score),
        });
    }

    let detail_k = parent_map.len();
    reasoning.push(format!(
        "detail layer: {} sub-concept(s) under {} primary concept(s){}",
        detail_k,
        primary_k,
        if opts.detail_auto_range.is_some() { " (granularity swept per primary)" } else { "" }
    ));
    info!("Two-layer hierarchy built - primary={}, detail={}", primary_k, detail_k);

    TwoLayerResult {
        primary_assignments: primary_cut.assignments.clone(),
        primary_k,
        primary_cut,
        detail_assignments,
        detail_k,
        parent_map,
        detail_choices,
        reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::round_robin_jurors;
    use crate::rng::Lcg;
    use crate::similarity::normalize;

    /// Two themes, each with two tight sub-themes.
    fn nested(per_sub: usize) -> Vec<Vector> {
        let mut rng = Lcg::new(99);
        let mut out = Vec::new();
        for theme in 0..2 {
            for sub in 0..2 {
                for _ in 0..per_sub {
                    let mut v = vec![0.0; 6];
                    v[theme * 3] = 1.0;
                    v[theme * 3 + 1 + sub] = 0.6;
                    for x in v.iter_mut() {
                        *x += rng.jitter(0.02);
                    }
                    out.push(normalize(&v));
                }
            }
        }
        out
    }

    #[test]
    fn parent_map_covers_every_detail_id() {
        let vectors = nested(5);
        let jurors = round_robin_jurors(vectors.len(), 4);
        let res = build_two_layer(&vectors, &jurors, &TwoLayerOptions::default());
        assert_eq!(res.parent_map.len(), res.detail_k);
        assert_eq!(cluster_count(&res.detail_assignments), res.detail_k);
        for (i, &d) in res.detail_assignments.iter().enumerate() {
            assert_eq!(res.parent_map[d], res.primary_assignments[i]);
        }
        assert!(res.detail_k >= res.primary_k);
    }

    #[test]
    fn auto_range_records_a_choice_per_primary() {
        let vectors = nested(5);
        let jurors = round_robin_jurors(vectors.len(), 4);
        let opts = TwoLayerOptions {
            detail_auto_range: Some([10.0, 60.0]),
            ..TwoLayerOptions::default()
        };
        let res = build_two_layer(&vectors, &jurors, &opts);
        assert_eq!(res.detail_choices.len(), res.primary_k);
        assert!(res.detail_choices.iter().all(|c| (10.0..=60.0).contains(&c.granularity)));
    }

    #[test]
    fn steps_include_both_ends() {
        assert_eq!(granularity_steps(10.0, 30.0, 10.0), vec![10.0, 20.0, 30.0]);
    }
}
