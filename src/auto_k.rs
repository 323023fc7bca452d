use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::concepts::compute_centroids;
use crate::config::{AutoKOptions, QualityConstraints};
use crate::kmeans::{kmeans_cosine, silhouette_like};
use crate::models::Vector;
use crate::quality::evaluate_cut_quality;
use crate::similarity::relabel_contiguous;

const SILHOUETTE_SHARE: f64 = 0.6;
const QUALITY_SHARE: f64 = 0.4;
const MIN_CLUSTER_SIZE: usize = 2;
const HEALTHY_CLUSTER_SIZE: usize = 3;
const HEALTHY_SHARE: f64 = 0.75;
const STABILITY_SEEDS: u64 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KCandidate {
    pub k: usize,
    pub silhouette: f64,
    pub quality: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    pub dominance: f64,
    pub penalty: f64,
    pub score: f64,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoKResult {
    pub k: usize,
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vector>,
    pub candidates: Vec<KCandidate>,
    pub reasoning: String,
    /// True when no candidate passed and the best invalid one was kept.
    pub fallback: bool,
    pub short_circuited: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct AutoKParams {
    pub k_min: usize,
    pub k_max: usize,
    pub iterations: usize,
    pub seed: u64,
    pub options: AutoKOptions,
    pub constraints: QualityConstraints,
}

/// Adjusted Rand Index between two labelings of the same items.
pub fn adjusted_rand_index(a: &[usize], b: &[usize]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 1.0;
    }
    let mut table: HashMap<(usize, usize), u64> = HashMap::new();
    let mut rows: HashMap<usize, u64> = HashMap::new();
    let mut cols: HashMap<usize, u64> = HashMap::new();
    for i in 0..n {
        *table.entry((a[i], b[i])).or_insert(0) += 1;
        *rows.entry(a[i]).or_insert(0) += 1;
        *cols.entry(b[i]).or_insert(0) += 1;
    }
    let choose2 = |x: u64| (x * x.saturating_sub(1)) as f64 / 2.0;
    let index: f64 = table.values().map(|&x| choose2(x)).sum();
    let sum_rows: f64 = rows.values().map(|&x| choose2(x)).sum();
    let sum_cols: f64 = cols.values().map(|&x| choose2(x)).sum();
    let total = choose2(n as u64);
    let expected = sum_rows * sum_cols / total;
    let max_index = (sum_rows + sum_cols) / 2.0;
    let denom = max_index - expected;
    if denom.abs() < 1e-12 {
        return if (index - expected).abs() < 1e-12 { 1.0 } else { 0.0 };
    }
    (index - expected) / denom
}

struct RunOutcome {
    assignments: Vec<usize>,
    centroids: Vec<Vector>,
    silhouette: f64,
    quality: f64,
    dominance: f64,
    valid: bool,
    reason: Option<String>,
}

fn size_check(assignments: &[usize], k: usize) -> Option<String> {
    let mut sizes = vec![0usize; k];
    for &a in assignments {
        sizes[a] += 1;
    }
    if let Some(small) = sizes.iter().position(|&s| s < MIN_CLUSTER_SIZE) {
        return Some(format!("cluster {} has {} member(s)", small, sizes[small]));
    }
    let healthy = sizes.iter().filter(|&&s| s >= HEALTHY_CLUSTER_SIZE).count() as f64 / k as f64;
    if healthy <= HEALTHY_SHARE {
        return Some(format!("only {:.0}% of clusters have >= {} members", healthy * 100.0, HEALTHY_CLUSTER_SIZE));
    }
    None
}

fn run_once(vectors: &[Vector], jurors: &[String], k: usize, seed: u64, p: &AutoKParams) -> RunOutcome {
    let km = kmeans_cosine(vectors, k, p.iterations, seed);
    let (assignments, real_k) = relabel_contiguous(&km.assignments);
    let centroids = compute_centroids(vectors, &assignments, real_k, None);
    let silhouette = silhouette_like(vectors, &assignments, &centroids);
    let q = evaluate_cut_quality(&assignments, jurors, &centroids, &p.constraints);

    let reason = if real_k < k {
        Some(format!("k-means left {} empty cluster(s)", k - real_k))
    } else {
        size_check(&assignments, real_k)
    };
    RunOutcome {
        silhouette,
        quality: q.score,
        dominance: q.mean_dominance(),
        valid: reason.is_none(),
        reason,
        assignments,
        centroids,
    }
}

fn evaluate_k(vectors: &[Vector], jurors: &[String], k: usize, p: &AutoKParams) -> (KCandidate, RunOutcome) {
    let seeds: Vec<u64> = if p.options.stability {
        (0..STABILITY_SEEDS).map(|i| p.seed.wrapping_add(i)).collect()
    } else {
        vec![p.seed]
    };
    // The first seed's run is the one handed back if this K wins.
    let primary = run_once(vectors, jurors, k, seeds[0], p);
    let extra: Vec<RunOutcome> = seeds[1..].iter().map(|&s| run_once(vectors, jurors, k, s, p)).collect();
    let runs: Vec<&RunOutcome> = std::iter::once(&primary).chain(extra.iter()).collect();
    let m = runs.len() as f64;

    let silhouette = runs.iter().map(|r| r.silhouette).sum::<f64>() / m;
    let quality = runs.iter().map(|r| r.quality).sum::<f64>() / m;
    let dominance = runs.iter().map(|r| r.dominance).sum::<f64>() / m;
    let valid = runs.iter().all(|r| r.valid);
    let reason = runs.iter().find_map(|r| r.reason.clone());

    let stability = if runs.len() > 1 {
        let mut total = 0.0;
        let mut pairs = 0.0;
        for i in 0..runs.len() {
            for j in (i + 1)..runs.len() {
                total += adjusted_rand_index(&runs[i].assignments, &runs[j].assignments);
                pairs += 1.0;
            }
        }
        Some(total / pairs)
    } else {
        None
    };

    let base = SILHOUETTE_SHARE * silhouette + QUALITY_SHARE * quality;
    let bonus = stability.map(|s| s * p.options.stability_weight).unwrap_or(0.0);
    let complexity = p.options.complexity_penalty * (k - p.k_min) as f64;
    let over = (dominance - p.options.dominance_threshold).max(0.0);
    let dominance_penalty = p.options.dominance_penalty_weight * over * over;
    let penalty = complexity + dominance_penalty;
    let score = base + bonus - penalty;

    let candidate = KCandidate {
        k,
        silhouette,
        quality,
        stability,
        dominance,
        penalty,
        score,
        valid,
        reason,
    };
    (candidate, primary)
}

/// Champion walk in ascending K: a larger K must beat the current champion by
/// more than `epsilon` to take over.
fn pick_champion(candidates: &[KCandidate], epsilon: f64, only_valid: bool) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, c) in candidates.iter().enumerate() {
        if only_valid && !c.valid {
            continue;
        }
        match best {
            Some(b) if c.score <= candidates[b].score + epsilon => {}
            _ => best = Some(i),
        }
    }
    best
}

/// K just before the largest single-step score drop.
fn elbow_index(candidates: &[KCandidate]) -> Option<usize> {
    if candidates.len() < 3 {
        return None;
    }
    candidates
        .windows(2)
        .enumerate()
        .map(|(i, w)| (i, w[0].score - w[1].score))
        .filter(|(_, drop)| *drop > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(i, _)| i)
}

/// Sweep K over `[k_min, k_max]` (clamped to the corpus) and keep the best
/// penalised score, ties within epsilon going to the smaller K.
pub fn find_optimal_k(vectors: &[Vector], jurors: &[String], params: &AutoKParams) -> AutoKResult {
    let n = vectors.len();
    if n < params.k_min {
        warn!("Corpus smaller than kMin - n={}, kMin={}, using one cluster per vector", n, params.k_min);
        return AutoKResult {
            k: n,
            assignments: (0..n).collect(),
            centroids: vectors.to_vec(),
            candidates: Vec::new(),
            reasoning: format!("corpus of {} is below kMin={}; one cluster per sentence", n, params.k_min),
            fallback: true,
            short_circuited: true,
        };
    }

    let k_hi = params.k_max.min(n);
    let ks: Vec<usize> = (params.k_min..=k_hi).collect();
    if ks.is_empty() {
        warn!("Empty K range - kMin={}, kMax={}, using a single cluster", params.k_min, k_hi);
        return AutoKResult {
            k: 1,
            assignments: vec![0; n],
            centroids: vec![crate::similarity::normalize(&crate::similarity::mean_vector(vectors))],
            candidates: Vec::new(),
            reasoning: format!("empty K range [{}, {}]; single cluster", params.k_min, k_hi),
            fallback: true,
            short_circuited: true,
        };
    }
    debug!("Auto-K sweep starting - kMin={}, kMax={}, stability={}", params.k_min, k_hi, params.options.stability);

    let mut evaluated: Vec<(KCandidate, RunOutcome)> =
        ks.par_iter().map(|&k| evaluate_k(vectors, jurors, k, params)).collect();
    let candidates: Vec<KCandidate> = evaluated.iter().map(|(c, _)| c.clone()).collect();
    for c in &candidates {
        debug!(
            "Auto-K candidate - k={}, silhouette={:.3}, quality={:.3}, penalty={:.3}, score={:.3}, valid={}",
            c.k, c.silhouette, c.quality, c.penalty, c.score, c.valid
        );
    }

    let eps = params.options.epsilon;
    let (mut chosen, fallback) = match pick_champion(&candidates, eps, true) {
        Some(i) => (i, false),
        None => (pick_champion(&candidates, eps, false).unwrap_or(0), true),
    };

    let mut reasoning = if fallback {
        format!(
            "no K in [{}, {}] passed the size/quality gate; kept best invalid K={} (score {:.3})",
            params.k_min, k_hi, candidates[chosen].k, candidates[chosen].score
        )
    } else {
        format!(
            "K={} scored {:.3} (silhouette {:.3}, quality {:.3}, penalty {:.3})",
            candidates[chosen].k,
            candidates[chosen].score,
            candidates[chosen].silhouette,
            candidates[chosen].quality,
            candidates[chosen].penalty
        )
    };

    if !fallback && candidates[chosen].k == k_hi {
        if let Some(e) = elbow_index(&candidates) {
            let best = candidates[chosen].score;
            if e != chosen && candidates[e].valid && candidates[e].score >= best - eps {
                reasoning.push_str(&format!(
                    "; upper bound hit, elbow at K={} is within {:.2} so it wins",
                    candidates[e].k, eps
                ));
                chosen = e;
            }
        }
    }

    let (cand, run) = evaluated.swap_remove(chosen);
    info!("Auto-K selected - k={}, score={:.3}, fallback={}", cand.k, cand.score, fallback);

    AutoKResult {
        k: cand.k,
        assignments: run.assignments,
        centroids: run.centroids,
        candidates,
        reasoning,
        fallback,
        short_circuited: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{blobs, round_robin_jurors};
    use approx::assert_abs_diff_eq;

    fn params(k_min: usize, k_max: usize) -> AutoKParams {
        AutoKParams {
            k_min,
            k_max,
            iterations: 25,
            seed: 42,
            options: AutoKOptions::default(),
            constraints: QualityConstraints::default(),
        }
    }

    fn cand(k: usize, score: f64) -> KCandidate {
        KCandidate {
            k,
            silhouette: 0.0,
            quality: 0.0,
            stability: None,
            dominance: 0.0,
            penalty: 0.0,
            score,
            valid: true,
            reason: None,
        }
    }

    #[test]
    fn ari_identical_and_permuted() {
        assert_abs_diff_eq!(adjusted_rand_index(&[0, 0, 1, 1], &[1, 1, 0, 0]), 1.0, epsilon = 1e-12);
        assert!(adjusted_rand_index(&[0, 0, 1, 1], &[0, 1, 0, 1]) < 0.0);
    }

    #[test]
    fn ties_prefer_smaller_k() {
        let cs = vec![cand(3, 0.70), cand(4, 0.71), cand(5, 0.69)];
        assert_eq!(pick_champion(&cs, 0.02, true), Some(0));
        let cs = vec![cand(3, 0.70), cand(4, 0.80)];
        assert_eq!(pick_champion(&cs, 0.02, true), Some(1));
    }

    #[test]
    fn elbow_is_before_largest_drop() {
        let cs = vec![cand(3, 0.8), cand(4, 0.78), cand(5, 0.5), cand(6, 0.45)];
        assert_eq!(elbow_index(&cs), Some(1));
    }

    #[test]
    fn recovers_planted_k() {
        let (vectors, _) = blobs(4, 8, 8, 0.05, 17);
        let jurors = round_robin_jurors(vectors.len(), 4);
        let res = find_optimal_k(&vectors, &jurors, &params(2, 7));
        assert_eq!(res.k, 4, "{}", res.reasoning);
        assert!(!res.fallback);
        assert_eq!(res.candidates.len(), 6);
    }

    #[test]
    fn small_corpus_short_circuits() {
        let (vectors, _) = blobs(1, 2, 3, 0.1, 1);
        let jurors = round_robin_jurors(2, 2);
        let res = find_optimal_k(&vectors, &jurors, &params(3, 6));
        assert!(res.short_circuited);
        assert_eq!(res.assignments, vec![0, 1]);
    }

    #[test]
    fn stability_mode_reports_ari() {
        let (vectors, _) = blobs(3, 8, 6, 0.05, 5);
        let jurors = round_robin_jurors(vectors.len(), 4);
        let mut p = params(2, 4);
        p.options.stability = true;
        let res = find_optimal_k(&vectors, &jurors, &p);
        assert!(res.candidates.iter().all(|c| c.stability.is_some()));
        assert_eq!(res.k, 3);
    }
}
