use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::QualityConstraints;
use crate::models::Vector;
use crate::similarity::{cluster_count, cosine_similarity};

/// Centroid pairs above this cosine start to count as redundant.
const REDUNDANCY_FLOOR: f64 = 0.85;
const REDUNDANCY_SPAN: f64 = 0.15;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetrics {
    pub cluster: usize,
    pub effective_mass: f64,
    pub juror_support: usize,
    pub max_juror_dominance: f64,
    pub dominant_juror: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityPenalties {
    pub imbalance: f64,
    pub redundancy: f64,
    pub mass_violations: Vec<usize>,
    pub support_violations: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CutQualityScore {
    pub is_valid: bool,
    pub score: f64,
    pub penalties: QualityPenalties,
    pub clusters: Vec<ClusterMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CutQualityScore {
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Mean of per-cluster single-juror dominance.
    pub fn mean_dominance(&self) -> f64 {
        if self.clusters.is_empty() {
            return 0.0;
        }
        self.clusters.iter().map(|c| c.max_juror_dominance).sum::<f64>() / self.clusters.len() as f64
    }
}

/// Gini coefficient of non-negative masses; 0 for perfect balance.
pub fn gini(masses: &[f64]) -> f64 {
    let n = masses.len();
    let total: f64 = masses.iter().sum();
    if n < 2 || total <= 0.0 {
        return 0.0;
    }
    let mut sorted = masses.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, x)| (2.0 * (i as f64 + 1.0) - n as f64 - 1.0) * x)
        .sum();
    (weighted / (n as f64 * total)).clamp(0.0, 1.0)
}

/// Highest pairwise centroid cosine mapped onto `[0, 1]` above 0.85.
pub fn redundancy(centroids: &[Vector]) -> f64 {
    let mut max_sim = f64::NEG_INFINITY;
    for i in 0..centroids.len() {
        for j in (i + 1)..centroids.len() {
            max_sim = max_sim.max(cosine_similarity(&centroids[i], &centroids[j]));
        }
    }
    if !max_sim.is_finite() {
        return 0.0;
    }
    ((max_sim - REDUNDANCY_FLOOR) / REDUNDANCY_SPAN).clamp(0.0, 1.0)
}

/// Score and validate one cut. `jurors[i]` is the juror of sentence `i`;
/// `centroids` is indexed by cluster id and only feeds the redundancy term.
pub fn evaluate_cut_quality(
    assignments: &[usize],
    jurors: &[String],
    centroids: &[Vector],
    constraints: &QualityConstraints,
) -> CutQualityScore {
    let k = cluster_count(assignments);
    let mut mass = vec![0.0; k];
    let mut per_juror: Vec<HashMap<&str, f64>> = vec![HashMap::new(); k];
    for (i, &a) in assignments.iter().enumerate() {
        mass[a] += 1.0;
        let juror = jurors.get(i).map(String::as_str).unwrap_or("");
        *per_juror[a].entry(juror).or_insert(0.0) += 1.0;
    }

    let mut penalties = QualityPenalties::default();
    let mut clusters = Vec::with_capacity(k);
    for c in 0..k {
        // Ties on dominance resolve to the lexicographically first juror.
        let dominant = per_juror[c]
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(j, m)| (j.to_string(), *m));
        let dominance = match (&dominant, mass[c] > 0.0) {
            (Some((_, m)), true) => m / mass[c],
            _ => 0.0,
        };
        let support = per_juror[c].len();
        if mass[c] < constraints.min_effective_mass_per_concept {
            penalties.mass_violations.push(c);
        }
        if support < constraints.min_juror_support_per_concept {
            penalties.support_violations.push(c);
        }
        clusters.push(ClusterMetrics {
            cluster: c,
            effective_mass: mass[c],
            juror_support: support,
            max_juror_dominance: dominance,
            dominant_juror: dominant.map(|d| d.0),
        });
    }

    penalties.imbalance = gini(&mass);
    penalties.redundancy = redundancy(centroids);
    let score = (1.0
        - penalties.imbalance * constraints.imbalance_weight
        - penalties.redundancy * constraints.redundancy_weight)
        .clamp(0.0, 1.0);

    let is_valid = k > 0 && penalties.mass_violations.is_empty() && penalties.support_violations.is_empty();
    let reason = if k == 0 {
        Some("empty cut".to_string())
    } else if !is_valid {
        Some(format!(
            "{} cluster(s) below mass {}, {} cluster(s) below juror support {}",
            penalties.mass_violations.len(),
            constraints.min_effective_mass_per_concept,
            penalties.support_violations.len(),
            constraints.min_juror_support_per_concept
        ))
    } else {
        None
    };

    CutQualityScore {
        is_valid,
        score,
        penalties,
        clusters,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concepts::compute_centroids;
    use crate::testutil::{blobs, round_robin_jurors};
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn jurors(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn gini_of_equal_masses_is_zero() {
        assert_abs_diff_eq!(gini(&[4.0, 4.0, 4.0]), 0.0, epsilon = 1e-12);
        assert!(gini(&[1.0, 1.0, 10.0]) > 0.4);
    }

    #[test]
    fn low_juror_support_invalidates() {
        let assignments = vec![0, 0, 0, 1, 1, 1];
        let js = jurors(&["a", "b", "c", "d", "d", "d"]);
        let q = evaluate_cut_quality(&assignments, &js, &[], &QualityConstraints::default());
        assert!(!q.is_valid);
        assert_eq!(q.penalties.support_violations, vec![1]);
        assert_abs_diff_eq!(q.clusters[1].max_juror_dominance, 1.0, epsilon = 1e-12);
        assert_eq!(q.clusters[1].dominant_juror.as_deref(), Some("d"));
    }

    #[test]
    fn low_mass_invalidates() {
        let assignments = vec![0, 0, 0, 1, 1];
        let js = jurors(&["a", "b", "c", "a", "b"]);
        let q = evaluate_cut_quality(&assignments, &js, &[], &QualityConstraints::default());
        assert!(!q.is_valid);
        assert_eq!(q.penalties.mass_violations, vec![1]);
    }

    #[test]
    fn redundant_centroids_lower_score() {
        let assignments = vec![0, 0, 0, 1, 1, 1];
        let js = jurors(&["a", "b", "c", "a", "b", "c"]);
        let apart = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let close = vec![vec![1.0, 0.0], vec![1.0, 0.01]];
        let c = QualityConstraints::default();
        let qa = evaluate_cut_quality(&assignments, &js, &apart, &c);
        let qc = evaluate_cut_quality(&assignments, &js, &close, &c);
        assert!(qa.is_valid && qc.is_valid);
        assert!(qc.score < qa.score);
        assert_abs_diff_eq!(qa.score, 1.0, epsilon = 1e-12);
    }

    proptest! {
        #[test]
        fn mass_is_conserved(assign in proptest::collection::vec(0usize..5, 1..60)) {
            let (assign, _) = crate::similarity::relabel_contiguous(&assign);
            let js = round_robin_jurors(assign.len(), 4);
            let q = evaluate_cut_quality(&assign, &js, &[], &QualityConstraints::default());
            let total: f64 = q.clusters.iter().map(|c| c.effective_mass).sum();
            prop_assert_eq!(total as usize, assign.len());
            prop_assert!((0.0..=1.0).contains(&q.score));
        }

        #[test]
        fn support_below_minimum_is_never_valid(min_support in 2usize..6) {
            let (vectors, truth) = blobs(2, 6, 4, 0.05, 9);
            // Every sentence comes from one juror, so support is always 1.
            let js = vec!["solo".to_string(); vectors.len()];
            let centroids = compute_centroids(&vectors, &truth, 2, None);
            let c = QualityConstraints { min_juror_support_per_concept: min_support, ..QualityConstraints::default() };
            let q = evaluate_cut_quality(&truth, &js, &centroids, &c);
            prop_assert!(!q.is_valid);
        }
    }
}
