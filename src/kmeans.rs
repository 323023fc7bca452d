use serde::Serialize;
use tracing::debug;

use crate::models::Vector;
use crate::rng::Lcg;
use crate::similarity::{argmax_similarity, normalize_in_place};

pub const DEFAULT_ITERATIONS: usize = 25;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KMeansResult {
    pub k: usize,
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vector>,
    pub iterations_run: usize,
}

/// Cosine k-means with seeded distinct-index initialisation.
///
/// `k` larger than the corpus silently shrinks to `n`. Empty clusters keep a
/// zero centroid (no member ever picks it over a non-zero one unless all
/// similarities are non-positive).
pub fn kmeans_cosine(vectors: &[Vector], k: usize, iterations: usize, seed: u64) -> KMeansResult {
    let n = vectors.len();
    let k = k.min(n);
    if k == 0 {
        return KMeansResult {
            k: 0,
            assignments: Vec::new(),
            centroids: Vec::new(),
            iterations_run: 0,
        };
    }
    let dim = vectors[0].len();

    let mut rng = Lcg::new(seed);
    let mut chosen: Vec<usize> = Vec::with_capacity(k);
    while chosen.len() < k {
        let idx = rng.next_index(n);
        if !chosen.contains(&idx) {
            chosen.push(idx);
        }
    }
    let mut centroids: Vec<Vector> = chosen.iter().map(|&i| vectors[i].clone()).collect();

    let mut assignments = vec![usize::MAX; n];
    let mut iterations_run = 0;
    for iter in 0..iterations.max(1) {
        iterations_run = iter + 1;
        let mut changed = false;
        for (i, v) in vectors.iter().enumerate() {
            let best = argmax_similarity(v, &centroids).map(|b| b.0).unwrap_or(0);
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0; dim]; k];
        for (v, &a) in vectors.iter().zip(assignments.iter()) {
            for (s, x) in sums[a].iter_mut().zip(v.iter()) {
                *s += x;
            }
        }
        for s in sums.iter_mut() {
            normalize_in_place(s);
        }
        centroids = sums;
    }

    debug!("K-means finished - k={}, n={}, iterations={}, seed={}", k, n, iterations_run, seed);

    KMeansResult {
        k,
        assignments,
        centroids,
        iterations_run,
    }
}

/// Mean over points of (similarity to own centroid - best similarity to any
/// other centroid). Single-cluster cuts score 0.
pub fn silhouette_like(vectors: &[Vector], assignments: &[usize], centroids: &[Vector]) -> f64 {
    if vectors.is_empty() || centroids.len() < 2 {
        return 0.0;
    }
    let total: f64 = vectors
        .iter()
        .zip(assignments.iter())
        .map(|(v, &a)| {
            let own = crate::similarity::cosine_similarity(v, &centroids[a]);
            let other = centroids
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != a)
                .map(|(_, c)| crate::similarity::cosine_similarity(v, c))
                .fold(f64::NEG_INFINITY, f64::max);
            own - other
        })
        .sum();
    total / vectors.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::blobs;
    use proptest::prelude::*;

    #[test]
    fn separates_obvious_groups() {
        let (vectors, truth) = blobs(3, 6, 8, 0.05, 11);
        let res = kmeans_cosine(&vectors, 3, DEFAULT_ITERATIONS, 42);
        assert_eq!(res.k, 3);
        for g in 0..3 {
            let labels: Vec<usize> = truth
                .iter()
                .zip(res.assignments.iter())
                .filter(|(t, _)| **t == g)
                .map(|(_, a)| *a)
                .collect();
            assert!(labels.windows(2).all(|w| w[0] == w[1]), "group {} split: {:?}", g, labels);
        }
    }

    #[test]
    fn k_above_n_shrinks() {
        let (vectors, _) = blobs(1, 2, 4, 0.1, 1);
        let res = kmeans_cosine(&vectors, 9, 10, 5);
        assert_eq!(res.k, 2);
        assert!(res.assignments.iter().all(|&a| a < 2));
    }

    #[test]
    fn empty_input_is_empty_result() {
        let res = kmeans_cosine(&[], 3, 10, 1);
        assert_eq!(res.k, 0);
        assert!(res.assignments.is_empty());
    }

    #[test]
    fn silhouette_rewards_separation() {
        let (vectors, truth) = blobs(2, 5, 6, 0.05, 3);
        let good = kmeans_cosine(&vectors, 2, 25, 42);
        let s = silhouette_like(&vectors, &good.assignments, &good.centroids);
        assert!(s > 0.3, "silhouette {}", s);
        assert_eq!(truth.len(), good.assignments.len());
    }

    proptest! {
        #[test]
        fn same_seed_is_bit_identical(seed in 0u64..10_000, k in 1usize..6) {
            let (vectors, _) = blobs(4, 5, 6, 0.3, seed);
            let a = kmeans_cosine(&vectors, k, 25, seed);
            let b = kmeans_cosine(&vectors, k, 25, seed);
            prop_assert_eq!(&a.assignments, &b.assignments);
            for (ca, cb) in a.centroids.iter().zip(b.centroids.iter()) {
                for (x, y) in ca.iter().zip(cb.iter()) {
                    prop_assert_eq!(x.to_bits(), y.to_bits());
                }
            }
            prop_assert!(a.assignments.iter().all(|&x| x < a.k));
        }
    }
}
