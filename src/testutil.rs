//! Synthetic corpora shared by unit tests.

use crate::models::Vector;
use crate::rng::Lcg;
use crate::similarity::normalize;

/// `groups` tight clusters around orthogonal basis directions, `per_group`
/// points each, unit-normalised. Returns vectors and their true group.
pub fn blobs(groups: usize, per_group: usize, dim: usize, noise: f64, seed: u64) -> (Vec<Vector>, Vec<usize>) {
    assert!(dim >= groups, "need one axis per group");
    let mut rng = Lcg::new(seed);
    let mut vectors = Vec::with_capacity(groups * per_group);
    let mut truth = Vec::with_capacity(groups * per_group);
    for g in 0..groups {
        for _ in 0..per_group {
            let mut v: Vector = (0..dim).map(|_| rng.jitter(noise)).collect();
            v[g] += 1.0;
            vectors.push(normalize(&v));
            truth.push(g);
        }
    }
    (vectors, truth)
}

/// Juror labels assigned round-robin over `jurors` names.
pub fn round_robin_jurors(n: usize, jurors: usize) -> Vec<String> {
    (0..n).map(|i| format!("juror-{}", i % jurors)).collect()
}
