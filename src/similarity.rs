use crate::models::Vector;

/// Below this norm a vector is treated as zero and divided by 1 instead.
pub const NORM_EPS: f64 = 1e-12;

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// L2-normalise. A zero vector falls back to a norm of 1 so it stays zero
/// instead of turning into NaN.
pub fn normalize(v: &[f64]) -> Vector {
    let norm = l2_norm(v);
    let denom = if norm < NORM_EPS { 1.0 } else { norm };
    v.iter().map(|x| x / denom).collect()
}

pub fn normalize_in_place(v: &mut [f64]) {
    let norm = l2_norm(v);
    let denom = if norm < NORM_EPS { 1.0 } else { norm };
    for x in v.iter_mut() {
        *x /= denom;
    }
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let na = l2_norm(a);
    let nb = l2_norm(b);
    if na < NORM_EPS || nb < NORM_EPS {
        return 0.0;
    }
    (dot(a, b) / (na * nb)).clamp(-1.0, 1.0)
}

/// Arithmetic mean of equally sized vectors; empty input yields an empty vector.
pub fn mean_vector(vectors: &[Vector]) -> Vector {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut out = vec![0.0; first.len()];
    for v in vectors {
        for (o, x) in out.iter_mut().zip(v.iter()) {
            *o += x;
        }
    }
    let n = vectors.len() as f64;
    out.iter_mut().for_each(|x| *x /= n);
    out
}

/// Index of the most similar candidate (first wins on ties) and its similarity.
pub fn argmax_similarity(v: &[f64], candidates: &[Vector]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, c) in candidates.iter().enumerate() {
        let s = cosine_similarity(v, c);
        match best {
            Some((_, bs)) if s <= bs => {}
            _ => best = Some((i, s)),
        }
    }
    best
}

/// Renumber arbitrary cluster labels to `0..K-1` in order of first appearance.
pub fn relabel_contiguous(assignments: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: std::collections::HashMap<usize, usize> = std::collections::HashMap::new();
    let relabeled = assignments
        .iter()
        .map(|&a| {
            let next = mapping.len();
            *mapping.entry(a).or_insert(next)
        })
        .collect();
    (relabeled, mapping.len())
}

/// Number of clusters implied by an assignment array (`max + 1`).
pub fn cluster_count(assignments: &[usize]) -> usize {
    assignments.iter().max().map(|m| m + 1).unwrap_or(0)
}
