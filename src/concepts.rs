//! Post-processing over a finished cut: centroids, near-duplicate merge,
//! soft membership and content-derived concept ids.

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::{MergeOptions, SoftMembershipOptions};
use crate::models::Vector;
use crate::similarity::{cosine_similarity, normalize_in_place, relabel_contiguous};
use crate::union_find::UnionFind;

/// Slack on the merge threshold so a pair sitting exactly on it never merges
/// because of rounding.
const MERGE_EPS: f64 = 1e-9;
/// Dimensions sampled from a centroid when deriving its stable id.
const ID_SAMPLE: usize = 16;
const ID_QUANT: f64 = 100.0;

/// Weighted mean of member vectors per cluster, L2-renormalised.
/// Clusters without members keep a zero centroid.
pub fn compute_centroids(vectors: &[Vector], assignments: &[usize], k: usize, weights: Option<&[f64]>) -> Vec<Vector> {
    let dim = vectors.first().map(Vec::len).unwrap_or(0);
    let mut sums = vec![vec![0.0; dim]; k];
    for (i, (v, &a)) in vectors.iter().zip(assignments.iter()).enumerate() {
        if a >= k {
            continue;
        }
        let w = weights.and_then(|w| w.get(i)).copied().unwrap_or(1.0);
        for (s, x) in sums[a].iter_mut().zip(v.iter()) {
            *s += w * x;
        }
    }
    for s in sums.iter_mut() {
        normalize_in_place(s);
    }
    sums
}

/// Per-sentence weight `sqrt(avg sentences per juror / this juror's count)`,
/// so a prolific juror cannot dominate a concept's identity.
pub fn juror_dampening_weights(jurors: &[String]) -> Vec<f64> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for j in jurors {
        *counts.entry(j.as_str()).or_insert(0) += 1;
    }
    if counts.is_empty() {
        return Vec::new();
    }
    let avg = jurors.len() as f64 / counts.len() as f64;
    jurors
        .iter()
        .map(|j| {
            let c = counts.get(j.as_str()).copied().unwrap_or(1) as f64;
            (avg / c).sqrt()
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub assignments: Vec<usize>,
    pub k: usize,
    pub merged_count: usize,
    /// `old cluster id -> new cluster id`
    pub mapping: Vec<usize>,
}

/// Merge near-duplicate clusters: every centroid pair above the threshold
/// folds the smaller set into the larger, unless both sets (as merged so far)
/// are above the size cap. Chains collapse through union-find; ids are
/// re-packed to `0..K'-1`. `merged_count` is the number of sets removed.
pub fn semantic_merge_concepts(assignments: &[usize], centroids: &[Vector], opts: &MergeOptions) -> MergeResult {
    let k = centroids.len();
    let n = assignments.len();
    if k == 0 {
        let (packed, new_k) = relabel_contiguous(assignments);
        return MergeResult {
            assignments: packed,
            k: new_k,
            merged_count: 0,
            mapping: Vec::new(),
        };
    }
    let mut sizes = vec![0usize; k];
    for &a in assignments {
        if a < k {
            sizes[a] += 1;
        }
    }
    let cap = opts.max_size_ratio * n as f64;

    let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
    for i in 0..k {
        for j in (i + 1)..k {
            let sim = cosine_similarity(&centroids[i], &centroids[j]);
            if sim - opts.similarity_threshold > MERGE_EPS {
                pairs.push((i, j, sim));
            }
        }
    }
    pairs.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)).then(a.1.cmp(&b.1)));

    let mut uf = UnionFind::with_sizes(sizes);
    let mut merged_count = 0;
    for (i, j, sim) in pairs {
        let (ri, rj) = (uf.find(i), uf.find(j));
        if ri == rj {
            continue;
        }
        // Cap applies to the sets as merged so far, not the original clusters.
        let (si, sj) = (uf.set_size(ri), uf.set_size(rj));
        if si as f64 > cap && sj as f64 > cap {
            debug!("Merge skipped, both sets above size cap - a={}, b={}, sim={:.3}", i, j, sim);
            continue;
        }
        let (large, small) = if si >= sj { (ri, rj) } else { (rj, ri) };
        if uf.union(large, small) {
            merged_count += 1;
            debug!("Merged concepts - from={}, into={}, sim={:.3}", small, large, sim);
        }
    }

    let roots = uf.roots();
    debug_assert_eq!(
        roots.iter().collect::<std::collections::HashSet<_>>().len() + merged_count,
        k,
        "every counted merge removes exactly one set"
    );
    let rooted: Vec<usize> = assignments.iter().map(|&a| roots[a.min(k - 1)]).collect();
    let (packed, new_k) = relabel_contiguous(&rooted);

    let mut by_root: HashMap<usize, usize> = HashMap::new();
    for (r, p) in rooted.iter().zip(packed.iter()) {
        by_root.insert(*r, *p);
    }
    // Clusters with no members (possible after k-means) keep a slot at the end.
    let mut extra = new_k;
    let mapping = (0..k)
        .map(|c| {
            by_root.get(&roots[c]).copied().unwrap_or_else(|| {
                let id = extra;
                extra += 1;
                id
            })
        })
        .collect();

    MergeResult {
        assignments: packed,
        k: new_k,
        merged_count,
        mapping,
    }
}

/// One sentence's share in one concept (index space of the cut).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Membership {
    pub concept: usize,
    pub weight: f64,
}

/// Entropy of a weight distribution normalised by `ln(len)`.
pub fn normalized_entropy(weights: &[f64]) -> f64 {
    if weights.len() < 2 {
        return 0.0;
    }
    let h: f64 = weights.iter().filter(|w| **w > 0.0).map(|w| -w * w.ln()).sum();
    h / (weights.len() as f64).ln()
}

fn renormalize(ms: &mut [Membership]) {
    let total: f64 = ms.iter().map(|m| m.weight).sum();
    if total > 0.0 {
        ms.iter_mut().for_each(|m| m.weight /= total);
    }
}

/// Top-N cosine similarities per sentence turned into weights summing to 1.
/// Small shares are dropped; distributions that stay too flat collapse to a
/// hard top-1 membership.
pub fn compute_soft_membership(vectors: &[Vector], centroids: &[Vector], opts: &SoftMembershipOptions) -> Vec<Vec<Membership>> {
    let top_n = opts.top_n.max(1);
    vectors
        .iter()
        .map(|v| {
            let mut sims: Vec<Membership> = centroids
                .iter()
                .enumerate()
                .map(|(c, centroid)| Membership {
                    concept: c,
                    weight: cosine_similarity(v, centroid),
                })
                .collect();
            sims.sort_by(|a, b| b.weight.total_cmp(&a.weight).then(a.concept.cmp(&b.concept)));
            let Some(top) = sims.first().copied() else {
                return Vec::new();
            };
            let hard = vec![Membership {
                concept: top.concept,
                weight: 1.0,
            }];

            sims.truncate(top_n);
            sims.iter_mut().for_each(|m| m.weight = m.weight.max(0.0));
            if sims.iter().map(|m| m.weight).sum::<f64>() <= 0.0 {
                return hard;
            }
            renormalize(&mut sims);
            sims.retain(|m| m.weight >= opts.min_weight);
            if sims.is_empty() {
                return hard;
            }
            renormalize(&mut sims);

            let ws: Vec<f64> = sims.iter().map(|m| m.weight).collect();
            if normalized_entropy(&ws) > opts.entropy_cap {
                return hard;
            }
            sims
        })
        .collect()
}

/// Hard assignment expressed as single-entry memberships.
pub fn hard_membership(assignments: &[usize]) -> Vec<Vec<Membership>> {
    assignments
        .iter()
        .map(|&a| vec![Membership { concept: a, weight: 1.0 }])
        .collect()
}

fn quantized_sample(centroid: &[f64]) -> Vec<i64> {
    if centroid.is_empty() {
        return Vec::new();
    }
    let stride = (centroid.len() / ID_SAMPLE).max(1);
    centroid
        .iter()
        .step_by(stride)
        .take(ID_SAMPLE)
        .map(|x| (x * ID_QUANT).round() as i64)
        .collect()
}

/// Content-derived concept id: hash of a quantised centroid sample plus the
/// parent lineage and cut-type label. Independent of cluster index.
pub fn stable_concept_id(centroid: &[f64], parent: Option<&str>, cut_label: &str) -> String {
    let sample = quantized_sample(centroid)
        .iter()
        .map(|q| q.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let seed = format!("{}|{}|{}", sample, parent.unwrap_or("-"), cut_label);
    format!("c{:012x}", xxh3_64(seed.as_bytes()) & 0xffff_ffff_ffff)
}

/// Stable ids for a whole layer; collisions get `-2`, `-3`, ... suffixes in
/// index order.
pub fn assign_stable_ids(centroids: &[Vector], parents: &[Option<String>], cut_label: &str) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let parent = parents.get(i).and_then(|p| p.as_deref());
            let base = stable_concept_id(c, parent, cut_label);
            let n = seen.entry(base.clone()).or_insert(0);
            *n += 1;
            if *n == 1 {
                base
            } else {
                format!("{}-{}", base, n)
            }
        })
        .collect()
}
