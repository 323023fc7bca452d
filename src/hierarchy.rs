use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::concepts::compute_centroids;
use crate::config::QualityConstraints;
use crate::models::Vector;
use crate::quality::{evaluate_cut_quality, CutQualityScore};
use crate::similarity::{cosine_similarity, relabel_contiguous};
use crate::union_find::UnionFind;

/// Granularity added per relaxation retry.
pub const RELAX_STEP: f64 = 10.0;
/// Retries after the initial cut.
pub const MAX_RELAX_ATTEMPTS: usize = 5;

/// Ids below `n` are leaves, merge `m` creates cluster `n + m`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DendrogramMerge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dendrogram {
    pub n: usize,
    pub merges: Vec<DendrogramMerge>,
}

impl Dendrogram {
    pub fn min_distance(&self) -> f64 {
        self.merges.iter().map(|m| m.distance).fold(f64::INFINITY, f64::min)
    }

    pub fn max_distance(&self) -> f64 {
        self.merges.iter().map(|m| m.distance).fold(f64::NEG_INFINITY, f64::max)
    }

    /// Distance threshold for a 0..=100 granularity, interpolated between
    /// the smallest and largest merge distance.
    pub fn threshold_for(&self, granularity_percent: f64) -> f64 {
        if self.merges.is_empty() {
            return 0.0;
        }
        let (lo, hi) = (self.min_distance(), self.max_distance());
        lo + (hi - lo) * (granularity_percent.clamp(0.0, 100.0) / 100.0)
    }
}

/// Greedy centroid-linkage merger: cluster similarity is the cosine between
/// member-vector sums.
struct Agglomerator {
    sums: Vec<Vector>,
    sizes: Vec<usize>,
    ids: Vec<usize>,
    active: Vec<bool>,
    sim: Vec<Vec<f64>>,
    leaves: UnionFind,
    next_id: usize,
    remaining: usize,
}

impl Agglomerator {
    fn new(vectors: &[Vector]) -> Self {
        let n = vectors.len();
        let mut sim = vec![vec![f64::NEG_INFINITY; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let s = cosine_similarity(&vectors[i], &vectors[j]);
                sim[i][j] = s;
                sim[j][i] = s;
            }
        }
        Self {
            sums: vectors.to_vec(),
            sizes: vec![1; n],
            ids: (0..n).collect(),
            active: vec![true; n],
            sim,
            leaves: UnionFind::new(n),
            next_id: n,
            remaining: n,
        }
    }

    fn best_pair(&self) -> Option<(usize, usize, f64)> {
        let n = self.active.len();
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..n {
            if !self.active[i] {
                continue;
            }
            for j in (i + 1)..n {
                if !self.active[j] {
                    continue;
                }
                let s = self.sim[i][j];
                match best {
                    Some((_, _, bs)) if s <= bs => {}
                    _ => best = Some((i, j, s)),
                }
            }
        }
        best
    }

    /// Merge the closest pair, folding slot `j` into slot `i`.
    fn step(&mut self) -> Option<DendrogramMerge> {
        let (i, j, s) = self.best_pair()?;
        let merge = DendrogramMerge {
            left: self.ids[i],
            right: self.ids[j],
            distance: 1.0 - s,
            size: self.sizes[i] + self.sizes[j],
        };

        let moved = std::mem::take(&mut self.sums[j]);
        for (a, b) in self.sums[i].iter_mut().zip(moved.iter()) {
            *a += b;
        }
        self.sizes[i] = merge.size;
        self.active[j] = false;
        self.ids[i] = self.next_id;
        self.next_id += 1;
        self.remaining -= 1;
        self.leaves.union(i, j);

        for o in 0..self.active.len() {
            if o == i || !self.active[o] {
                continue;
            }
            let s = cosine_similarity(&self.sums[i], &self.sums[o]);
            self.sim[i][o] = s;
            self.sim[o][i] = s;
        }
        Some(merge)
    }

    fn labels(&mut self) -> Vec<usize> {
        relabel_contiguous(&self.leaves.roots()).0
    }
}

pub fn build_dendrogram(vectors: &[Vector]) -> Dendrogram {
    let mut agg = Agglomerator::new(vectors);
    let mut merges = Vec::with_capacity(vectors.len().saturating_sub(1));
    while agg.remaining > 1 {
        match agg.step() {
            Some(m) => merges.push(m),
            None => break,
        }
    }
    debug!("Dendrogram built - leaves={}, merges={}", vectors.len(), merges.len());
    Dendrogram {
        n: vectors.len(),
        merges,
    }
}

/// Exact-K cut: keeps merging nearest pairs until `k` clusters remain.
/// Runs its own agglomeration rather than replaying a stored dendrogram.
pub fn cut_dendrogram_by_count(vectors: &[Vector], k: usize) -> Vec<usize> {
    let target = k.clamp(1, vectors.len().max(1));
    let mut agg = Agglomerator::new(vectors);
    while agg.remaining > target {
        if agg.step().is_none() {
            break;
        }
    }
    agg.labels()
}

/// Everything the relaxation loop needs to judge a cut.
#[derive(Debug, Clone, Copy)]
pub struct QualityGuard<'a> {
    pub vectors: &'a [Vector],
    pub jurors: &'a [String],
    pub constraints: QualityConstraints,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdCut {
    pub assignments: Vec<usize>,
    pub k: usize,
    pub requested_granularity: f64,
    pub granularity_used: f64,
    pub attempts: usize,
    pub quality: Option<CutQualityScore>,
}

impl ThresholdCut {
    pub fn is_valid(&self) -> bool {
        self.quality.as_ref().map(|q| q.is_valid).unwrap_or(true)
    }
}

/// Replay merges strictly below the granularity's threshold; 100 replays
/// every merge.
fn replay_below(dendrogram: &Dendrogram, granularity_percent: f64) -> Vec<usize> {
    let n = dendrogram.n;
    let threshold = dendrogram.threshold_for(granularity_percent);
    let everything = granularity_percent >= 100.0;
    let mut uf = UnionFind::new(n);
    let mut rep: Vec<usize> = (0..n).collect();
    for m in &dendrogram.merges {
        let (l, r) = (rep[m.left], rep[m.right]);
        rep.push(l);
        if everything || m.distance < threshold {
            uf.union(l, r);
        }
    }
    relabel_contiguous(&uf.roots()).0
}

/// Cut at a granularity. With a guard, a cut failing the quality gate is
/// retried at coarser granularity (fewer, larger clusters) until it passes
/// or the retries run out; the last attempt is returned either way.
pub fn cut_dendrogram_by_threshold(
    dendrogram: &Dendrogram,
    granularity_percent: f64,
    guard: Option<&QualityGuard<'_>>,
) -> ThresholdCut {
    let mut granularity = granularity_percent.clamp(0.0, 100.0);
    let mut attempts = 0;
    loop {
        attempts += 1;
        let assignments = replay_below(dendrogram, granularity);
        let k = crate::similarity::cluster_count(&assignments);
        let quality = guard.map(|g| {
            let centroids = compute_centroids(g.vectors, &assignments, k, None);
            evaluate_cut_quality(&assignments, g.jurors, &centroids, &g.constraints)
        });
        let valid = quality.as_ref().map(|q| q.is_valid).unwrap_or(true);
        let exhausted = attempts > MAX_RELAX_ATTEMPTS || granularity >= 100.0;
        if valid || exhausted {
            if !valid {
                warn!(
                    "Threshold cut still invalid after relaxation - requested={}, used={}, attempts={}, k={}",
                    granularity_percent, granularity, attempts, k
                );
            } else if attempts > 1 {
                debug!(
                    "Threshold cut relaxed - requested={}, used={}, attempts={}, k={}",
                    granularity_percent, granularity, attempts, k
                );
            }
            return ThresholdCut {
                assignments,
                k,
                requested_granularity: granularity_percent,
                granularity_used: granularity,
                attempts,
                quality,
            };
        }
        granularity = (granularity + RELAX_STEP).min(100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::{cluster_count, normalize};
    use crate::testutil::{blobs, round_robin_jurors};

    fn spread_line(n: usize) -> Vec<Vector> {
        // Points on the unit circle with growing gaps between neighbours.
        let mut angle = 0.0f64;
        (0..n)
            .map(|i| {
                angle += 0.05 * (i as f64 + 1.0);
                normalize(&[angle.cos(), angle.sin()])
            })
            .collect()
    }

    #[test]
    fn dendrogram_has_n_minus_one_merges() {
        let (vectors, _) = blobs(3, 4, 5, 0.1, 4);
        let d = build_dendrogram(&vectors);
        assert_eq!(d.merges.len(), vectors.len() - 1);
        assert_eq!(d.merges.last().map(|m| m.size), Some(vectors.len()));
    }

    #[test]
    fn granularity_zero_gives_singletons() {
        let vectors = spread_line(8);
        let d = build_dendrogram(&vectors);
        let cut = cut_dendrogram_by_threshold(&d, 0.0, None);
        assert_eq!(cut.k, 8);
    }

    #[test]
    fn granularity_hundred_gives_one_cluster() {
        let vectors = spread_line(8);
        let d = build_dendrogram(&vectors);
        let cut = cut_dendrogram_by_threshold(&d, 100.0, None);
        assert_eq!(cut.k, 1);
        assert!(cut.assignments.iter().all(|&a| a == 0));
    }

    #[test]
    fn count_cut_is_exact_and_contiguous() {
        let (vectors, truth) = blobs(4, 5, 6, 0.05, 21);
        let labels = cut_dendrogram_by_count(&vectors, 4);
        assert_eq!(cluster_count(&labels), 4);
        for g in 0..4 {
            let ls: Vec<usize> = truth.iter().zip(labels.iter()).filter(|(t, _)| **t == g).map(|(_, l)| *l).collect();
            assert!(ls.windows(2).all(|w| w[0] == w[1]));
        }
    }

    #[test]
    fn relaxation_trades_granularity_for_validity() {
        let (vectors, _) = blobs(3, 6, 5, 0.05, 2);
        let jurors = round_robin_jurors(vectors.len(), 3);
        let d = build_dendrogram(&vectors);
        let guard = QualityGuard {
            vectors: &vectors,
            jurors: &jurors,
            constraints: QualityConstraints::default(),
        };
        let cut = cut_dendrogram_by_threshold(&d, 0.0, Some(&guard));
        assert!(cut.attempts > 1);
        assert!(cut.granularity_used > 0.0);
        assert!(cut.k < vectors.len());
    }

    #[test]
    fn unguarded_cut_has_no_quality() {
        let (vectors, _) = blobs(2, 3, 3, 0.05, 2);
        let d = build_dendrogram(&vectors);
        let cut = cut_dendrogram_by_threshold(&d, 50.0, None);
        assert!(cut.quality.is_none());
        assert!(cut.is_valid());
    }
}
