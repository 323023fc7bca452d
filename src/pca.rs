//! Deterministic power-iteration PCA and the dimension-selection rules that
//! decide how many axes are meaningful and how many get laid out.

use serde::Serialize;
use tracing::debug;

use crate::config::DimensionMode;
use crate::models::Vector;
use crate::similarity::{dot, l2_norm, mean_vector, NORM_EPS};

pub const POWER_ITERATIONS: usize = 100;
/// Layout never collapses below this many axes when the data has them.
pub const VISUAL_FLOOR: usize = 3;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PcaResult {
    pub mean: Vector,
    /// Unit components, strongest first.
    pub components: Vec<Vector>,
    pub eigenvalues: Vec<f64>,
    pub explained_variance_ratio: Vec<f64>,
    pub total_variance: f64,
    /// Input rows expressed in component coordinates.
    pub projections: Vec<Vec<f64>>,
}

impl PcaResult {
    pub fn project(&self, x: &[f64]) -> Vec<f64> {
        let centered: Vec<f64> = x.iter().zip(self.mean.iter()).map(|(a, m)| a - m).collect();
        self.components.iter().map(|c| dot(&centered, c)).collect()
    }

    pub fn cumulative_variance_ratio(&self) -> Vec<f64> {
        self.explained_variance_ratio
            .iter()
            .scan(0.0, |acc, r| {
                *acc += r;
                Some(*acc)
            })
            .collect()
    }
}

/// Fixed start vector: uneven positive weights so it is not orthogonal to
/// the usual symmetric directions.
fn initial_vector(dim: usize) -> Vector {
    let mut v: Vector = (0..dim).map(|i| 1.0 + i as f64 / dim.max(1) as f64).collect();
    let n = l2_norm(&v);
    v.iter_mut().for_each(|x| *x /= n);
    v
}

fn orthogonalize(v: &mut [f64], basis: &[Vector]) {
    for b in basis {
        let p = dot(v, b);
        for (x, y) in v.iter_mut().zip(b.iter()) {
            *x -= p * y;
        }
    }
}

/// `X^T (X v)` for row-major `X`.
fn gram_apply(rows: &[Vector], v: &[f64]) -> Vector {
    let mut out = vec![0.0; v.len()];
    for r in rows {
        let s = dot(r, v);
        for (o, x) in out.iter_mut().zip(r.iter()) {
            *o += s * x;
        }
    }
    out
}

/// Extract up to `num_components` principal axes. No randomness: the same
/// rows always give the same components.
pub fn pca_power_iteration(data: &[Vector], num_components: usize) -> PcaResult {
    let n = data.len();
    let dim = data.first().map(Vec::len).unwrap_or(0);
    if n == 0 || dim == 0 {
        return PcaResult::default();
    }
    let mean = mean_vector(data);
    let centered: Vec<Vector> = data
        .iter()
        .map(|r| r.iter().zip(mean.iter()).map(|(a, m)| a - m).collect())
        .collect();
    let total_variance = centered.iter().map(|r| dot(r, r)).sum::<f64>() / n as f64;

    let mut residual = centered.clone();
    let mut components: Vec<Vector> = Vec::new();
    let mut eigenvalues = Vec::new();

    for c in 0..num_components.min(dim) {
        let mut v = initial_vector(dim);
        orthogonalize(&mut v, &components);
        for _ in 0..POWER_ITERATIONS {
            let mut next = gram_apply(&residual, &v);
            orthogonalize(&mut next, &components);
            let norm = l2_norm(&next);
            if norm < NORM_EPS {
                break;
            }
            next.iter_mut().for_each(|x| *x /= norm);
            v = next;
        }
        let norm = l2_norm(&v);
        if norm < NORM_EPS {
            debug!("PCA component degenerate - index={}", c);
            break;
        }
        v.iter_mut().for_each(|x| *x /= norm);

        let eigen = residual.iter().map(|r| dot(r, &v).powi(2)).sum::<f64>() / n as f64;
        for r in residual.iter_mut() {
            let p = dot(r, &v);
            for (x, y) in r.iter_mut().zip(v.iter()) {
                *x -= p * y;
            }
        }
        eigenvalues.push(eigen);
        components.push(v);
    }

    let explained_variance_ratio = eigenvalues
        .iter()
        .map(|e| if total_variance > NORM_EPS { e / total_variance } else { 0.0 })
        .collect();
    let projections = centered
        .iter()
        .map(|r| components.iter().map(|c| dot(r, c)).collect())
        .collect();

    PcaResult {
        mean,
        components,
        eigenvalues,
        explained_variance_ratio,
        total_variance,
        projections,
    }
}

/// Scree elbow: the index with the largest gap between the curve and the
/// chord from its first to its last value. Never below 1.
pub fn find_optimal_dimensions_elbow(values: &[f64]) -> usize {
    let len = values.len();
    if len < 3 {
        return len.max(1);
    }
    let first = values[0];
    let last = values[len - 1];
    let slope = (last - first) / (len - 1) as f64;
    let (best, _) = values
        .iter()
        .enumerate()
        .map(|(i, v)| (i, (v - (first + slope * i as f64)).abs()))
        .fold((0, f64::MIN), |acc, x| if x.1 > acc.1 { x } else { acc });
    best.max(1)
}

/// Smallest N whose cumulative explained ratio reaches `threshold`.
pub fn find_optimal_dimensions_threshold(ratios: &[f64], threshold: f64) -> usize {
    let mut acc = 0.0;
    for (i, r) in ratios.iter().enumerate() {
        acc += r;
        if acc + 1e-12 >= threshold {
            return i + 1;
        }
    }
    ratios.len().max(1)
}

/// `(meaningful, layout)` dimension counts for the given spectrum.
pub fn select_dimensions(
    mode: DimensionMode,
    requested: usize,
    eigenvalues: &[f64],
    ratios: &[f64],
    threshold: f64,
) -> (usize, usize) {
    let available = eigenvalues.len();
    if available == 0 {
        return (0, 0);
    }
    let meaningful = match mode {
        DimensionMode::Manual => requested,
        DimensionMode::Elbow => find_optimal_dimensions_elbow(eigenvalues),
        DimensionMode::Threshold => find_optimal_dimensions_threshold(ratios, threshold),
    }
    .clamp(1, available);
    let layout = meaningful.max(VISUAL_FLOOR.min(available));
    (meaningful, layout)
}

/// One 3D unit direction per layout axis: the standard basis for up to three
/// axes, a Fibonacci sphere beyond that.
pub fn axis_directions(n: usize) -> Vec<[f64; 3]> {
    if n <= 3 {
        let basis = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        return basis[..n].to_vec();
    }
    let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
    (0..n)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden * i as f64;
            [r * theta.cos(), y, r * theta.sin()]
        })
        .collect()
}

pub fn project_to_3d(coords: &[f64], directions: &[[f64; 3]]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (c, d) in coords.iter().zip(directions.iter()) {
        for k in 0..3 {
            out[k] += c * d[k];
        }
    }
    out
}

/// Scale all points together so the largest absolute coordinate equals `scale`.
pub fn normalize_coordinates(points: &mut [[f64; 3]], scale: f64) {
    let max = points
        .iter()
        .flat_map(|p| p.iter())
        .fold(0.0_f64, |m, x| m.max(x.abs()));
    if max < NORM_EPS {
        return;
    }
    let f = scale / max;
    for p in points.iter_mut() {
        p.iter_mut().for_each(|x| *x *= f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::Lcg;
    use approx::assert_abs_diff_eq;

    /// Points spread mostly along two orthogonal directions in 4D.
    fn planar(n: usize) -> Vec<Vector> {
        let mut rng = Lcg::new(5);
        (0..n)
            .map(|_| {
                let a = rng.jitter(3.0);
                let b = rng.jitter(1.0);
                let e = rng.jitter(0.01);
                vec![a + 1.0, a - b, b, e]
            })
            .collect()
    }

    fn dist(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
    }

    #[test]
    fn elbow_matches_scree_example() {
        assert_eq!(find_optimal_dimensions_elbow(&[1500.0, 1400.0, 1300.0, 100.0, 0.0, 0.0]), 3);
        assert_eq!(find_optimal_dimensions_elbow(&[2.0, 1.0]), 2);
    }

    #[test]
    fn threshold_picks_smallest_sufficient_n() {
        assert_eq!(find_optimal_dimensions_threshold(&[0.6, 0.25, 0.1, 0.05], 0.9), 3);
        assert_eq!(find_optimal_dimensions_threshold(&[0.95, 0.05], 0.9), 1);
    }

    #[test]
    fn components_are_orthonormal_and_sorted() {
        let pca = pca_power_iteration(&planar(60), 3);
        assert_eq!(pca.components.len(), 3);
        for (i, a) in pca.components.iter().enumerate() {
            assert_abs_diff_eq!(l2_norm(a), 1.0, epsilon = 1e-9);
            for b in pca.components.iter().skip(i + 1) {
                assert_abs_diff_eq!(dot(a, b), 0.0, epsilon = 1e-6);
            }
        }
        assert!(pca.eigenvalues.windows(2).all(|w| w[0] + 1e-9 >= w[1]));
        let total: f64 = pca.explained_variance_ratio.iter().sum();
        assert!(total <= 1.0 + 1e-9);
    }

    #[test]
    fn two_components_preserve_pairwise_distances() {
        let data = planar(40);
        let pca = pca_power_iteration(&data, 2);
        for i in 0..data.len() {
            for j in (i + 1)..data.len() {
                let orig = dist(&data[i], &data[j]);
                let proj = dist(&pca.projections[i], &pca.projections[j]);
                assert!((orig - proj).abs() < 0.05, "pair {}-{}: {} vs {}", i, j, orig, proj);
            }
        }
    }

    #[test]
    fn deterministic_across_calls() {
        let data = planar(30);
        let a = pca_power_iteration(&data, 3);
        let b = pca_power_iteration(&data, 3);
        assert_eq!(a.components, b.components);
    }

    #[test]
    fn layout_keeps_visual_floor() {
        let ev = [5.0, 0.1, 0.05, 0.01];
        let ratios = [0.9, 0.05, 0.03, 0.02];
        assert_eq!(select_dimensions(DimensionMode::Threshold, 3, &ev, &ratios, 0.9), (1, 3));
        assert_eq!(select_dimensions(DimensionMode::Manual, 4, &ev, &ratios, 0.9), (4, 4));
        assert_eq!(select_dimensions(DimensionMode::Manual, 3, &ev[..2], &ratios[..2], 0.9), (2, 2));
    }

    #[test]
    fn directions_are_unit_length() {
        for n in [2, 3, 5, 8] {
            let dirs = axis_directions(n);
            assert_eq!(dirs.len(), n);
            for d in dirs {
                assert_abs_diff_eq!(l2_norm(&d), 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn normalization_scales_to_target() {
        let mut pts = vec![[1.0, -4.0, 0.5], [2.0, 0.0, 0.0]];
        normalize_coordinates(&mut pts, 10.0);
        assert_abs_diff_eq!(pts[0][1], -10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pts[1][0], 5.0, epsilon = 1e-12);
    }
}
