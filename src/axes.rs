use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

use crate::models::{AnchorProjection, AxisLabel, Diagnostic, DiagnosticKind, Vector};
use crate::similarity::{cosine_similarity, l2_norm, mean_vector, normalize, NORM_EPS};

pub const LOW_VARIANCE: &str = "Low Variance";

/// Name every layout axis after the concepts sitting at its extremes.
/// `coords[c][a]` is concept `c` on axis `a`. A concept already used as a
/// pole is avoided on later axes while an unused one exists.
pub fn label_axes(
    coords: &[Vec<f64>],
    labels: &[String],
    ratios: &[f64],
    meaningful: usize,
    layout: usize,
) -> Vec<AxisLabel> {
    let mut used: HashSet<usize> = HashSet::new();
    (0..layout)
        .map(|axis| {
            let ratio = ratios.get(axis).copied().unwrap_or(0.0);
            let low = || AxisLabel {
                axis,
                negative: LOW_VARIANCE.to_string(),
                positive: LOW_VARIANCE.to_string(),
                variance_ratio: ratio,
                meaningful: false,
            };
            if axis >= meaningful {
                return low();
            }
            let on_axis: Vec<(usize, f64)> = coords
                .iter()
                .enumerate()
                .filter_map(|(c, v)| v.get(axis).map(|x| (c, *x)))
                .collect();
            if on_axis.is_empty() {
                return low();
            }

            let pick = |exclude: &HashSet<usize>, want_max: bool| -> Option<usize> {
                let better = |a: f64, b: f64| if want_max { a > b } else { a < b };
                let mut best: Option<(usize, f64)> = None;
                for &(c, x) in on_axis.iter().filter(|(c, _)| !exclude.contains(c)) {
                    if best.map(|(_, bx)| better(x, bx)).unwrap_or(true) {
                        best = Some((c, x));
                    }
                }
                best.map(|(c, _)| c)
            };
            let none = HashSet::new();
            let neg = pick(&used, false).or_else(|| pick(&none, false));
            let mut taken = used.clone();
            taken.extend(neg);
            let pos = pick(&taken, true).or_else(|| pick(&none, true));

            let name = |c: Option<usize>| c.and_then(|c| labels.get(c)).cloned().unwrap_or_else(|| LOW_VARIANCE.to_string());
            used.extend(neg);
            used.extend(pos);
            AxisLabel {
                axis,
                negative: name(neg),
                positive: name(pos),
                variance_ratio: ratio,
                meaningful: true,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorPole {
    pub label: String,
    /// Seed phrases, embedded at the service boundary when `vectors` is empty.
    #[serde(default)]
    pub seeds: Vec<String>,
    #[serde(default)]
    pub vectors: Vec<Vector>,
}

/// User-authored semantic axis, independent of the PCA axes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorAxisInput {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub negative: AnchorPole,
    pub positive: AnchorPole,
}

#[derive(Debug, Clone)]
pub struct AnchorAxis {
    pub id: String,
    pub negative_label: String,
    pub positive_label: String,
    pub direction: Vector,
}

impl AnchorAxis {
    pub fn project(&self, v: &[f64]) -> f64 {
        cosine_similarity(v, &self.direction)
    }
}

/// `normalize(mean(positive) - mean(negative))`. Fails when a pole has no
/// vectors or the poles coincide.
pub fn build_anchor_axis(input: &AnchorAxisInput) -> Result<AnchorAxis, String> {
    if input.positive.vectors.is_empty() || input.negative.vectors.is_empty() {
        return Err(format!("anchor axis {} has a pole without vectors", input.id));
    }
    let pos = mean_vector(&input.positive.vectors);
    let neg = mean_vector(&input.negative.vectors);
    if pos.len() != neg.len() {
        return Err(format!("anchor axis {} poles differ in dimension", input.id));
    }
    let diff: Vector = pos.iter().zip(neg.iter()).map(|(p, n)| p - n).collect();
    if l2_norm(&diff) < NORM_EPS {
        return Err(format!("anchor axis {} poles coincide", input.id));
    }
    Ok(AnchorAxis {
        id: input.id.clone(),
        negative_label: input.negative.label.clone(),
        positive_label: input.positive.label.clone(),
        direction: normalize(&diff),
    })
}

/// Score concept centroids and juror aggregates on each anchor axis. Axes that
/// cannot be built are skipped with a diagnostic.
pub fn project_anchor_axes(
    inputs: &[AnchorAxisInput],
    concepts: &[(String, Vector)],
    jurors: &[(String, Vector)],
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<AnchorProjection> {
    let score = |axis: &AnchorAxis, items: &[(String, Vector)]| -> BTreeMap<String, f64> {
        items
            .iter()
            .filter(|(_, v)| v.len() == axis.direction.len())
            .map(|(id, v)| (id.clone(), axis.project(v)))
            .collect()
    };
    inputs
        .iter()
        .filter_map(|input| match build_anchor_axis(input) {
            Ok(axis) => Some(AnchorProjection {
                axis_id: axis.id.clone(),
                negative_label: axis.negative_label.clone(),
                positive_label: axis.positive_label.clone(),
                concept_scores: score(&axis, concepts),
                juror_scores: score(&axis, jurors),
            }),
            Err(reason) => {
                warn!("Anchor axis skipped - {}", reason);
                diagnostics.push(Diagnostic {
                    kind: DiagnosticKind::NumericDegeneracy,
                    reason,
                });
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("c{}", i)).collect()
    }

    #[test]
    fn poles_prefer_unused_concepts() {
        // c0 is the extreme on both axes; the second axis must pick others.
        let coords = vec![vec![-5.0, -5.0], vec![5.0, 1.0], vec![0.0, 4.0], vec![1.0, -2.0]];
        let labels = label_axes(&coords, &names(4), &[0.7, 0.2], 2, 2);
        assert_eq!((labels[0].negative.as_str(), labels[0].positive.as_str()), ("c0", "c1"));
        assert_eq!((labels[1].negative.as_str(), labels[1].positive.as_str()), ("c3", "c2"));
    }

    #[test]
    fn falls_back_to_extremes_when_all_used() {
        let coords = vec![vec![-1.0, 2.0], vec![1.0, -2.0]];
        let labels = label_axes(&coords, &names(2), &[0.6, 0.4], 2, 2);
        assert_eq!(labels[1].negative, "c1");
        assert_eq!(labels[1].positive, "c0");
    }

    #[test]
    fn layout_only_axes_are_low_variance() {
        let coords = vec![vec![-1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]];
        let labels = label_axes(&coords, &names(2), &[0.99, 0.01, 0.0], 1, 3);
        assert!(labels[0].meaningful);
        assert!(!labels[2].meaningful);
        assert_eq!(labels[2].positive, LOW_VARIANCE);
    }

    #[test]
    fn anchor_axis_projects_by_cosine() {
        let input = AnchorAxisInput {
            id: "warmth".into(),
            label: None,
            negative: AnchorPole {
                label: "cold".into(),
                seeds: vec![],
                vectors: vec![vec![0.0, 1.0]],
            },
            positive: AnchorPole {
                label: "warm".into(),
                seeds: vec![],
                vectors: vec![vec![1.0, 0.0]],
            },
        };
        let axis = build_anchor_axis(&input).unwrap();
        assert_abs_diff_eq!(axis.project(&[1.0, 0.0]), 1.0 / 2f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(axis.project(&[1.0, 1.0]), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn unbuildable_axis_is_reported() {
        let input = AnchorAxisInput {
            id: "empty".into(),
            label: None,
            negative: AnchorPole::default(),
            positive: AnchorPole::default(),
        };
        let mut diags = Vec::new();
        let out = project_anchor_axes(&[input], &[], &[], &mut diags);
        assert!(out.is_empty());
        assert_eq!(diags.len(), 1);
    }
}
