//! Node and link assembly once concepts, memberships and layout are known.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::concepts::Membership;
use crate::models::{
    Concept, GraphLink, GraphNode, JurorVector, LinkKind, NodeKind, NodeMeta, SentenceRecord, Stance,
};
use crate::rng::Lcg;
use crate::similarity::cosine_similarity;

const EVIDENCE_PER_LINK: usize = 3;
const TOP_CONCEPTS_PER_JUROR: usize = 3;

pub fn juror_node_id(juror: &str) -> String {
    format!("juror:{}", juror)
}

#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub position: [f64; 3],
    pub coords: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct GraphOptions {
    pub similarity_threshold: f64,
    pub juror_link_threshold: f64,
    /// Detail nodes are scattered this far around their parent.
    pub detail_jitter: f64,
    pub seed: u64,
}

pub struct GraphContext<'a> {
    pub sentences: &'a [SentenceRecord],
    /// Distinct jurors in first-appearance order.
    pub jurors: &'a [String],
    /// `sentence index -> juror index`
    pub sentence_juror: &'a [usize],
    pub juror_vectors: &'a [JurorVector],
    pub primary: &'a [Concept],
    pub primary_membership: &'a [Vec<Membership>],
    pub detail: &'a [Concept],
    pub detail_membership: &'a [Vec<Membership>],
    pub juror_layout: &'a [Layout],
    pub concept_layout: &'a [Layout],
}

fn concept_node(c: &Concept, layout: &Layout, children: Vec<String>) -> GraphNode {
    GraphNode {
        id: c.id.clone(),
        label: c.label.clone(),
        kind: NodeKind::Concept,
        layer: Some(c.layer),
        position: layout.position,
        pca_coords: layout.coords.clone(),
        size: c.weight,
        parent_id: c.parent_id.clone(),
        children,
        meta: NodeMeta::Concept {
            layer: c.layer,
            weight: c.weight,
            top_terms: c.top_terms.clone(),
            evidence_ids: c.representative_sentences.iter().map(|e| e.sentence_id.clone()).collect(),
            juror_support: c.juror_support,
        },
    }
}

fn juror_nodes(ctx: &GraphContext) -> Vec<GraphNode> {
    ctx.jurors
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let mut stance_counts: BTreeMap<Stance, usize> = BTreeMap::new();
            let mut sentence_count = 0;
            for (s, &owner) in ctx.sentence_juror.iter().enumerate() {
                if owner == j {
                    sentence_count += 1;
                    *stance_counts.entry(ctx.sentences[s].stance).or_insert(0) += 1;
                }
            }
            let weights = ctx.juror_vectors.get(j).map(|v| v.primary.as_slice()).unwrap_or(&[]);
            let mut ranked: Vec<(usize, f64)> = weights.iter().copied().enumerate().filter(|(_, w)| *w > 0.0).collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            let top_concepts = ranked
                .iter()
                .take(TOP_CONCEPTS_PER_JUROR)
                .filter_map(|(c, _)| ctx.primary.get(*c).map(|c| c.id.clone()))
                .collect();
            let layout = ctx.juror_layout.get(j).cloned().unwrap_or_default();
            GraphNode {
                id: juror_node_id(name),
                label: name.clone(),
                kind: NodeKind::Juror,
                layer: None,
                position: layout.position,
                pca_coords: layout.coords,
                size: sentence_count as f64,
                parent_id: None,
                children: Vec::new(),
                meta: NodeMeta::Juror {
                    sentence_count,
                    stance_counts,
                    top_concepts,
                },
            }
        })
        .collect()
}

/// Links from each juror to every concept holding at least the threshold
/// share of that juror's mass, with the juror's dominant stance there and the
/// strongest supporting sentences.
fn juror_concept_links(
    ctx: &GraphContext,
    concepts: &[Concept],
    memberships: &[Vec<Membership>],
    weights_of: impl Fn(&JurorVector) -> &[f64],
    threshold: f64,
) -> Vec<GraphLink> {
    let mut links = Vec::new();
    for (j, name) in ctx.jurors.iter().enumerate() {
        let Some(jv) = ctx.juror_vectors.get(j) else { continue };
        for (c, &w) in weights_of(jv).iter().enumerate() {
            if w < threshold || c >= concepts.len() {
                continue;
            }
            let mut stance_mass: HashMap<Stance, f64> = HashMap::new();
            let mut support: Vec<(usize, f64)> = Vec::new();
            for (s, ms) in memberships.iter().enumerate() {
                if ctx.sentence_juror.get(s) != Some(&j) {
                    continue;
                }
                if let Some(m) = ms.iter().find(|m| m.concept == c) {
                    *stance_mass.entry(ctx.sentences[s].stance).or_insert(0.0) += m.weight;
                    support.push((s, m.weight));
                }
            }
            let stance = Stance::ALL
                .iter()
                .filter_map(|st| stance_mass.get(st).map(|m| (*st, *m)))
                .fold(None, |best: Option<(Stance, f64)>, x| match best {
                    Some(b) if b.1 >= x.1 => Some(b),
                    _ => Some(x),
                })
                .map(|(st, _)| st);
            support.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            links.push(GraphLink {
                source: juror_node_id(name),
                target: concepts[c].id.clone(),
                kind: LinkKind::JurorConcept,
                weight: w,
                stance,
                evidence: support
                    .iter()
                    .take(EVIDENCE_PER_LINK)
                    .map(|(s, _)| ctx.sentences[*s].id.clone())
                    .collect(),
            });
        }
    }
    links
}

fn similarity_links(items: &[(String, &[f64])], threshold: f64, kind: LinkKind) -> Vec<GraphLink> {
    let mut links = Vec::new();
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            let sim = cosine_similarity(items[i].1, items[j].1);
            if sim > threshold {
                links.push(GraphLink {
                    source: items[i].0.clone(),
                    target: items[j].0.clone(),
                    kind,
                    weight: sim,
                    stance: None,
                    evidence: Vec::new(),
                });
            }
        }
    }
    links
}

/// Juror nodes, primary and detail concept nodes, and every link between them.
pub fn assemble_graph(ctx: &GraphContext, opts: &GraphOptions) -> (Vec<GraphNode>, Vec<GraphLink>) {
    let mut nodes = juror_nodes(ctx);

    let primary_index: HashMap<&str, usize> = ctx.primary.iter().enumerate().map(|(i, c)| (c.id.as_str(), i)).collect();
    let mut children: Vec<Vec<String>> = vec![Vec::new(); ctx.primary.len()];
    for d in ctx.detail {
        if let Some(&p) = d.parent_id.as_deref().and_then(|p| primary_index.get(p)) {
            children[p].push(d.id.clone());
        }
    }

    for (i, c) in ctx.primary.iter().enumerate() {
        let layout = ctx.concept_layout.get(i).cloned().unwrap_or_default();
        nodes.push(concept_node(c, &layout, std::mem::take(&mut children[i])));
    }

    let mut rng = Lcg::new(opts.seed);
    for d in ctx.detail {
        let parent = d
            .parent_id
            .as_deref()
            .and_then(|p| primary_index.get(p))
            .and_then(|&p| ctx.concept_layout.get(p))
            .cloned()
            .unwrap_or_default();
        let mut layout = parent;
        for x in layout.position.iter_mut() {
            *x += rng.jitter(opts.detail_jitter);
        }
        nodes.push(concept_node(d, &layout, Vec::new()));
    }

    let mut links = juror_concept_links(ctx, ctx.primary, ctx.primary_membership, |jv| jv.primary.as_slice(), opts.juror_link_threshold);
    if !ctx.detail.is_empty() {
        links.extend(juror_concept_links(ctx, ctx.detail, ctx.detail_membership, |jv| jv.detail.as_slice(), opts.juror_link_threshold));
        for d in ctx.detail {
            let Some(&p) = d.parent_id.as_deref().and_then(|p| primary_index.get(p)) else { continue };
            let parent = &ctx.primary[p];
            links.push(GraphLink {
                source: parent.id.clone(),
                target: d.id.clone(),
                kind: LinkKind::ParentChild,
                weight: if parent.size > 0 { d.size as f64 / parent.size as f64 } else { 0.0 },
                stance: None,
                evidence: Vec::new(),
            });
        }
    }

    let jurors: Vec<(String, &[f64])> = ctx
        .jurors
        .iter()
        .zip(ctx.juror_vectors.iter())
        .map(|(name, jv)| (juror_node_id(name), jv.primary.as_slice()))
        .collect();
    links.extend(similarity_links(&jurors, opts.similarity_threshold, LinkKind::JurorJuror));
    for layer in [ctx.primary, ctx.detail] {
        let items: Vec<(String, &[f64])> = layer.iter().map(|c| (c.id.clone(), c.centroid.as_slice())).collect();
        links.extend(similarity_links(&items, opts.similarity_threshold, LinkKind::ConceptConcept));
    }

    debug!(
        "Graph assembled - nodes={}, links={}, detail_nodes={}",
        nodes.len(),
        links.len(),
        ctx.detail.len()
    );
    (nodes, links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concepts::hard_membership;
    use crate::models::{ConceptLayer, EvidenceSentence};

    fn concept(id: &str, layer: ConceptLayer, centroid: Vec<f64>, parent: Option<&str>, size: usize) -> Concept {
        Concept {
            id: id.into(),
            index: 0,
            label: id.to_uppercase(),
            layer,
            size,
            weight: size as f64,
            top_terms: vec![],
            representative_sentences: vec![EvidenceSentence {
                sentence_id: "s0".into(),
                score: 1.0,
                semantic: 1.0,
                frequency: 0.0,
            }],
            parent_id: parent.map(String::from),
            juror_support: 1,
            centroid,
        }
    }

    #[test]
    fn assembles_nodes_and_links() {
        let sentences = vec![
            SentenceRecord::new("s0", "ann", "a", Stance::Praise),
            SentenceRecord::new("s1", "ann", "b", Stance::Critique),
            SentenceRecord::new("s2", "bob", "c", Stance::Critique),
            SentenceRecord::new("s3", "bob", "d", Stance::Critique),
        ];
        let jurors = vec!["ann".to_string(), "bob".to_string()];
        let sentence_juror = vec![0, 0, 1, 1];
        let primary = vec![
            concept("p0", ConceptLayer::Primary, vec![1.0, 0.0], None, 3),
            concept("p1", ConceptLayer::Primary, vec![0.0, 1.0], None, 1),
        ];
        let detail = vec![
            concept("d0", ConceptLayer::Detail, vec![1.0, 0.1], Some("p0"), 2),
            concept("d1", ConceptLayer::Detail, vec![0.9, -0.1], Some("p0"), 1),
            concept("d2", ConceptLayer::Detail, vec![0.0, 1.0], Some("p1"), 1),
        ];
        let primary_membership = hard_membership(&[0, 1, 0, 0]);
        let detail_membership = hard_membership(&[0, 2, 1, 0]);
        let juror_vectors = vec![
            JurorVector {
                juror: "ann".into(),
                primary: vec![0.5, 0.5],
                detail: vec![0.5, 0.0, 0.5],
            },
            JurorVector {
                juror: "bob".into(),
                primary: vec![1.0, 0.0],
                detail: vec![0.5, 0.5, 0.0],
            },
        ];
        let layout = vec![Layout::default(), Layout::default()];
        let ctx = GraphContext {
            sentences: &sentences,
            jurors: &jurors,
            sentence_juror: &sentence_juror,
            juror_vectors: &juror_vectors,
            primary: &primary,
            primary_membership: &primary_membership,
            detail: &detail,
            detail_membership: &detail_membership,
            juror_layout: &layout,
            concept_layout: &layout,
        };
        let opts = GraphOptions {
            similarity_threshold: 0.6,
            juror_link_threshold: 0.05,
            detail_jitter: 0.1,
            seed: 1,
        };
        let (nodes, links) = assemble_graph(&ctx, &opts);
        assert_eq!(nodes.len(), 2 + 2 + 3);
        assert_eq!(nodes.iter().filter(|n| n.layer == Some(ConceptLayer::Detail)).count(), 3);

        let p0 = nodes.iter().find(|n| n.id == "p0").unwrap();
        assert_eq!(p0.children, vec!["d0".to_string(), "d1".to_string()]);

        let bob_p0 = links
            .iter()
            .find(|l| l.kind == LinkKind::JurorConcept && l.source == "juror:bob" && l.target == "p0")
            .unwrap();
        assert_eq!(bob_p0.stance, Some(Stance::Critique));
        assert_eq!(bob_p0.evidence, vec!["s2".to_string(), "s3".to_string()]);
        assert!(!links.iter().any(|l| l.source == "juror:bob" && l.target == "p1"));

        assert_eq!(links.iter().filter(|l| l.kind == LinkKind::ParentChild).count(), 3);
        // d0/d1 are near-parallel; p0/p1 are orthogonal.
        let cc: Vec<_> = links.iter().filter(|l| l.kind == LinkKind::ConceptConcept).collect();
        assert_eq!(cc.len(), 1);
        assert_eq!((cc[0].source.as_str(), cc[0].target.as_str()), ("d0", "d1"));
        // ann [0.5,0.5] vs bob [1,0]: cosine 0.707 > 0.6
        assert_eq!(links.iter().filter(|l| l.kind == LinkKind::JurorJuror).count(), 1);
    }
}
