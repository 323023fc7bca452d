use crate::models::{AnalysisResult, Concept};

fn render_concept(md: &mut String, c: &Concept, sentence_text: impl Fn(&str) -> Option<String>) {
    md.push_str(&format!(
        "### {}\n`{}` · {} sentence(s) · weight {:.2} · {} juror(s)\n",
        c.label, c.id, c.size, c.weight, c.juror_support
    ));
    if !c.top_terms.is_empty() {
        md.push_str(&format!("\nTerms: {}\n", c.top_terms.join(", ")));
    }
    if !c.representative_sentences.is_empty() {
        md.push_str("\nEvidence:\n");
        for e in &c.representative_sentences {
            let text = sentence_text(&e.sentence_id).unwrap_or_else(|| e.sentence_id.clone());
            md.push_str(&format!("- ({:.2}) {}\n", e.score, text.trim()));
        }
    }
    md.push('\n');
}

pub fn render_summary_markdown(r: &AnalysisResult) -> String {
    let text_of = |id: &str| r.sentences.iter().find(|s| s.id == id).map(|s| s.text.clone());
    let mut md = String::new();
    md.push_str("# Juror Concept Graph\n\n");

    md.push_str("## Overview\n");
    md.push_str(&format!(
        "- Sentences: {}\n- Jurors: {}\n- Concepts: {} primary, {} detail\n- Links: {}\n",
        r.stats.total_sentences,
        r.stats.total_jurors,
        r.stats.total_concepts,
        r.stats.total_detail_concepts,
        r.stats.total_links
    ));
    if let Some(q) = r.stats.quality_score {
        md.push_str(&format!("- Cut quality: {:.3}\n", q));
    }
    md.push('\n');

    if !r.reasoning.is_empty() {
        md.push_str("## Reasoning\n");
        for line in &r.reasoning {
            md.push_str(&format!("- {}\n", line));
        }
        md.push('\n');
    }

    md.push_str("## Concepts\n\n");
    for c in &r.concepts {
        render_concept(&mut md, c, &text_of);
        let children: Vec<&Concept> = r
            .detail_concepts
            .iter()
            .filter(|d| d.parent_id.as_deref() == Some(c.id.as_str()))
            .collect();
        if !children.is_empty() {
            md.push_str("Sub-concepts:\n");
            for d in children {
                md.push_str(&format!("- {} ({} sentence(s))\n", d.label, d.size));
            }
            md.push('\n');
        }
    }

    if !r.axis_labels.is_empty() {
        md.push_str("## Axes\n");
        for a in &r.axis_labels {
            md.push_str(&format!(
                "- Axis {}: {} ← → {} ({:.1}% variance{})\n",
                a.axis + 1,
                a.negative,
                a.positive,
                a.variance_ratio * 100.0,
                if a.meaningful { "" } else { ", layout only" }
            ));
        }
        md.push('\n');
    }

    if !r.anchor_projections.is_empty() {
        md.push_str("## Anchor Axes\n");
        for p in &r.anchor_projections {
            md.push_str(&format!("- {}: {} ← → {}\n", p.axis_id, p.negative_label, p.positive_label));
        }
        md.push('\n');
    }

    if !r.diagnostics.is_empty() {
        md.push_str("## Diagnostics\n");
        for d in &r.diagnostics {
            md.push_str(&format!("- {:?}: {}\n", d.kind, d.reason));
        }
        md.push('\n');
    }

    md
}
