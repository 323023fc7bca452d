use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::{fs, path::Path};
use tracing::info;

use crate::models::AnalysisResult;
use crate::render::render_summary_markdown;

pub const ANALYSIS_FILE: &str = "analysis.json";
pub const GRAPH_FILE: &str = "graph.json";
pub const SUMMARY_FILE: &str = "summary.md";
pub const INDEX_FILE: &str = "index.json";

/// Write the full result, the graph-only view, the Markdown digest and a small
/// index into `out_dir` (created if missing).
pub fn write_bundle(out_dir: &Path, result: &AnalysisResult) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("create {:?}", out_dir))?;

    // 1) Everything
    write_json(out_dir.join(ANALYSIS_FILE), result)?;

    // 2) Renderer-ready graph
    write_json(
        out_dir.join(GRAPH_FILE),
        &json!({ "nodes": result.nodes, "links": result.links }),
    )?;

    // 3) Human digest
    let summary = out_dir.join(SUMMARY_FILE);
    fs::write(&summary, render_summary_markdown(result)).with_context(|| format!("write {:?}", summary))?;

    // 4) Index
    let idx = json!({
        "version": 1,
        "counts": {
            "sentences": result.stats.total_sentences,
            "jurors": result.stats.total_jurors,
            "concepts": result.stats.total_concepts,
            "detailConcepts": result.stats.total_detail_concepts,
            "links": result.stats.total_links,
        },
        "files": [ANALYSIS_FILE, GRAPH_FILE, SUMMARY_FILE],
    });
    write_json(out_dir.join(INDEX_FILE), &idx)?;

    info!("Bundle written - dir={}, nodes={}, links={}", out_dir.display(), result.nodes.len(), result.links.len());
    Ok(())
}

fn write_json<P: AsRef<Path>, T: ?Sized + Serialize>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, serde_json::to_vec_pretty(value)?).with_context(|| format!("write {:?}", path))
}
