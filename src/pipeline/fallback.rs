//! Vision fallback for pages the converter could not produce.
//!
//! The page raster is sent to a vision model which answers with a JSON
//! reconstruction (summary, key points, tables, figures). Parsing is lenient:
//! a response that is not JSON still yields a page whose summary is the raw
//! answer. Reconstructed pages are always flagged for visual review.

use crate::error::EsgError;
use crate::model::{FigureRecord, PageDimensions, PageManifest, TableCell, TableExport, TableRecord};
use crate::pipeline::docling::table_markdown;
use crate::pipeline::encode::{encode_png, ImageDetail};
use crate::pipeline::manifest::{
    write_atomic, write_json, write_manifest, ReportLayout, PAGE_IMAGE, PAGE_MARKDOWN, VISION_RAW,
};
use crate::pipeline::postprocess::clean_markdown;
use crate::pipeline::render::RenderedPage;
use crate::prompts::{fallback_prompt, FALLBACK_SYSTEM_PROMPT};
use crate::reasoning::{extract_json, strip_code_fences, VisionReasoner};
use serde_json::Value;
use tracing::{info, warn};

pub const FALLBACK_SOURCE: &str = "vision_fallback";

const UNPARSED_NOTE: &str = "_The vision fallback could not parse this page._";

/// Whether a page missing from converter output may be rebuilt.
pub fn is_eligible(page_no: u32, min_page: u32, reasoner_configured: bool) -> bool {
    reasoner_configured && page_no > min_page
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconstructedTable {
    pub title: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A parsed fallback answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconstruction {
    pub summary: String,
    pub key_points: Vec<String>,
    pub notes: Option<String>,
    pub tables: Vec<ReconstructedTable>,
    pub figures: Vec<String>,
    /// The JSON kept as `vision_raw.json`.
    pub raw: Value,
}

fn as_text(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => return None,
        other => other.to_string(),
    };
    (!s.is_empty()).then_some(s)
}

fn text_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|items| items.iter().filter_map(as_text).collect())
        .unwrap_or_default()
}

fn figure_caption(v: &Value) -> Option<String> {
    match v {
        Value::Object(map) => ["caption", "title", "description"]
            .iter()
            .find_map(|k| map.get(*k).and_then(as_text)),
        other => as_text(other),
    }
}

fn parse_table(v: &Value) -> Option<ReconstructedTable> {
    let obj = v.as_object()?;
    let rows = obj
        .get("rows")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_array)
                .map(|cells| cells.iter().map(|c| as_text(c).unwrap_or_default()).collect())
                .collect()
        })
        .unwrap_or_default();
    Some(ReconstructedTable {
        title: obj.get("title").and_then(as_text),
        headers: text_list(obj.get("headers")),
        rows,
    })
}

/// Parse a fallback answer. Never fails: non-JSON text becomes the summary.
pub fn parse_reconstruction(text: &str) -> Reconstruction {
    let body = strip_code_fences(text);
    let parsed = serde_json::from_str::<Value>(body)
        .ok()
        .filter(Value::is_object)
        .or_else(|| extract_json(text));

    let Some(Value::Object(map)) = parsed else {
        return Reconstruction {
            summary: body.trim().to_string(),
            raw: serde_json::json!({ "raw": text }),
            ..Default::default()
        };
    };

    Reconstruction {
        summary: map.get("summary").and_then(as_text).unwrap_or_default(),
        key_points: text_list(map.get("key_points")),
        notes: map.get("notes").and_then(as_text),
        tables: map
            .get("tables")
            .and_then(Value::as_array)
            .map(|ts| ts.iter().filter_map(parse_table).collect())
            .unwrap_or_default(),
        figures: map
            .get("figures")
            .and_then(Value::as_array)
            .map(|fs| fs.iter().filter_map(figure_caption).collect())
            .unwrap_or_default(),
        raw: Value::Object(map),
    }
}

/// Page markdown: summary, bulleted key points and notes, blank-line separated.
pub fn build_markdown(r: &Reconstruction) -> String {
    let mut parts = Vec::new();
    if !r.summary.trim().is_empty() {
        parts.push(r.summary.trim().to_string());
    }
    if !r.key_points.is_empty() {
        parts.push(
            r.key_points
                .iter()
                .map(|p| format!("- {p}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    if let Some(notes) = r.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        parts.push(notes.trim().to_string());
    }
    if parts.is_empty() {
        UNPARSED_NOTE.to_string()
    } else {
        parts.join("\n\n")
    }
}

fn string_grid_markdown(table: &ReconstructedTable) -> String {
    let mut grid: Vec<&[String]> = Vec::new();
    if !table.headers.is_empty() {
        grid.push(&table.headers);
    }
    grid.extend(table.rows.iter().map(Vec::as_slice));
    let cells: Vec<Vec<TableCell>> = grid
        .iter()
        .enumerate()
        .map(|(r, row)| {
            row.iter()
                .enumerate()
                .map(|(c, text)| TableCell {
                    row: r,
                    col: c,
                    text: text.clone(),
                    row_span: 1,
                    col_span: 1,
                    row_header: false,
                    column_header: r == 0 && !table.headers.is_empty(),
                })
                .collect()
        })
        .collect();
    table_markdown(&cells)
}

/// Rebuild a page from its raster.
///
/// Returns `Ok(None)` when the reasoning call fails; the page then stays
/// absent. I/O errors while writing artifacts are returned.
pub async fn reconstruct_page(
    page_no: u32,
    raster: &RenderedPage,
    reasoner: &dyn VisionReasoner,
    layout: &ReportLayout,
) -> Result<Option<PageManifest>, EsgError> {
    let png = encode_png(&raster.image)
        .map_err(|e| EsgError::RasterisationFailed {
            page: page_no,
            detail: format!("PNG encoding failed: {e}"),
        })?;
    let prompt = format!("{FALLBACK_SYSTEM_PROMPT}\n\n{}", fallback_prompt(page_no));

    let answer = match reasoner.reason_vision(&prompt, &png, ImageDetail::High).await {
        Ok(a) => a,
        Err(e) => {
            warn!("Page {}: vision fallback failed: {}", page_no, e);
            return Ok(None);
        }
    };
    let reconstruction = parse_reconstruction(&answer);

    let page_image_path = ReportLayout::page_rel(page_no, PAGE_IMAGE);
    write_atomic(&layout.resolve(&page_image_path), &png).await?;

    let raw_rel = ReportLayout::page_rel(page_no, VISION_RAW);
    write_json(&layout.resolve(&raw_rel), &reconstruction.raw).await?;

    let markdown = clean_markdown(&build_markdown(&reconstruction));
    let markdown_path = ReportLayout::page_rel(page_no, PAGE_MARKDOWN);
    write_atomic(&layout.resolve(&markdown_path), &markdown).await?;

    let mut tables = Vec::new();
    for (idx, table) in reconstruction.tables.iter().enumerate() {
        let id = format!("table_{:03}", idx + 1);
        let markdown_rel = ReportLayout::table_rel(page_no, &id, "md");
        let json_rel = ReportLayout::table_rel(page_no, &id, "json");

        let body = string_grid_markdown(table);
        let md = match &table.title {
            Some(t) => format!("### {t}\n\n{body}\n"),
            None => format!("{body}\n"),
        };
        write_atomic(&layout.resolve(&markdown_rel), md).await?;
        let export = TableExport {
            id: id.clone(),
            title: table.title.clone(),
            headers: table.headers.clone(),
            rows: table.rows.clone(),
            source: Some(FALLBACK_SOURCE.to_string()),
            ..Default::default()
        };
        write_json(&layout.resolve(&json_rel), &export).await?;

        tables.push(TableRecord {
            id,
            title: table.title.clone(),
            markdown_path: markdown_rel,
            json_path: json_rel,
            image_path: None,
            bbox: None,
            source: Some(FALLBACK_SOURCE.to_string()),
        });
    }

    let mut figures = Vec::new();
    for (idx, caption) in reconstruction.figures.iter().enumerate() {
        let id = format!("figure_{:03}", idx + 1);
        let rel = ReportLayout::figure_rel(page_no, &id, "txt");
        write_atomic(&layout.resolve(&rel), caption).await?;
        figures.push(FigureRecord {
            id,
            caption: Some(caption.clone()),
            image_path: Some(page_image_path.clone()),
            bbox: None,
            source: Some(FALLBACK_SOURCE.to_string()),
        });
    }

    let manifest = PageManifest {
        page_number: page_no,
        markdown: markdown.trim_end().to_string(),
        markdown_path,
        page_image_path,
        page_dimensions: PageDimensions {
            width: raster.width_pt,
            height: raster.height_pt,
        },
        tables,
        figures,
        needs_visual_review: true,
        visual_density: 1.0,
        summary_path: None,
        fallback: true,
        raw_response_path: Some(raw_rel),
    };
    write_manifest(layout, &manifest).await?;

    info!(
        "Page {}: rebuilt by vision fallback ({} tables, {} figures)",
        page_no,
        manifest.tables.len(),
        manifest.figures.len()
    );
    Ok(Some(manifest))
}
