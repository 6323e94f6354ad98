//! Per-page structuring: converter output + raster → page directory.
//!
//! For one page this writes the cleaned markdown, the full raster, one
//! markdown/JSON/PNG triple per table, one PNG (+ caption) per kept figure,
//! an optional summary, and finally `page.json`. The manifest is written last
//! so its presence means every artifact it references is on disk.

use crate::config::StructureConfig;
use crate::error::EsgError;
use crate::model::{BBox, FigureRecord, PageDimensions, PageManifest, TableExport, TableRecord};
use crate::pipeline::boilerplate::strip_boilerplate;
use crate::pipeline::docling::{table_grid, table_markdown, DoclingDocument};
use crate::pipeline::geometry::{bbox_to_pixel_crop, detect_table_title};
use crate::pipeline::manifest::{
    write_atomic, write_json, write_manifest, write_png, ReportLayout, PAGE_IMAGE, PAGE_MARKDOWN,
    PAGE_SUMMARY,
};
use crate::pipeline::postprocess::clean_markdown;
use crate::pipeline::render::RenderedPage;
use crate::prompts::{summary_prompt, SUMMARY_SYSTEM_PROMPT};
use crate::reasoning::TextReasoner;
use image::DynamicImage;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Everything [`structure_page`] reads.
pub struct PageInput<'a> {
    pub document: &'a DoclingDocument,
    pub page_no: u32,
    pub raster: &'a RenderedPage,
    pub boilerplate: &'a HashSet<String>,
    pub config: &'a StructureConfig,
    pub layout: &'a ReportLayout,
}

/// Why a picture was not kept as a figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FigureSkip {
    Icon,
    HeaderBand,
}

/// Decide whether a picture is an icon, a header-band logo, or a figure.
pub fn classify_picture(bbox: &BBox, page: &PageDimensions, config: &StructureConfig) -> Option<FigureSkip> {
    if bbox.area() / page.area() < config.min_figure_area_ratio {
        return Some(FigureSkip::Icon);
    }
    if bbox.bottom >= page.height * (1.0 - config.header_band_ratio) {
        return Some(FigureSkip::HeaderBand);
    }
    None
}

fn crop(image: &DynamicImage, bbox: &BBox, page: &PageDimensions) -> Option<DynamicImage> {
    let rect = bbox_to_pixel_crop(bbox, page.width, page.height, image.width(), image.height())?;
    Some(image.crop_imm(rect.left, rect.top, rect.width(), rect.height()))
}

fn table_file_markdown(title: Option<&str>, body: &str) -> String {
    match title {
        Some(t) => format!("### {t}\n\n{body}\n"),
        None => format!("{body}\n"),
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Structure one converted page and write its directory.
pub async fn structure_page(
    input: PageInput<'_>,
    summarizer: Option<&dyn TextReasoner>,
) -> Result<PageManifest, EsgError> {
    let PageInput {
        document,
        page_no,
        raster,
        boilerplate,
        config,
        layout,
    } = input;

    let dims = document.page_size(page_no).unwrap_or(PageDimensions {
        width: raster.width_pt,
        height: raster.height_pt,
    });

    // ── Markdown ────────────────────────────────────────────────────────
    let raw = document.export_page_markdown(page_no, &config.image_placeholder);
    let stripped = strip_boilerplate(&raw, boilerplate, &config.boilerplate, &config.image_placeholder);
    let markdown = clean_markdown(&stripped);
    let markdown_path = ReportLayout::page_rel(page_no, PAGE_MARKDOWN);
    write_atomic(&layout.resolve(&markdown_path), &markdown).await?;

    let page_image_path = ReportLayout::page_rel(page_no, PAGE_IMAGE);
    write_png(&layout.resolve(&page_image_path), &raster.image).await?;

    // ── Tables ──────────────────────────────────────────────────────────
    let blocks = document.text_blocks(page_no);
    let mut tables = Vec::new();
    let mut covered_area = 0.0;

    for (idx, item) in document.tables_on_page(page_no).into_iter().enumerate() {
        let id = format!("table_{:03}", idx + 1);
        let bbox = document.item_bbox(&item.prov, page_no);
        let title = bbox
            .as_ref()
            .and_then(|b| detect_table_title(b, &blocks, &config.title))
            .or_else(|| document.caption_text(&item.captions));

        let cells = table_grid(&item.data);
        let markdown_rel = ReportLayout::table_rel(page_no, &id, "md");
        let json_rel = ReportLayout::table_rel(page_no, &id, "json");
        write_atomic(
            &layout.resolve(&markdown_rel),
            table_file_markdown(title.as_deref(), &table_markdown(&cells)),
        )
        .await?;
        let export = TableExport {
            id: id.clone(),
            title: title.clone(),
            cells,
            ..Default::default()
        };
        write_json(&layout.resolve(&json_rel), &export).await?;

        let mut image_path = None;
        if let Some(b) = &bbox {
            covered_area += b.area();
            match crop(&raster.image, b, &dims) {
                Some(img) => {
                    let rel = ReportLayout::table_rel(page_no, &id, "png");
                    write_png(&layout.resolve(&rel), &img).await?;
                    image_path = Some(rel);
                }
                None => debug!("Page {}: {} has a degenerate crop", page_no, id),
            }
        }

        tables.push(TableRecord {
            id,
            title,
            markdown_path: markdown_rel,
            json_path: json_rel,
            image_path,
            bbox,
            source: None,
        });
    }

    // ── Figures ─────────────────────────────────────────────────────────
    let pictures = document.pictures_on_page(page_no);
    let mut figures = Vec::new();

    for item in &pictures {
        let Some(bbox) = document.item_bbox(&item.prov, page_no) else {
            continue;
        };
        if let Some(reason) = classify_picture(&bbox, &dims, config) {
            debug!("Page {}: picture skipped ({:?})", page_no, reason);
            continue;
        }
        covered_area += bbox.area();

        let id = format!("figure_{:03}", figures.len() + 1);
        let caption = document.caption_text(&item.captions);
        let mut image_path = None;
        if let Some(img) = crop(&raster.image, &bbox, &dims) {
            let rel = ReportLayout::figure_rel(page_no, &id, "png");
            write_png(&layout.resolve(&rel), &img).await?;
            image_path = Some(rel);
        }
        if let Some(text) = &caption {
            let rel = ReportLayout::figure_rel(page_no, &id, "txt");
            write_atomic(&layout.resolve(&rel), text).await?;
        }
        figures.push(FigureRecord {
            id,
            caption,
            image_path,
            bbox: Some(bbox),
            source: None,
        });
    }

    let visual_density = (covered_area / dims.area()).clamp(0.0, 1.0);
    let needs_visual_review = visual_density >= config.visual_threshold || !pictures.is_empty();

    // ── Summary ─────────────────────────────────────────────────────────
    let summary_path = match summarizer {
        Some(reasoner) if config.page_summaries => {
            let table_lines: Vec<String> = tables
                .iter()
                .map(|t| {
                    format!(
                        "- {}: structured data={}",
                        t.title.as_deref().unwrap_or(&t.id),
                        t.json_path
                    )
                })
                .collect();
            let prompt = summary_prompt(
                page_no,
                truncate_chars(&markdown, config.summary_max_chars),
                &table_lines,
            );
            let body = match reasoner.reason_text(SUMMARY_SYSTEM_PROMPT, &prompt).await {
                Ok(text) => clean_markdown(&text),
                Err(e) => {
                    warn!("Page {}: summary failed: {}", page_no, e);
                    format!("Summary generation failed: {e}\n")
                }
            };
            let rel = ReportLayout::page_rel(page_no, PAGE_SUMMARY);
            write_atomic(&layout.resolve(&rel), body).await?;
            Some(rel)
        }
        _ => None,
    };

    let manifest = PageManifest {
        page_number: page_no,
        markdown: markdown.trim_end().to_string(),
        markdown_path,
        page_image_path,
        page_dimensions: dims,
        tables,
        figures,
        needs_visual_review,
        visual_density,
        summary_path,
        fallback: false,
        raw_response_path: None,
    };
    write_manifest(layout, &manifest).await?;

    info!(
        "Page {}: {} tables, {} figures, density {:.2}{}",
        page_no,
        manifest.tables.len(),
        manifest.figures.len(),
        visual_density,
        if needs_visual_review { " (visual review)" } else { "" }
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasoningError;
    use crate::pipeline::docling::tests::sample;
    use async_trait::async_trait;

    fn raster() -> RenderedPage {
        RenderedPage {
            image: DynamicImage::new_rgb8(1200, 1700),
            width_pt: 600.0,
            height_pt: 850.0,
        }
    }

    fn page_dims() -> PageDimensions {
        PageDimensions {
            width: 600.0,
            height: 850.0,
        }
    }

    struct Summarizer(Result<String, ReasoningError>);

    #[async_trait]
    impl TextReasoner for Summarizer {
        async fn reason_text(&self, _system: &str, prompt: &str) -> Result<String, ReasoningError> {
            assert!(prompt.contains("structured data=page_0001/tables/table_001.json"));
            self.0.clone()
        }
    }

    #[test]
    fn icons_are_always_skipped() {
        let config = StructureConfig::default();
        // 0.9% of the page, in the middle of it.
        let icon = BBox::new(100.0, 400.0, 170.0, 334.4);
        assert!(icon.area() / page_dims().area() < 0.01);
        assert_eq!(classify_picture(&icon, &page_dims(), &config), Some(FigureSkip::Icon));
    }

    #[test]
    fn header_band_logos_are_skipped() {
        let config = StructureConfig::default();
        let logo = BBox::new(50.0, 840.0, 550.0, 760.0);
        assert_eq!(classify_picture(&logo, &page_dims(), &config), Some(FigureSkip::HeaderBand));
        let chart = BBox::new(50.0, 740.0, 550.0, 500.0);
        assert_eq!(classify_picture(&chart, &page_dims(), &config), None);
    }

    #[tokio::test]
    async fn writes_page_directory() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ReportLayout::new(dir.path());
        let doc = sample();
        let raster = raster();
        let config = StructureConfig::default();
        let patterns = HashSet::new();

        let manifest = structure_page(
            PageInput {
                document: &doc,
                page_no: 1,
                raster: &raster,
                boilerplate: &patterns,
                config: &config,
                layout: &layout,
            },
            None,
        )
        .await
        .unwrap();

        assert_eq!(manifest.tables.len(), 1);
        let table = &manifest.tables[0];
        assert_eq!(table.id, "table_001");
        assert_eq!(table.title.as_deref(), Some("단위: tCO2eq"));
        assert_eq!(table.image_path.as_deref(), Some("page_0001/tables/table_001.png"));
        assert!(dir.path().join("page_0001/tables/table_001.png").is_file());

        let json = std::fs::read_to_string(dir.path().join("page_0001/tables/table_001.json")).unwrap();
        let export: TableExport = serde_json::from_str(&json).unwrap();
        assert_eq!(export.text_grid()[1], vec!["Scope 1", "120", "130"]);

        // The only picture is an icon: no figure, but the page is still flagged.
        assert!(manifest.figures.is_empty());
        assert!(manifest.needs_visual_review);
        let expected = 500.0 * 200.0 / (600.0 * 850.0);
        assert!((manifest.visual_density - expected).abs() < 1e-9);

        assert!(dir.path().join("page_0001/page.json").is_file());
        assert!(dir.path().join("page_0001/page.png").is_file());
        assert!(manifest.markdown.contains("| Scope 1 | 120 | 130 |"));
        assert!(manifest.summary_path.is_none());
    }

    #[tokio::test]
    async fn kept_figure_is_cropped_with_caption() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ReportLayout::new(dir.path());
        let mut doc = sample();
        let bbox = &mut doc.pictures[0].prov[0].bbox;
        (bbox.l, bbox.t, bbox.r, bbox.b) = (50.0, 250.0, 550.0, 100.0);
        doc.pictures[0].captions = doc.tables[0].captions.clone();
        let raster = raster();
        let config = StructureConfig::default();

        let manifest = structure_page(
            PageInput {
                document: &doc,
                page_no: 1,
                raster: &raster,
                boilerplate: &HashSet::new(),
                config: &config,
                layout: &layout,
            },
            None,
        )
        .await
        .unwrap();

        assert_eq!(manifest.figures.len(), 1);
        let figure = &manifest.figures[0];
        assert_eq!(figure.id, "figure_001");
        assert_eq!(figure.caption.as_deref(), Some("단위: tCO2eq"));
        let png = image::open(dir.path().join("page_0001/figures/figure_001.png")).unwrap();
        assert_eq!((png.width(), png.height()), (1000, 300));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("page_0001/figures/figure_001.txt")).unwrap(),
            "단위: tCO2eq"
        );
    }

    #[tokio::test]
    async fn summary_failure_writes_note() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ReportLayout::new(dir.path());
        let doc = sample();
        let raster = raster();
        let config = StructureConfig::builder().page_summaries(true).build().unwrap();
        let summarizer = Summarizer(Err(ReasoningError::EmptyResponse));

        let manifest = structure_page(
            PageInput {
                document: &doc,
                page_no: 1,
                raster: &raster,
                boilerplate: &HashSet::new(),
                config: &config,
                layout: &layout,
            },
            Some(&summarizer),
        )
        .await
        .unwrap();

        assert_eq!(manifest.summary_path.as_deref(), Some("page_0001/summary.md"));
        let text = std::fs::read_to_string(dir.path().join("page_0001/summary.md")).unwrap();
        assert!(text.starts_with("Summary generation failed"));
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("온실가스", 2), "온실");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
