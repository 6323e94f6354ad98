//! Document-level structuring entry points.
//!
//! [`PageStructurer`] drives one document: select pages, group them into
//! contiguous batches, convert each batch with one converter call, strip the
//! batch's boilerplate, then structure every page (or rebuild it with the
//! vision fallback when the converter produced nothing for it).
//!
//! Work is sequential by construction. Converter and pdfium calls run on the
//! blocking pool; reasoning calls are awaited one at a time.

use crate::config::StructureConfig;
use crate::error::EsgError;
use crate::model::PageManifest;
use crate::pipeline::boilerplate::detect_boilerplate_in_batch;
use crate::pipeline::docling::{ConversionResult, DoclingJsonConverter, DocumentConverter, PageRange};
use crate::pipeline::fallback::{is_eligible, reconstruct_page};
use crate::pipeline::input::resolve_input;
use crate::pipeline::manifest::{sanitize_report_name, ReportLayout};
use crate::pipeline::page::{structure_page, PageInput};
use crate::pipeline::render::{self, PageRasterizer, PdfiumRasterizer};
use crate::reasoning::{TextReasoner, VisionReasoner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of structuring one document.
#[derive(Debug, Clone)]
pub struct StructureReport {
    /// `<out>/<report>`; every manifest path is relative to it.
    pub report_dir: PathBuf,
    /// Written page manifests in page order (fallback pages included).
    pub pages: Vec<PageManifest>,
    /// Pages rebuilt by the vision fallback.
    pub fallback_pages: Vec<u32>,
    /// Selected pages that were left absent.
    pub skipped_pages: Vec<u32>,
    pub total_time_ms: u64,
}

impl StructureReport {
    pub fn table_count(&self) -> usize {
        self.pages.iter().map(|p| p.tables.len()).sum()
    }

    pub fn figure_count(&self) -> usize {
        self.pages.iter().map(|p| p.figures.len()).sum()
    }
}

/// Group sorted page numbers into maximal runs of consecutive pages.
pub fn chunk_consecutive(pages: &[u32]) -> Vec<PageRange> {
    let mut ranges: Vec<PageRange> = Vec::new();
    for &page in pages {
        match ranges.last_mut() {
            Some(last) if last.end + 1 == page => last.end = page,
            _ => ranges.push(PageRange::new(page, page)),
        }
    }
    ranges
}

/// Structures a document through injected converter, rasterizer and reasoners.
pub struct PageStructurer {
    converter: Arc<dyn DocumentConverter>,
    rasterizer: Arc<dyn PageRasterizer>,
    vision: Option<Arc<dyn VisionReasoner>>,
    text: Option<Arc<dyn TextReasoner>>,
    config: StructureConfig,
}

impl PageStructurer {
    pub fn new(
        converter: Arc<dyn DocumentConverter>,
        rasterizer: Arc<dyn PageRasterizer>,
        config: StructureConfig,
    ) -> Self {
        Self {
            converter,
            rasterizer,
            vision: None,
            text: None,
            config,
        }
    }

    /// Enables the vision fallback.
    pub fn with_vision_reasoner(mut self, reasoner: Arc<dyn VisionReasoner>) -> Self {
        self.vision = Some(reasoner);
        self
    }

    /// Enables page summaries (when `page_summaries` is set).
    pub fn with_text_reasoner(mut self, reasoner: Arc<dyn TextReasoner>) -> Self {
        self.text = Some(reasoner);
        self
    }

    pub fn config(&self) -> &StructureConfig {
        &self.config
    }

    async fn convert_batch(&self, source: &Path, range: PageRange) -> Result<ConversionResult, EsgError> {
        let converter = Arc::clone(&self.converter);
        let source = source.to_path_buf();
        tokio::task::spawn_blocking(move || converter.convert(&source, range))
            .await
            .map_err(|e| EsgError::Internal(format!("Conversion task panicked: {e}")))?
    }

    /// Structure the selected pages of `source` into `report_dir`.
    ///
    /// # Errors
    /// Fatal only when the page selection is empty, a batch conversion is
    /// unusable, or an artifact cannot be written. Pages that can be neither
    /// structured nor rebuilt are reported in `skipped_pages`.
    pub async fn structure(&self, source: &Path, report_dir: &Path) -> Result<StructureReport, EsgError> {
        let start = Instant::now();
        let config = &self.config;
        let layout = ReportLayout::new(report_dir);

        let total = render::page_count(Arc::clone(&self.rasterizer)).await?;
        let pages = config.pages.to_page_numbers(total);
        if pages.is_empty() {
            return Err(EsgError::EmptyPageSelection {
                selection: config.pages.to_string(),
                total,
            });
        }
        info!("Structuring {} of {} pages into {}", pages.len(), total, report_dir.display());
        if let Some(ref cb) = config.progress_callback {
            cb.on_structure_start(pages.len());
        }

        let mut written = Vec::new();
        let mut fallback_pages = Vec::new();
        let mut skipped_pages = Vec::new();

        for range in chunk_consecutive(&pages) {
            if let Some(ref cb) = config.progress_callback {
                cb.on_batch_start(range.start, range.end);
            }
            let result = self.convert_batch(source, range).await?;
            let document = match result.document {
                Some(doc) if result.status.is_usable() => doc,
                _ => {
                    return Err(EsgError::ConversionFailed {
                        start: range.start,
                        end: range.end,
                        status: result.status.to_string(),
                        errors: result.errors.join("; "),
                    })
                }
            };
            for e in &result.errors {
                debug!("Converter: {}", e);
            }

            let converted: Vec<u32> = (range.start..=range.end)
                .filter(|p| document.has_page(*p))
                .collect();
            let markdowns: Vec<String> = converted
                .iter()
                .map(|p| document.export_page_markdown(*p, &config.image_placeholder))
                .collect();
            let batch_pages = (range.end - range.start + 1) as usize;
            let boilerplate = detect_boilerplate_in_batch(
                &markdowns,
                batch_pages,
                &config.boilerplate,
                &config.image_placeholder,
            );

            for page_no in range.start..=range.end {
                let converted_page = document.has_page(page_no);
                let fallback_ok =
                    !converted_page && is_eligible(page_no, config.fallback_min_page, self.vision.is_some());
                if !converted_page && !fallback_ok {
                    warn!("Page {} was not converted and is left out", page_no);
                    skipped_pages.push(page_no);
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_page_skipped(page_no, "not converted");
                    }
                    continue;
                }

                let raster = match render::render_page(
                    Arc::clone(&self.rasterizer),
                    page_no,
                    config.render_scale,
                )
                .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Page {}: {}", page_no, e);
                        skipped_pages.push(page_no);
                        if let Some(ref cb) = config.progress_callback {
                            cb.on_page_skipped(page_no, "rasterisation failed");
                        }
                        continue;
                    }
                };

                let manifest = if converted_page {
                    let input = PageInput {
                        document: &document,
                        page_no,
                        raster: &raster,
                        boilerplate: &boilerplate,
                        config,
                        layout: &layout,
                    };
                    Some(structure_page(input, self.text.as_deref()).await?)
                } else {
                    match self.vision.as_deref() {
                        Some(vision) => {
                            let rebuilt = reconstruct_page(page_no, &raster, vision, &layout).await?;
                            if rebuilt.is_some() {
                                fallback_pages.push(page_no);
                                if let Some(ref cb) = config.progress_callback {
                                    cb.on_page_fallback(page_no);
                                }
                            }
                            rebuilt
                        }
                        None => None,
                    }
                };

                match manifest {
                    Some(m) => {
                        if let Some(ref cb) = config.progress_callback {
                            cb.on_page_complete(page_no, m.tables.len(), m.figures.len());
                        }
                        written.push(m);
                    }
                    None => {
                        skipped_pages.push(page_no);
                        if let Some(ref cb) = config.progress_callback {
                            cb.on_page_skipped(page_no, "vision fallback failed");
                        }
                    }
                }
            }
        }

        let total_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Structured {} pages ({} via fallback, {} skipped) in {}ms",
            written.len(),
            fallback_pages.len(),
            skipped_pages.len(),
            total_time_ms
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_structure_complete(written.len(), skipped_pages.len());
        }

        Ok(StructureReport {
            report_dir: report_dir.to_path_buf(),
            pages: written,
            fallback_pages,
            skipped_pages,
            total_time_ms,
        })
    }
}

/// Structure a PDF (path or URL) against its Docling JSON export.
///
/// The report directory is `<output_dir>/<report_name>`, where the name
/// defaults to the sanitised PDF file stem.
pub async fn structure_document(
    input: &str,
    docling_json: &Path,
    output_dir: &Path,
    report_name: Option<&str>,
    config: StructureConfig,
    vision: Option<Arc<dyn VisionReasoner>>,
    text: Option<Arc<dyn TextReasoner>>,
) -> Result<StructureReport, EsgError> {
    let resolved = resolve_input(input, config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();

    let name = report_name
        .map(str::to_string)
        .or_else(|| pdf_path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
        .unwrap_or_default();
    let report_dir = output_dir.join(sanitize_report_name(&name));

    let rasterizer = Arc::new(PdfiumRasterizer::new(&pdf_path, config.password.clone()));
    let converter = Arc::new(DoclingJsonConverter::new(docling_json));
    let mut structurer = PageStructurer::new(converter, rasterizer, config);
    if let Some(v) = vision {
        structurer = structurer.with_vision_reasoner(v);
    }
    if let Some(t) = text {
        structurer = structurer.with_text_reasoner(t);
    }
    structurer.structure(&pdf_path, &report_dir).await
}
