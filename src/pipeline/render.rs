//! PDF rasterisation: render one page to a `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! [`render_page`] moves the work onto the blocking thread pool so the Tokio
//! workers never stall on a render.

use crate::error::EsgError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A rendered page and its size in PDF points.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub image: DynamicImage,
    pub width_pt: f64,
    pub height_pt: f64,
}

/// Produces page rasters. Implementations may block.
pub trait PageRasterizer: Send + Sync {
    fn page_count(&self) -> Result<usize, EsgError>;

    /// Render a 1-indexed page at `scale` pixels per point.
    fn render_page(&self, page_no: u32, scale: f32) -> Result<RenderedPage, EsgError>;
}

/// Run a render on the blocking pool.
pub async fn render_page(
    rasterizer: Arc<dyn PageRasterizer>,
    page_no: u32,
    scale: f32,
) -> Result<RenderedPage, EsgError> {
    tokio::task::spawn_blocking(move || rasterizer.render_page(page_no, scale))
        .await
        .map_err(|e| EsgError::Internal(format!("Render task panicked: {e}")))?
}

/// Count pages on the blocking pool.
pub async fn page_count(rasterizer: Arc<dyn PageRasterizer>) -> Result<usize, EsgError> {
    tokio::task::spawn_blocking(move || rasterizer.page_count())
        .await
        .map_err(|e| EsgError::Internal(format!("Page-count task panicked: {e}")))?
}

/// [`PageRasterizer`] backed by pdfium. The document is opened per call.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    path: PathBuf,
    password: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            path: path.into(),
            password,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open<'a>(&'a self, pdfium: &'a Pdfium) -> Result<PdfDocument<'a>, EsgError> {
        pdfium
            .load_pdf_from_file(&self.path, self.password.as_deref())
            .map_err(|e| {
                let detail = format!("{e:?}");
                let detail = if detail.to_lowercase().contains("password") {
                    if self.password.is_some() {
                        format!("wrong password ({detail})")
                    } else {
                        format!("password required ({detail})")
                    }
                } else {
                    detail
                };
                EsgError::CorruptPdf {
                    path: self.path.clone(),
                    detail,
                }
            })
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn page_count(&self) -> Result<usize, EsgError> {
        let pdfium = Pdfium::default();
        let document = self.open(&pdfium)?;
        let total = document.pages().len() as usize;
        info!("PDF loaded: {} pages", total);
        Ok(total)
    }

    fn render_page(&self, page_no: u32, scale: f32) -> Result<RenderedPage, EsgError> {
        let pdfium = Pdfium::default();
        let document = self.open(&pdfium)?;
        let pages = document.pages();
        let total = pages.len() as u32;
        if page_no == 0 || page_no > total {
            return Err(EsgError::RasterisationFailed {
                page: page_no,
                detail: format!("page out of range (document has {total} pages)"),
            });
        }

        let page = pages
            .get((page_no - 1) as u16)
            .map_err(|e| EsgError::RasterisationFailed {
                page: page_no,
                detail: format!("{e:?}"),
            })?;
        let width_pt = page.width().value as f64;
        let height_pt = page.height().value as f64;

        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| EsgError::RasterisationFailed {
                page: page_no,
                detail: format!("{e:?}"),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px ({}x{} pt)",
            page_no,
            image.width(),
            image.height(),
            width_pt,
            height_pt
        );
        Ok(RenderedPage {
            image,
            width_pt,
            height_pt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Blank;

    impl PageRasterizer for Blank {
        fn page_count(&self) -> Result<usize, EsgError> {
            Ok(2)
        }

        fn render_page(&self, page_no: u32, scale: f32) -> Result<RenderedPage, EsgError> {
            if page_no > 2 {
                return Err(EsgError::RasterisationFailed {
                    page: page_no,
                    detail: "out of range".into(),
                });
            }
            let w = (100.0 * scale) as u32;
            Ok(RenderedPage {
                image: DynamicImage::new_rgb8(w, w),
                width_pt: 100.0,
                height_pt: 100.0,
            })
        }
    }

    #[tokio::test]
    async fn render_runs_on_blocking_pool() {
        let r: Arc<dyn PageRasterizer> = Arc::new(Blank);
        let page = render_page(Arc::clone(&r), 1, 2.0).await.unwrap();
        assert_eq!(page.image.width(), 200);
        assert_eq!(page_count(Arc::clone(&r)).await.unwrap(), 2);
        assert!(render_page(r, 3, 2.0).await.is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        // Binding pdfium may itself fail on machines without the library.
        let result = std::panic::catch_unwind(|| {
            PdfiumRasterizer::new("/nonexistent/report.pdf", None).page_count()
        });
        if let Ok(result) = result {
            assert!(result.is_err());
        }
    }
}
