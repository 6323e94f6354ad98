//! On-disk layout of a structured report and atomic artifact writes.
//!
//! ```text
//! <out>/<report>/page_0050/
//!     page.md  page.png  page.json  summary.md?  vision_raw.json?
//!     tables/table_001.{md,json,png}
//!     figures/figure_001.{png,txt}
//! ```
//!
//! Every file is written to a sibling `.tmp` and renamed into place, so a
//! reader never sees a half-written manifest. Paths stored inside manifests
//! are relative to the report directory and always use `/`.

use crate::error::EsgError;
use crate::model::PageManifest;
use crate::pipeline::encode::encode_png;
use image::DynamicImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const PAGE_MARKDOWN: &str = "page.md";
pub const PAGE_IMAGE: &str = "page.png";
pub const PAGE_MANIFEST: &str = "page.json";
pub const PAGE_SUMMARY: &str = "summary.md";
pub const VISION_RAW: &str = "vision_raw.json";

/// Paths inside one report directory.
#[derive(Debug, Clone)]
pub struct ReportLayout {
    root: PathBuf,
}

impl ReportLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn page_dir_name(page_no: u32) -> String {
        format!("page_{page_no:04}")
    }

    /// `page_NNNN/<name>`
    pub fn page_rel(page_no: u32, name: &str) -> String {
        format!("{}/{name}", Self::page_dir_name(page_no))
    }

    /// `page_NNNN/tables/<id>.<ext>`
    pub fn table_rel(page_no: u32, table_id: &str, ext: &str) -> String {
        format!("{}/tables/{table_id}.{ext}", Self::page_dir_name(page_no))
    }

    /// `page_NNNN/figures/<id>.<ext>`
    pub fn figure_rel(page_no: u32, figure_id: &str, ext: &str) -> String {
        format!("{}/figures/{figure_id}.{ext}", Self::page_dir_name(page_no))
    }

    /// Absolute path of a manifest-relative path.
    pub fn resolve(&self, rel: &str) -> PathBuf {
        rel.split('/').fold(self.root.clone(), |acc, part| acc.join(part))
    }
}

/// Replace characters outside `[A-Za-z0-9_-]` (Unicode letters and digits
/// included) with `_` and trim underscores. Empty names become `report`.
pub fn sanitize_report_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "report".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write `bytes` to `path` through a temp file + rename.
pub async fn write_atomic(path: &Path, bytes: impl AsRef<[u8]>) -> Result<(), EsgError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EsgError::write(path, e))?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes.as_ref())
        .await
        .map_err(|e| EsgError::write(path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| EsgError::write(path, e))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Pretty-printed JSON, non-ASCII kept as is.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), EsgError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| EsgError::Internal(format!("serialising {}: {e}", path.display())))?;
    write_atomic(path, json).await
}

pub async fn write_png(path: &Path, image: &DynamicImage) -> Result<(), EsgError> {
    let png = encode_png(image).map_err(|e| EsgError::Internal(format!("PNG encoding failed: {e}")))?;
    write_atomic(path, png).await
}

pub async fn write_manifest(layout: &ReportLayout, manifest: &PageManifest) -> Result<PathBuf, EsgError> {
    let path = layout.resolve(&ReportLayout::page_rel(manifest.page_number, PAGE_MANIFEST));
    write_json(&path, manifest).await?;
    Ok(path)
}

pub async fn read_manifest(path: &Path) -> Result<PageManifest, EsgError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EsgError::InvalidManifest {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    serde_json::from_str(&raw).map_err(|e| EsgError::InvalidManifest {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Every page manifest under the report directory, ordered by page number.
///
/// Page directories without a manifest are skipped.
pub async fn load_manifests(layout: &ReportLayout) -> Result<Vec<PageManifest>, EsgError> {
    let mut entries = tokio::fs::read_dir(layout.root())
        .await
        .map_err(|e| EsgError::InvalidManifest {
            path: layout.root().to_path_buf(),
            detail: e.to_string(),
        })?;

    let mut manifests = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| EsgError::InvalidManifest {
        path: layout.root().to_path_buf(),
        detail: e.to_string(),
    })? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("page_") {
            continue;
        }
        let path = entry.path().join(PAGE_MANIFEST);
        if !path.is_file() {
            warn!("{} has no {}", name, PAGE_MANIFEST);
            continue;
        }
        manifests.push(read_manifest(&path).await?);
    }
    manifests.sort_by_key(|m| m.page_number);
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PageDimensions;

    fn manifest(page: u32) -> PageManifest {
        PageManifest {
            page_number: page,
            markdown: "# 환경".into(),
            markdown_path: ReportLayout::page_rel(page, PAGE_MARKDOWN),
            page_image_path: ReportLayout::page_rel(page, PAGE_IMAGE),
            page_dimensions: PageDimensions {
                width: 595.0,
                height: 842.0,
            },
            tables: vec![],
            figures: vec![],
            needs_visual_review: false,
            visual_density: 0.0,
            summary_path: None,
            fallback: false,
            raw_response_path: None,
        }
    }

    #[test]
    fn relative_paths() {
        assert_eq!(ReportLayout::page_rel(50, PAGE_MANIFEST), "page_0050/page.json");
        assert_eq!(ReportLayout::table_rel(50, "table_001", "png"), "page_0050/tables/table_001.png");
        assert_eq!(ReportLayout::figure_rel(7, "figure_002", "txt"), "page_0007/figures/figure_002.txt");
        let layout = ReportLayout::new("/out/r");
        assert_eq!(layout.resolve("page_0001/page.md"), Path::new("/out/r/page_0001/page.md"));
    }

    #[test]
    fn report_names() {
        assert_eq!(sanitize_report_name("2025 HDEC Report (KR)"), "2025_HDEC_Report__KR");
        assert_eq!(sanitize_report_name("현대건설-2025"), "현대건설-2025");
        assert_eq!(sanitize_report_name("..."), "report");
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/page.md");
        write_atomic(&path, "hello").await.unwrap();
        write_atomic(&path, "world").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "world");
        assert!(!dir.path().join("a/b/page.md.tmp").exists());
    }

    #[tokio::test]
    async fn manifests_round_trip_in_page_order() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ReportLayout::new(dir.path());
        for page in [12, 3, 7] {
            write_manifest(&layout, &manifest(page)).await.unwrap();
        }
        std::fs::create_dir_all(dir.path().join("page_0099")).unwrap();

        let loaded = load_manifests(&layout).await.unwrap();
        let pages: Vec<u32> = loaded.iter().map(|m| m.page_number).collect();
        assert_eq!(pages, vec![3, 7, 12]);
        assert_eq!(loaded[0].markdown, "# 환경");
    }

    #[tokio::test]
    async fn corrupt_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page_0001/page.json");
        write_atomic(&path, "{ not json").await.unwrap();
        let err = load_manifests(&ReportLayout::new(dir.path())).await.unwrap_err();
        assert!(matches!(err, EsgError::InvalidManifest { .. }));
    }
}
