//! Configuration types for page structuring and emission extraction.
//!
//! Structuring behaviour is controlled through [`StructureConfig`] and the
//! extraction cascade through [`ExtractionConfig`], each built via its
//! builder. Every heuristic constant the pipeline relies on lives here with a
//! documented default so two runs can be diffed by their configs alone.

use crate::error::EsgError;
use crate::progress::StructureProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ── Structuring ──────────────────────────────────────────────────────────

/// Configuration for turning converter output into per-page artifacts.
///
/// # Example
/// ```rust
/// use edgequake_esg::{PageSelection, StructureConfig};
///
/// let config = StructureConfig::builder()
///     .render_scale(2.0)
///     .visual_threshold(0.4)
///     .pages("25,27-29".parse::<PageSelection>().unwrap())
///     .build()
///     .unwrap();
/// assert_eq!(config.visual_threshold, 0.4);
/// ```
#[derive(Clone)]
pub struct StructureConfig {
    /// Raster scale relative to PDF points. Range: 0.5–6.0. Default: 2.0.
    ///
    /// Crops are cut from this raster, so it bounds the legibility of every
    /// table image handed to the vision tiers.
    pub render_scale: f32,

    /// Visual density at or above which a page is flagged for review. Default: 0.35.
    pub visual_threshold: f64,

    /// Pictures covering less than this share of the page are treated as
    /// icons and skipped. Default: 0.01.
    pub min_figure_area_ratio: f64,

    /// Height of the top header band as a share of the page. Pictures whose
    /// bottom edge lies inside it are logos and skipped. Default: 0.12.
    pub header_band_ratio: f64,

    pub boilerplate: BoilerplateRules,

    pub title: TitleRules,

    /// Conversion failures on pages at or below this number never trigger
    /// the vision fallback (covers, tables of contents). Default: 10.
    pub fallback_min_page: u32,

    /// Marker the converter emits for pictures in markdown. Lines carrying it
    /// are never treated as boilerplate. Default: `"[IMAGE]"`.
    pub image_placeholder: String,

    /// Write a `summary.md` per page using the text reasoner. Default: false.
    pub page_summaries: bool,

    /// Markdown characters sent along with a page summary request. Default: 6000.
    pub summary_max_chars: usize,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives batch and page events while structuring runs.
    pub progress_callback: Option<Arc<dyn StructureProgressCallback>>,
}

/// Thresholds of the repeated-line detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoilerplateRules {
    /// Leading characters of a normalised line used as its key. Default: 15.
    pub prefix_len: usize,
    /// Minimum page count before a key can be boilerplate. Default: 3.
    pub min_pages: usize,
    /// Share of the batch a key must appear on. Default: 0.2.
    pub min_ratio: f64,
}

impl Default for BoilerplateRules {
    fn default() -> Self {
        Self {
            prefix_len: 15,
            min_pages: 3,
            min_ratio: 0.2,
        }
    }
}

/// Thresholds for picking the caption line above a table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TitleRules {
    /// Largest vertical gap in points between block and table top. Default: 120.
    pub max_gap: f64,
    /// Minimum horizontal overlap ratio. Default: 0.5.
    pub min_overlap: f64,
    /// Longest block text accepted as a title, in characters. Default: 60.
    pub max_chars: usize,
}

impl Default for TitleRules {
    fn default() -> Self {
        Self {
            max_gap: 120.0,
            min_overlap: 0.5,
            max_chars: 60,
        }
    }
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            render_scale: 2.0,
            visual_threshold: 0.35,
            min_figure_area_ratio: 0.01,
            header_band_ratio: 0.12,
            boilerplate: BoilerplateRules::default(),
            title: TitleRules::default(),
            fallback_min_page: 10,
            image_placeholder: "[IMAGE]".to_string(),
            page_summaries: false,
            summary_max_chars: 6000,
            pages: PageSelection::default(),
            password: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for StructureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructureConfig")
            .field("render_scale", &self.render_scale)
            .field("visual_threshold", &self.visual_threshold)
            .field("min_figure_area_ratio", &self.min_figure_area_ratio)
            .field("header_band_ratio", &self.header_band_ratio)
            .field("boilerplate", &self.boilerplate)
            .field("title", &self.title)
            .field("fallback_min_page", &self.fallback_min_page)
            .field("page_summaries", &self.page_summaries)
            .field("pages", &self.pages)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn StructureProgressCallback>"),
            )
            .finish()
    }
}

impl StructureConfig {
    pub fn builder() -> StructureConfigBuilder {
        StructureConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`StructureConfig`].
#[derive(Debug)]
pub struct StructureConfigBuilder {
    config: StructureConfig,
}

impl StructureConfigBuilder {
    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.5, 6.0);
        self
    }

    pub fn visual_threshold(mut self, t: f64) -> Self {
        self.config.visual_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn min_figure_area_ratio(mut self, r: f64) -> Self {
        self.config.min_figure_area_ratio = r.clamp(0.0, 1.0);
        self
    }

    pub fn header_band_ratio(mut self, r: f64) -> Self {
        self.config.header_band_ratio = r.clamp(0.0, 1.0);
        self
    }

    pub fn boilerplate(mut self, rules: BoilerplateRules) -> Self {
        self.config.boilerplate = rules;
        self
    }

    pub fn title(mut self, rules: TitleRules) -> Self {
        self.config.title = rules;
        self
    }

    pub fn fallback_min_page(mut self, page: u32) -> Self {
        self.config.fallback_min_page = page;
        self
    }

    pub fn image_placeholder(mut self, marker: impl Into<String>) -> Self {
        self.config.image_placeholder = marker.into();
        self
    }

    pub fn page_summaries(mut self, v: bool) -> Self {
        self.config.page_summaries = v;
        self
    }

    pub fn summary_max_chars(mut self, n: usize) -> Self {
        self.config.summary_max_chars = n.max(100);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn StructureProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StructureConfig, EsgError> {
        let c = &self.config;
        if c.boilerplate.prefix_len == 0 {
            return Err(EsgError::InvalidConfig(
                "Boilerplate prefix length must be ≥ 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.boilerplate.min_ratio) {
            return Err(EsgError::InvalidConfig(format!(
                "Boilerplate ratio must be 0–1, got {}",
                c.boilerplate.min_ratio
            )));
        }
        if c.title.max_gap < 0.0 || c.title.max_chars == 0 {
            return Err(EsgError::InvalidConfig(
                "Title gap must be ≥ 0 and title length ≥ 1".into(),
            ));
        }
        if c.image_placeholder.trim().is_empty() {
            return Err(EsgError::InvalidConfig(
                "Image placeholder must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Extraction ───────────────────────────────────────────────────────────

/// Configuration for the emission extraction cascade.
///
/// The allowance factor and the 55/45 scope split are unverified heuristics
/// carried over from the first analyses of Korean disclosures; treat the
/// numbers they produce as estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Tables sent to a reasoning tier per run. Default: 10.
    pub max_tables_per_tier: usize,

    /// Rows serialised per table for the text tier. Default: 30.
    pub text_max_rows: usize,
    /// Characters kept per cell for the text tier. Default: 50.
    pub text_max_cell_chars: usize,
    /// Serialised tables shorter than this are skipped. Default: 50.
    pub text_min_chars: usize,
    /// Minimum cells for a keyword-titled text candidate. Default: 20.
    pub text_keyword_min_cells: usize,
    /// Minimum cells for an untitled text candidate. Default: 30.
    pub text_other_min_cells: usize,
    /// Cap on untitled text candidates. Default: 15.
    pub text_other_limit: usize,

    /// Years before the data year requested from the vision tier. Default: 5.
    pub vision_years_back: i32,

    /// Relevance score a table needs to become an auto winner. Default: 60.
    pub relevance_threshold: u32,
    /// Tables kept when nothing reaches the threshold. Default: 3.
    pub fallback_top_n: usize,
    /// Cap on relevance scoring calls. Default: 30.
    pub max_scored_tables: usize,

    /// Allowance estimate as a share of Scope 1+2. Default: 0.4.
    pub allowance_factor: f64,
    /// Scope 1 share when splitting a combined historical total. Default: 0.55.
    pub scope1_split: f64,

    /// Accepted energy-intensity range. Default: 0.01–100.
    pub energy_intensity_min: f64,
    pub energy_intensity_max: f64,
    /// Revenue candidates in 억원 must exceed this. Default: 1000.
    pub revenue_min: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_tables_per_tier: 10,
            text_max_rows: 30,
            text_max_cell_chars: 50,
            text_min_chars: 50,
            text_keyword_min_cells: 20,
            text_other_min_cells: 30,
            text_other_limit: 15,
            vision_years_back: 5,
            relevance_threshold: 60,
            fallback_top_n: 3,
            max_scored_tables: 30,
            allowance_factor: 0.4,
            scope1_split: 0.55,
            energy_intensity_min: 0.01,
            energy_intensity_max: 100.0,
            revenue_min: 1000.0,
        }
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_tables_per_tier(mut self, n: usize) -> Self {
        self.config.max_tables_per_tier = n.max(1);
        self
    }

    pub fn text_max_rows(mut self, n: usize) -> Self {
        self.config.text_max_rows = n.max(1);
        self
    }

    pub fn text_max_cell_chars(mut self, n: usize) -> Self {
        self.config.text_max_cell_chars = n.max(1);
        self
    }

    pub fn vision_years_back(mut self, n: i32) -> Self {
        self.config.vision_years_back = n.clamp(0, 20);
        self
    }

    pub fn relevance_threshold(mut self, score: u32) -> Self {
        self.config.relevance_threshold = score.min(100);
        self
    }

    pub fn fallback_top_n(mut self, n: usize) -> Self {
        self.config.fallback_top_n = n.max(1);
        self
    }

    pub fn max_scored_tables(mut self, n: usize) -> Self {
        self.config.max_scored_tables = n.max(1);
        self
    }

    pub fn allowance_factor(mut self, f: f64) -> Self {
        self.config.allowance_factor = f.max(0.0);
        self
    }

    pub fn scope1_split(mut self, share: f64) -> Self {
        self.config.scope1_split = share.clamp(0.0, 1.0);
        self
    }

    pub fn energy_intensity_range(mut self, min: f64, max: f64) -> Self {
        self.config.energy_intensity_min = min;
        self.config.energy_intensity_max = max;
        self
    }

    pub fn revenue_min(mut self, min: f64) -> Self {
        self.config.revenue_min = min;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, EsgError> {
        let c = &self.config;
        if c.energy_intensity_min >= c.energy_intensity_max {
            return Err(EsgError::InvalidConfig(format!(
                "Energy intensity range is empty: {}–{}",
                c.energy_intensity_min, c.energy_intensity_max
            )));
        }
        Ok(self.config)
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of the PDF to structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// The first N pages.
    First(usize),
    /// Inclusive 1-indexed ranges, e.g. parsed from `"25,27-29"`.
    Ranges(Vec<(usize, usize)>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 1-indexed page numbers.
    ///
    /// Pages beyond `total_pages` are dropped silently.
    pub fn to_page_numbers(&self, total_pages: usize) -> Vec<u32> {
        let mut pages: Vec<usize> = match self {
            PageSelection::All => (1..=total_pages).collect(),
            PageSelection::First(n) => (1..=(*n).min(total_pages)).collect(),
            PageSelection::Ranges(ranges) => ranges
                .iter()
                .flat_map(|&(a, b)| {
                    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                    lo.max(1)..=hi.min(total_pages)
                })
                .collect(),
        };
        pages.sort_unstable();
        pages.dedup();
        pages.into_iter().map(|p| p as u32).collect()
    }
}

impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSelection::All => f.write_str("all"),
            PageSelection::First(n) => write!(f, "first {n}"),
            PageSelection::Ranges(ranges) => {
                let parts: Vec<String> = ranges
                    .iter()
                    .map(|(a, b)| if a == b { a.to_string() } else { format!("{a}-{b}") })
                    .collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

impl FromStr for PageSelection {
    type Err = EsgError;

    /// Parse `all` or a comma list of pages and ranges (`"25,27-29"`).
    /// Reversed ranges are accepted and swapped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }
        let parse_page = |t: &str| -> Result<usize, EsgError> {
            t.trim()
                .parse::<usize>()
                .map_err(|_| EsgError::InvalidConfig(format!("Invalid page number '{}'", t.trim())))
        };
        let mut ranges = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some((a, b)) = part.split_once('-') {
                let (a, b) = (parse_page(a)?, parse_page(b)?);
                ranges.push(if a <= b { (a, b) } else { (b, a) });
            } else {
                let p = parse_page(part)?;
                ranges.push((p, p));
            }
        }
        if ranges.is_empty() {
            return Err(EsgError::InvalidConfig(format!("Empty page selection '{s}'")));
        }
        Ok(PageSelection::Ranges(ranges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_defaults() {
        let c = StructureConfig::default();
        assert_eq!(c.render_scale, 2.0);
        assert_eq!(c.visual_threshold, 0.35);
        assert_eq!(c.min_figure_area_ratio, 0.01);
        assert_eq!(c.header_band_ratio, 0.12);
        assert_eq!(c.fallback_min_page, 10);
        assert_eq!(c.boilerplate.prefix_len, 15);
        assert_eq!(c.title.max_chars, 60);
    }

    #[test]
    fn builder_clamps() {
        let c = StructureConfig::builder()
            .render_scale(50.0)
            .visual_threshold(-1.0)
            .build()
            .unwrap();
        assert_eq!(c.render_scale, 6.0);
        assert_eq!(c.visual_threshold, 0.0);
    }

    #[test]
    fn builder_rejects_zero_prefix() {
        let err = StructureConfig::builder()
            .boilerplate(BoilerplateRules {
                prefix_len: 0,
                ..Default::default()
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("prefix"));
    }

    #[test]
    fn extraction_defaults_and_validation() {
        let c = ExtractionConfig::default();
        assert_eq!(c.allowance_factor, 0.4);
        assert_eq!(c.scope1_split, 0.55);
        assert_eq!(c.relevance_threshold, 60);

        let err = ExtractionConfig::builder()
            .energy_intensity_range(5.0, 1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, EsgError::InvalidConfig(_)));
    }

    #[test]
    fn parse_page_list() {
        let sel: PageSelection = "25, 27-29".parse().unwrap();
        assert_eq!(sel.to_page_numbers(100), vec![25, 27, 28, 29]);
    }

    #[test]
    fn reversed_range_is_swapped() {
        let sel: PageSelection = "9-7".parse().unwrap();
        assert_eq!(sel.to_page_numbers(100), vec![7, 8, 9]);
    }

    #[test]
    fn out_of_range_pages_dropped() {
        let sel: PageSelection = "3,98-105".parse().unwrap();
        assert_eq!(sel.to_page_numbers(100), vec![3, 98, 99, 100]);
        assert!(PageSelection::First(3).to_page_numbers(0).is_empty());
    }

    #[test]
    fn invalid_page_rejected() {
        assert!("abc".parse::<PageSelection>().is_err());
        assert_eq!("all".parse::<PageSelection>().unwrap(), PageSelection::All);
    }

    #[test]
    fn first_n() {
        assert_eq!(PageSelection::First(3).to_page_numbers(10), vec![1, 2, 3]);
        assert_eq!(PageSelection::First(30).to_page_numbers(2), vec![1, 2]);
    }
}
