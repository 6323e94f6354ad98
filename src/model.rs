//! Data model shared by the structuring and extraction stages.
//!
//! Everything here is plain serde data. Page manifests and table exports are
//! what the structuring stage writes to disk and what the extraction stage
//! reads back, so their field names are part of the on-disk format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Values keyed by calendar year.
pub type YearSeries = BTreeMap<i32, f64>;

// ── Document & page geometry ─────────────────────────────────────────────

/// The disclosure being processed. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub company_name: String,
    pub report_year: i32,
    pub filename: String,
}

impl Document {
    pub fn new(company_name: impl Into<String>, report_year: i32, filename: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            report_year,
            filename: filename.into(),
        }
    }

    /// Reports published in year N disclose figures for year N-1.
    pub fn data_year(&self) -> i32 {
        self.report_year - 1
    }
}

/// Axis-aligned box in document space (points, Y grows upward).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl BBox {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }

    pub fn width(&self) -> f64 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.top - self.bottom).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }
}

/// A text fragment on a page with its position, used for title lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub bbox: BBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageDimensions {
    pub width: f64,
    pub height: f64,
}

impl PageDimensions {
    pub fn area(&self) -> f64 {
        (self.width * self.height).max(1e-3)
    }
}

// ── Tables & figures ─────────────────────────────────────────────────────

/// One cell of a converted table grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    pub row: usize,
    pub col: usize,
    pub text: String,
    #[serde(default = "one")]
    pub row_span: usize,
    #[serde(default = "one")]
    pub col_span: usize,
    #[serde(default)]
    pub row_header: bool,
    #[serde(default)]
    pub column_header: bool,
}

fn one() -> usize {
    1
}

/// Contents of `tables/table_NNN.json`.
///
/// Converter tables carry a `cells` grid; tables rebuilt by the vision
/// fallback carry `headers` + `rows` instead and a `source` tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableExport {
    pub id: String,
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<Vec<TableCell>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl TableExport {
    /// The table as a row-major grid of cell texts, whichever form it was stored in.
    pub fn text_grid(&self) -> Vec<Vec<String>> {
        if !self.cells.is_empty() {
            return self
                .cells
                .iter()
                .map(|row| row.iter().map(|c| c.text.clone()).collect())
                .collect();
        }
        let mut grid = Vec::with_capacity(self.rows.len() + 1);
        if !self.headers.is_empty() {
            grid.push(self.headers.clone());
        }
        grid.extend(self.rows.iter().cloned());
        grid
    }
}

/// Table entry of a page manifest. Paths are relative to the report directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: String,
    pub title: Option<String>,
    pub markdown_path: String,
    pub json_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Figure entry of a page manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureRecord {
    pub id: String,
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Contents of `page_NNNN/page.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageManifest {
    pub page_number: u32,
    pub markdown: String,
    pub markdown_path: String,
    pub page_image_path: String,
    pub page_dimensions: PageDimensions,
    pub tables: Vec<TableRecord>,
    pub figures: Vec<FigureRecord>,
    pub needs_visual_review: bool,
    pub visual_density: f64,
    pub summary_path: Option<String>,
    /// Set on pages rebuilt by the vision fallback instead of the converter.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response_path: Option<String>,
}

/// Stable identifier of a table across the whole report: `page_0050/table_001`.
pub fn table_key(page_number: u32, table_id: &str) -> String {
    format!("page_{page_number:04}/{table_id}")
}

// ── Extraction results ───────────────────────────────────────────────────

/// Which strategy produced an emission record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierKind {
    Pattern,
    TextReasoning,
    VisionReasoning,
    VisionReasoningAuto,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Pattern => "pattern",
            TierKind::TextReasoning => "text-reasoning",
            TierKind::VisionReasoning => "vision-reasoning",
            TierKind::VisionReasoningAuto => "vision-reasoning-auto",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-table map keys.
pub mod field {
    pub const SCOPE1: &str = "s1";
    pub const SCOPE2: &str = "s2";
    pub const SCOPE3: &str = "s3";
    pub const REVENUE: &str = "revenue";
    pub const ENERGY: &str = "energy";
}

/// What a single extraction tier managed to resolve.
///
/// Revenue is kept in the unit it was disclosed in (usually 억원); the
/// merger normalises it to KRW.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialEmission {
    pub scope1: Option<f64>,
    pub scope2: Option<f64>,
    pub scope3: Option<f64>,
    #[serde(default)]
    pub yearly_scope1: YearSeries,
    #[serde(default)]
    pub yearly_scope2: YearSeries,
    #[serde(default)]
    pub yearly_scope3: YearSeries,
    /// Combined Scope 1+2 per year.
    #[serde(default)]
    pub yearly_emissions: YearSeries,
    pub base_year: Option<i32>,
    pub base_emissions: Option<f64>,
    pub revenue: Option<f64>,
    pub energy_intensity: Option<f64>,
    #[serde(default)]
    pub yearly_energy_intensity: YearSeries,
    #[serde(default)]
    pub source_tables: BTreeMap<String, String>,
}

impl PartialEmission {
    pub fn has_any_scope(&self) -> bool {
        self.scope1.is_some() || self.scope2.is_some() || self.scope3.is_some()
    }

    pub fn has_core_scopes(&self) -> bool {
        self.scope1.is_some() && self.scope2.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_any_scope()
            && self.revenue.is_none()
            && self.energy_intensity.is_none()
            && self.yearly_emissions.is_empty()
            && self.yearly_scope3.is_empty()
            && self.yearly_energy_intensity.is_empty()
    }

    /// Fill every field still unset from `other`. Set fields are never overwritten.
    pub fn fill_from(&mut self, other: &PartialEmission) {
        fill(&mut self.scope1, other.scope1, field::SCOPE1, &mut self.source_tables, &other.source_tables);
        fill(&mut self.scope2, other.scope2, field::SCOPE2, &mut self.source_tables, &other.source_tables);
        fill(&mut self.scope3, other.scope3, field::SCOPE3, &mut self.source_tables, &other.source_tables);
        fill(&mut self.revenue, other.revenue, field::REVENUE, &mut self.source_tables, &other.source_tables);
        fill(
            &mut self.energy_intensity,
            other.energy_intensity,
            field::ENERGY,
            &mut self.source_tables,
            &other.source_tables,
        );
        fill_series(&mut self.yearly_scope1, &other.yearly_scope1);
        fill_series(&mut self.yearly_scope2, &other.yearly_scope2);
        fill_series(&mut self.yearly_scope3, &other.yearly_scope3);
        fill_series(&mut self.yearly_emissions, &other.yearly_emissions);
        fill_series(&mut self.yearly_energy_intensity, &other.yearly_energy_intensity);
        if self.base_year.is_none() {
            self.base_year = other.base_year;
        }
        if self.base_emissions.is_none() {
            self.base_emissions = other.base_emissions;
        }
    }
}

fn fill(
    slot: &mut Option<f64>,
    value: Option<f64>,
    key: &str,
    sources: &mut BTreeMap<String, String>,
    other_sources: &BTreeMap<String, String>,
) {
    if slot.is_some() || value.is_none() {
        return;
    }
    *slot = value;
    if let Some(table) = other_sources.get(key) {
        sources.insert(key.to_string(), table.clone());
    }
}

fn fill_series(slot: &mut YearSeries, other: &YearSeries) {
    if slot.is_empty() && !other.is_empty() {
        *slot = other.clone();
    }
}

/// One persisted row: the figures of a company for one data year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionRecord {
    pub company_name: String,
    pub year: i32,
    pub scope1: Option<f64>,
    pub scope2: Option<f64>,
    pub scope3: Option<f64>,
    /// Revenue in KRW.
    pub revenue: Option<f64>,
    pub energy_intensity: Option<f64>,
    /// tCO2e per 100M KRW of revenue, Scope 1+2.
    pub carbon_intensity: Option<f64>,
    pub carbon_intensity_scope1: Option<f64>,
    pub carbon_intensity_scope2: Option<f64>,
    pub carbon_intensity_scope3: Option<f64>,
    /// Heuristic trading-scheme allowance estimate, not an accounting figure.
    pub allowance: Option<f64>,
    pub base_year: Option<i32>,
    pub base_emissions: Option<f64>,
    #[serde(default)]
    pub source_tables: BTreeMap<String, String>,
    pub extraction_tier: TierKind,
    /// Scope 1/2 were estimated from a combined total rather than disclosed.
    #[serde(default)]
    pub scope_split_estimated: bool,
    pub source_document: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmissionRecord {
    pub fn key(&self) -> (String, i32) {
        (self.company_name.clone(), self.year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_area_is_non_negative() {
        let b = BBox::new(10.0, 5.0, 5.0, 10.0);
        assert_eq!(b.area(), 0.0);
        assert_eq!(BBox::new(0.0, 20.0, 10.0, 10.0).area(), 100.0);
    }

    #[test]
    fn fill_from_never_overwrites() {
        let mut first = PartialEmission {
            scope1: Some(130.0),
            scope2: Some(65.0),
            ..Default::default()
        };
        first.source_tables.insert(field::SCOPE1.into(), "page_0001/table_001".into());

        let mut second = PartialEmission {
            scope1: Some(999.0),
            scope2: Some(999.0),
            scope3: Some(5000.0),
            ..Default::default()
        };
        second.source_tables.insert(field::SCOPE1.into(), "page_0009/table_002".into());
        second.source_tables.insert(field::SCOPE3.into(), "page_0009/table_002".into());

        first.fill_from(&second);
        assert_eq!(first.scope1, Some(130.0));
        assert_eq!(first.scope2, Some(65.0));
        assert_eq!(first.scope3, Some(5000.0));
        assert_eq!(first.source_tables[field::SCOPE1], "page_0001/table_001");
        assert_eq!(first.source_tables[field::SCOPE3], "page_0009/table_002");
    }

    #[test]
    fn fallback_table_grid_includes_headers() {
        let export = TableExport {
            id: "table_001".into(),
            headers: vec!["구분".into(), "2023".into()],
            rows: vec![vec!["Scope 1".into(), "10".into()]],
            ..Default::default()
        };
        let grid = export.text_grid();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid[0][1], "2023");
    }

    #[test]
    fn tier_kind_serialises_kebab_case() {
        let s = serde_json::to_string(&TierKind::VisionReasoningAuto).unwrap();
        assert_eq!(s, "\"vision-reasoning-auto\"");
        assert_eq!(TierKind::TextReasoning.to_string(), "text-reasoning");
    }

    #[test]
    fn data_year_is_previous_year() {
        assert_eq!(Document::new("HDEC", 2025, "r.pdf").data_year(), 2024);
    }
}
