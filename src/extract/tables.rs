//! Structured tables as the extraction tiers see them, and the cell-level
//! helpers every tier shares.

use crate::error::EsgError;
use crate::model::{table_key, TableExport};
use crate::pipeline::manifest::{load_manifests, ReportLayout};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Title keywords of greenhouse-gas tables.
pub const GHG_KEYWORDS: &[&str] = &["온실가스", "배출", "scope", "ghg"];

/// One table loaded from a structured report.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTable {
    /// `page_NNNN/table_NNN`, unique within the report.
    pub key: String,
    pub page_no: u32,
    pub id: String,
    pub title: Option<String>,
    /// Row-major cell texts; row 0 is the header row.
    pub grid: Vec<Vec<String>>,
    /// Absolute path of the crop, present only when the file exists.
    pub image_path: Option<PathBuf>,
}

impl StoredTable {
    pub fn title_str(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }

    /// Case-insensitive match of any keyword against the title.
    pub fn title_has_any(&self, keywords: &[&str]) -> bool {
        let title = self.title_str().to_lowercase();
        keywords.iter().any(|k| title.contains(&k.to_lowercase()))
    }

    pub fn is_ghg_titled(&self) -> bool {
        self.title_has_any(GHG_KEYWORDS)
    }

    pub fn cell_count(&self) -> usize {
        self.grid.iter().map(Vec::len).sum()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.grid.get(row)?.get(col).map(String::as_str)
    }

    /// Numeric value of a cell.
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        self.cell(row, col).and_then(parse_number)
    }
}

/// Every table of a structured report, in page order.
///
/// Table JSON files that are missing or unreadable are skipped with a
/// warning; a corrupt page manifest is an error.
pub async fn load_report_tables(layout: &ReportLayout) -> Result<Vec<StoredTable>, EsgError> {
    let mut tables = Vec::new();
    for manifest in load_manifests(layout).await? {
        for record in &manifest.tables {
            let json_path = layout.resolve(&record.json_path);
            let export: TableExport = match tokio::fs::read_to_string(&json_path).await {
                Ok(raw) => match serde_json::from_str(&raw) {
                    Ok(export) => export,
                    Err(e) => {
                        warn!("Skipping {}: {}", json_path.display(), e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("Skipping {}: {}", json_path.display(), e);
                    continue;
                }
            };
            let image_path = record
                .image_path
                .as_deref()
                .map(|rel| layout.resolve(rel))
                .filter(|p| p.is_file());
            tables.push(StoredTable {
                key: table_key(manifest.page_number, &record.id),
                page_no: manifest.page_number,
                id: record.id.clone(),
                title: record.title.clone(),
                grid: export.text_grid(),
                image_path,
            });
        }
    }
    debug!("Loaded {} tables from {}", tables.len(), layout.root().display());
    Ok(tables)
}

// ── Cell helpers ─────────────────────────────────────────────────────────

static RE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(20\d{2})").unwrap());
static RE_NON_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d.\-]").unwrap());
static RE_JO_EOK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)조(\d+)억").unwrap());
static RE_JO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)조").unwrap());
static RE_EOK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)억").unwrap());

/// Parse a numeric cell: thousands separators and units are dropped.
pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned = RE_NON_NUMERIC.replace_all(&text.replace(',', ""), "").to_string();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a Korean amount into 억원: `"32조6,703억 원"` → 326703.
pub fn parse_korean_currency(text: &str) -> Option<f64> {
    let compact: String = text.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    let int = |s: &str| s.parse::<f64>().ok();
    if let Some(c) = RE_JO_EOK.captures(&compact) {
        return Some(int(&c[1])? * 10_000.0 + int(&c[2])?);
    }
    if let Some(c) = RE_JO.captures(&compact) {
        return Some(int(&c[1])? * 10_000.0);
    }
    if let Some(c) = RE_EOK.captures(&compact) {
        return int(&c[1]);
    }
    None
}

/// Year → column index for every header cell carrying a `20YY` token.
///
/// A year appearing in several header cells maps to the last one.
pub fn detect_year_columns(grid: &[Vec<String>]) -> BTreeMap<i32, usize> {
    let mut years = BTreeMap::new();
    let Some(header) = grid.first() else {
        return years;
    };
    for (col, text) in header.iter().enumerate() {
        if let Some(m) = RE_YEAR.captures(text) {
            if let Ok(year) = m[1].parse::<i32>() {
                years.insert(year, col);
            }
        }
    }
    years
}

/// First row matching any pattern, patterns tried in priority order.
///
/// Within a pattern rows are scanned top-down and cells left-to-right.
pub fn find_row_by_patterns(grid: &[Vec<String>], patterns: &[Regex]) -> Option<usize> {
    patterns.iter().find_map(|re| {
        grid.iter()
            .position(|row| row.iter().any(|cell| !cell.is_empty() && re.is_match(cell)))
    })
}

/// Values of `row` per year column, zero and unparsable cells left out.
pub fn row_series(table: &StoredTable, row: usize, years: &BTreeMap<i32, usize>) -> BTreeMap<i32, f64> {
    years
        .iter()
        .filter_map(|(&year, &col)| {
            table
                .value(row, col)
                .filter(|v| *v != 0.0)
                .map(|v| (year, v))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn table(key: &str, page_no: u32, title: Option<&str>, rows: &[&[&str]]) -> StoredTable {
        StoredTable {
            key: key.to_string(),
            page_no,
            id: key.rsplit('/').next().unwrap_or(key).to_string(),
            title: title.map(str::to_string),
            grid: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
            image_path: None,
        }
    }

    #[test]
    fn korean_currency() {
        assert_eq!(parse_korean_currency("32조6,703억 원"), Some(326703.0));
        assert_eq!(parse_korean_currency("매출액 5조 원"), Some(50000.0));
        assert_eq!(parse_korean_currency("3,200억원"), Some(3200.0));
        assert_eq!(parse_korean_currency("매출액"), None);
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number("130 천톤"), Some(130.0));
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn year_columns_with_footnotes() {
        let t = table("p/t", 1, None, &[&["구분", "기준연도 (2019)", "2023년", "2024 1)"]]);
        let years = detect_year_columns(&t.grid);
        assert_eq!(years.into_iter().collect::<Vec<_>>(), vec![(2019, 1), (2023, 2), (2024, 3)]);
    }

    #[test]
    fn patterns_in_priority_order() {
        let t = table(
            "p/t",
            1,
            None,
            &[&["구분", "2024"], &["Scope 1 직접", "1"], &["직접배출", "2"]],
        );
        let first = Regex::new(r"(?i)^직접배출").unwrap();
        let second = Regex::new(r"(?i)Scope.?1.*직접").unwrap();
        assert_eq!(find_row_by_patterns(&t.grid, &[first.clone(), second.clone()]), Some(2));
        assert_eq!(find_row_by_patterns(&t.grid, &[second, first]), Some(1));
    }
}
