//! Pattern tier: row-label regexes over year-column tables. No model calls.

use crate::config::ExtractionConfig;
use crate::extract::tables::{detect_year_columns, find_row_by_patterns, parse_korean_currency, row_series, StoredTable};
use crate::extract::ExtractionTier;
use crate::model::{field, PartialEmission, TierKind, YearSeries};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
        .collect()
}

static SCOPE1: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"직접.*온실가스.*Scope.?1",
        r"직접온실가스배출.*Scope.?1",
        r"Scope.?1.*직접",
        r"^직접배출",
        r"^Scope\s?1\s*(\(.*\))?$",
    ])
});

static SCOPE2: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"간접.*온실가스.*Scope.?2",
        r"간접온실가스배출.*Scope.?2",
        r"Scope.?2.*간접",
        r"^간접배출",
        r"^Scope\s?2\s*(\(.*\))?$",
    ])
});

static SCOPE1_2: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"Scope.?1.?&.?2",
        r"Scope.?1.?\+.?2",
        r"Scope.?1.?2",
        r"직.?간접.*온실가스",
        r"직/간접",
    ])
});

static SCOPE3: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r"Scope.?3", r"기타.*간접.*온실가스"]));

static RE_REVENUE_CELL: Lazy<Regex> = Lazy::new(|| Regex::new(r"조.*억.*원|매출").unwrap());
static RE_REVENUE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"매출").unwrap());

const REVENUE_TITLES: &[&str] = &["개요", "현황", "일반"];
const ENERGY_TITLES: &[&str] = &["에너지", "사용량", "집약도", "원단위"];
const ENERGY_ROW_LABELS: &[&str] = &["에너지집약도", "에너지 집약도", "energy intensity"];
const TITLED_TABLE_LIMIT: usize = 10;

/// Scope 1/2 figures of one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeTable {
    pub scope1: Option<f64>,
    pub scope2: Option<f64>,
    pub yearly_scope1: YearSeries,
    pub yearly_scope2: YearSeries,
    pub yearly_emissions: YearSeries,
    pub base_year: Option<i32>,
    pub base_emissions: Option<f64>,
}

/// Read Scope 1/2 rows from one table. `None` when it has no year columns
/// or neither row yields a latest-year value.
pub fn read_scope_table(table: &StoredTable) -> Option<ScopeTable> {
    let years = detect_year_columns(&table.grid);
    let (&latest, _) = years.iter().next_back()?;

    let s1_row = find_row_by_patterns(&table.grid, &SCOPE1);
    let s2_row = find_row_by_patterns(&table.grid, &SCOPE2);
    if s1_row.is_none() && s2_row.is_none() {
        return None;
    }
    let yearly_scope1 = s1_row.map(|r| row_series(table, r, &years)).unwrap_or_default();
    let yearly_scope2 = s2_row.map(|r| row_series(table, r, &years)).unwrap_or_default();

    // An explicit combined row wins; otherwise sum the years both rows disclose.
    let yearly_emissions = match find_row_by_patterns(&table.grid, &SCOPE1_2) {
        Some(r) if Some(r) != s1_row && Some(r) != s2_row => row_series(table, r, &years),
        _ => yearly_scope1
            .iter()
            .filter_map(|(y, a)| yearly_scope2.get(y).map(|b| (*y, a + b)))
            .collect(),
    };

    let scope1 = yearly_scope1.get(&latest).copied();
    let scope2 = yearly_scope2.get(&latest).copied();
    if scope1.is_none() && scope2.is_none() {
        return None;
    }

    let (base_year, base_emissions) = match years.keys().next() {
        Some(&earliest) if earliest < 2020 => (Some(earliest), yearly_emissions.get(&earliest).copied()),
        _ => (None, None),
    };

    Some(ScopeTable {
        scope1,
        scope2,
        yearly_scope1,
        yearly_scope2,
        yearly_emissions,
        base_year,
        base_emissions,
    })
}

/// GHG-titled tables (all tables if none), `총`/`현황` titles first.
fn scope_candidates(tables: &[StoredTable]) -> Vec<&StoredTable> {
    let titled: Vec<&StoredTable> = tables.iter().filter(|t| t.is_ghg_titled()).collect();
    let mut pool = if titled.is_empty() {
        tables.iter().collect()
    } else {
        titled
    };
    pool.sort_by_key(|t| !t.title_has_any(&["총", "현황"]));
    pool
}

/// Pattern-matching tier.
#[derive(Debug, Clone, Default)]
pub struct PatternTier {
    config: ExtractionConfig,
}

impl PatternTier {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    fn scope_1_2(&self, tables: &[StoredTable], out: &mut PartialEmission) {
        for table in scope_candidates(tables) {
            let Some(found) = read_scope_table(table) else {
                continue;
            };
            debug!("Pattern: {} S1={:?} S2={:?}", table.key, found.scope1, found.scope2);
            if found.scope1.is_some() {
                out.source_tables.insert(field::SCOPE1.into(), table.key.clone());
            }
            if found.scope2.is_some() {
                out.source_tables.insert(field::SCOPE2.into(), table.key.clone());
            }
            out.scope1 = found.scope1;
            out.scope2 = found.scope2;
            out.yearly_scope1 = found.yearly_scope1;
            out.yearly_scope2 = found.yearly_scope2;
            out.yearly_emissions = found.yearly_emissions;
            out.base_year = found.base_year;
            out.base_emissions = found.base_emissions;
            return;
        }
    }

    fn scope_3(&self, tables: &[StoredTable], out: &mut PartialEmission) {
        let titled: Vec<&StoredTable> = tables
            .iter()
            .filter(|t| t.title_str().contains("Scope") && t.title_str().contains('3'))
            .collect();
        let pool = if titled.is_empty() {
            tables.iter().collect()
        } else {
            titled
        };

        for table in pool {
            let years = detect_year_columns(&table.grid);
            let Some((&latest, _)) = years.iter().next_back() else {
                continue;
            };
            let Some(row) = find_row_by_patterns(&table.grid, &SCOPE3) else {
                continue;
            };
            let series = row_series(table, row, &years);
            let latest_value = series.get(&latest).copied();
            if latest_value.is_none() && series.is_empty() {
                continue;
            }
            debug!("Pattern: {} S3={:?} ({} years)", table.key, latest_value, series.len());
            out.scope3 = latest_value;
            out.yearly_scope3 = series;
            out.source_tables.insert(field::SCOPE3.into(), table.key.clone());
            return;
        }
    }

    fn revenue(&self, tables: &[StoredTable], out: &mut PartialEmission) {
        let titled = tables
            .iter()
            .filter(|t| t.title_has_any(REVENUE_TITLES))
            .take(TITLED_TABLE_LIMIT);
        for table in titled {
            // Every cell of a 매출 row is a candidate, elsewhere only 조/억/원 amounts.
            let hit = table
                .grid
                .iter()
                .flat_map(|row| {
                    let labelled = row.iter().any(|cell| RE_REVENUE_LABEL.is_match(cell));
                    row.iter().filter(move |cell| labelled || RE_REVENUE_CELL.is_match(cell))
                })
                .filter_map(|cell| parse_korean_currency(cell))
                .find(|v| *v >= self.config.revenue_min);
            if let Some(revenue) = hit {
                debug!("Pattern: {} revenue={}억", table.key, revenue);
                out.revenue = Some(revenue);
                out.source_tables.insert(field::REVENUE.into(), table.key.clone());
                return;
            }
        }
    }

    fn energy_intensity(&self, tables: &[StoredTable], out: &mut PartialEmission) {
        let (min, max) = (self.config.energy_intensity_min, self.config.energy_intensity_max);
        let titled = tables
            .iter()
            .filter(|t| t.title_has_any(ENERGY_TITLES))
            .take(TITLED_TABLE_LIMIT);
        for table in titled {
            let row = table.grid.iter().position(|r| {
                r.first().is_some_and(|c| {
                    let c = c.to_lowercase();
                    ENERGY_ROW_LABELS.iter().any(|l| c.contains(l))
                })
            });
            let Some(row) = row else {
                continue;
            };
            let years = detect_year_columns(&table.grid);
            let series: YearSeries = row_series(table, row, &years)
                .into_iter()
                .filter(|(_, v)| (min..=max).contains(v))
                .collect();
            let Some((_, &latest)) = series.iter().next_back() else {
                continue;
            };
            debug!("Pattern: {} energy intensity={}", table.key, latest);
            out.energy_intensity = Some(latest);
            out.yearly_energy_intensity = series;
            out.source_tables.insert(field::ENERGY.into(), table.key.clone());
            return;
        }
    }
}

#[async_trait]
impl ExtractionTier for PatternTier {
    fn kind(&self) -> TierKind {
        TierKind::Pattern
    }

    async fn attempt(&self, tables: &[StoredTable]) -> PartialEmission {
        let mut out = PartialEmission::default();
        self.scope_1_2(tables, &mut out);
        self.scope_3(tables, &mut out);
        self.revenue(tables, &mut out);
        self.energy_intensity(tables, &mut out);
        info!(
            "Pattern tier: S1={:?} S2={:?} S3={:?} revenue={:?} energy={:?}",
            out.scope1, out.scope2, out.scope3, out.revenue, out.energy_intensity
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::tables::tests::table;

    fn emissions_table() -> StoredTable {
        table(
            "page_0050/table_001",
            50,
            Some("온실가스 배출량 현황"),
            &[
                &["구분", "2021", "2022", "2023", "2024"],
                &["Scope 1", "100", "110", "120", "130"],
                &["Scope 2", "50", "55", "60", "65"],
            ],
        )
    }

    #[tokio::test]
    async fn sums_scope_rows_into_yearly_series() {
        let out = PatternTier::default().attempt(&[emissions_table()]).await;
        assert_eq!(out.scope1, Some(130.0));
        assert_eq!(out.scope2, Some(65.0));
        let yearly: Vec<(i32, f64)> = out.yearly_emissions.into_iter().collect();
        assert_eq!(yearly, vec![(2021, 150.0), (2022, 165.0), (2023, 180.0), (2024, 195.0)]);
        assert_eq!(out.base_year, None);
        assert_eq!(out.source_tables[field::SCOPE1], "page_0050/table_001");
    }

    #[test]
    fn explicit_total_row_and_base_year() {
        let t = table(
            "page_0051/table_001",
            51,
            Some("GHG emissions"),
            &[
                &["구분", "2019 (기준연도)", "2023", "2024"],
                &["직접 온실가스 배출량 (Scope 1)", "1,000", "900", "850"],
                &["간접 온실가스 배출량 (Scope 2)", "500", "450", "400"],
                &["직·간접 온실가스 배출량 합계", "1,510", "1,350", "1,250"],
            ],
        );
        let found = read_scope_table(&t).unwrap();
        assert_eq!(found.scope1, Some(850.0));
        assert_eq!(found.scope2, Some(400.0));
        assert_eq!(found.yearly_emissions[&2024], 1250.0);
        assert_eq!(found.base_year, Some(2019));
        assert_eq!(found.base_emissions, Some(1510.0));
    }

    #[test]
    fn total_row_is_not_scope_1() {
        let t = table(
            "p/t",
            1,
            None,
            &[&["구분", "2024"], &["Scope 1+2", "300"], &["Scope 1", "200"], &["Scope 2", "100"]],
        );
        let found = read_scope_table(&t).unwrap();
        assert_eq!(found.scope1, Some(200.0));
        assert_eq!(found.yearly_emissions[&2024], 300.0);
    }

    #[tokio::test]
    async fn scope3_revenue_and_energy() {
        let tables = vec![
            emissions_table(),
            table(
                "page_0052/table_001",
                52,
                Some("Scope 3 배출량"),
                &[&["구분", "2023", "2024"], &["Scope 3 (기타 간접)", "9,000", "9,500"]],
            ),
            table(
                "page_0005/table_001",
                5,
                Some("회사 개요"),
                &[&["매출액", "32조6,703억 원"], &["임직원", "7,000명"]],
            ),
            table(
                "page_0060/table_002",
                60,
                Some("에너지 사용량"),
                &[
                    &["구분", "2022", "2023", "2024"],
                    &["에너지 사용량 (TJ)", "5,000", "5,100", "5,200"],
                    &["에너지 집약도", "0.31", "0.29", "250"],
                ],
            ),
        ];
        let out = PatternTier::default().attempt(&tables).await;
        assert_eq!(out.scope3, Some(9500.0));
        assert_eq!(out.yearly_scope3.len(), 2);
        assert_eq!(out.revenue, Some(326703.0));
        // 250 is outside the accepted range, so 2023 is the latest year kept.
        assert_eq!(out.energy_intensity, Some(0.29));
        assert_eq!(out.yearly_energy_intensity.len(), 2);
        assert_eq!(out.source_tables[field::REVENUE], "page_0005/table_001");
    }

    #[tokio::test]
    async fn revenue_threshold_is_inclusive() {
        let overview = |amount: &str| {
            table(
                "page_0003/table_001",
                3,
                Some("회사 개요"),
                &[&["구분", "내용"], &["매출액", amount]],
            )
        };
        let at_min = PatternTier::default().attempt(&[overview("1,000억 원")]).await;
        assert_eq!(at_min.revenue, Some(1000.0));
        let below = PatternTier::default().attempt(&[overview("999억 원")]).await;
        assert_eq!(below.revenue, None);
    }

    #[tokio::test]
    async fn nothing_found_is_empty() {
        let t = table("p/t", 1, Some("임직원 현황"), &[&["구분", "2024"], &["남성", "100"]]);
        assert!(PatternTier::default().attempt(&[t]).await.is_empty());
    }
}
