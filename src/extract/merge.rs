//! Turn the winning tier's output into per-year [`EmissionRecord`]s.
//!
//! Derived figures:
//!
//! * carbon intensity = scope / (revenue in KRW / 1e8), i.e. tCO2e per 억원;
//!   historical years are divided by the data-year revenue, since reports
//!   disclose revenue for the reporting year only, and keep `revenue` empty
//! * allowance = `allowance_factor` × (Scope 1 + Scope 2), a rough estimate
//! * a year with only a combined Scope 1+2 total is split by `scope1_split`
//!   and flagged as estimated

use crate::config::ExtractionConfig;
use crate::model::{Document, EmissionRecord, PartialEmission, TierKind, YearSeries};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// 1억원.
const EOK: f64 = 100_000_000.0;

/// Revenue in KRW. Values below 1e7 are taken to be 억원.
pub fn revenue_krw(revenue: f64) -> f64 {
    if revenue < 1e7 {
        revenue * EOK
    } else {
        revenue
    }
}

fn intensity(scope: Option<f64>, revenue_krw: Option<f64>) -> Option<f64> {
    let revenue = revenue_krw.filter(|r| *r > 0.0)?;
    Some(scope? / (revenue / EOK))
}

fn both(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? + b?)
}

/// Scope 1/2 for a year, split from the combined total when neither was disclosed.
fn scopes_for(s1: Option<f64>, s2: Option<f64>, combined: Option<f64>, split: f64) -> (Option<f64>, Option<f64>, bool) {
    match (s1, s2, combined) {
        (None, None, Some(total)) => (Some(total * split), Some(total * (1.0 - split)), true),
        _ => (s1, s2, false),
    }
}

/// Records for the data year and every historical year in the series.
///
/// The data-year record comes first, then earlier years newest first.
pub fn build_records(
    document: &Document,
    emission: &PartialEmission,
    tier: TierKind,
    config: &ExtractionConfig,
    now: DateTime<Utc>,
) -> Vec<EmissionRecord> {
    let data_year = document.data_year();
    let data_year_revenue = emission.revenue.map(revenue_krw);
    let record = |year: i32| {
        let pick = |latest: Option<f64>, series: &YearSeries| {
            latest
                .filter(|_| year == data_year)
                .or_else(|| series.get(&year).copied())
        };
        let s1 = pick(emission.scope1, &emission.yearly_scope1);
        let s2 = pick(emission.scope2, &emission.yearly_scope2);
        let s3 = pick(emission.scope3, &emission.yearly_scope3);
        let (scope1, scope2, estimated) = scopes_for(s1, s2, emission.yearly_emissions.get(&year).copied(), config.scope1_split);
        let (revenue, energy) = if year == data_year {
            (data_year_revenue, pick(emission.energy_intensity, &emission.yearly_energy_intensity))
        } else {
            (None, pick(None, &emission.yearly_energy_intensity))
        };

        EmissionRecord {
            company_name: document.company_name.clone(),
            year,
            scope1,
            scope2,
            scope3: s3,
            revenue,
            energy_intensity: energy,
            carbon_intensity: intensity(both(scope1, scope2), data_year_revenue),
            carbon_intensity_scope1: intensity(scope1, data_year_revenue),
            carbon_intensity_scope2: intensity(scope2, data_year_revenue),
            carbon_intensity_scope3: intensity(s3, data_year_revenue),
            allowance: both(scope1, scope2).map(|t| t * config.allowance_factor),
            base_year: emission.base_year,
            base_emissions: emission.base_emissions,
            source_tables: emission.source_tables.clone(),
            extraction_tier: tier,
            scope_split_estimated: estimated,
            source_document: Some(document.filename.clone()),
            created_at: now,
            updated_at: now,
        }
    };

    let history: BTreeSet<i32> = [
        &emission.yearly_scope1,
        &emission.yearly_scope2,
        &emission.yearly_scope3,
        &emission.yearly_emissions,
        &emission.yearly_energy_intensity,
    ]
    .into_iter()
    .flat_map(|s| s.keys().copied())
    .filter(|y| *y != data_year)
    .collect();

    std::iter::once(data_year)
        .chain(history.into_iter().rev())
        .map(record)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new("한빛전자", 2025, "hanbit_2025.pdf")
    }

    fn series(pairs: &[(i32, f64)]) -> YearSeries {
        pairs.iter().copied().collect()
    }

    #[test]
    fn revenue_units() {
        assert_eq!(revenue_krw(3200.0), 320_000_000_000.0);
        assert_eq!(revenue_krw(5e11), 5e11);
    }

    #[test]
    fn data_year_record_derivations() {
        let emission = PartialEmission {
            scope1: Some(1100.0),
            scope2: Some(900.0),
            scope3: Some(500.0),
            revenue: Some(1000.0),
            energy_intensity: Some(0.3),
            ..Default::default()
        };
        let records = build_records(&doc(), &emission, TierKind::Pattern, &ExtractionConfig::default(), Utc::now());
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.year, 2024);
        assert_eq!(r.revenue, Some(1e11));
        assert_eq!(r.carbon_intensity, Some(2.0));
        assert_eq!(r.carbon_intensity_scope1, Some(1.1));
        assert_eq!(r.carbon_intensity_scope3, Some(0.5));
        assert_eq!(r.allowance, Some(800.0));
        assert_eq!(r.source_document.as_deref(), Some("hanbit_2025.pdf"));
        assert!(!r.scope_split_estimated);
    }

    #[test]
    fn history_split_from_combined_total() {
        let emission = PartialEmission {
            scope1: Some(1100.0),
            scope2: Some(750.0),
            yearly_scope1: series(&[(2024, 1100.0), (2023, 1200.0)]),
            yearly_scope2: series(&[(2024, 750.0), (2023, 800.0)]),
            yearly_emissions: series(&[(2024, 1850.0), (2023, 2000.0), (2022, 2000.0)]),
            ..Default::default()
        };
        let records = build_records(&doc(), &emission, TierKind::VisionReasoning, &ExtractionConfig::default(), Utc::now());
        let years: Vec<i32> = records.iter().map(|r| r.year).collect();
        assert_eq!(years, vec![2024, 2023, 2022]);

        assert_eq!(records[1].scope1, Some(1200.0));
        assert!(!records[1].scope_split_estimated);
        assert_eq!(records[1].revenue, None);
        assert_eq!(records[1].carbon_intensity, None);

        let y2022 = &records[2];
        assert!(y2022.scope_split_estimated);
        assert!((y2022.scope1.unwrap() - 1100.0).abs() < 1e-9);
        assert!((y2022.scope2.unwrap() - 900.0).abs() < 1e-9);
        assert_eq!(y2022.extraction_tier, TierKind::VisionReasoning);
    }

    #[test]
    fn history_intensity_uses_data_year_revenue() {
        let emission = PartialEmission {
            scope1: Some(1100.0),
            scope2: Some(900.0),
            revenue: Some(1000.0),
            yearly_emissions: series(&[(2024, 2000.0), (2023, 3000.0)]),
            yearly_scope3: series(&[(2023, 400.0)]),
            ..Default::default()
        };
        let records = build_records(&doc(), &emission, TierKind::Pattern, &ExtractionConfig::default(), Utc::now());
        let y2023 = &records[1];
        assert_eq!(y2023.year, 2023);
        assert_eq!(y2023.revenue, None);
        assert!((y2023.carbon_intensity.unwrap() - 3.0).abs() < 1e-9);
        assert!((y2023.carbon_intensity_scope1.unwrap() - 1.65).abs() < 1e-9);
        assert!((y2023.carbon_intensity_scope3.unwrap() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn no_revenue_no_intensity() {
        let emission = PartialEmission {
            scope1: Some(10.0),
            ..Default::default()
        };
        let r = &build_records(&doc(), &emission, TierKind::TextReasoning, &ExtractionConfig::default(), Utc::now())[0];
        assert_eq!(r.carbon_intensity_scope1, None);
        assert_eq!(r.allowance, None);
    }
}
