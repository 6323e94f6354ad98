//! Vision-reasoning tier: table crops read by a vision model.
//!
//! The model answers with flat `s1_YYYY` / `s2_YYYY` / `s3_YYYY` keys, which
//! are far easier for it to keep straight than nested per-scope objects.
//! When any scope is found and revenue or energy intensity is still missing,
//! one follow-up call each is made against the most promising table.

use crate::config::ExtractionConfig;
use crate::extract::tables::StoredTable;
use crate::extract::ExtractionTier;
use crate::model::{field, PartialEmission, TierKind, YearSeries};
use crate::pipeline::encode::ImageDetail;
use crate::prompts::{energy_prompt, revenue_prompt, vision_extraction_prompt};
use crate::reasoning::{extract_json, json_number, json_year, VisionReasoner};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const REVENUE_TITLES: &[&str] = &["매출", "재무", "경제", "개요"];
const ENERGY_TITLES: &[&str] = &["에너지", "집약도", "원단위"];

/// Parse one scope answer for `first..=data_year`.
pub fn parse_scope_answer(json: &Value, data_year: i32, years_back: i32, table_key: &str) -> PartialEmission {
    let series = |prefix: &str| -> YearSeries {
        (data_year - years_back..=data_year)
            .filter_map(|y| {
                let v = json.get(format!("{prefix}_{y}"))?;
                Some((y, json_number(v)?))
            })
            .collect()
    };
    let yearly_scope1 = series("s1");
    let yearly_scope2 = series("s2");
    let yearly_scope3 = series("s3");
    let latest = |s: &YearSeries| s.values().next_back().copied();

    let mut out = PartialEmission {
        scope1: latest(&yearly_scope1),
        scope2: latest(&yearly_scope2),
        scope3: latest(&yearly_scope3),
        yearly_emissions: yearly_scope1
            .iter()
            .filter_map(|(y, a)| yearly_scope2.get(y).map(|b| (*y, a + b)))
            .collect(),
        base_year: json.get("base_year").and_then(json_year),
        base_emissions: json.get("base_emissions").and_then(json_number),
        yearly_scope1,
        yearly_scope2,
        yearly_scope3,
        ..Default::default()
    };
    for (key, present) in [
        (field::SCOPE1, out.scope1.is_some()),
        (field::SCOPE2, out.scope2.is_some()),
        (field::SCOPE3, out.scope3.is_some()),
    ] {
        if present {
            out.source_tables.insert(key.to_string(), table_key.to_string());
        }
    }
    out
}

/// Tables with a crop on disk, keyword-titled (GHG) first.
pub fn vision_candidates(tables: &[StoredTable]) -> Vec<&StoredTable> {
    let mut out: Vec<&StoredTable> = tables.iter().filter(|t| t.image_path.is_some()).collect();
    out.sort_by_key(|t| !t.is_ghg_titled());
    out
}

/// Follow-up target: a keyword-titled candidate, else the candidate nearest
/// by page to the table the scopes came from.
fn followup_target<'a>(
    candidates: &[&'a StoredTable],
    keywords: &[&str],
    scope_source: Option<&StoredTable>,
) -> Option<&'a StoredTable> {
    if let Some(t) = candidates.iter().copied().find(|t| t.title_has_any(keywords)) {
        return Some(t);
    }
    let source = scope_source?;
    candidates
        .iter()
        .copied()
        .min_by_key(|t| t.page_no.abs_diff(source.page_no))
}

/// Vision-reasoning tier.
pub struct VisionTier {
    reasoner: Arc<dyn VisionReasoner>,
    config: ExtractionConfig,
    data_year: i32,
    kind: TierKind,
    revenue_target: Option<String>,
    energy_target: Option<String>,
}

impl VisionTier {
    pub fn new(reasoner: Arc<dyn VisionReasoner>, config: ExtractionConfig, data_year: i32) -> Self {
        Self {
            reasoner,
            config,
            data_year,
            kind: TierKind::VisionReasoning,
            revenue_target: None,
            energy_target: None,
        }
    }

    /// Tag results with a different tier kind (the auto pipeline).
    pub fn with_kind(mut self, kind: TierKind) -> Self {
        self.kind = kind;
        self
    }

    /// Pin the follow-up tables by key instead of searching for them.
    pub fn with_followup_targets(mut self, revenue: Option<String>, energy: Option<String>) -> Self {
        self.revenue_target = revenue;
        self.energy_target = energy;
        self
    }

    async fn ask(&self, table: &StoredTable, prompt: &str) -> Option<Value> {
        let path = table.image_path.as_ref()?;
        let png = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Vision tier: cannot read {}: {}", path.display(), e);
                return None;
            }
        };
        match self.reasoner.reason_vision(prompt, &png, ImageDetail::High).await {
            Ok(answer) => {
                let json = extract_json(&answer);
                if json.is_none() {
                    debug!("Vision tier: {} returned malformed JSON", table.key);
                }
                json
            }
            Err(e) => {
                warn!("Vision tier: {} failed: {}", table.key, e);
                None
            }
        }
    }

    async fn ask_revenue(&self, table: &StoredTable, out: &mut PartialEmission) {
        let Some(json) = self.ask(table, &revenue_prompt(self.data_year)).await else {
            return;
        };
        if let Some(revenue) = json.get("revenue").and_then(json_number) {
            debug!("Vision tier: {} revenue={}억", table.key, revenue);
            out.revenue = Some(revenue);
            out.source_tables.insert(field::REVENUE.into(), table.key.clone());
        }
    }

    async fn ask_energy(&self, table: &StoredTable, out: &mut PartialEmission) {
        let Some(json) = self.ask(table, &energy_prompt(self.data_year)).await else {
            return;
        };
        let range = self.config.energy_intensity_min..=self.config.energy_intensity_max;
        let series: YearSeries = json
            .get("yearly_energy_intensity")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| Some((k.trim().get(..4)?.parse::<i32>().ok()?, json_number(v)?)))
                    .filter(|(_, v)| range.contains(v))
                    .collect()
            })
            .unwrap_or_default();
        let latest = json
            .get("energy_intensity")
            .and_then(json_number)
            .filter(|v| range.contains(v))
            .or_else(|| series.values().next_back().copied());
        if let Some(value) = latest {
            debug!("Vision tier: {} energy intensity={}", table.key, value);
            out.energy_intensity = Some(value);
            out.yearly_energy_intensity = series;
            out.source_tables.insert(field::ENERGY.into(), table.key.clone());
        }
    }
}

#[async_trait]
impl ExtractionTier for VisionTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn attempt(&self, tables: &[StoredTable]) -> PartialEmission {
        let mut out = PartialEmission::default();
        let candidates: Vec<&StoredTable> = vision_candidates(tables)
            .into_iter()
            .take(self.config.max_tables_per_tier)
            .collect();
        info!("Vision tier: {} candidate tables", candidates.len());
        let prompt = vision_extraction_prompt(self.data_year, self.config.vision_years_back);

        for table in &candidates {
            let Some(json) = self.ask(table, &prompt).await else {
                continue;
            };
            let found = parse_scope_answer(&json, self.data_year, self.config.vision_years_back, &table.key);
            debug!(
                "Vision tier: {} S1={:?} S2={:?} S3={:?}",
                table.key, found.scope1, found.scope2, found.scope3
            );
            out.fill_from(&found);
            if out.has_core_scopes() && out.scope3.is_some() {
                break;
            }
        }

        if !out.has_any_scope() {
            return out;
        }
        let scope_source = out
            .source_tables
            .get(field::SCOPE1)
            .or_else(|| out.source_tables.get(field::SCOPE2))
            .or_else(|| out.source_tables.get(field::SCOPE3))
            .and_then(|key| candidates.iter().find(|t| &t.key == key).copied());

        if out.revenue.is_none() {
            let pinned = self
                .revenue_target
                .as_ref()
                .and_then(|key| tables.iter().find(|t| &t.key == key));
            if let Some(table) = pinned.or_else(|| followup_target(&candidates, REVENUE_TITLES, scope_source)) {
                self.ask_revenue(table, &mut out).await;
            }
        }
        if out.energy_intensity.is_none() {
            let pinned = self
                .energy_target
                .as_ref()
                .and_then(|key| tables.iter().find(|t| &t.key == key));
            if let Some(table) = pinned.or_else(|| followup_target(&candidates, ENERGY_TITLES, scope_source)) {
                self.ask_energy(table, &mut out).await;
            }
        }
        out
    }
}
