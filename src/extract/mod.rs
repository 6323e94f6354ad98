//! Emission extraction over the tables of a structured report.
//!
//! ## Tiers
//!
//! ```text
//! tables ──▶ pattern ──▶ text ──▶ vision ──▶ merge ──▶ store
//!   │        (regex)    (LLM)    (LLM+crop)
//!   └──▶ auto: relevance score ──▶ vision on winners ──▶ pattern if empty
//! ```
//!
//! * [`pattern`] — row-label regexes and year-column detection, no model calls
//! * [`text`]    — serialised tables sent to a [`TextReasoner`]
//! * [`vision`]  — table crops sent to a [`VisionReasoner`]
//! * [`auto`]    — cheap relevance scoring picks the crops the vision tier reads
//! * [`merge`]   — tier output to per-year [`EmissionRecord`]s
//! * [`store`]   — upsert keyed by company and year
//!
//! A cascade stops as soon as Scope 1 and Scope 2 are both resolved. Values a
//! tier found are never overwritten by a later tier.

pub mod auto;
pub mod merge;
pub mod pattern;
pub mod store;
pub mod tables;
pub mod text;
pub mod vision;

use crate::config::ExtractionConfig;
use crate::error::EsgError;
use crate::model::{Document, EmissionRecord, PartialEmission, TierKind};
use crate::reasoning::{TextReasoner, VisionReasoner};
use async_trait::async_trait;
use auto::AutoTier;
use pattern::PatternTier;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use store::EmissionStore;
use tables::StoredTable;
use text::TextTier;
use tracing::{info, warn};
use vision::VisionTier;

/// One extraction strategy.
///
/// `attempt` never fails: a tier that finds nothing returns an empty
/// [`PartialEmission`] and logs why.
#[async_trait]
pub trait ExtractionTier: Send + Sync {
    fn kind(&self) -> TierKind;

    async fn attempt(&self, tables: &[StoredTable]) -> PartialEmission;
}

/// Which tiers run, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionMode {
    Pattern,
    Text,
    Vision,
    /// Pattern, then text, then vision, each only if Scope 1/2 are still open.
    #[default]
    Cascade,
    /// Relevance-scored vision with a pattern fallback.
    Auto,
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionMode::Pattern => "pattern",
            ExtractionMode::Text => "text",
            ExtractionMode::Vision => "vision",
            ExtractionMode::Cascade => "cascade",
            ExtractionMode::Auto => "auto",
        })
    }
}

impl FromStr for ExtractionMode {
    type Err = EsgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pattern" => Ok(ExtractionMode::Pattern),
            "text" => Ok(ExtractionMode::Text),
            "vision" => Ok(ExtractionMode::Vision),
            "cascade" => Ok(ExtractionMode::Cascade),
            "auto" => Ok(ExtractionMode::Auto),
            other => Err(EsgError::InvalidConfig(format!(
                "unknown extraction mode '{other}' (expected pattern, text, vision, cascade or auto)"
            ))),
        }
    }
}

/// How a later result combines with what is already known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
    /// Only unset fields are filled.
    FirstNonNull,
    /// A non-empty later result replaces the accumulated one entirely.
    Override,
}

impl Precedence {
    /// Returns `true` when `next` contributed anything.
    pub fn apply(self, acc: &mut PartialEmission, next: PartialEmission) -> bool {
        if next.is_empty() {
            return false;
        }
        match self {
            Precedence::FirstNonNull => {
                let before = acc.clone();
                acc.fill_from(&next);
                *acc != before
            }
            Precedence::Override => {
                *acc = next;
                true
            }
        }
    }
}

/// Result of one extraction run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutcome {
    pub emission: PartialEmission,
    /// First tier that contributed a value; `None` when nothing was found.
    pub tier: Option<TierKind>,
}

/// Run `tiers` in order until Scope 1 and Scope 2 are both resolved.
pub async fn cascade(tiers: &[Box<dyn ExtractionTier>], tables: &[StoredTable]) -> ExtractionOutcome {
    let mut emission = PartialEmission::default();
    let mut tier = None;
    for t in tiers {
        if emission.has_core_scopes() {
            break;
        }
        let found = t.attempt(tables).await;
        let contributed = Precedence::FirstNonNull.apply(&mut emission, found);
        info!("{} tier: contributed={}", t.kind(), contributed);
        if contributed && tier.is_none() {
            tier = Some(t.kind());
        }
    }
    ExtractionOutcome { emission, tier }
}

/// Extraction entry point: picks tiers for a mode, runs them, merges and stores.
pub struct EmissionExtractor {
    config: ExtractionConfig,
    data_year: i32,
    text: Option<Arc<dyn TextReasoner>>,
    vision: Option<Arc<dyn VisionReasoner>>,
}

impl EmissionExtractor {
    /// `data_year` is the year the figures describe (report year - 1).
    pub fn new(config: ExtractionConfig, data_year: i32) -> Self {
        Self {
            config,
            data_year,
            text: None,
            vision: None,
        }
    }

    pub fn with_text_reasoner(mut self, reasoner: Arc<dyn TextReasoner>) -> Self {
        self.text = Some(reasoner);
        self
    }

    pub fn with_vision_reasoner(mut self, reasoner: Arc<dyn VisionReasoner>) -> Self {
        self.vision = Some(reasoner);
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn text_tier(&self) -> Result<TextTier, EsgError> {
        let reasoner = self.text.clone().ok_or_else(|| not_configured("text"))?;
        Ok(TextTier::new(reasoner, self.config.clone()))
    }

    fn vision_reasoner(&self) -> Result<Arc<dyn VisionReasoner>, EsgError> {
        self.vision.clone().ok_or_else(|| not_configured("vision"))
    }

    /// Run the tiers of `mode` over `tables`.
    ///
    /// # Errors
    /// [`EsgError::ProviderNotConfigured`] when the mode needs a reasoner that
    /// was not supplied. Cascade mode skips the reasoning tiers it cannot run.
    pub async fn extract(&self, mode: ExtractionMode, tables: &[StoredTable]) -> Result<ExtractionOutcome, EsgError> {
        info!("Extracting from {} tables (mode={}, data year {})", tables.len(), mode, self.data_year);
        let pattern = || Box::new(PatternTier::new(self.config.clone())) as Box<dyn ExtractionTier>;

        let outcome = match mode {
            ExtractionMode::Pattern => cascade(&[pattern()], tables).await,
            ExtractionMode::Text => cascade(&[Box::new(self.text_tier()?) as Box<dyn ExtractionTier>], tables).await,
            ExtractionMode::Vision => {
                let tier = VisionTier::new(self.vision_reasoner()?, self.config.clone(), self.data_year);
                cascade(&[Box::new(tier) as Box<dyn ExtractionTier>], tables).await
            }
            ExtractionMode::Cascade => {
                let mut tiers = vec![pattern()];
                match self.text_tier() {
                    Ok(t) => tiers.push(Box::new(t)),
                    Err(_) => warn!("No text reasoner configured; skipping text tier"),
                }
                match self.vision_reasoner() {
                    Ok(r) => tiers.push(Box::new(VisionTier::new(r, self.config.clone(), self.data_year))),
                    Err(_) => warn!("No vision reasoner configured; skipping vision tier"),
                }
                cascade(&tiers, tables).await
            }
            ExtractionMode::Auto => {
                let auto = AutoTier::new(self.vision_reasoner()?, self.config.clone(), self.data_year);
                let mut emission = auto.attempt(tables).await;
                let mut tier = (!emission.is_empty()).then_some(TierKind::VisionReasoningAuto);
                if !emission.has_any_scope() {
                    info!("Auto: vision found no scope, falling back to pattern tier");
                    let fallback = PatternTier::new(self.config.clone()).attempt(tables).await;
                    if Precedence::Override.apply(&mut emission, fallback) {
                        tier = Some(TierKind::Pattern);
                    }
                }
                ExtractionOutcome { emission, tier }
            }
        };
        Ok(outcome)
    }

    /// Extract, merge into per-year records and upsert them.
    ///
    /// Returns the stored records, data year first. Nothing is stored when no
    /// tier found anything.
    pub async fn extract_and_store(
        &self,
        document: &Document,
        mode: ExtractionMode,
        tables: &[StoredTable],
        store: &dyn EmissionStore,
    ) -> Result<Vec<EmissionRecord>, EsgError> {
        let outcome = self.extract(mode, tables).await?;
        let Some(tier) = outcome.tier else {
            warn!("No emission figures found for {} ({})", document.company_name, document.report_year);
            return Ok(Vec::new());
        };
        let records = merge::build_records(document, &outcome.emission, tier, &self.config, chrono::Utc::now());
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            stored.push(store.upsert(record).await?);
        }
        info!(
            "Stored {} records for {} (tier {})",
            stored.len(),
            document.company_name,
            tier
        );
        Ok(stored)
    }
}

fn not_configured(kind: &str) -> EsgError {
    EsgError::ProviderNotConfigured {
        provider: format!("{kind} reasoner"),
        hint: "Pass --provider/--model or set EDGEQUAKE_LLM_PROVIDER.".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::field;

    struct Fixed(TierKind, PartialEmission);

    #[async_trait]
    impl ExtractionTier for Fixed {
        fn kind(&self) -> TierKind {
            self.0
        }
        async fn attempt(&self, _tables: &[StoredTable]) -> PartialEmission {
            self.1.clone()
        }
    }

    fn partial(s1: Option<f64>, s2: Option<f64>, s3: Option<f64>, source: &str) -> PartialEmission {
        let mut p = PartialEmission {
            scope1: s1,
            scope2: s2,
            scope3: s3,
            ..Default::default()
        };
        for (k, v) in [(field::SCOPE1, s1), (field::SCOPE2, s2), (field::SCOPE3, s3)] {
            if v.is_some() {
                p.source_tables.insert(k.into(), source.into());
            }
        }
        p
    }

    #[tokio::test]
    async fn later_tiers_never_overwrite() {
        let tiers: Vec<Box<dyn ExtractionTier>> = vec![
            Box::new(Fixed(TierKind::Pattern, partial(Some(130.0), None, None, "a"))),
            Box::new(Fixed(TierKind::TextReasoning, partial(Some(1.0), Some(65.0), None, "b"))),
            Box::new(Fixed(TierKind::VisionReasoning, partial(Some(2.0), Some(2.0), Some(9.0), "c"))),
        ];
        let out = cascade(&tiers, &[]).await;
        assert_eq!(out.emission.scope1, Some(130.0));
        assert_eq!(out.emission.scope2, Some(65.0));
        // Scope 1/2 were resolved before the vision tier.
        assert_eq!(out.emission.scope3, None);
        assert_eq!(out.emission.source_tables[field::SCOPE1], "a");
        assert_eq!(out.emission.source_tables[field::SCOPE2], "b");
        assert_eq!(out.tier, Some(TierKind::Pattern));
    }

    #[tokio::test]
    async fn empty_tiers_are_not_credited() {
        let tiers: Vec<Box<dyn ExtractionTier>> = vec![
            Box::new(Fixed(TierKind::Pattern, PartialEmission::default())),
            Box::new(Fixed(TierKind::TextReasoning, partial(None, Some(65.0), None, "b"))),
        ];
        let out = cascade(&tiers, &[]).await;
        assert_eq!(out.tier, Some(TierKind::TextReasoning));
        assert!(!out.emission.has_core_scopes());
    }

    #[test]
    fn override_replaces_wholesale() {
        let mut acc = partial(None, None, None, "a");
        acc.revenue = Some(10.0);
        assert!(Precedence::Override.apply(&mut acc, partial(Some(5.0), None, None, "p")));
        assert_eq!(acc.revenue, None);
        assert_eq!(acc.scope1, Some(5.0));
        assert!(!Precedence::Override.apply(&mut acc, PartialEmission::default()));
        assert_eq!(acc.scope1, Some(5.0));
    }

    #[test]
    fn modes_parse() {
        assert_eq!("AUTO".parse::<ExtractionMode>().unwrap(), ExtractionMode::Auto);
        assert_eq!(ExtractionMode::default().to_string(), "cascade");
        assert!("guess".parse::<ExtractionMode>().is_err());
    }

    #[tokio::test]
    async fn reasoning_modes_need_a_reasoner() {
        let extractor = EmissionExtractor::new(ExtractionConfig::default(), 2024);
        for mode in [ExtractionMode::Text, ExtractionMode::Vision, ExtractionMode::Auto] {
            let err = extractor.extract(mode, &[]).await.unwrap_err();
            assert!(matches!(err, EsgError::ProviderNotConfigured { .. }), "{mode}: {err}");
        }
        let out = extractor.extract(ExtractionMode::Cascade, &[]).await.unwrap();
        assert_eq!(out.tier, None);
    }
}
