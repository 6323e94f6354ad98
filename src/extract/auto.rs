//! Auto mode: score every table crop cheaply, then let the vision tier read
//! only the best table per category.

use crate::config::ExtractionConfig;
use crate::extract::tables::{detect_year_columns, StoredTable};
use crate::extract::vision::VisionTier;
use crate::extract::ExtractionTier;
use crate::model::{PartialEmission, TierKind};
use crate::pipeline::encode::ImageDetail;
use crate::prompts::RELEVANCE_PROMPT;
use crate::reasoning::{extract_json, VisionReasoner};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Title keywords that move a table to the front of the scoring queue.
const DOMAIN_KEYWORDS: &[&str] = &["온실가스", "배출", "scope", "ghg", "탄소", "에너지", "매출", "재무"];

static RE_SCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,3})\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableCategory {
    Emission,
    Revenue,
    Energy,
    Other,
}

impl TableCategory {
    const ALL: [TableCategory; 4] = [
        TableCategory::Emission,
        TableCategory::Revenue,
        TableCategory::Energy,
        TableCategory::Other,
    ];

    /// Loose match on a model-provided label.
    pub fn from_label(label: &str) -> Self {
        let label = label.to_lowercase();
        if label.contains("emission") || label.contains("ghg") {
            TableCategory::Emission
        } else if label.contains("revenue") || label.contains("financ") {
            TableCategory::Revenue
        } else if label.contains("energy") {
            TableCategory::Energy
        } else {
            TableCategory::Other
        }
    }
}

/// Relevance of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTable {
    pub key: String,
    pub score: u32,
    pub category: TableCategory,
    pub year_columns: usize,
}

/// Parse a relevance answer: JSON first, then the first integer in the text
/// plus a category word. Unreadable answers score 0 / other.
pub fn parse_relevance(answer: &str) -> (u32, TableCategory) {
    if let Some(json) = extract_json(answer) {
        let score = json.get("score").and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        });
        if let Some(score) = score {
            let category = json
                .get("category")
                .and_then(Value::as_str)
                .map(TableCategory::from_label)
                .unwrap_or(TableCategory::Other);
            return (score.clamp(0.0, 100.0).round() as u32, category);
        }
    }
    let score = RE_SCORE
        .captures(answer)
        .and_then(|c| c[1].parse::<u32>().ok())
        .map(|s| s.min(100))
        .unwrap_or(0);
    (score, TableCategory::from_label(answer))
}

/// Tables worth reading with the expensive vision prompt.
///
/// The winner of each category maximises `(score, year_columns)`; the first
/// table wins an exact tie. When nothing reaches `threshold`, the `top_n`
/// highest raw scores are used instead.
pub fn select_winners(scored: &[ScoredTable], threshold: u32, top_n: usize) -> Vec<ScoredTable> {
    let qualified: Vec<&ScoredTable> = scored.iter().filter(|s| s.score >= threshold).collect();
    if qualified.is_empty() {
        let mut ranked: Vec<&ScoredTable> = scored.iter().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        return ranked.into_iter().take(top_n).cloned().collect();
    }

    TableCategory::ALL
        .iter()
        .filter_map(|category| {
            qualified
                .iter()
                .copied()
                .filter(|s| s.category == *category)
                .fold(None::<&ScoredTable>, |best, s| match best {
                    Some(b) if (b.score, b.year_columns) >= (s.score, s.year_columns) => Some(b),
                    _ => Some(s),
                })
                .cloned()
        })
        .collect()
}

/// Relevance scoring followed by a vision pass over the winners.
pub struct AutoTier {
    reasoner: Arc<dyn VisionReasoner>,
    config: ExtractionConfig,
    data_year: i32,
}

impl AutoTier {
    pub fn new(reasoner: Arc<dyn VisionReasoner>, config: ExtractionConfig, data_year: i32) -> Self {
        Self {
            reasoner,
            config,
            data_year,
        }
    }

    async fn score(&self, table: &StoredTable) -> ScoredTable {
        let (score, category) = match self.read_and_score(table).await {
            Some(answer) => parse_relevance(&answer),
            None => (0, TableCategory::Other),
        };
        let year_columns = detect_year_columns(&table.grid).len();
        debug!("Auto: {} score={} {:?} years={}", table.key, score, category, year_columns);
        ScoredTable {
            key: table.key.clone(),
            score,
            category,
            year_columns,
        }
    }

    async fn read_and_score(&self, table: &StoredTable) -> Option<String> {
        let path = table.image_path.as_ref()?;
        let png = tokio::fs::read(path)
            .await
            .map_err(|e| warn!("Auto: cannot read {}: {}", path.display(), e))
            .ok()?;
        self.reasoner
            .reason_vision(RELEVANCE_PROMPT, &png, ImageDetail::Low)
            .await
            .map_err(|e| warn!("Auto: scoring {} failed: {}", table.key, e))
            .ok()
    }
}

/// Crop-bearing tables to score, domain-titled first, capped at `limit`.
/// Also returns how many were cut by the cap.
fn scoring_candidates(tables: &[StoredTable], limit: usize) -> (Vec<&StoredTable>, usize) {
    let mut candidates: Vec<&StoredTable> = tables.iter().filter(|t| t.image_path.is_some()).collect();
    candidates.sort_by_key(|t| !t.title_has_any(DOMAIN_KEYWORDS));
    let dropped = candidates.len().saturating_sub(limit);
    candidates.truncate(limit);
    (candidates, dropped)
}

#[async_trait]
impl ExtractionTier for AutoTier {
    fn kind(&self) -> TierKind {
        TierKind::VisionReasoningAuto
    }

    async fn attempt(&self, tables: &[StoredTable]) -> PartialEmission {
        let (candidates, dropped) = scoring_candidates(tables, self.config.max_scored_tables);
        if dropped > 0 {
            info!(
                "Auto: {} table crops over the limit of {} are not scored",
                dropped, self.config.max_scored_tables
            );
        }
        info!("Auto: scoring {} table crops", candidates.len());

        let mut scored = Vec::with_capacity(candidates.len());
        for table in &candidates {
            scored.push(self.score(table).await);
        }
        let winners = select_winners(&scored, self.config.relevance_threshold, self.config.fallback_top_n);
        if winners.is_empty() {
            info!("Auto: no table to read");
            return PartialEmission::default();
        }
        info!(
            "Auto: winners {}",
            winners
                .iter()
                .map(|w| format!("{}({}, {:?})", w.key, w.score, w.category))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let pick = |category: TableCategory| {
            winners
                .iter()
                .find(|w| w.category == category)
                .map(|w| w.key.clone())
        };
        let selected: Vec<StoredTable> = winners
            .iter()
            .filter_map(|w| tables.iter().find(|t| t.key == w.key).cloned())
            .collect();
        VisionTier::new(self.reasoner.clone(), self.config.clone(), self.data_year)
            .with_kind(TierKind::VisionReasoningAuto)
            .with_followup_targets(pick(TableCategory::Revenue), pick(TableCategory::Energy))
            .attempt(&selected)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasoningError;
    use crate::extract::tables::tests::table;
    use crate::model::field;
    use std::sync::Mutex;

    fn scored(key: &str, score: u32, category: TableCategory, year_columns: usize) -> ScoredTable {
        ScoredTable {
            key: key.into(),
            score,
            category,
            year_columns,
        }
    }

    #[test]
    fn winner_per_category() {
        let all = vec![
            scored("B", 90, TableCategory::Emission, 2),
            scored("A", 100, TableCategory::Emission, 4),
            scored("R", 90, TableCategory::Revenue, 1),
            scored("E", 40, TableCategory::Energy, 3),
        ];
        let keys: Vec<String> = select_winners(&all, 60, 3).into_iter().map(|w| w.key).collect();
        assert_eq!(keys, vec!["A", "R"]);
    }

    #[test]
    fn scoring_cap_keeps_domain_titles_and_counts_the_rest() {
        let mut tables: Vec<StoredTable> = (1..=5)
            .map(|n| {
                let title = if n == 4 { "온실가스 배출량" } else { "임직원 현황" };
                let mut t = table(&format!("page_{n:04}/table_001"), n, Some(title), &[&["구분", "2024"]]);
                t.image_path = Some(format!("page_{n:04}/tables/table_001.png").into());
                t
            })
            .collect();
        tables.push(table("page_0009/table_001", 9, Some("온실가스"), &[&["구분"]]));

        let (kept, dropped) = scoring_candidates(&tables, 2);
        let keys: Vec<&str> = kept.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["page_0004/table_001", "page_0001/table_001"]);
        assert_eq!(dropped, 3);

        let (all, none) = scoring_candidates(&tables, 30);
        assert_eq!(all.len(), 5);
        assert_eq!(none, 0);
    }

    #[test]
    fn year_depth_breaks_score_ties() {
        let all = vec![
            scored("shallow", 80, TableCategory::Emission, 2),
            scored("deep", 80, TableCategory::Emission, 5),
            scored("twin", 80, TableCategory::Emission, 5),
        ];
        let winners = select_winners(&all, 60, 3);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].key, "deep");
    }

    #[test]
    fn below_threshold_takes_top_n() {
        let all = vec![
            scored("a", 10, TableCategory::Other, 0),
            scored("b", 50, TableCategory::Emission, 0),
            scored("c", 30, TableCategory::Energy, 0),
            scored("d", 40, TableCategory::Other, 0),
        ];
        let keys: Vec<String> = select_winners(&all, 60, 3).into_iter().map(|w| w.key).collect();
        assert_eq!(keys, vec!["b", "d", "c"]);
    }

    #[test]
    fn lenient_relevance_parsing() {
        assert_eq!(parse_relevance(r#"{"score": 80, "category": "emission"}"#), (80, TableCategory::Emission));
        assert_eq!(parse_relevance(r#"{"score": "90", "category": "Revenue"}"#), (90, TableCategory::Revenue));
        assert_eq!(parse_relevance("Score: 90. This is an energy table."), (90, TableCategory::Energy));
        assert_eq!(parse_relevance("no idea"), (0, TableCategory::Other));
    }

    /// Scores by table title (the crop bytes are the title) and reads scopes.
    #[derive(Default)]
    struct Grader {
        scope_reads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VisionReasoner for Grader {
        async fn reason_vision(&self, prompt: &str, png: &[u8], detail: ImageDetail) -> Result<String, ReasoningError> {
            let title = String::from_utf8_lossy(png).to_string();
            if prompt == RELEVANCE_PROMPT {
                assert_eq!(detail, ImageDetail::Low);
                return Ok(if title.contains("온실가스") {
                    r#"{"score": 95, "category": "emission"}"#.into()
                } else {
                    r#"{"score": 10, "category": "other"}"#.into()
                });
            }
            assert_eq!(detail, ImageDetail::High);
            if prompt.contains("s1_2024") {
                self.scope_reads.lock().unwrap().push(title);
            }
            Ok(r#"{"s1_2024": 1100, "s2_2024": 750, "s3_2024": 90}"#.into())
        }
    }

    #[tokio::test]
    async fn vision_reads_only_winners() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = Vec::new();
        for (i, title) in ["회사 개요", "온실가스 배출량", "용수 사용량"].iter().enumerate() {
            let mut t = table(&format!("page_{:04}/table_001", i + 1), i as u32 + 1, Some(title), &[]);
            let path = dir.path().join(format!("{i}.png"));
            std::fs::write(&path, title.as_bytes()).unwrap();
            t.image_path = Some(path);
            tables.push(t);
        }
        let reasoner = Arc::new(Grader::default());
        let out = AutoTier::new(reasoner.clone(), ExtractionConfig::default(), 2024)
            .attempt(&tables)
            .await;

        assert_eq!(out.scope1, Some(1100.0));
        assert_eq!(out.scope3, Some(90.0));
        assert_eq!(out.source_tables[field::SCOPE1], "page_0002/table_001");
        assert_eq!(*reasoner.scope_reads.lock().unwrap(), vec!["온실가스 배출량".to_string()]);
    }
}
