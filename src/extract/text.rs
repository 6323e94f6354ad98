//! Text-reasoning tier: serialised tables sent to a text model one at a time.

use crate::config::ExtractionConfig;
use crate::extract::tables::StoredTable;
use crate::extract::ExtractionTier;
use crate::model::{field, PartialEmission, TierKind, YearSeries};
use crate::prompts::{text_extraction_prompt, TEXT_SYSTEM_PROMPT};
use crate::reasoning::{extract_json, json_number, json_year, TextReasoner};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Title keywords that put a table in the first candidate group.
const KEYWORDS: &[&str] = &["온실가스", "배출", "scope", "ghg", "탄소"];

/// Candidate tables in request order.
///
/// Keyword-titled tables with enough cells come first, then the largest
/// remaining tables; each group is ordered by page.
pub fn text_candidates<'a>(tables: &'a [StoredTable], config: &ExtractionConfig) -> Vec<&'a StoredTable> {
    let mut keyword: Vec<(u8, &StoredTable)> = tables
        .iter()
        .filter(|t| t.title_has_any(KEYWORDS) && t.cell_count() >= config.text_keyword_min_cells)
        .map(|t| (1, t))
        .collect();

    let mut rest: Vec<&StoredTable> = tables
        .iter()
        .filter(|t| !t.title_has_any(KEYWORDS) && t.cell_count() >= config.text_other_min_cells)
        .collect();
    rest.sort_by_key(|t| std::cmp::Reverse(t.cell_count()));
    rest.truncate(config.text_other_limit);

    keyword.extend(rest.into_iter().map(|t| (2, t)));
    keyword.sort_by_key(|(priority, t)| (*priority, t.page_no));
    keyword.into_iter().map(|(_, t)| t).collect()
}

/// ` | `-joined rows, capped in rows and cell length.
pub fn serialize_table(grid: &[Vec<String>], max_rows: usize, max_cell_chars: usize) -> String {
    grid.iter()
        .take(max_rows)
        .map(|row| {
            row.iter()
                .map(|c| c.chars().take(max_cell_chars).collect::<String>())
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn year_series(value: Option<&Value>) -> YearSeries {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| {
                    let year = k.trim().get(..4)?.parse::<i32>().ok()?;
                    Some((year, json_number(v)?))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse one text-tier answer. `None` for malformed JSON.
pub fn parse_text_answer(answer: &str, table_key: &str) -> Option<PartialEmission> {
    let json = extract_json(answer)?;
    let mut out = PartialEmission {
        scope1: json.get("scope1").and_then(json_number),
        scope2: json.get("scope2").and_then(json_number),
        scope3: json.get("scope3").and_then(json_number),
        yearly_emissions: year_series(json.get("yearly_emissions")),
        base_year: json.get("base_year").and_then(json_year),
        base_emissions: json.get("base_emissions").and_then(json_number),
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
    Some(out)
}

/// Text-reasoning tier.
pub struct TextTier {
    reasoner: Arc<dyn TextReasoner>,
    config: ExtractionConfig,
}

impl TextTier {
    pub fn new(reasoner: Arc<dyn TextReasoner>, config: ExtractionConfig) -> Self {
        Self { reasoner, config }
    }
}

#[async_trait]
impl ExtractionTier for TextTier {
    fn kind(&self) -> TierKind {
        TierKind::TextReasoning
    }

    async fn attempt(&self, tables: &[StoredTable]) -> PartialEmission {
        let mut out = PartialEmission::default();
        let candidates = text_candidates(tables, &self.config);
        info!("Text tier: {} candidate tables", candidates.len());

        for table in candidates.into_iter().take(self.config.max_tables_per_tier) {
            let text = serialize_table(&table.grid, self.config.text_max_rows, self.config.text_max_cell_chars);
            if text.chars().count() < self.config.text_min_chars {
                continue;
            }
            let answer = match self
                .reasoner
                .reason_text(TEXT_SYSTEM_PROMPT, &text_extraction_prompt(&text))
                .await
            {
                Ok(a) => a,
                Err(e) => {
                    warn!("Text tier: {} failed: {}", table.key, e);
                    continue;
                }
            };
            let Some(found) = parse_text_answer(&answer, &table.key) else {
                debug!("Text tier: {} returned malformed JSON", table.key);
                continue;
            };
            debug!("Text tier: {} S1={:?} S2={:?}", table.key, found.scope1, found.scope2);
            out.fill_from(&found);
            if out.has_core_scopes() {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasoningError;
    use crate::extract::tables::tests::table;
    use std::sync::Mutex;

    /// Answers from a queue and records which tables it saw.
    struct Scripted {
        answers: Mutex<Vec<Result<String, ReasoningError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<String, ReasoningError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into_iter().rev().collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextReasoner for Scripted {
        async fn reason_text(&self, system: &str, prompt: &str) -> Result<String, ReasoningError> {
            assert_eq!(system, TEXT_SYSTEM_PROMPT);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answers.lock().unwrap().pop().unwrap_or(Err(ReasoningError::EmptyResponse))
        }
    }

    fn big(key: &str, page: u32, title: &str, label: &str) -> StoredTable {
        let mut rows: Vec<Vec<String>> = vec![["구분", "2022", "2023", "2024"].map(String::from).to_vec()];
        for i in 0..7 {
            rows.push(vec![format!("{label} {i}"), "1,000".into(), "1,100".into(), "1,200".into()]);
        }
        StoredTable {
            key: key.into(),
            page_no: page,
            id: "table_001".into(),
            title: Some(title.into()),
            grid: rows,
            image_path: None,
        }
    }

    #[test]
    fn candidates_keyword_first_then_by_size() {
        let tables = vec![
            big("page_0080/table_001", 80, "임직원 현황", "인원"),
            big("page_0070/table_001", 70, "탄소 배출 현황", "배출"),
            big("page_0030/table_001", 30, "온실가스", "배출"),
            table("page_0010/table_001", 10, Some("온실가스"), &[&["작은", "표"]]),
        ];
        let keys: Vec<&str> = text_candidates(&tables, &ExtractionConfig::default())
            .iter()
            .map(|t| t.key.as_str())
            .collect();
        assert_eq!(keys, vec!["page_0030/table_001", "page_0070/table_001", "page_0080/table_001"]);
    }

    #[test]
    fn serialises_with_caps() {
        let grid = vec![vec!["가".repeat(80), "b".into()], vec!["c".into(), "d".into()]];
        let text = serialize_table(&grid, 1, 50);
        assert_eq!(text, format!("{} | b", "가".repeat(50)));
    }

    #[test]
    fn parses_answers() {
        let found = parse_text_answer(
            "```json\n{\"scope1\": \"1,200\", \"scope2\": null, \"yearly_emissions\": {\"2023\": 2000, \"2024년\": 2100}, \"base_year\": 2019}\n```",
            "page_0030/table_001",
        )
        .unwrap();
        assert_eq!(found.scope1, Some(1200.0));
        assert_eq!(found.scope2, None);
        assert_eq!(found.yearly_emissions.len(), 2);
        assert_eq!(found.base_year, Some(2019));
        assert_eq!(found.source_tables[field::SCOPE1], "page_0030/table_001");
        assert!(parse_text_answer("I could not find anything", "k").is_none());
    }

    #[tokio::test]
    async fn stops_once_core_scopes_resolved() {
        let tables = vec![
            big("page_0030/table_001", 30, "온실가스 배출량", "Scope"),
            big("page_0031/table_001", 31, "온실가스 배출량", "Scope"),
            big("page_0032/table_001", 32, "온실가스 배출량", "Scope"),
        ];
        let reasoner = Scripted::new(vec![
            Ok("not json".into()),
            Ok(r#"{"scope1": 1200, "scope2": 800}"#.into()),
            Ok(r#"{"scope1": 1, "scope2": 1}"#.into()),
        ]);
        let tier = TextTier::new(reasoner.clone(), ExtractionConfig::default());
        let out = tier.attempt(&tables).await;

        assert_eq!(out.scope1, Some(1200.0));
        assert_eq!(out.source_tables[field::SCOPE2], "page_0031/table_001");
        assert_eq!(reasoner.prompts.lock().unwrap().len(), 2);
    }
}
