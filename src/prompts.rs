//! Prompts for every reasoning call the pipeline makes.
//!
//! Keeping them in one module means a prompt tweak touches exactly one file,
//! and unit tests can inspect the rendered prompts without a live model.
//! Disclosures are Korean, so the prompts name the Korean row labels the
//! models will actually see.

/// System prompt for the vision fallback that rebuilds an unconverted page.
pub const FALLBACK_SYSTEM_PROMPT: &str = "Answer with JSON only. Do not add explanations.";

/// User prompt for the vision fallback.
pub fn fallback_prompt(page_no: u32) -> String {
    format!(
        r#"You are an analyst reading page {page_no} of a corporate ESG report.
Extract the key content of the attached page image as JSON.

Output format:
{{"summary": str, "key_points": [str], "tables": [{{"title": str, "headers": [str], "rows": [[str]]}}], "figures": [str]}}

If a table cannot be read, leave its rows empty and describe what you can in key_points.
Answer with the JSON object only."#
    )
}

/// System prompt for optional per-page summaries.
pub const SUMMARY_SYSTEM_PROMPT: &str = "You are an analyst interpreting ESG reports. \
Trust the numbers in the table JSON files and explain the context given by the markdown text.";

/// User prompt for a per-page summary.
///
/// `tables` lists one line per table (`- title: structured data=path`).
pub fn summary_prompt(page_no: u32, markdown: &str, tables: &[String]) -> String {
    let tables_text = if tables.is_empty() {
        "(this page has no tables)".to_string()
    } else {
        tables.join("\n")
    };
    format!(
        "Below is the markdown body of page {page_no} of an ESG report. Summarise and interpret it; \
         verify any specific figure against the table JSON files listed below before quoting it.\n\n\
         [Body]\n{markdown}\n\n[Tables]\n{tables_text}\n\n\
         If the page is mostly images, describe its main message and leave numeric comparison to the table JSON."
    )
}

/// System prompt for the text-reasoning tier.
pub const TEXT_SYSTEM_PROMPT: &str = "You extract data from ESG report tables. Return JSON only.";

/// User prompt for the text-reasoning tier over one serialised table.
pub fn text_extraction_prompt(table_text: &str) -> String {
    format!(
        r#"The following is a table from an ESG report. Extract the fields below and return them as JSON.

Always answer with JSON, even when nothing is found. Never include explanations.

## Fields
- scope1: Scope 1 (direct emissions, 직접 배출) for the latest year, tCO2e
- scope2: Scope 2 (indirect emissions, 간접 배출) for the latest year, tCO2e
- scope3: Scope 3 (other indirect, 기타 간접 배출) if present, tCO2e
- yearly_emissions: total Scope 1+2 per year, e.g. {{"2021": 12345, "2022": 23456}}
- base_year: base year, if stated
- base_emissions: emissions in the base year

## Rules
1. Numbers only: drop units and thousands separators
2. Use null for anything not found
3. "직접 온실가스", "직접배출" and "Scope 1" all mean Scope 1
4. "간접 온실가스", "간접배출" and "Scope 2" all mean Scope 2
5. With several year columns, ignore any "기준연도" column and use the largest year
6. Year headers such as "2024 1)" carry footnote marks; read the year only
7. Use the grand-total row, not sub-rows such as "국내" or "해외"

## Table
{table_text}

## Response format (JSON only)
{{"scope1": number|null, "scope2": number|null, "scope3": number|null, "yearly_emissions": {{}}|null, "base_year": number|null, "base_emissions": number|null}}"#
    )
}

/// User prompt for the vision-reasoning tier.
///
/// Requests flat `s1_YYYY` / `s2_YYYY` / `s3_YYYY` keys for `data_year` and the
/// `years_back` years before it.
pub fn vision_extraction_prompt(data_year: i32, years_back: i32) -> String {
    let first = data_year - years_back;
    let keys: Vec<String> = (first..=data_year)
        .rev()
        .flat_map(|y| [format!("\"s1_{y}\": number|null"), format!("\"s2_{y}\": number|null"), format!("\"s3_{y}\": number|null")])
        .collect();
    format!(
        r#"The attached image is a table from a Korean corporate ESG report.
Read the greenhouse-gas emissions per year for {first}–{data_year} in tCO2e.

## Which row is which
- Scope 1 is the direct-emissions row (직접 배출, Scope 1).
- Scope 2 is the indirect-emissions row (간접 배출, Scope 2).
- Scope 3 is the other-indirect row (기타 간접, Scope 3).
- A grand-total row (총 배출량, Scope 1+2, 합계) is NOT Scope 1 or Scope 2. Never copy it into s1 or s2.

## Example
| 구분 | 2022 | 2023 |
| Scope 1 | 1,200 | 1,100 |
| Scope 2 | 800 | 750 |
| 합계 (Scope 1+2) | 2,000 | 1,850 |
gives {{"s1_2023": 1100, "s2_2023": 750, "s1_2022": 1200, "s2_2022": 800}}; the 합계 row is ignored.

## Rules
1. Numbers only, without thousands separators or units
2. If values are in 천 tCO2e or 만 tCO2e, convert to tCO2e
3. null for any year or scope not shown
4. base_year / base_emissions only if the table names a base year (기준연도)

## Response format (JSON only)
{{{}, "base_year": number|null, "base_emissions": number|null}}"#,
        keys.join(", ")
    )
}

/// Relevance-scoring prompt sent with a low-detail table image.
pub const RELEVANCE_PROMPT: &str = r#"Rate from 0 to 100 how useful this table is for extracting ESG figures, and name its category.

## Scoring (strict)
- 100: greenhouse-gas emissions with Scope 1, 2 AND 3 in one table
- 80: Scope 1 and 2 present but Scope 3 missing or unclear
- 90: energy consumption or energy intensity (에너지 집약도) clearly present
- 90: revenue (매출액) or other financial totals present
- 0-30: targets, narrative text or unrelated data

## Category
emission | revenue | energy | other

Answer with JSON only, e.g. {"score": 80, "category": "emission"}"#;

/// Follow-up prompt asking only for revenue.
pub fn revenue_prompt(data_year: i32) -> String {
    format!(
        r#"The attached image is a table from a Korean corporate report.
Find the total revenue (매출액) for {data_year}.

Report it in 억원 (100 million KRW). Convert "N조 M억원" to N*10000 + M.
Numbers only, no separators.

Answer with JSON only: {{"revenue": number|null}}"#
    )
}

/// Follow-up prompt asking only for energy intensity.
pub fn energy_prompt(data_year: i32) -> String {
    format!(
        r#"The attached image is a table from a Korean corporate report.
Find the energy intensity (에너지 집약도, 에너지 원단위) for {data_year} and every other year shown.
Use the intensity row, not total energy consumption (에너지 사용량).

Answer with JSON only:
{{"energy_intensity": number|null, "yearly_energy_intensity": {{"{data_year}": number}}}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_prompt_lists_all_years() {
        let p = vision_extraction_prompt(2024, 5);
        for y in 2019..=2024 {
            assert!(p.contains(&format!("s1_{y}")), "missing s1_{y}");
            assert!(p.contains(&format!("s3_{y}")));
        }
        assert!(!p.contains("s1_2018"));
        assert!(p.contains("base_emissions"));
    }

    #[test]
    fn text_prompt_embeds_table() {
        let p = text_extraction_prompt("구분 | 2023 | 2024");
        assert!(p.contains("구분 | 2023 | 2024"));
        assert!(p.contains("\"scope1\": number|null"));
    }

    #[test]
    fn summary_prompt_without_tables() {
        let p = summary_prompt(7, "# 환경", &[]);
        assert!(p.contains("page 7"));
        assert!(p.contains("no tables"));
    }

    #[test]
    fn fallback_prompt_names_page() {
        assert!(fallback_prompt(42).contains("page 42"));
    }
}
