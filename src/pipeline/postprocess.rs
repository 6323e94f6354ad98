//! Post-processing: deterministic cleanup of page markdown.
//!
//! Converter exports and model-written summaries both end up in `page.md` /
//! `summary.md`, and both carry small artefacts: CRLF line endings, stray
//! zero-width characters from the PDF text layer, runs of blank lines where
//! furniture was removed, headings glued to the previous paragraph, and the
//! occasional ` ```markdown ` wrapper around a model answer.
//!
//! ## Rule Order
//!
//! Line endings are normalised first, so fence stripping and every per-line
//! rule only ever see `\n`; blank-line collapsing runs after boilerplate
//! removal has left its gaps.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules. The result ends with exactly one newline.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip outer markdown fences
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim trailing whitespace per line
/// 5. Ensure heading lines have a blank line before them
/// 6. Collapse runs of blank lines to a single blank line
/// 7. Ensure the text ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_markdown_fences(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = normalise_heading_spacing(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Normalise heading spacing ────────────────────────────────────────

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    for (i, line) in input.lines().enumerate() {
        if is_heading(line) && i > 0 {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 6: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 7: Ensure single final newline ──────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_matches('\n');
    if trimmed.trim().is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        let input = "```markdown\n# 요약\n\n본문\n```";
        assert_eq!(strip_markdown_fences(input), "# 요약\n\n본문");
    }

    #[test]
    fn test_no_fences_passthrough() {
        let input = "# 요약\n\n본문";
        assert_eq!(strip_markdown_fences(input), input);
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("온\u{200B}실\u{FEFF}가스"), "온실가스");
    }

    #[test]
    fn test_trim_trailing_whitespace() {
        assert_eq!(trim_trailing_whitespace("a   \nb\t\n"), "a\nb");
    }

    #[test]
    fn test_heading_spacing() {
        let out = normalise_heading_spacing("본문\n## 환경 성과\n내용");
        assert_eq!(out, "본문\n\n## 환경 성과\n내용\n");
        // `#3` is not a heading
        assert_eq!(normalise_heading_spacing("a\n#3 순위"), "a\n#3 순위\n");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_ensure_final_newline() {
        assert_eq!(ensure_final_newline("a\n\n\n"), "a\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }

    #[test]
    fn test_clean_markdown_full_pipeline() {
        let input = "```markdown\r\n# 환경\r\n본문   \r\n\r\n\r\n\r\n| a | b |\r\n|---|---|\r\n```";
        let out = clean_markdown(input);
        assert_eq!(out, "# 환경\n본문\n\n| a | b |\n|---|---|\n");
    }

    #[test]
    fn test_crlf_md_fence_is_stripped() {
        let out = clean_markdown("```md\r\n요약 문단\r\n```\r\n");
        assert_eq!(out, "요약 문단\n");
    }
}
