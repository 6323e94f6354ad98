//! Repeated header/footer detection across a batch of pages.
//!
//! Running headers ("2024 지속가능경영보고서 | 12") differ only in their page
//! number, so lines are normalised (entities unescaped, digits masked,
//! whitespace collapsed, lowercased) and compared by a fixed-length prefix.
//! A prefix seen on enough pages of the batch is boilerplate and its lines
//! are dropped from page markdown. Image placeholder lines are never touched.

use crate::config::BoilerplateRules;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::info;

static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lines shorter than this after normalisation are never counted.
const MIN_KEY_CHARS: usize = 4;

fn normalize_once(text: &str) -> String {
    let unescaped = html_escape::decode_html_entities(text);
    let masked = RE_DIGITS.replace_all(&unescaped, "N");
    let collapsed = RE_WHITESPACE.replace_all(&masked, " ");
    collapsed.trim().to_lowercase()
}

/// Normalise a markdown line for comparison. Idempotent.
pub fn normalize_line(text: &str) -> String {
    // Nested entities settle one level per pass; each decode shortens the line.
    let mut current = normalize_once(text);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn is_placeholder_line(line: &str, placeholder: &str) -> bool {
    line.to_lowercase().contains(&placeholder.to_lowercase())
}

fn prefix_key(normalized: &str, prefix_len: usize) -> String {
    normalized.chars().take(prefix_len).collect()
}

/// Page count a key must reach to be boilerplate in a batch of `pages` pages.
///
/// `None` when the batch is too small for any line to count as repeated.
pub fn threshold(pages: usize, rules: &BoilerplateRules) -> Option<usize> {
    if pages < rules.min_pages {
        return None;
    }
    let ratio = (rules.min_ratio * pages as f64 - 1e-9).ceil() as usize;
    Some(rules.min_pages.max(ratio))
}

/// Prefix keys that repeat across the batch.
///
/// Each key counts at most once per page.
pub fn detect_boilerplate<S: AsRef<str>>(
    pages: &[S],
    rules: &BoilerplateRules,
    placeholder: &str,
) -> HashSet<String> {
    detect_boilerplate_in_batch(pages, pages.len(), rules, placeholder)
}

/// Like [`detect_boilerplate`], but the threshold is taken from
/// `batch_pages`, the size of the requested page range, even when the
/// converter returned markdown for only some of those pages.
pub fn detect_boilerplate_in_batch<S: AsRef<str>>(
    pages: &[S],
    batch_pages: usize,
    rules: &BoilerplateRules,
    placeholder: &str,
) -> HashSet<String> {
    let Some(threshold) = threshold(batch_pages.max(pages.len()), rules) else {
        return HashSet::new();
    };

    let mut page_frequency: HashMap<String, usize> = HashMap::new();
    for markdown in pages {
        let mut seen_in_page = HashSet::new();
        for line in markdown.as_ref().lines() {
            let line = line.trim();
            if line.is_empty() || is_placeholder_line(line, placeholder) {
                continue;
            }
            let norm = normalize_line(line);
            if norm.chars().count() < MIN_KEY_CHARS {
                continue;
            }
            let key = prefix_key(&norm, rules.prefix_len);
            if seen_in_page.insert(key.clone()) {
                *page_frequency.entry(key).or_insert(0) += 1;
            }
        }
    }

    let common: HashSet<String> = page_frequency
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .map(|(key, _)| key)
        .collect();
    if !common.is_empty() {
        info!(
            "Detected {} repeated line patterns (threshold {}/{})",
            common.len(),
            threshold,
            batch_pages
        );
    }
    common
}

/// Drop every line whose prefix key is boilerplate.
pub fn strip_boilerplate(
    markdown: &str,
    patterns: &HashSet<String>,
    rules: &BoilerplateRules,
    placeholder: &str,
) -> String {
    if patterns.is_empty() {
        return markdown.trim().to_string();
    }
    markdown
        .lines()
        .filter(|line| {
            is_placeholder_line(line, placeholder)
                || !patterns.contains(&prefix_key(&normalize_line(line), rules.prefix_len))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
