//! Text fallback strategies for pages where no tabular structure was
//! recovered: regex-driven term+number extraction, and a dedicated
//! statutory-accounts extractor for the classic two-year column layout.

use super::{find_period_in_text, find_scenario, ExtractionStrategy, SourcePage};
use crate::config::PipelineConfig;
use crate::model::{Coordinates, ExtractionMethod, RawRow, Scope, ValueType};
use crate::normalize::parse_value;
use regex::Regex;
use std::sync::OnceLock;

const TEXT_PATTERN_CONFIDENCE: f64 = 0.5;
const STATUTORY_CONFIDENCE: f64 = 0.6;

/// Two statutory-accounts values must be within this ratio of one another;
/// anything wider is footnote noise, not a comparative column.
const MAX_STATUTORY_RATIO: f64 = 20.0;

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(?-?[£$€]?[\d,]+(?:\.\d+)?\)?").unwrap())
}

fn text_context_key(page: &SourcePage) -> String {
    let mut key = format!("p{}_text", page.page_number);
    if let Some(tag) = super::grid::detect_section_tag(&page.text) {
        key.push('_');
        key.push_str(&tag);
    }
    if page.default_scope == Scope::Ytd {
        key.push_str("_ytd");
    }
    key
}

/// Strategy 4a: scan free text line by line for a configured financial
/// term followed closely by a number. The weakest signal in the chain.
pub struct TextPatternStrategy;

impl TextPatternStrategy {
    fn term_pattern(config: &PipelineConfig) -> Option<Regex> {
        let mut terms: Vec<String> = Vec::new();
        for seed in &config.line_items {
            terms.push(regex::escape(&seed.name));
            for alias in &seed.aliases {
                terms.push(regex::escape(alias));
            }
        }
        if terms.is_empty() {
            return None;
        }
        // Longest terms first so "total revenue" beats "revenue".
        terms.sort_by_key(|t| std::cmp::Reverse(t.len()));
        Regex::new(&format!(r"(?i)\b(?P<term>{})\b", terms.join("|"))).ok()
    }

    /// First number after the term that is not a bare calendar year;
    /// "Revenue for Feb 2025 was £1,234" must pick 1,234, not 2025.
    fn value_after(rest: &str) -> Option<&str> {
        let window = match rest.char_indices().nth(80) {
            Some((byte, _)) => &rest[..byte],
            None => rest,
        };
        number_re()
            .find_iter(window)
            .map(|m| m.as_str())
            .find(|t| !is_bare_year(t))
    }
}

fn is_bare_year(token: &str) -> bool {
    token.len() == 4
        && token
            .parse::<i32>()
            .map(|y| (1990..=2100).contains(&y))
            .unwrap_or(false)
}

impl ExtractionStrategy for TextPatternStrategy {
    fn name(&self) -> &'static str {
        "text_pattern"
    }

    fn attempt(&self, page: &SourcePage, config: &PipelineConfig) -> Vec<RawRow> {
        if page.text.trim().is_empty() {
            return Vec::new();
        }
        let Some(pattern) = Self::term_pattern(config) else {
            return Vec::new();
        };

        let page_period = find_period_in_text(&page.text, config);
        let context_key = text_context_key(page);

        let mut out = Vec::new();
        for (line_no, line) in page.text.lines().enumerate() {
            for m in pattern.find_iter(line) {
                let Some(value_text) = Self::value_after(&line[m.end()..]) else {
                    continue;
                };
                if parse_value(value_text).is_none() {
                    continue;
                }
                let period = find_period_in_text(line, config)
                    .or_else(|| page_period.clone())
                    .map(|(label, _)| label);
                out.push(RawRow {
                    line_item_text: m.as_str().to_string(),
                    value_text: value_text.to_string(),
                    period_text: period,
                    scenario_hint: find_scenario(line, config),
                    coordinates: Coordinates {
                        page: Some(page.page_number),
                        table: None,
                        row: Some(line_no as u32),
                        col: None,
                    },
                    context_key: context_key.clone(),
                    extraction_method: ExtractionMethod::TextPattern,
                    confidence: TEXT_PATTERN_CONFIDENCE,
                    period_scope: page.default_scope,
                    unit_hint: page.unit_hint,
                });
            }
        }
        out
    }
}

/// Strategy 4b: statutory accounts print a two-year comparative header
/// (e.g. "2024   2023") followed by a `Turnover` line carrying one value
/// per year. Both values become Yearly Actual facts.
pub struct StatutoryAccountsStrategy;

impl StatutoryAccountsStrategy {
    fn year_header(line: &str) -> Option<(i32, i32)> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"\b((?:19|20)\d{2})\b\s+.*?\b((?:19|20)\d{2})\b").unwrap()
        });
        let caps = re.captures(line)?;
        let y1: i32 = caps[1].parse().ok()?;
        let y2: i32 = caps[2].parse().ok()?;
        if y1 == y2 {
            return None;
        }
        Some((y1, y2))
    }

    fn turnover_line(line: &str) -> Option<(String, String, String)> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"(?i)^\s*(?P<term>turnover|revenue)\b").unwrap());
        let caps = re.captures(line)?;
        let term = caps.name("term")?.as_str().to_string();

        let rest = &line[caps.get(0)?.end()..];
        let numbers: Vec<&str> = number_re().find_iter(rest).map(|m| m.as_str()).collect();
        if numbers.len() < 2 {
            return None;
        }
        Some((term, numbers[0].to_string(), numbers[1].to_string()))
    }
}

impl ExtractionStrategy for StatutoryAccountsStrategy {
    fn name(&self) -> &'static str {
        "statutory_accounts"
    }

    fn attempt(&self, page: &SourcePage, _config: &PipelineConfig) -> Vec<RawRow> {
        if page.text.trim().is_empty() {
            return Vec::new();
        }

        let mut years: Option<(i32, i32)> = None;
        let context_key = text_context_key(page);
        let mut out = Vec::new();

        for (line_no, line) in page.text.lines().enumerate() {
            if years.is_none() {
                years = Self::year_header(line);
                continue;
            }
            let Some((term, first, second)) = Self::turnover_line(line) else {
                continue;
            };
            let (Some(v1), Some(v2)) = (parse_value(&first), parse_value(&second)) else {
                continue;
            };
            // Comparably scaled values only; a 2024 total next to a
            // footnote reference is not a comparative pair.
            let (lo, hi) = (v1.abs().min(v2.abs()), v1.abs().max(v2.abs()));
            if lo == 0.0 || hi / lo > MAX_STATUTORY_RATIO {
                continue;
            }

            let Some((y1, y2)) = years else {
                continue;
            };
            for (year, value_text) in [(y1, first), (y2, second)] {
                out.push(RawRow {
                    line_item_text: term.clone(),
                    value_text,
                    period_text: Some(year.to_string()),
                    scenario_hint: Some(ValueType::Actual),
                    coordinates: Coordinates {
                        page: Some(page.page_number),
                        table: None,
                        row: Some(line_no as u32),
                        col: None,
                    },
                    context_key: context_key.clone(),
                    extraction_method: ExtractionMethod::StatutoryAccounts,
                    confidence: STATUTORY_CONFIDENCE,
                    period_scope: Scope::Period,
                    unit_hint: page.unit_hint,
                });
            }
            break;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_page(text: &str) -> SourcePage {
        SourcePage {
            page_number: 2,
            text: text.to_string(),
            grids: vec![],
            unit_hint: None,
            default_scope: Scope::Period,
        }
    }

    #[test]
    fn test_text_pattern_extraction() {
        let page = text_page("Revenue for Feb 2025 was £1,234 against budget.\nEBITDA of 200 reported.");
        let config = PipelineConfig::default();
        let rows = TextPatternStrategy.attempt(&page, &config);
        assert!(rows.len() >= 2);
        let revenue = rows.iter().find(|r| r.line_item_text == "Revenue").unwrap();
        assert_eq!(revenue.value_text, "£1,234");
        assert_eq!(revenue.period_text.as_deref(), Some("2025-02"));
        assert_eq!(revenue.extraction_method, ExtractionMethod::TextPattern);
    }

    #[test]
    fn test_text_pattern_page_period_fallback() {
        let page = text_page("Management accounts Feb 2025\n\nTurnover 5,000");
        let config = PipelineConfig::default();
        let rows = TextPatternStrategy.attempt(&page, &config);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].period_text.as_deref(), Some("2025-02"));
    }

    #[test]
    fn test_statutory_two_year_extraction() {
        let page = text_page(
            "Profit and loss account\n      2024      2023\nTurnover    1,200    1,000\nCost of sales  (400)  (350)",
        );
        let config = PipelineConfig::default();
        let rows = StatutoryAccountsStrategy.attempt(&page, &config);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].period_text.as_deref(), Some("2024"));
        assert_eq!(rows[0].value_text, "1,200");
        assert_eq!(rows[1].period_text.as_deref(), Some("2023"));
        assert_eq!(rows[1].scenario_hint, Some(ValueType::Actual));
    }

    #[test]
    fn test_statutory_ratio_guard() {
        // 1,200 against a bare footnote "3" is not a comparative pair.
        let page = text_page("      2024      2023\nTurnover    1,200    3");
        let config = PipelineConfig::default();
        assert!(StatutoryAccountsStrategy.attempt(&page, &config).is_empty());
    }

    #[test]
    fn test_statutory_requires_year_header() {
        let page = text_page("Turnover    1,200    1,000");
        let config = PipelineConfig::default();
        assert!(StatutoryAccountsStrategy.attempt(&page, &config).is_empty());
    }
}
