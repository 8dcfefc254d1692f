//! Extraction: one input file in, a sequence of raw candidate rows out.
//!
//! Strategies are tried in a fixed fallback order per page; each either
//! returns rows or an empty result, and none of them raise for unreadable
//! content. Environmental failures (missing file, unsupported extension)
//! are the only errors surfaced to the caller.

pub mod csv;
pub mod grid;
pub mod pdf;
pub mod sheet;
pub mod table;
pub mod text;

use crate::config::PipelineConfig;
use crate::error::{FactStoreError, Result};
use crate::model::{ExtractionMethod, RawRow, Scope, UnitHint, ValueType};
use crate::normalize::parse_period_label;
use grid::Grid;
use log::{debug, info, warn};
use std::path::Path;

/// One unit of extraction work: a PDF page, a workbook sheet, or a whole
/// CSV file.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub page_number: u32,
    /// Free text of the page; empty for spreadsheet sheets.
    pub text: String,
    /// Tabular regions recovered from the page.
    pub grids: Vec<Grid>,
    /// Page-level unit-scale banner (e.g. "£'000"), propagated onto every
    /// row so normalization can scale exactly once.
    pub unit_hint: Option<UnitHint>,
    /// Page-level Period/YTD default, from page text.
    pub default_scope: Scope,
}

/// One extraction strategy in the fallback chain.
///
/// `attempt` never fails: unusable input yields an empty vector and the
/// chain moves on.
pub trait ExtractionStrategy {
    fn name(&self) -> &'static str;
    fn attempt(&self, page: &SourcePage, config: &PipelineConfig) -> Vec<RawRow>;
}

/// A strategy must clear this yield before the chain stops falling through.
const MIN_STRATEGY_YIELD: usize = 1;

fn strategy_chain() -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(table::StructuredTableStrategy),
        Box::new(table::MonthMatrixStrategy),
        Box::new(table::HeaderMappedStrategy),
        Box::new(text::StatutoryAccountsStrategy),
        Box::new(text::TextPatternStrategy),
    ]
}

/// Run the fallback chain over one page, returning the first yield that
/// clears the minimum threshold.
pub fn extract_page(page: &SourcePage, config: &PipelineConfig) -> Vec<RawRow> {
    for strategy in strategy_chain() {
        let rows = strategy.attempt(page, config);
        if rows.len() >= MIN_STRATEGY_YIELD {
            debug!(
                "page {}: strategy '{}' yielded {} rows",
                page.page_number,
                strategy.name(),
                rows.len()
            );
            return rows;
        }
    }
    debug!("page {}: no strategy yielded rows", page.page_number);
    Vec::new()
}

pub struct Extractor<'a> {
    config: &'a PipelineConfig,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Extract raw candidate rows from a file, dispatching on extension.
    /// Unreadable pages are logged and skipped; only a missing file or an
    /// unsupported extension is an error.
    pub fn extract(&self, path: &Path) -> Result<Vec<RawRow>> {
        if !path.exists() {
            return Err(FactStoreError::FileNotFound(path.display().to_string()));
        }
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let pages = match extension.as_str() {
            "pdf" => pdf::extract_pages(path),
            "xlsx" | "xls" => sheet::extract_pages(path),
            "csv" => csv::extract_pages(path),
            other => {
                return Err(FactStoreError::UnsupportedFileType(other.to_string()));
            }
        };

        let mut rows: Vec<RawRow> = pages
            .iter()
            .flat_map(|p| extract_page(p, self.config))
            .collect();

        // OCR fallback: only for PDFs, only when the direct extraction
        // produced no usable monthly Revenue candidates, and only when the
        // external tool is actually installed.
        if extension == "pdf" && !has_usable_monthly_revenue(&rows, self.config) {
            if pdf::ocr_available() {
                info!("no usable monthly Revenue candidates; retrying {} via OCR", path.display());
                let ocr_pages = pdf::extract_pages_via_ocr(path);
                let ocr_rows: Vec<RawRow> = ocr_pages
                    .iter()
                    .flat_map(|p| extract_page(p, self.config))
                    .map(|mut r| {
                        r.extraction_method = ExtractionMethod::Ocr;
                        r.confidence = OCR_CONFIDENCE;
                        r
                    })
                    .collect();
                if !ocr_rows.is_empty() {
                    rows = ocr_rows;
                }
            } else {
                warn!("OCR fallback skipped for {}: tesseract not installed", path.display());
            }
        }

        info!("extracted {} raw rows from {}", rows.len(), path.display());
        Ok(rows)
    }
}

/// Confidence assigned to OCR-recovered rows. Like all strategy
/// confidences this is an ordering signal for the fact selector, not a
/// probability.
pub const OCR_CONFIDENCE: f64 = 0.4;

fn has_usable_monthly_revenue(rows: &[RawRow], config: &PipelineConfig) -> bool {
    let revenue = config.line_items.iter().find(|li| li.name == "Revenue");
    rows.iter().any(|row| {
        let is_monthly = row
            .period_text
            .as_deref()
            .and_then(|t| parse_period_label(t, &config.period_aliases))
            .map(|(_, pt)| pt == crate::model::PeriodType::Monthly)
            .unwrap_or(false);
        if !is_monthly {
            return false;
        }
        let item = row.line_item_text.to_lowercase();
        match revenue {
            Some(seed) => {
                item == seed.name.to_lowercase()
                    || seed.aliases.iter().any(|a| a.to_lowercase() == item)
            }
            None => item.contains("revenue") || item.contains("turnover"),
        }
    })
}

/// Find a scenario token inside header text. Longest tokens are checked
/// first so "prior year" wins over "py".
pub fn find_scenario(text: &str, config: &PipelineConfig) -> Option<ValueType> {
    let lowered = text.to_lowercase();
    let mut tokens: Vec<(&String, &ValueType)> = config.scenario_tokens.iter().collect();
    tokens.sort_by_key(|(token, _)| std::cmp::Reverse(token.len()));
    for (token, value_type) in tokens {
        if contains_word(&lowered, token) {
            return Some(*value_type);
        }
    }
    None
}

/// Find a period expression inside free header text by testing whole-text
/// first, then one- and two-token windows.
pub fn find_period_in_text(text: &str, config: &PipelineConfig) -> Option<(String, crate::model::PeriodType)> {
    if let Some(found) = parse_period_label(text, &config.period_aliases) {
        return Some(found);
    }
    let tokens: Vec<&str> = text.split_whitespace().collect();
    for pair in tokens.windows(2) {
        if let Some(found) = parse_period_label(&pair.join(" "), &config.period_aliases) {
            return Some(found);
        }
    }
    for token in &tokens {
        if let Some(found) = parse_period_label(token, &config.period_aliases) {
            return Some(found);
        }
    }
    None
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let before_ok = begin == 0
            || !haystack[..begin]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        let after_ok = end == haystack.len()
            || !haystack[end..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}
