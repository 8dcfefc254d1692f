use crate::config::{PeriodAlias, PipelineConfig};
use crate::error::Result;
use crate::model::{
    FactRejection, MappedRow, NormalizedFact, PeriodType, RejectionReason, RejectionStage, Scope,
    ValueType,
};
use crate::store::FactStore;
use chrono::{Datelike, Days, NaiveDate};
use log::debug;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

fn month_number(token: &str) -> Option<u32> {
    let token = token.to_lowercase();
    MONTH_NAMES
        .iter()
        .position(|m| token.starts_with(m))
        .map(|i| i as u32 + 1)
}

fn monthly_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?ix)^(?:
                (?P<y1>\d{4})-(?P<m1>0[1-9]|1[0-2])            # 2025-02
              | (?P<mon2>[a-z]{3,9})[\s\-]+(?P<y2>\d{4})       # Feb 2025 / February 2025
              | (?P<mon3>[a-z]{3,9})-(?P<y3>\d{2})             # Feb-25
              | (?P<m4>0[1-9]|1[0-2])/(?P<y4>\d{4})            # 02/2025
            )$",
        )
        .unwrap()
    })
}

fn quarterly_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?ix)^(?:
                q(?P<q1>[1-4])[\s\-]*(?P<y1>\d{4})             # Q1 2025
              | (?P<y2>\d{4})[\s\-]q(?P<q2>[1-4])              # 2025-Q1
              | q(?P<q3>[1-4])[\s\-](?P<y3>\d{2})              # Q1-25
            )$",
        )
        .unwrap()
    })
}

fn yearly_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?ix)^(?:
                (?P<y1>\d{4})                                  # 2025
              | fy[\s\-]*(?P<y2>\d{4})                         # FY2025
              | fy[\s\-]*(?P<y3>\d{2})                         # FY25
            )$",
        )
        .unwrap()
    })
}

fn ytd_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?ix)^(?:ytd[\s\-]*(?P<y1>\d{4})|(?P<y2>\d{4})[\s\-]*ytd)$").unwrap()
    })
}

fn expand_two_digit_year(y: u32) -> i32 {
    2000 + y as i32
}

/// Canonicalize free-form period text into a `(label, period_type)` pair.
/// Exact alias match first, then the ordered regex families: YTD,
/// monthly, quarterly, yearly. YTD runs first because "YTD 2025" also
/// fits the monthly word-plus-year shape, which would swallow it.
pub fn parse_period_label(text: &str, aliases: &[PeriodAlias]) -> Option<(String, PeriodType)> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();

    for alias in aliases {
        if alias.alias.to_lowercase() == lowered {
            return Some((alias.label.clone(), alias.period_type));
        }
    }

    if let Some(caps) = ytd_re().captures(trimmed) {
        let year = caps
            .name("y1")
            .or_else(|| caps.name("y2"))?
            .as_str()
            .parse::<i32>()
            .ok()?;
        return Some((format!("YTD {year}"), PeriodType::Yearly));
    }

    if let Some(caps) = monthly_re().captures(trimmed) {
        let (year, month) = if let (Some(y), Some(m)) = (caps.name("y1"), caps.name("m1")) {
            (y.as_str().parse::<i32>().ok()?, m.as_str().parse::<u32>().ok()?)
        } else if let (Some(mon), Some(y)) = (caps.name("mon2"), caps.name("y2")) {
            (y.as_str().parse::<i32>().ok()?, month_number(mon.as_str())?)
        } else if let (Some(mon), Some(y)) = (caps.name("mon3"), caps.name("y3")) {
            (
                expand_two_digit_year(y.as_str().parse::<u32>().ok()?),
                month_number(mon.as_str())?,
            )
        } else if let (Some(m), Some(y)) = (caps.name("m4"), caps.name("y4")) {
            (y.as_str().parse::<i32>().ok()?, m.as_str().parse::<u32>().ok()?)
        } else {
            return None;
        };
        return Some((format!("{year}-{month:02}"), PeriodType::Monthly));
    }

    if let Some(caps) = quarterly_re().captures(trimmed) {
        let (year, quarter) = if let (Some(q), Some(y)) = (caps.name("q1"), caps.name("y1")) {
            (y.as_str().parse::<i32>().ok()?, q.as_str().parse::<u32>().ok()?)
        } else if let (Some(y), Some(q)) = (caps.name("y2"), caps.name("q2")) {
            (y.as_str().parse::<i32>().ok()?, q.as_str().parse::<u32>().ok()?)
        } else if let (Some(q), Some(y)) = (caps.name("q3"), caps.name("y3")) {
            (
                expand_two_digit_year(y.as_str().parse::<u32>().ok()?),
                q.as_str().parse::<u32>().ok()?,
            )
        } else {
            return None;
        };
        return Some((format!("{year}-Q{quarter}"), PeriodType::Quarterly));
    }

    if let Some(caps) = yearly_re().captures(trimmed) {
        let year = if let Some(y) = caps.name("y1") {
            y.as_str().parse::<i32>().ok()?
        } else if let Some(y) = caps.name("y2") {
            y.as_str().parse::<i32>().ok()?
        } else if let Some(y) = caps.name("y3") {
            expand_two_digit_year(y.as_str().parse::<u32>().ok()?)
        } else {
            return None;
        };
        // Reject implausible years so bare row numbers don't become periods.
        if !(1990..=2100).contains(&year) {
            return None;
        }
        return Some((year.to_string(), PeriodType::Yearly));
    }

    None
}

pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .checked_sub_days(Days::new(1))
        .unwrap()
}

pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let year_diff = end.year() - start.year();
    let month_diff = end.month() as i32 - start.month() as i32;
    year_diff * 12 + month_diff
}

/// Start and end dates for a canonical period label.
pub fn period_dates(label: &str, period_type: PeriodType) -> Option<(NaiveDate, NaiveDate)> {
    match period_type {
        PeriodType::Monthly => {
            let (y, m) = label.split_once('-')?;
            let year: i32 = y.parse().ok()?;
            let month: u32 = m.parse().ok()?;
            let start = NaiveDate::from_ymd_opt(year, month, 1)?;
            Some((start, last_day_of_month(year, month)))
        }
        PeriodType::Quarterly => {
            let (y, q) = label.split_once("-Q")?;
            let year: i32 = y.parse().ok()?;
            let quarter: u32 = q.parse().ok()?;
            if !(1..=4).contains(&quarter) {
                return None;
            }
            let start_month = (quarter - 1) * 3 + 1;
            let start = NaiveDate::from_ymd_opt(year, start_month, 1)?;
            Some((start, last_day_of_month(year, start_month + 2)))
        }
        PeriodType::Yearly => {
            let year: i32 = label.strip_prefix("YTD ").unwrap_or(label).parse().ok()?;
            let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
            Some((start, NaiveDate::from_ymd_opt(year, 12, 31)?))
        }
    }
}

/// Canonical monthly label for a date.
pub fn month_label(year: i32, month: u32) -> String {
    format!("{year}-{month:02}")
}

/// Parse a reported value: currency symbols, thousands separators and
/// whitespace stripped; `(...)` wrapping negates. Returns `None` for
/// anything that is not a number.
pub fn parse_value(text: &str) -> Option<f64> {
    let mut s = text.trim().to_string();
    if s.is_empty() {
        return None;
    }

    let negative_parens = s.starts_with('(') && s.ends_with(')');
    if negative_parens {
        s = s[1..s.len() - 1].to_string();
    }

    s = s
        .replace(['£', '$', '€', ','], "")
        .replace('\u{a0}', "")
        .trim()
        .to_string();
    if let Some(stripped) = s.strip_suffix('%') {
        s = stripped.trim().to_string();
    }

    if s.is_empty() || s == "-" {
        return None;
    }

    let mut value: f64 = s.parse().ok()?;
    if negative_parens {
        value = -value;
    }
    Some(value)
}

/// Quick check used by extraction strategies to decide whether a cell is
/// a value cell at all. More permissive than `parse_value` only in
/// accepting surrounding whitespace.
pub fn looks_numeric(text: &str) -> bool {
    parse_value(text).is_some()
}

/// Content hash over the composite natural key. Deliberately excludes
/// timestamps and the raw value so identical re-ingestion is detected at
/// the persistence layer.
pub fn content_hash(
    company_id: i64,
    period_id: i64,
    line_item_id: i64,
    value_type: ValueType,
    source_file: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{company_id}|{period_id}|{line_item_id}|{}|{source_file}",
        value_type.as_str()
    ));
    hex::encode(hasher.finalize())
}

/// Outcome of normalizing one mapped row.
#[derive(Debug, Clone)]
pub enum NormalizeOutcome {
    Fact(NormalizedFact),
    Rejected(FactRejection),
}

pub struct Normalizer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Canonicalize one mapped row into a persistable fact, resolving or
    /// creating its Period and looking up its LineItemDefinition. Every
    /// failure is a structured rejection, not an error.
    pub fn normalize(
        &self,
        row: &MappedRow,
        company_id: i64,
        document_id: i64,
        source_file: &str,
        store: &FactStore,
    ) -> Result<NormalizeOutcome> {
        let raw = &row.raw;

        let Some((label, period_type)) =
            raw.period_text
                .as_deref()
                .and_then(|t| parse_period_label(t, &self.config.period_aliases))
        else {
            debug!(
                "rejecting '{}': unparseable period {:?}",
                raw.line_item_text, raw.period_text
            );
            return Ok(NormalizeOutcome::Rejected(self.rejection(
                row,
                source_file,
                RejectionReason::MissingPeriod,
            )));
        };

        let Some(mut value) = parse_value(&raw.value_text) else {
            debug!(
                "rejecting '{}' @ {}: unparseable value '{}'",
                raw.line_item_text, label, raw.value_text
            );
            return Ok(NormalizeOutcome::Rejected(self.rejection(
                row,
                source_file,
                RejectionReason::ValueUnparseable,
            )));
        };

        // The unit hint is an explicit marker set at extraction; applying
        // it here is the single scaling point in the pipeline.
        if let Some(hint) = raw.unit_hint {
            value *= hint.multiplier();
        }

        let Some(line_item_id) = store.line_item_id(&row.canonical_line_item)? else {
            return Ok(NormalizeOutcome::Rejected(self.rejection(
                row,
                source_file,
                RejectionReason::LineItemUnresolved,
            )));
        };

        let (start, end) = period_dates(&label, period_type)
            .ok_or_else(|| crate::error::FactStoreError::PeriodResolution(label.clone()))?;
        let period_id = store.resolve_period(&label, period_type, start, end)?;

        let value_type = raw.scenario_hint.unwrap_or(ValueType::Actual);
        let scope = if label.starts_with("YTD ") {
            Scope::Ytd
        } else {
            raw.period_scope
        };
        let hash = content_hash(company_id, period_id, line_item_id, value_type, source_file);

        Ok(NormalizeOutcome::Fact(NormalizedFact {
            company_id,
            period_id,
            period_label: label,
            line_item_id,
            line_item_name: row.canonical_line_item.clone(),
            value_type,
            frequency: period_type,
            value,
            currency: detect_currency(&raw.value_text),
            scope,
            source_file: source_file.to_string(),
            coordinates: raw.coordinates,
            context_key: raw.context_key.clone(),
            extraction_method: raw.extraction_method,
            confidence: raw.confidence,
            document_id,
            hash,
        }))
    }

    fn rejection(
        &self,
        row: &MappedRow,
        source_file: &str,
        reason: RejectionReason,
    ) -> FactRejection {
        FactRejection {
            stage: RejectionStage::Normalization,
            reason,
            line_item_text: row.raw.line_item_text.clone(),
            value_text: row.raw.value_text.clone(),
            period_text: row.raw.period_text.clone(),
            source_file: source_file.to_string(),
            coordinates: row.raw.coordinates,
            context_key: row.raw.context_key.clone(),
        }
    }
}

/// Currency inferred from the symbol inside the raw value text. GBP is
/// the fallback for unadorned numbers.
pub fn detect_currency(value_text: &str) -> String {
    if value_text.contains('$') {
        "USD".to_string()
    } else if value_text.contains('€') {
        "EUR".to_string()
    } else {
        "GBP".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_round_trip() {
        assert_eq!(parse_value("(1,234)"), Some(-1234.0));
        assert_eq!(parse_value("£1,234"), Some(1234.0));
        assert_eq!(parse_value("1234.56"), Some(1234.56));
        assert_eq!(parse_value("(£2,000.50)"), Some(-2000.5));
        assert_eq!(parse_value("$99"), Some(99.0));
        assert_eq!(parse_value("12%"), Some(12.0));
        assert_eq!(parse_value("-"), None);
        assert_eq!(parse_value(""), None);
        assert_eq!(parse_value("n/a"), None);
        assert_eq!(parse_value("Revenue"), None);
    }

    #[test]
    fn test_period_canonicalization() {
        let aliases = [];
        assert_eq!(
            parse_period_label("Q1 2025", &aliases),
            Some(("2025-Q1".to_string(), PeriodType::Quarterly))
        );
        assert_eq!(
            parse_period_label("Feb 2025", &aliases),
            Some(("2025-02".to_string(), PeriodType::Monthly))
        );
        assert_eq!(
            parse_period_label("February 2025", &aliases),
            Some(("2025-02".to_string(), PeriodType::Monthly))
        );
        assert_eq!(
            parse_period_label("Feb-25", &aliases),
            Some(("2025-02".to_string(), PeriodType::Monthly))
        );
        assert_eq!(
            parse_period_label("2025-02", &aliases),
            Some(("2025-02".to_string(), PeriodType::Monthly))
        );
        assert_eq!(
            parse_period_label("2025", &aliases),
            Some(("2025".to_string(), PeriodType::Yearly))
        );
        assert_eq!(
            parse_period_label("FY25", &aliases),
            Some(("2025".to_string(), PeriodType::Yearly))
        );
        // Both YTD spellings; the leading one also fits the monthly
        // word-plus-year shape and must not be eaten by it.
        assert_eq!(
            parse_period_label("YTD 2025", &aliases),
            Some(("YTD 2025".to_string(), PeriodType::Yearly))
        );
        assert_eq!(
            parse_period_label("2025 YTD", &aliases),
            Some(("YTD 2025".to_string(), PeriodType::Yearly))
        );
        assert_eq!(parse_period_label("totals", &aliases), None);
        assert_eq!(parse_period_label("123", &aliases), None);
    }

    #[test]
    fn test_period_alias_takes_precedence() {
        let aliases = [PeriodAlias {
            alias: "full year 2025".to_string(),
            label: "2025".to_string(),
            period_type: PeriodType::Yearly,
        }];
        assert_eq!(
            parse_period_label("Full Year 2025", &aliases),
            Some(("2025".to_string(), PeriodType::Yearly))
        );
    }

    #[test]
    fn test_period_dates() {
        assert_eq!(
            period_dates("2025-02", PeriodType::Monthly),
            Some((
                NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 2, 28).unwrap()
            ))
        );
        assert_eq!(
            period_dates("2025-Q2", PeriodType::Quarterly),
            Some((
                NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
            ))
        );
        assert_eq!(
            period_dates("2025", PeriodType::Yearly),
            Some((
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()
            ))
        );
        assert_eq!(
            period_dates("YTD 2025", PeriodType::Yearly),
            Some((
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()
            ))
        );
    }

    #[test]
    fn test_months_between() {
        let jan = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let apr = NaiveDate::from_ymd_opt(2025, 4, 30).unwrap();
        assert_eq!(months_between(jan, apr), 3);
        assert_eq!(months_between(apr, jan), -3);
    }

    #[test]
    fn test_content_hash_excludes_value() {
        let a = content_hash(1, 2, 3, ValueType::Actual, "pack.pdf");
        let b = content_hash(1, 2, 3, ValueType::Actual, "pack.pdf");
        let c = content_hash(1, 2, 3, ValueType::Budget, "pack.pdf");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
