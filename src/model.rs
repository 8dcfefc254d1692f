use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Granularity of a canonical period.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum PeriodType {
    Monthly,
    Quarterly,
    Yearly,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Monthly => "Monthly",
            PeriodType::Quarterly => "Quarterly",
            PeriodType::Yearly => "Yearly",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "Monthly" => Some(PeriodType::Monthly),
            "Quarterly" => Some(PeriodType::Quarterly),
            "Yearly" => Some(PeriodType::Yearly),
            _ => None,
        }
    }
}

/// Scenario of a reported figure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum ValueType {
    Actual,
    Budget,
    PriorYear,
    Forecast,
    Variance,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Actual => "Actual",
            ValueType::Budget => "Budget",
            ValueType::PriorYear => "Prior Year",
            ValueType::Forecast => "Forecast",
            ValueType::Variance => "Variance",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "Actual" => Some(ValueType::Actual),
            "Budget" => Some(ValueType::Budget),
            "Prior Year" => Some(ValueType::PriorYear),
            "Forecast" => Some(ValueType::Forecast),
            "Variance" => Some(ValueType::Variance),
            _ => None,
        }
    }
}

/// Whether a fact covers a single period or a cumulative year-to-date figure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Period,
    Ytd,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Period => "period",
            Scope::Ytd => "ytd",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "period" => Some(Scope::Period),
            "ytd" => Some(Scope::Ytd),
            _ => None,
        }
    }
}

/// Which strategy produced a raw candidate row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    StructuredTable,
    MonthMatrix,
    HeaderMapped,
    TextPattern,
    StatutoryAccounts,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::StructuredTable => "structured_table",
            ExtractionMethod::MonthMatrix => "month_matrix",
            ExtractionMethod::HeaderMapped => "header_mapped",
            ExtractionMethod::TextPattern => "text_pattern",
            ExtractionMethod::StatutoryAccounts => "statutory_accounts",
            ExtractionMethod::Ocr => "ocr",
        }
    }
}

/// Unit-scale hint detected at page or sheet level (e.g. a "£000" banner).
/// Applied exactly once, during normalization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitHint {
    Thousands,
    Millions,
}

impl UnitHint {
    pub fn multiplier(&self) -> f64 {
        match self {
            UnitHint::Thousands => 1_000.0,
            UnitHint::Millions => 1_000_000.0,
        }
    }
}

/// Source coordinates of a candidate cell. All components optional because
/// text-pattern extraction may only know the page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Coordinates {
    pub page: Option<u32>,
    pub table: Option<u32>,
    pub row: Option<u32>,
    pub col: Option<u32>,
}

impl Coordinates {
    pub fn new(page: u32, table: u32, row: u32, col: u32) -> Self {
        Self {
            page: Some(page),
            table: Some(table),
            row: Some(row),
            col: Some(col),
        }
    }
}

/// A pre-canonical candidate produced by an extraction strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRow {
    pub line_item_text: String,
    pub value_text: String,
    pub period_text: Option<String>,
    pub scenario_hint: Option<ValueType>,
    pub coordinates: Coordinates,
    /// Grouping token identifying the table/section this cell came from,
    /// e.g. `p3_t1_pl_ytd`.
    pub context_key: String,
    pub extraction_method: ExtractionMethod,
    /// Heuristic ordering signal, not a calibrated probability.
    pub confidence: f64,
    pub period_scope: Scope,
    pub unit_hint: Option<UnitHint>,
}

/// A raw row whose line item has been resolved to the canonical vocabulary.
#[derive(Debug, Clone)]
pub struct MappedRow {
    pub canonical_line_item: String,
    pub raw: RawRow,
}

/// A fully canonical fact, ready for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedFact {
    pub company_id: i64,
    pub period_id: i64,
    pub period_label: String,
    pub line_item_id: i64,
    pub line_item_name: String,
    pub value_type: ValueType,
    pub frequency: PeriodType,
    pub value: f64,
    pub currency: String,
    pub scope: Scope,
    pub source_file: String,
    pub coordinates: Coordinates,
    pub context_key: String,
    pub extraction_method: ExtractionMethod,
    pub confidence: f64,
    pub document_id: i64,
    pub hash: String,
}

/// Stage at which a candidate was dropped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionStage {
    Mapping,
    Normalization,
}

impl RejectionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionStage::Mapping => "mapping",
            RejectionStage::Normalization => "normalization",
        }
    }
}

/// Reason code for a dropped candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MissingPeriod,
    LineItemUnresolved,
    ValueUnparseable,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::MissingPeriod => "missing_period",
            RejectionReason::LineItemUnresolved => "line_item_unresolved",
            RejectionReason::ValueUnparseable => "value_unparseable",
        }
    }
}

/// A dropped candidate plus the stage and reason it was dropped at,
/// persisted for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactRejection {
    pub stage: RejectionStage,
    pub reason: RejectionReason,
    pub line_item_text: String,
    pub value_text: String,
    pub period_text: Option<String>,
    pub source_file: String,
    pub coordinates: Coordinates,
    pub context_key: String,
}

/// Provenance record for one uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub original_filename: String,
    pub stored_path: String,
    pub uploaded_at: DateTime<Utc>,
    pub company_id: i64,
    pub metadata: serde_json::Value,
}

/// A canonical reporting period. Immutable once created; unique on
/// `(label, period_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Period {
    pub id: i64,
    pub period_type: PeriodType,
    pub label: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Canonical metric name plus its accepted aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemDefinition {
    pub id: i64,
    pub name: String,
    pub aliases: Vec<String>,
}

/// The canonical persisted fact. Rows are append-only; corrections arrive
/// as new documents, never as updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialMetric {
    pub id: i64,
    pub company_id: i64,
    pub period_id: i64,
    pub line_item_id: i64,
    pub value_type: ValueType,
    pub frequency: PeriodType,
    pub value: f64,
    pub currency: String,
    pub scope: Scope,
    pub source_file: String,
    pub coordinates: Coordinates,
    pub context_key: String,
    pub extraction_method: ExtractionMethod,
    pub confidence: f64,
    pub document_id: i64,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    IntraDocumentInconsistency,
    CrossDocumentRestatement,
    TimeRollupMismatch,
}

impl FindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingType::IntraDocumentInconsistency => "intra_document_inconsistency",
            FindingType::CrossDocumentRestatement => "cross_document_restatement",
            FindingType::TimeRollupMismatch => "time_rollup_mismatch",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// An evidence-bearing inconsistency detected by the reconciliation engine.
/// Findings are recomputed per run, never accumulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationFinding {
    pub finding_type: FindingType,
    pub severity: Severity,
    pub company_id: i64,
    pub metric_name: String,
    pub scenario: ValueType,
    pub period_id: i64,
    pub message: String,
    pub evidence: serde_json::Value,
}

/// Per-stage counts returned from a single ingestion call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub document_id: i64,
    pub rows_extracted: usize,
    pub rows_mapped: usize,
    pub rows_normalized: usize,
    pub rows_persisted: usize,
    pub rows_skipped: usize,
    pub rows_rejected: usize,
    pub errors: Vec<String>,
}

/// Result of one idempotent persistence batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub findings_created: usize,
}
