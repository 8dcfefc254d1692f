use crate::error::{FactStoreError, Result};
use crate::model::{PeriodType, ValueType};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// What a taxonomy pattern classifies a header token as.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyKind {
    Currency,
    Period,
    Scenario,
}

/// A configured regex used as a secondary signal when the alias table
/// cannot resolve a header token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyPattern {
    pub kind: TaxonomyKind,
    pub pattern: String,
}

/// One canonical line item and the synonyms that resolve to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemSeed {
    pub name: String,
    pub aliases: Vec<String>,
}

/// An exact-match period alias, checked before the regex pattern families.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodAlias {
    pub alias: String,
    pub label: String,
    pub period_type: PeriodType,
}

/// Required coverage and tolerances for the quality gate / validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityContract {
    pub required_metrics: Vec<String>,
    pub required_value_types: Vec<ValueType>,
    /// Trailing window checked for missing months.
    pub ltm_window_months: u32,
    /// YTD / rollup reconciliation fires only when BOTH thresholds are
    /// exceeded.
    pub tolerance_abs: f64,
    pub tolerance_pct: f64,
    /// A monthly value outside `[median*low, median*high]` is an outlier.
    pub outlier_low_factor: f64,
    pub outlier_high_factor: f64,
    /// Per-metric floor used when no median is computable.
    pub min_abs_floor: BTreeMap<String, f64>,
}

impl Default for QualityContract {
    fn default() -> Self {
        Self {
            required_metrics: vec!["Revenue".to_string()],
            required_value_types: vec![ValueType::Actual],
            ltm_window_months: 12,
            tolerance_abs: 1.0,
            tolerance_pct: 1.0,
            outlier_low_factor: 0.1,
            outlier_high_factor: 10.0,
            min_abs_floor: BTreeMap::from([("Revenue".to_string(), 100.0)]),
        }
    }
}

/// Thresholds governing the reconciliation engine and the fact selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationThresholds {
    /// A month-on-month relative move at or below this fraction is
    /// considered flat, usually a carried-forward value.
    pub flat_move_threshold: f64,
    /// Candidates for KPI metrics below this magnitude are treated as
    /// footnote-scale noise by the selector.
    pub kpi_min_magnitude: f64,
    pub restatement_abs_threshold: f64,
    pub restatement_pct_threshold: f64,
    /// A period whose start is older than this many months is closed;
    /// restatements of closed periods escalate severity.
    pub closed_period_age_months: u32,
}

impl Default for ReconciliationThresholds {
    fn default() -> Self {
        Self {
            flat_move_threshold: 0.005,
            kpi_min_magnitude: 50.0,
            restatement_abs_threshold: 0.01,
            restatement_pct_threshold: 0.001,
            closed_period_age_months: 3,
        }
    }
}

/// The full externally-owned configuration, loaded once at process start
/// and injected into each component. `reload()` returns a fresh value
/// rather than mutating shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub line_items: Vec<LineItemSeed>,
    /// Lowercased header tokens resolving to a scenario.
    pub scenario_tokens: BTreeMap<String, ValueType>,
    pub taxonomy: Vec<TaxonomyPattern>,
    pub period_aliases: Vec<PeriodAlias>,
    pub quality: QualityContract,
    pub reconciliation: ReconciliationThresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let line_items = vec![
            LineItemSeed {
                name: "Revenue".to_string(),
                aliases: vec![
                    "turnover".to_string(),
                    "sales".to_string(),
                    "total revenue".to_string(),
                    "total sales".to_string(),
                    "income".to_string(),
                ],
            },
            LineItemSeed {
                name: "Cost of Sales".to_string(),
                aliases: vec![
                    "cos".to_string(),
                    "cogs".to_string(),
                    "cost of goods sold".to_string(),
                    "direct costs".to_string(),
                ],
            },
            LineItemSeed {
                name: "Gross Profit".to_string(),
                aliases: vec!["gross margin".to_string(), "gp".to_string()],
            },
            LineItemSeed {
                name: "Operating Expenses".to_string(),
                aliases: vec![
                    "opex".to_string(),
                    "overheads".to_string(),
                    "administrative expenses".to_string(),
                    "admin expenses".to_string(),
                ],
            },
            LineItemSeed {
                name: "EBITDA".to_string(),
                aliases: vec!["adjusted ebitda".to_string(), "operating profit before depreciation".to_string()],
            },
            LineItemSeed {
                name: "Net Income".to_string(),
                aliases: vec![
                    "net profit".to_string(),
                    "profit after tax".to_string(),
                    "pat".to_string(),
                    "profit for the year".to_string(),
                    "profit for the period".to_string(),
                ],
            },
            LineItemSeed {
                name: "Cash".to_string(),
                aliases: vec![
                    "cash at bank".to_string(),
                    "cash and cash equivalents".to_string(),
                    "closing cash".to_string(),
                ],
            },
            LineItemSeed {
                name: "Headcount".to_string(),
                aliases: vec!["fte".to_string(), "employees".to_string(), "staff".to_string()],
            },
        ];

        let scenario_tokens = BTreeMap::from([
            ("actual".to_string(), ValueType::Actual),
            ("actuals".to_string(), ValueType::Actual),
            ("act".to_string(), ValueType::Actual),
            ("budget".to_string(), ValueType::Budget),
            ("bud".to_string(), ValueType::Budget),
            ("plan".to_string(), ValueType::Budget),
            ("prior year".to_string(), ValueType::PriorYear),
            ("prior yr".to_string(), ValueType::PriorYear),
            ("last year".to_string(), ValueType::PriorYear),
            ("py".to_string(), ValueType::PriorYear),
            ("ly".to_string(), ValueType::PriorYear),
            ("forecast".to_string(), ValueType::Forecast),
            ("fcst".to_string(), ValueType::Forecast),
            ("fc".to_string(), ValueType::Forecast),
            ("variance".to_string(), ValueType::Variance),
            ("var".to_string(), ValueType::Variance),
        ]);

        let taxonomy = vec![
            TaxonomyPattern {
                kind: TaxonomyKind::Currency,
                pattern: r"(?i)^(£|\$|€|gbp|usd|eur)\s*('?000s?|m|k)?$".to_string(),
            },
            TaxonomyPattern {
                kind: TaxonomyKind::Period,
                pattern: r"(?i)\b(q[1-4]|fy\s*\d{2,4}|jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec|month|quarter|year|ytd)\b".to_string(),
            },
            TaxonomyPattern {
                kind: TaxonomyKind::Scenario,
                pattern: r"(?i)\b(actuals?|budget|plan|forecast|fcst|prior|variance|var)\b".to_string(),
            },
        ];

        let period_aliases = vec![
            PeriodAlias {
                alias: "full year 2025".to_string(),
                label: "2025".to_string(),
                period_type: PeriodType::Yearly,
            },
            PeriodAlias {
                alias: "fy2025".to_string(),
                label: "2025".to_string(),
                period_type: PeriodType::Yearly,
            },
            PeriodAlias {
                alias: "fy25".to_string(),
                label: "2025".to_string(),
                period_type: PeriodType::Yearly,
            },
        ];

        Self {
            line_items,
            scenario_tokens,
            taxonomy,
            period_aliases,
            quality: QualityContract::default(),
            reconciliation: ReconciliationThresholds::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file, falling back to nothing: a
    /// missing or malformed file is a hard error so a misconfigured
    /// deployment fails at startup, not mid-ingestion.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        info!(
            "Loaded pipeline configuration from {} ({} line items, {} taxonomy patterns)",
            path.display(),
            config.line_items.len(),
            config.taxonomy.len()
        );
        Ok(config)
    }

    /// Re-read the file and return a fresh immutable value. Callers swap
    /// the new value in; existing components keep the one they hold.
    pub fn reload(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.line_items.is_empty() {
            return Err(FactStoreError::ConfigError(
                "at least one canonical line item is required".to_string(),
            ));
        }
        for pattern in &self.taxonomy {
            regex::Regex::new(&pattern.pattern).map_err(|e| FactStoreError::InvalidPattern {
                pattern: pattern.pattern.clone(),
                details: e.to_string(),
            })?;
        }
        if self.quality.outlier_low_factor >= self.quality.outlier_high_factor {
            return Err(FactStoreError::ConfigError(format!(
                "outlier_low_factor ({}) must be below outlier_high_factor ({})",
                self.quality.outlier_low_factor, self.quality.outlier_high_factor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.line_items.iter().any(|li| li.name == "Revenue"));
        assert_eq!(config.scenario_tokens.get("act"), Some(&ValueType::Actual));
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.line_items.len(), config.line_items.len());
        assert_eq!(back.quality.outlier_high_factor, 10.0);
    }

    #[test]
    fn test_invalid_taxonomy_pattern_rejected() {
        let mut config = PipelineConfig::default();
        config.taxonomy.push(TaxonomyPattern {
            kind: TaxonomyKind::Period,
            pattern: "([unclosed".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_outlier_band_rejected() {
        let mut config = PipelineConfig::default();
        config.quality.outlier_low_factor = 20.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        assert!(PipelineConfig::load("/nonexistent/config.json").is_err());
    }
}
