use crate::config::PipelineConfig;
use crate::error::Result;
use crate::model::{PeriodType, Scope, ValueType};
use crate::store::FactStore;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A monthly value far outside the metric's typical scale, usually a
/// units mix-up (a £000 table ingested as units, or vice versa).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierFlag {
    pub metric: String,
    pub value_type: ValueType,
    pub period_label: String,
    pub value: f64,
    pub median: Option<f64>,
    pub low_bound: f64,
    pub high_bound: f64,
}

/// Coverage and scale assessment of the canonical store for one company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub company_id: i64,
    pub ok_for_revenue_analyst: bool,
    pub blockers: Vec<String>,
    pub warnings: Vec<String>,
    pub months_missing: usize,
    pub outliers: Vec<OutlierFlag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationMismatch {
    pub metric: String,
    pub scenario: ValueType,
    pub period_label: String,
    pub expected: f64,
    pub reported: f64,
    pub abs_diff: f64,
    pub pct_diff: f64,
}

/// Numeric reconciliation of derived sums against independently ingested
/// totals, flagged only when both tolerances are exceeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub company_id: i64,
    pub ok: bool,
    pub ytd_mismatches: Vec<ValidationMismatch>,
    pub rollup_mismatches: Vec<ValidationMismatch>,
}

/// One deduplicated monthly series: month number -> value, best candidate
/// per month by (confidence, document recency).
type MonthlySeries = BTreeMap<u32, (f64, f64, i64)>;

fn upsert_best(series: &mut MonthlySeries, month: u32, value: f64, confidence: f64, doc: i64) {
    match series.get(&month) {
        Some((_, c, d)) if (*c, *d) >= (confidence, doc) => {}
        _ => {
            series.insert(month, (value, confidence, doc));
        }
    }
}

fn month_of(label: &str) -> Option<(i32, u32)> {
    let (year, month) = label.split_once('-')?;
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year.parse().ok()?, month))
}

/// Coverage and outlier checks against the configured quality contract.
pub struct QualityGate<'a> {
    store: &'a FactStore,
    config: &'a PipelineConfig,
}

impl<'a> QualityGate<'a> {
    pub fn new(store: &'a FactStore, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    pub fn assess(&self, company_id: i64) -> Result<QualityReport> {
        let facts = self.store.metrics_with_periods(company_id)?;
        let contract = &self.config.quality;

        let mut blockers = Vec::new();
        let mut warnings = Vec::new();
        let mut months_missing = 0;

        // label sets per (metric, value_type), monthly period-scope only
        let mut coverage: BTreeMap<(String, ValueType), Vec<String>> = BTreeMap::new();
        for (metric, period, name) in &facts {
            if period.period_type == PeriodType::Monthly && metric.scope == Scope::Period {
                coverage
                    .entry((name.clone(), metric.value_type))
                    .or_default()
                    .push(period.label.clone());
            }
        }
        for labels in coverage.values_mut() {
            labels.sort();
            labels.dedup();
        }

        for required in &contract.required_metrics {
            for value_type in &contract.required_value_types {
                if !coverage.contains_key(&(required.clone(), *value_type)) {
                    blockers.push(format!(
                        "no monthly {required} {} facts: the baseline series is missing",
                        value_type.as_str()
                    ));
                }
            }
            let Some(actuals) = coverage.get(&(required.clone(), ValueType::Actual)) else {
                continue;
            };
            let latest = actuals
                .last()
                .cloned()
                .unwrap_or_default();
            let Some((year, month)) = month_of(&latest) else {
                continue;
            };

            // The month immediately before the latest Actual must exist.
            let (py, pm) = if month == 1 { (year - 1, 12) } else { (year, month - 1) };
            let previous = crate::normalize::month_label(py, pm);
            if !actuals.contains(&previous) {
                blockers.push(format!(
                    "{required}: latest Actual month {latest} has no preceding month {previous}"
                ));
            }

            let mut missing_here = 0;
            let (mut y, mut m) = (year, month);
            for _ in 0..contract.ltm_window_months {
                let label = crate::normalize::month_label(y, m);
                if !actuals.contains(&label) {
                    missing_here += 1;
                }
                (y, m) = if m == 1 { (y - 1, 12) } else { (y, m - 1) };
            }
            if missing_here > 0 {
                warnings.push(format!(
                    "{required}: {missing_here} months missing in the trailing {}-month window",
                    contract.ltm_window_months
                ));
                months_missing += missing_here;
            }

            for comparator in [ValueType::Budget, ValueType::PriorYear] {
                let present = coverage
                    .get(&(required.clone(), comparator))
                    .is_some_and(|labels| labels.contains(&latest));
                if !present {
                    warnings.push(format!(
                        "{required}: no {} comparator for {latest}",
                        comparator.as_str()
                    ));
                }
            }
        }

        let outliers = self.scale_outliers(&facts);
        let ok_for_revenue_analyst = blockers.is_empty();
        info!(
            "quality assessment for company {company_id}: ok={ok_for_revenue_analyst}, {} blockers, {} warnings, {} outliers",
            blockers.len(),
            warnings.len(),
            outliers.len()
        );

        Ok(QualityReport {
            company_id,
            ok_for_revenue_analyst,
            blockers,
            warnings,
            months_missing,
            outliers,
        })
    }

    fn scale_outliers(
        &self,
        facts: &[(crate::model::FinancialMetric, crate::model::Period, String)],
    ) -> Vec<OutlierFlag> {
        let contract = &self.config.quality;
        let mut groups: BTreeMap<(String, ValueType), Vec<(String, f64)>> = BTreeMap::new();
        for (metric, period, name) in facts {
            if period.period_type == PeriodType::Monthly && metric.scope == Scope::Period {
                groups
                    .entry((name.clone(), metric.value_type))
                    .or_default()
                    .push((period.label.clone(), metric.value));
            }
        }

        let mut flags = Vec::new();
        for ((metric, value_type), observations) in groups {
            let mut magnitudes: Vec<f64> =
                observations.iter().map(|(_, v)| v.abs()).collect();
            magnitudes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let median = if magnitudes.len() >= 3 {
                Some(magnitudes[magnitudes.len() / 2])
            } else {
                None
            };

            match median {
                Some(median) if median > 0.0 => {
                    let low = median * contract.outlier_low_factor;
                    let high = median * contract.outlier_high_factor;
                    for (label, value) in &observations {
                        if value.abs() < low || value.abs() > high {
                            debug!("scale outlier: {metric} {label} = {value} (median {median})");
                            flags.push(OutlierFlag {
                                metric: metric.clone(),
                                value_type,
                                period_label: label.clone(),
                                value: *value,
                                median: Some(median),
                                low_bound: low,
                                high_bound: high,
                            });
                        }
                    }
                }
                _ => {
                    // Too few observations for a meaningful median; fall
                    // back to the configured per-metric magnitude floor.
                    let Some(floor) = contract.min_abs_floor.get(&metric) else {
                        continue;
                    };
                    for (label, value) in &observations {
                        if value.abs() < *floor {
                            flags.push(OutlierFlag {
                                metric: metric.clone(),
                                value_type,
                                period_label: label.clone(),
                                value: *value,
                                median: None,
                                low_bound: *floor,
                                high_bound: f64::INFINITY,
                            });
                        }
                    }
                }
            }
        }
        flags
    }
}

/// Running-sum reconciliation of monthly facts against ingested YTD,
/// quarterly and yearly totals.
pub struct Validator<'a> {
    store: &'a FactStore,
    config: &'a PipelineConfig,
}

impl<'a> Validator<'a> {
    pub fn new(store: &'a FactStore, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    pub fn validate(&self, company_id: i64) -> Result<ValidationReport> {
        let facts = self.store.metrics_with_periods(company_id)?;

        // (metric, scenario, year) -> best monthly period-scope value per month
        let mut monthly: BTreeMap<(String, ValueType, i32), MonthlySeries> = BTreeMap::new();
        // (metric, scenario, year) -> YTD-scope value per month
        let mut ytd: BTreeMap<(String, ValueType, i32), MonthlySeries> = BTreeMap::new();
        // (metric, scenario, parent label) -> ingested coarse total
        let mut totals: BTreeMap<(String, ValueType, String), (f64, f64, i64)> = BTreeMap::new();

        for (metric, period, name) in &facts {
            match period.period_type {
                PeriodType::Monthly => {
                    let Some((year, month)) = month_of(&period.label) else {
                        continue;
                    };
                    let key = (name.clone(), metric.value_type, year);
                    let series = match metric.scope {
                        Scope::Period => monthly.entry(key).or_default(),
                        Scope::Ytd => ytd.entry(key).or_default(),
                    };
                    upsert_best(series, month, metric.value, metric.confidence, metric.document_id);
                }
                PeriodType::Quarterly | PeriodType::Yearly => {
                    if metric.scope != Scope::Period {
                        continue;
                    }
                    let key = (name.clone(), metric.value_type, period.label.clone());
                    match totals.get(&key) {
                        Some((_, c, d)) if (*c, *d) >= (metric.confidence, metric.document_id) => {}
                        _ => {
                            totals.insert(
                                key,
                                (metric.value, metric.confidence, metric.document_id),
                            );
                        }
                    }
                }
            }
        }

        let mut ytd_mismatches = Vec::new();
        for ((metric, scenario, year), ytd_series) in &ytd {
            let Some(month_series) = monthly.get(&(metric.clone(), *scenario, *year)) else {
                continue;
            };
            for (month, (reported, _, _)) in ytd_series {
                let cumulative: f64 = month_series
                    .iter()
                    .filter(|(m, _)| **m <= *month)
                    .map(|(_, (v, _, _))| v)
                    .sum();
                if let Some(mismatch) = self.compare(
                    metric,
                    *scenario,
                    &crate::normalize::month_label(*year, *month),
                    cumulative,
                    *reported,
                ) {
                    ytd_mismatches.push(mismatch);
                }
            }
        }

        let mut rollup_mismatches = Vec::new();
        for ((metric, scenario, parent), (reported, _, _)) in &totals {
            let Some(derived) = self.derived_sum(&monthly, metric, *scenario, parent) else {
                continue;
            };
            if let Some(mismatch) =
                self.compare(metric, *scenario, parent, derived, *reported)
            {
                rollup_mismatches.push(mismatch);
            }
        }

        let ok = ytd_mismatches.is_empty() && rollup_mismatches.is_empty();
        info!(
            "validation for company {company_id}: ok={ok}, {} YTD mismatches, {} rollup mismatches",
            ytd_mismatches.len(),
            rollup_mismatches.len()
        );
        Ok(ValidationReport {
            company_id,
            ok,
            ytd_mismatches,
            rollup_mismatches,
        })
    }

    /// Sum of the monthly facts covering a quarter or year label, only
    /// when every component month is present.
    fn derived_sum(
        &self,
        monthly: &BTreeMap<(String, ValueType, i32), MonthlySeries>,
        metric: &str,
        scenario: ValueType,
        parent_label: &str,
    ) -> Option<f64> {
        let (year_text, months) = if let Some((year, quarter)) = parent_label.split_once("-Q") {
            let quarter: u32 = quarter.parse().ok()?;
            if !(1..=4).contains(&quarter) {
                return None;
            }
            let first = 3 * (quarter - 1) + 1;
            (year, (first..first + 3).collect::<Vec<u32>>())
        } else {
            (parent_label, (1..=12).collect())
        };
        let year: i32 = year_text.parse().ok()?;
        let series = monthly.get(&(metric.to_string(), scenario, year))?;

        let mut sum = 0.0;
        for month in months {
            let (value, _, _) = series.get(&month)?;
            sum += value;
        }
        Some(sum)
    }

    /// AND-tolerance comparison: both the absolute and the percentage
    /// difference must exceed their thresholds before a mismatch fires.
    fn compare(
        &self,
        metric: &str,
        scenario: ValueType,
        period_label: &str,
        expected: f64,
        reported: f64,
    ) -> Option<ValidationMismatch> {
        let contract = &self.config.quality;
        let abs_diff = (expected - reported).abs();
        let pct_diff = if expected.abs() > f64::EPSILON {
            abs_diff / expected.abs() * 100.0
        } else if abs_diff > f64::EPSILON {
            f64::INFINITY
        } else {
            0.0
        };
        if abs_diff > contract.tolerance_abs && pct_diff > contract.tolerance_pct {
            Some(ValidationMismatch {
                metric: metric.to_string(),
                scenario,
                period_label: period_label.to_string(),
                expected,
                reported,
                abs_diff,
                pct_diff,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinates, ExtractionMethod, NormalizedFact};
    use crate::normalize::period_dates;

    fn seeded_store() -> FactStore {
        let store = FactStore::open_in_memory().unwrap();
        store
            .seed_line_items(&PipelineConfig::default().line_items)
            .unwrap();
        // Facts reference this document; inserts would fail the foreign
        // key without it.
        store
            .create_document(1, "pack.pdf", "/tmp/pack.pdf", &serde_json::json!({}))
            .unwrap();
        store
    }

    fn persist_ok(store: &FactStore, facts: &[NormalizedFact]) {
        let outcome = store.persist(facts).unwrap();
        assert_eq!(outcome.errors, 0);
        assert_eq!(outcome.inserted, facts.len());
    }

    #[allow(clippy::too_many_arguments)]
    fn fact(
        store: &FactStore,
        metric: &str,
        label: &str,
        period_type: PeriodType,
        value_type: ValueType,
        scope: Scope,
        value: f64,
    ) -> NormalizedFact {
        let line_item_id = store.line_item_id(metric).unwrap().unwrap();
        let (start, end) = period_dates(label, period_type).unwrap();
        let period_id = store.resolve_period(label, period_type, start, end).unwrap();
        // Scope is not part of the composite fact key, so a YTD fact for
        // an already-persisted month must come from its own file.
        let source_file = match scope {
            Scope::Ytd => "ytd_pack.pdf",
            Scope::Period => "pack.pdf",
        };
        NormalizedFact {
            company_id: 1,
            period_id,
            period_label: label.to_string(),
            line_item_id,
            line_item_name: metric.to_string(),
            value_type,
            frequency: period_type,
            value,
            currency: "GBP".to_string(),
            scope,
            source_file: source_file.to_string(),
            coordinates: Coordinates::new(1, 0, 1, 1),
            context_key: "p1_t0".to_string(),
            extraction_method: ExtractionMethod::StructuredTable,
            confidence: 0.9,
            document_id: 1,
            hash: format!("h-{metric}-{label}-{}-{}", value_type.as_str(), scope.as_str()),
        }
    }

    fn monthly_actual(store: &FactStore, label: &str, value: f64) -> NormalizedFact {
        fact(
            store,
            "Revenue",
            label,
            PeriodType::Monthly,
            ValueType::Actual,
            Scope::Period,
            value,
        )
    }

    #[test]
    fn test_empty_store_is_a_blocker() {
        let store = seeded_store();
        let config = PipelineConfig::default();
        let report = QualityGate::new(&store, &config).assess(1).unwrap();
        assert!(!report.ok_for_revenue_analyst);
        assert_eq!(report.blockers.len(), 1);
        assert!(report.blockers[0].contains("Revenue"));
    }

    #[test]
    fn test_two_adjacent_months_satisfy_a_two_month_window() {
        let store = seeded_store();
        persist_ok(&store, &[
                monthly_actual(&store, "2025-09", 1000.0),
                monthly_actual(&store, "2025-10", 1050.0),
            ]);
        let mut config = PipelineConfig::default();
        config.quality.ltm_window_months = 2;
        let report = QualityGate::new(&store, &config).assess(1).unwrap();
        assert!(report.ok_for_revenue_analyst);
        assert_eq!(report.months_missing, 0);
    }

    #[test]
    fn test_missing_previous_month_is_a_blocker() {
        let store = seeded_store();
        persist_ok(&store, &[
                monthly_actual(&store, "2025-08", 1000.0),
                monthly_actual(&store, "2025-10", 1050.0),
            ]);
        let config = PipelineConfig::default();
        let report = QualityGate::new(&store, &config).assess(1).unwrap();
        assert!(!report.ok_for_revenue_analyst);
        assert!(report.blockers.iter().any(|b| b.contains("2025-09")));
    }

    #[test]
    fn test_missing_comparators_warn() {
        let store = seeded_store();
        persist_ok(&store, &[
                monthly_actual(&store, "2025-09", 1000.0),
                monthly_actual(&store, "2025-10", 1050.0),
            ]);
        let mut config = PipelineConfig::default();
        config.quality.ltm_window_months = 2;
        let report = QualityGate::new(&store, &config).assess(1).unwrap();
        assert!(report.warnings.iter().any(|w| w.contains("Budget")));
        assert!(report.warnings.iter().any(|w| w.contains("Prior Year")));
    }

    #[test]
    fn test_scale_outlier_against_median_band() {
        let store = seeded_store();
        // 1.0 looks like a £000 table ingested without its multiplier.
        persist_ok(&store, &[
                monthly_actual(&store, "2025-07", 1000.0),
                monthly_actual(&store, "2025-08", 1100.0),
                monthly_actual(&store, "2025-09", 1050.0),
                monthly_actual(&store, "2025-10", 1.0),
            ]);
        let config = PipelineConfig::default();
        let report = QualityGate::new(&store, &config).assess(1).unwrap();
        assert_eq!(report.outliers.len(), 1);
        assert_eq!(report.outliers[0].period_label, "2025-10");
        assert_eq!(report.outliers[0].value, 1.0);
    }

    #[test]
    fn test_outlier_floor_fallback_with_few_observations() {
        let store = seeded_store();
        // Two observations: no median; Revenue floor defaults to 100.
        persist_ok(&store, &[
                monthly_actual(&store, "2025-09", 1000.0),
                monthly_actual(&store, "2025-10", 3.0),
            ]);
        let config = PipelineConfig::default();
        let report = QualityGate::new(&store, &config).assess(1).unwrap();
        assert_eq!(report.outliers.len(), 1);
        assert!(report.outliers[0].median.is_none());
    }

    #[test]
    fn test_ytd_mismatch_respects_and_tolerance() {
        let store = seeded_store();
        persist_ok(&store, &[
                monthly_actual(&store, "2025-01", 10.0),
                monthly_actual(&store, "2025-02", 10.0),
                monthly_actual(&store, "2025-03", 10.0),
                fact(
                    &store,
                    "Revenue",
                    "2025-03",
                    PeriodType::Monthly,
                    ValueType::Actual,
                    Scope::Ytd,
                    100.0,
                ),
            ]);

        let mut config = PipelineConfig::default();
        config.quality.tolerance_abs = 1.0;
        config.quality.tolerance_pct = 2.0;
        let report = Validator::new(&store, &config).validate(1).unwrap();
        assert!(!report.ok);
        assert_eq!(report.ytd_mismatches.len(), 1);
        assert_eq!(report.ytd_mismatches[0].expected, 30.0);
        assert_eq!(report.ytd_mismatches[0].reported, 100.0);

        // The same gap is inside a loose absolute tolerance, so the AND
        // gate must keep it quiet.
        config.quality.tolerance_abs = 100.0;
        config.quality.tolerance_pct = 50.0;
        let report = Validator::new(&store, &config).validate(1).unwrap();
        assert!(report.ok);
    }

    #[test]
    fn test_quarter_sum_reconciliation() {
        let store = seeded_store();
        persist_ok(&store, &[
                monthly_actual(&store, "2025-01", 100.0),
                monthly_actual(&store, "2025-02", 200.0),
                monthly_actual(&store, "2025-03", 300.0),
                fact(
                    &store,
                    "Revenue",
                    "2025-Q1",
                    PeriodType::Quarterly,
                    ValueType::Actual,
                    Scope::Period,
                    700.0,
                ),
            ]);
        let config = PipelineConfig::default();
        let report = Validator::new(&store, &config).validate(1).unwrap();
        assert_eq!(report.rollup_mismatches.len(), 1);
        assert_eq!(report.rollup_mismatches[0].expected, 600.0);
        assert_eq!(report.rollup_mismatches[0].reported, 700.0);
    }

    #[test]
    fn test_incomplete_quarter_is_not_validated() {
        let store = seeded_store();
        persist_ok(&store, &[
                monthly_actual(&store, "2025-01", 100.0),
                monthly_actual(&store, "2025-02", 200.0),
                fact(
                    &store,
                    "Revenue",
                    "2025-Q1",
                    PeriodType::Quarterly,
                    ValueType::Actual,
                    Scope::Period,
                    700.0,
                ),
            ]);
        let config = PipelineConfig::default();
        let report = Validator::new(&store, &config).validate(1).unwrap();
        assert!(report.rollup_mismatches.is_empty());
    }
}
