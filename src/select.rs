use crate::config::PipelineConfig;
use crate::error::Result;
use crate::model::{FinancialMetric, Period, PeriodType, Scope, ValueType};
use crate::store::FactStore;
use log::debug;

/// The winning candidate for one `(company, metric, period, scenario)` cell,
/// with its canonical period attached.
#[derive(Debug, Clone)]
pub struct SelectedFact {
    pub metric: FinancialMetric,
    pub period: Period,
    pub line_item_name: String,
}

/// Latest monthly Actual worth analyzing, plus the nearest usable month
/// before it. Downstream comparators use the pair for month-on-month work.
#[derive(Debug, Clone)]
pub struct LatestUsableMonth {
    pub latest: SelectedFact,
    pub prior: Option<SelectedFact>,
    /// The month-on-month move is within the flat-move threshold, which
    /// usually means a value was carried forward rather than re-reported.
    pub flat_month_on_month: bool,
}

/// Deterministic best-candidate picker over the accumulated store.
///
/// Confidence is a heuristic ordering signal assigned by the extraction
/// strategies, never a calibrated probability; it is only ever compared,
/// not combined.
pub struct FactSelector<'a> {
    store: &'a FactStore,
    config: &'a PipelineConfig,
}

impl<'a> FactSelector<'a> {
    pub fn new(store: &'a FactStore, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Pick the best persisted candidate for one cell. Candidates are
    /// ordered by confidence, then by document recency; for KPI metrics,
    /// footnote-scale values below the configured minimum magnitude are
    /// dropped before ranking.
    pub fn best(
        &self,
        company_id: i64,
        metric_name: &str,
        period_label: &str,
        value_type: ValueType,
    ) -> Result<Option<SelectedFact>> {
        let mut candidates: Vec<SelectedFact> = self
            .store
            .metrics_with_periods(company_id)?
            .into_iter()
            .filter(|(m, p, name)| {
                name.eq_ignore_ascii_case(metric_name)
                    && p.label == period_label
                    && m.value_type == value_type
            })
            .map(|(metric, period, line_item_name)| SelectedFact {
                metric,
                period,
                line_item_name,
            })
            .collect();

        let before = candidates.len();
        if self.is_kpi(metric_name) {
            let floor = self.config.reconciliation.kpi_min_magnitude;
            candidates.retain(|c| c.metric.value.abs() >= floor);
            if candidates.len() < before {
                debug!(
                    "dropped {} footnote-scale candidates for {metric_name} {period_label}",
                    before - candidates.len()
                );
            }
        }

        candidates.sort_by(|a, b| {
            b.metric
                .confidence
                .partial_cmp(&a.metric.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.metric.document_id.cmp(&a.metric.document_id))
        });

        Ok(candidates.into_iter().next())
    }

    /// Most recent month carrying a usable monthly Actual for the metric,
    /// and the nearest usable month before it (not necessarily adjacent).
    pub fn latest_usable_month(
        &self,
        company_id: i64,
        metric_name: &str,
    ) -> Result<Option<LatestUsableMonth>> {
        let mut labels: Vec<String> = self
            .store
            .metrics_with_periods(company_id)?
            .into_iter()
            .filter(|(m, p, name)| {
                name.eq_ignore_ascii_case(metric_name)
                    && m.value_type == ValueType::Actual
                    && m.scope == Scope::Period
                    && p.period_type == PeriodType::Monthly
                    && self.passes_sanity(metric_name, m.value)
            })
            .map(|(_, p, _)| p.label)
            .collect();
        labels.sort();
        labels.dedup();

        let Some(latest_label) = labels.last().cloned() else {
            return Ok(None);
        };
        let Some(latest) = self.best(company_id, metric_name, &latest_label, ValueType::Actual)?
        else {
            return Ok(None);
        };

        let prior = match labels.iter().rev().find(|l| **l < latest_label) {
            Some(prior_label) => {
                self.best(company_id, metric_name, prior_label, ValueType::Actual)?
            }
            None => None,
        };

        let flat_month_on_month = prior.as_ref().is_some_and(|p| {
            p.metric.value != 0.0
                && ((latest.metric.value - p.metric.value) / p.metric.value).abs()
                    <= self.config.reconciliation.flat_move_threshold
        });

        Ok(Some(LatestUsableMonth {
            latest,
            prior,
            flat_month_on_month,
        }))
    }

    fn is_kpi(&self, metric_name: &str) -> bool {
        self.config
            .quality
            .required_metrics
            .iter()
            .any(|m| m.eq_ignore_ascii_case(metric_name))
    }

    fn passes_sanity(&self, metric_name: &str, value: f64) -> bool {
        !self.is_kpi(metric_name) || value.abs() >= self.config.reconciliation.kpi_min_magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinates, ExtractionMethod, NormalizedFact};
    use crate::normalize::period_dates;

    fn store_with(facts: &[(&str, f64, f64, i64, &str)]) -> FactStore {
        // (period_label, value, confidence, document_id, source_file)
        let store = FactStore::open_in_memory().unwrap();
        store
            .seed_line_items(&PipelineConfig::default().line_items)
            .unwrap();
        let line_item_id = store.line_item_id("Revenue").unwrap().unwrap();
        // Fixture facts reference document ids 1 and 2; inserts would fail
        // the foreign key without the rows.
        store
            .create_document(1, "a.pdf", "/tmp/a.pdf", &serde_json::json!({}))
            .unwrap();
        store
            .create_document(1, "b.pdf", "/tmp/b.pdf", &serde_json::json!({}))
            .unwrap();
        let mut batch = Vec::new();
        for (label, value, confidence, document_id, source_file) in facts {
            let (start, end) = period_dates(label, PeriodType::Monthly).unwrap();
            let period_id = store
                .resolve_period(label, PeriodType::Monthly, start, end)
                .unwrap();
            batch.push(NormalizedFact {
                company_id: 1,
                period_id,
                period_label: label.to_string(),
                line_item_id,
                line_item_name: "Revenue".to_string(),
                value_type: ValueType::Actual,
                frequency: PeriodType::Monthly,
                value: *value,
                currency: "GBP".to_string(),
                scope: Scope::Period,
                source_file: source_file.to_string(),
                coordinates: Coordinates::new(1, 0, 1, 1),
                context_key: "p1_t0".to_string(),
                extraction_method: ExtractionMethod::StructuredTable,
                confidence: *confidence,
                document_id: *document_id,
                hash: format!("h-{label}-{source_file}"),
            });
        }
        let outcome = store.persist(&batch).unwrap();
        assert_eq!(outcome.errors, 0);
        assert_eq!(outcome.inserted, batch.len());
        store
    }

    #[test]
    fn test_best_prefers_higher_confidence() {
        let store = store_with(&[
            ("2025-02", 1000.0, 0.5, 1, "a.pdf"),
            ("2025-02", 1100.0, 0.9, 1, "b.pdf"),
        ]);
        let config = PipelineConfig::default();
        let selector = FactSelector::new(&store, &config);
        let best = selector
            .best(1, "Revenue", "2025-02", ValueType::Actual)
            .unwrap()
            .unwrap();
        assert_eq!(best.metric.value, 1100.0);
    }

    #[test]
    fn test_best_breaks_confidence_ties_by_recency() {
        let store = store_with(&[
            ("2025-02", 1000.0, 0.9, 1, "a.pdf"),
            ("2025-02", 1100.0, 0.9, 2, "b.pdf"),
        ]);
        let config = PipelineConfig::default();
        let selector = FactSelector::new(&store, &config);
        let best = selector
            .best(1, "Revenue", "2025-02", ValueType::Actual)
            .unwrap()
            .unwrap();
        assert_eq!(best.metric.document_id, 2);
    }

    #[test]
    fn test_kpi_sanity_filter_drops_footnote_noise() {
        // Default kpi_min_magnitude is 50; the 3.0 footnote value has a
        // higher confidence but must lose to the full-scale figure.
        let store = store_with(&[
            ("2025-02", 3.0, 0.9, 1, "a.pdf"),
            ("2025-02", 1250.0, 0.5, 1, "b.pdf"),
        ]);
        let config = PipelineConfig::default();
        let selector = FactSelector::new(&store, &config);
        let best = selector
            .best(1, "Revenue", "2025-02", ValueType::Actual)
            .unwrap()
            .unwrap();
        assert_eq!(best.metric.value, 1250.0);
    }

    #[test]
    fn test_best_returns_none_for_missing_cell() {
        let store = store_with(&[("2025-02", 1000.0, 0.9, 1, "a.pdf")]);
        let config = PipelineConfig::default();
        let selector = FactSelector::new(&store, &config);
        assert!(selector
            .best(1, "Revenue", "2025-03", ValueType::Actual)
            .unwrap()
            .is_none());
        assert!(selector
            .best(1, "Revenue", "2025-02", ValueType::Budget)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_latest_usable_month_with_prior() {
        let store = store_with(&[
            ("2025-01", 900.0, 0.9, 1, "a.pdf"),
            ("2025-03", 1100.0, 0.9, 1, "a.pdf"),
        ]);
        let config = PipelineConfig::default();
        let selector = FactSelector::new(&store, &config);
        let result = selector.latest_usable_month(1, "Revenue").unwrap().unwrap();
        assert_eq!(result.latest.period.label, "2025-03");
        // 2025-02 is absent; the nearest usable month is January.
        assert_eq!(result.prior.unwrap().period.label, "2025-01");
        assert!(!result.flat_month_on_month);
    }

    #[test]
    fn test_latest_usable_month_flags_carried_forward_value() {
        // Default flat-move threshold is 0.5%; a 0.02% move trips it.
        let store = store_with(&[
            ("2025-01", 1000.0, 0.9, 1, "a.pdf"),
            ("2025-02", 1000.2, 0.9, 1, "a.pdf"),
        ]);
        let config = PipelineConfig::default();
        let selector = FactSelector::new(&store, &config);
        let result = selector.latest_usable_month(1, "Revenue").unwrap().unwrap();
        assert!(result.flat_month_on_month);
    }

    #[test]
    fn test_latest_usable_month_skips_footnote_scale_values() {
        let store = store_with(&[
            ("2025-01", 900.0, 0.9, 1, "a.pdf"),
            ("2025-04", 2.0, 0.9, 1, "a.pdf"),
        ]);
        let config = PipelineConfig::default();
        let selector = FactSelector::new(&store, &config);
        let result = selector.latest_usable_month(1, "Revenue").unwrap().unwrap();
        assert_eq!(result.latest.period.label, "2025-01");
        assert!(result.prior.is_none());
    }

    #[test]
    fn test_latest_usable_month_empty_store() {
        let store = store_with(&[]);
        let config = PipelineConfig::default();
        let selector = FactSelector::new(&store, &config);
        assert!(selector.latest_usable_month(1, "Revenue").unwrap().is_none());
    }
}
