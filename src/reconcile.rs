use crate::config::PipelineConfig;
use crate::error::Result;
use crate::mapper::FieldMapper;
use crate::model::{
    FindingType, PeriodType, ReconciliationFinding, ReconciliationSummary, Scope, Severity,
    ValueType,
};
use crate::normalize::{detect_currency, parse_period_label, parse_value, period_dates};
use crate::store::FactStore;
use chrono::{Months, Utc};
use log::{info, warn};
use std::collections::BTreeMap;

/// Deterministic consistency checks over the accumulated store.
///
/// Three independent checks, each idempotent: before writing, a check
/// deletes its own finding type for the scope under analysis. Findings
/// carry enough evidence (values, coordinates, documents) for a reviewer
/// to locate every contributing cell; the engine never decides which
/// value is correct.
pub struct Reconciler<'a> {
    store: &'a FactStore,
    config: &'a PipelineConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a FactStore, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Run all three checks. With a `document_id`, the intra-document and
    /// rollup checks narrow to that document; restatement detection is
    /// inherently cross-document and always spans the company.
    pub fn run(
        &self,
        company_id: i64,
        document_id: Option<i64>,
        clear_existing: bool,
    ) -> Result<ReconciliationSummary> {
        let mut findings_created = 0;
        findings_created += self.check_intra_document(company_id, document_id, clear_existing)?;
        findings_created += self.check_restatements(company_id, clear_existing)?;
        findings_created += self.check_rollups(company_id, document_id, clear_existing)?;
        info!("reconciliation for company {company_id}: {findings_created} findings");
        Ok(ReconciliationSummary { findings_created })
    }

    /// The persisted fact table holds at most one row per composite key,
    /// so conflicting values inside one document survive only in the raw
    /// audit trail. This check replays each document's raw candidates,
    /// groups them by logical cell and flags cells reported with more
    /// than one distinct value.
    fn check_intra_document(
        &self,
        company_id: i64,
        document_id: Option<i64>,
        clear_existing: bool,
    ) -> Result<usize> {
        if clear_existing {
            self.store.delete_findings(
                FindingType::IntraDocumentInconsistency,
                company_id,
                document_id,
            )?;
        }

        let mapper = FieldMapper::new(self.config)?;
        let doc_ids = match document_id {
            Some(id) => vec![id],
            None => self.store.document_ids_for_company(company_id)?,
        };

        let mut created = 0;
        for doc_id in doc_ids {
            // key: (metric, period label, period type, scenario, currency, context_key)
            let mut cells: BTreeMap<
                (String, String, PeriodType, ValueType, String, String),
                Vec<(f64, serde_json::Value)>,
            > = BTreeMap::new();

            for raw in self.store.raw_rows_for_document(doc_id)? {
                let Some(period_text) = raw.period_text.clone() else {
                    continue;
                };
                let Some((label, period_type)) =
                    parse_period_label(&period_text, &self.config.period_aliases)
                else {
                    continue;
                };
                let Some(value) = parse_value(&raw.value_text) else {
                    continue;
                };
                let scenario = raw.scenario_hint.unwrap_or(ValueType::Actual);
                let currency = detect_currency(&raw.value_text);
                let coordinates = serde_json::to_value(raw.coordinates)?;
                let context_key = raw.context_key.clone();
                let metric = match mapper.map(raw) {
                    Some(mapped) => mapped.canonical_line_item,
                    None => continue,
                };
                cells
                    .entry((metric, label, period_type, scenario, currency, context_key))
                    .or_default()
                    .push((value, coordinates));
            }

            for ((metric, label, period_type, scenario, currency, _), observations) in cells {
                let mut distinct: Vec<f64> = observations.iter().map(|(v, _)| round2(*v)).collect();
                distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                distinct.dedup();
                if distinct.len() < 2 {
                    continue;
                }

                let Some((start, end)) = period_dates(&label, period_type) else {
                    continue;
                };
                let period_id = self.store.resolve_period(&label, period_type, start, end)?;
                let finding = ReconciliationFinding {
                    finding_type: FindingType::IntraDocumentInconsistency,
                    severity: Severity::Warning,
                    company_id,
                    metric_name: metric.clone(),
                    scenario,
                    period_id,
                    message: format!(
                        "document {doc_id} reports {} distinct values for {metric} {label} ({})",
                        distinct.len(),
                        scenario.as_str()
                    ),
                    evidence: serde_json::json!({
                        "document_id": doc_id,
                        "currency": currency,
                        "values": observations.iter().map(|(v, _)| v).collect::<Vec<_>>(),
                        "coordinates": observations.iter().map(|(_, c)| c).collect::<Vec<_>>(),
                    }),
                };
                self.store.insert_finding(&finding, Some(doc_id))?;
                created += 1;
            }
        }
        Ok(created)
    }

    /// Same logical cell reported with different values by different
    /// documents. Closed periods (older than the configured age) escalate
    /// severity, since revisiting a settled month is more suspicious than
    /// two in-flight drafts disagreeing.
    fn check_restatements(&self, company_id: i64, clear_existing: bool) -> Result<usize> {
        if clear_existing {
            self.store
                .delete_findings(FindingType::CrossDocumentRestatement, company_id, None)?;
        }

        // key: (metric, period_id, scenario, currency, context_key, scope)
        let mut cells: BTreeMap<
            (String, i64, ValueType, String, String, Scope),
            Vec<(i64, f64)>,
        > = BTreeMap::new();
        let mut period_starts = BTreeMap::new();
        let mut period_labels = BTreeMap::new();

        for (metric, period, name) in self.store.metrics_with_periods(company_id)? {
            period_starts.insert(period.id, period.start_date);
            period_labels.insert(period.id, period.label.clone());
            cells
                .entry((
                    name,
                    period.id,
                    metric.value_type,
                    metric.currency.clone(),
                    metric.context_key.clone(),
                    metric.scope,
                ))
                .or_default()
                .push((metric.document_id, metric.value));
        }

        let closed_before = Utc::now()
            .date_naive()
            .checked_sub_months(Months::new(self.config.reconciliation.closed_period_age_months))
            .unwrap_or_else(|| Utc::now().date_naive());

        let mut created = 0;
        for ((metric, period_id, scenario, currency, context_key, _scope), observations) in cells {
            let mut documents: Vec<i64> = observations.iter().map(|(d, _)| *d).collect();
            documents.sort();
            documents.dedup();
            if documents.len() < 2 {
                continue;
            }

            let min = observations.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
            let max = observations
                .iter()
                .map(|(_, v)| *v)
                .fold(f64::NEG_INFINITY, f64::max);
            let spread = max - min;
            let pct = if min.abs() > f64::EPSILON {
                spread / min.abs()
            } else {
                f64::INFINITY
            };
            let thresholds = &self.config.reconciliation;
            if spread <= thresholds.restatement_abs_threshold
                || pct <= thresholds.restatement_pct_threshold
            {
                continue;
            }

            let closed_period = period_starts
                .get(&period_id)
                .is_some_and(|start| *start < closed_before);
            let severity = if closed_period {
                Severity::Error
            } else {
                Severity::Warning
            };
            let label = period_labels
                .get(&period_id)
                .cloned()
                .unwrap_or_else(|| period_id.to_string());

            let finding = ReconciliationFinding {
                finding_type: FindingType::CrossDocumentRestatement,
                severity,
                company_id,
                metric_name: metric.clone(),
                scenario,
                period_id,
                message: format!(
                    "{metric} {label} ({}) restated across {} documents: {min} to {max}",
                    scenario.as_str(),
                    documents.len()
                ),
                evidence: serde_json::json!({
                    "min_value": min,
                    "max_value": max,
                    "documents": documents,
                    "currency": currency,
                    "context_key": context_key,
                    "closed_period": closed_period,
                    "observations": observations
                        .iter()
                        .map(|(d, v)| serde_json::json!({"document_id": d, "value": v}))
                        .collect::<Vec<_>>(),
                }),
            };
            self.store.insert_finding(&finding, None)?;
            created += 1;
        }
        Ok(created)
    }

    /// Monthly facts must sum exactly to an ingested quarterly total, and
    /// quarterly facts to an ingested yearly total, within one document.
    /// Equality is exact (after rounding to two decimals against float
    /// noise), not tolerance-based.
    fn check_rollups(
        &self,
        company_id: i64,
        document_id: Option<i64>,
        clear_existing: bool,
    ) -> Result<usize> {
        if clear_existing {
            self.store
                .delete_findings(FindingType::TimeRollupMismatch, company_id, document_id)?;
        }

        let facts: Vec<_> = self
            .store
            .metrics_with_periods(company_id)?
            .into_iter()
            .filter(|(m, _, _)| {
                m.scope == Scope::Period
                    && document_id.is_none_or(|doc_id| m.document_id == doc_id)
            })
            .collect();

        let mut created = 0;
        created += self.check_rollup_level(
            company_id,
            &facts,
            PeriodType::Monthly,
            PeriodType::Quarterly,
            3,
        )?;
        created += self.check_rollup_level(
            company_id,
            &facts,
            PeriodType::Quarterly,
            PeriodType::Yearly,
            4,
        )?;
        Ok(created)
    }

    fn check_rollup_level(
        &self,
        company_id: i64,
        facts: &[(crate::model::FinancialMetric, crate::model::Period, String)],
        component_type: PeriodType,
        parent_type: PeriodType,
        components_expected: usize,
    ) -> Result<usize> {
        // key: (document, metric, scenario, currency, parent label)
        type Key = (i64, String, ValueType, String, String);
        let mut components: BTreeMap<Key, Vec<serde_json::Value>> = BTreeMap::new();
        let mut sums: BTreeMap<Key, f64> = BTreeMap::new();
        let mut totals: BTreeMap<Key, (f64, i64)> = BTreeMap::new();

        for (metric, period, name) in facts {
            if period.period_type == component_type {
                let Some(parent_label) = parent_label(&period.label, component_type) else {
                    continue;
                };
                let key = (
                    metric.document_id,
                    name.clone(),
                    metric.value_type,
                    metric.currency.clone(),
                    parent_label,
                );
                *sums.entry(key.clone()).or_default() += metric.value;
                components.entry(key).or_default().push(serde_json::json!({
                    "period": period.label,
                    "value": metric.value,
                    "coordinates": metric.coordinates,
                    "context_key": metric.context_key,
                }));
            } else if period.period_type == parent_type {
                let key = (
                    metric.document_id,
                    name.clone(),
                    metric.value_type,
                    metric.currency.clone(),
                    period.label.clone(),
                );
                totals.insert(key, (metric.value, period.id));
            }
        }

        let mut created = 0;
        for (key, (reported_total, period_id)) in totals {
            let Some(parts) = components.get(&key) else {
                continue;
            };
            if parts.len() != components_expected {
                // An incomplete component set cannot prove a mismatch.
                continue;
            }
            let rolled_sum = round2(sums[&key]);
            if rolled_sum == round2(reported_total) {
                continue;
            }

            let (doc_id, metric_name, scenario, currency, parent) = key;
            warn!(
                "rollup mismatch: {metric_name} {parent} sum {rolled_sum} vs reported {reported_total}"
            );
            let finding = ReconciliationFinding {
                finding_type: FindingType::TimeRollupMismatch,
                severity: Severity::Warning,
                company_id,
                metric_name: metric_name.clone(),
                scenario,
                period_id,
                message: format!(
                    "{metric_name} {parent} ({}): components sum to {rolled_sum} but the reported total is {reported_total}",
                    scenario.as_str()
                ),
                evidence: serde_json::json!({
                    "rolled_sum": rolled_sum,
                    "reported_total": reported_total,
                    "currency": currency,
                    "components": parts,
                }),
            };
            self.store.insert_finding(&finding, Some(doc_id))?;
            created += 1;
        }
        Ok(created)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// The coarser-grained label a component period rolls up into.
fn parse_label_parts(label: &str) -> Option<(i32, &str)> {
    let (year, rest) = label.split_once('-')?;
    Some((year.parse().ok()?, rest))
}

fn parent_label(label: &str, component_type: PeriodType) -> Option<String> {
    match component_type {
        PeriodType::Monthly => {
            let (year, month) = parse_label_parts(label)?;
            let month: u32 = month.parse().ok()?;
            if !(1..=12).contains(&month) {
                return None;
            }
            Some(format!("{year}-Q{}", month.div_ceil(3)))
        }
        PeriodType::Quarterly => {
            let (year, _) = parse_label_parts(label)?;
            Some(year.to_string())
        }
        PeriodType::Yearly => None,
    }
}
