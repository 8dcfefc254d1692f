//! # Financial Fact Store
//!
//! A library for ingesting heterogeneous uploaded financial documents
//! (PDF board packs, Excel workbooks, CSV exports) into a canonical,
//! deduplicated time series of financial facts, and for running
//! deterministic consistency checks across that store.
//!
//! ## Core Concepts
//!
//! - **Raw candidate**: a `{line item, value, period}` triple lifted from a
//!   page by one of several fallback extraction strategies, with source
//!   coordinates and a heuristic confidence
//! - **Canonical fact**: a normalized value keyed by company, canonical
//!   period, line item, scenario and source file; re-ingesting the same
//!   file is a no-op, not a duplicate
//! - **Audit trail**: every raw candidate and every reason-coded rejection
//!   is persisted verbatim, independent of its downstream fate
//! - **Reconciliation**: intra-document conflicts, cross-document
//!   restatements and time-rollup mismatches are surfaced as
//!   evidence-bearing findings, recomputed per run
//! - **Quality gate**: coverage and scale-outlier checks plus AND-tolerance
//!   YTD and quarter/year sum reconciliation against a configured contract
//!
//! ## Example
//!
//! ```rust,ignore
//! use financial_fact_store::{FactStore, Pipeline, PipelineConfig};
//!
//! let store = FactStore::open("facts.db")?;
//! let config = PipelineConfig::default();
//! let pipeline = Pipeline::new(store, config);
//!
//! let summary = pipeline.ingest("board-pack-feb.pdf", 1, None)?;
//! println!("persisted {} facts", summary.rows_persisted);
//!
//! pipeline.run_reconciliation(1, None, true)?;
//! let quality = pipeline.assess_quality(1)?;
//! assert!(quality.ok_for_revenue_analyst);
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod mapper;
pub mod model;
pub mod normalize;
pub mod quality;
pub mod reconcile;
pub mod select;
pub mod store;

pub use config::{
    LineItemSeed, PeriodAlias, PipelineConfig, QualityContract, ReconciliationThresholds,
    TaxonomyKind, TaxonomyPattern,
};
pub use error::{FactStoreError, Result};
pub use extract::{ExtractionStrategy, Extractor, SourcePage};
pub use mapper::FieldMapper;
pub use model::*;
pub use normalize::{NormalizeOutcome, Normalizer};
pub use quality::{QualityGate, QualityReport, ValidationMismatch, ValidationReport, Validator};
pub use reconcile::Reconciler;
pub use select::{FactSelector, LatestUsableMonth, SelectedFact};
pub use store::FactStore;

use log::{info, warn};
use std::path::Path;

/// The programmatic boundary consumed by HTTP/CLI layers.
///
/// Owns the store and configuration; every method is synchronous and
/// processes one document (or one company-wide analysis) to completion.
pub struct Pipeline {
    store: FactStore,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(store: FactStore, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &FactStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Replace the configuration with a freshly loaded value. Does not
    /// mutate anything already persisted.
    pub fn set_config(&mut self, config: PipelineConfig) {
        self.config = config;
    }

    /// Ingest one file end to end: extract, map, normalize, persist, with
    /// the raw and rejection audit trail written along the way. Creates a
    /// document record unless an existing `document_id` is supplied.
    pub fn ingest(
        &self,
        file_path: impl AsRef<Path>,
        company_id: i64,
        document_id: Option<i64>,
    ) -> Result<IngestSummary> {
        let path = file_path.as_ref();
        self.store.seed_line_items(&self.config.line_items)?;

        let document = match document_id {
            Some(id) => self.store.document(id)?,
            None => {
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unknown")
                    .to_string();
                self.store.create_document(
                    company_id,
                    &filename,
                    &path.display().to_string(),
                    &serde_json::json!({}),
                )?
            }
        };
        let source_file = document.original_filename.clone();

        let mut summary = IngestSummary {
            document_id: document.id,
            ..IngestSummary::default()
        };

        let extractor = Extractor::new(&self.config);
        let raw_rows = extractor.extract(path)?;
        summary.rows_extracted = raw_rows.len();
        self.store.record_raw_rows(document.id, &raw_rows)?;

        let mapper = FieldMapper::new(&self.config)?;
        let normalizer = Normalizer::new(&self.config);
        let mut facts = Vec::new();
        let mut rejections = Vec::new();

        for raw in raw_rows {
            // Structurally unusable rows (no line item at all) are counted
            // into the rejection audit at the mapping stage.
            let Some(mapped) = mapper.map(raw.clone()) else {
                rejections.push(FactRejection {
                    stage: RejectionStage::Mapping,
                    reason: RejectionReason::LineItemUnresolved,
                    line_item_text: raw.line_item_text,
                    value_text: raw.value_text,
                    period_text: raw.period_text,
                    source_file: source_file.clone(),
                    coordinates: raw.coordinates,
                    context_key: raw.context_key,
                });
                continue;
            };
            summary.rows_mapped += 1;

            match normalizer.normalize(&mapped, company_id, document.id, &source_file, &self.store)?
            {
                NormalizeOutcome::Fact(fact) => facts.push(fact),
                NormalizeOutcome::Rejected(rejection) => rejections.push(rejection),
            }
        }
        summary.rows_normalized = facts.len();
        summary.rows_rejected = rejections.len();
        self.store.record_rejections(document.id, &rejections)?;

        let outcome = self.store.persist(&facts)?;
        summary.rows_persisted = outcome.inserted;
        summary.rows_skipped = outcome.skipped;
        if outcome.errors > 0 {
            let message = format!("{} facts failed to persist", outcome.errors);
            warn!("{source_file}: {message}");
            summary.errors.push(message);
        }

        self.store.merge_document_metadata(
            document.id,
            &serde_json::json!({ "last_ingest": summary }),
        )?;

        info!(
            "ingested {source_file}: {} extracted, {} persisted, {} skipped, {} rejected",
            summary.rows_extracted,
            summary.rows_persisted,
            summary.rows_skipped,
            summary.rows_rejected
        );
        Ok(summary)
    }

    /// Run the reconciliation engine over the accumulated store.
    pub fn run_reconciliation(
        &self,
        company_id: i64,
        document_id: Option<i64>,
        clear_existing: bool,
    ) -> Result<ReconciliationSummary> {
        Reconciler::new(&self.store, &self.config).run(company_id, document_id, clear_existing)
    }

    /// Coverage and scale-outlier assessment; the report snapshot is merged
    /// into the most recent document's metadata.
    pub fn assess_quality(&self, company_id: i64) -> Result<QualityReport> {
        let report = QualityGate::new(&self.store, &self.config).assess(company_id)?;
        self.snapshot_report(company_id, "quality_report", &report)?;
        Ok(report)
    }

    /// YTD and quarter/year sum reconciliation against ingested totals.
    pub fn validate(&self, company_id: i64) -> Result<ValidationReport> {
        let report = Validator::new(&self.store, &self.config).validate(company_id)?;
        self.snapshot_report(company_id, "validation_report", &report)?;
        Ok(report)
    }

    fn snapshot_report<T: serde::Serialize>(
        &self,
        company_id: i64,
        key: &str,
        report: &T,
    ) -> Result<()> {
        if let Some(last_doc) = self.store.document_ids_for_company(company_id)?.last() {
            self.store
                .merge_document_metadata(*last_doc, &serde_json::json!({ key: report }))?;
        }
        Ok(())
    }
}
