use anyhow::Result;
use financial_fact_store::{
    FactStore, FindingType, PeriodType, Pipeline, PipelineConfig, RejectionReason, Scope, Severity,
    ValueType,
};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_csv(dir: &Path, name: &str, content: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut file = File::create(&path)?;
    file.write_all(content.as_bytes())?;
    Ok(path)
}

fn pipeline() -> Result<Pipeline> {
    Ok(Pipeline::new(
        FactStore::open_in_memory()?,
        PipelineConfig::default(),
    ))
}

#[test]
fn test_csv_ingestion_values_units_and_aliases() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_csv(
        dir.path(),
        "management_pack.csv",
        "£'000,Jan 2025,Feb 2025\n\
         Turnover,\"£1,234\",\"(1,234)\"\n\
         Cost of Sales,(400),(450)\n",
    )?;

    let pipeline = pipeline()?;
    let summary = pipeline.ingest(&path, 1, None)?;
    assert_eq!(summary.rows_extracted, 4);
    assert_eq!(summary.rows_mapped, 4);
    assert_eq!(summary.rows_normalized, 4);
    assert_eq!(summary.rows_persisted, 4);
    assert_eq!(summary.rows_skipped, 0);
    assert_eq!(summary.rows_rejected, 0);
    assert!(summary.errors.is_empty());

    let facts = pipeline.store().metrics_with_periods(1)?;
    assert_eq!(facts.len(), 4);

    // The alias resolves to the canonical name and the £'000 banner
    // scales every value.
    let revenue_jan = facts
        .iter()
        .find(|(_, p, name)| name == "Revenue" && p.label == "2025-01")
        .unwrap();
    assert_eq!(revenue_jan.0.value, 1_234_000.0);
    assert_eq!(revenue_jan.0.value_type, ValueType::Actual);
    assert_eq!(revenue_jan.0.currency, "GBP");
    assert_eq!(revenue_jan.0.scope, Scope::Period);
    assert_eq!(revenue_jan.1.period_type, PeriodType::Monthly);

    let revenue_feb = facts
        .iter()
        .find(|(_, p, name)| name == "Revenue" && p.label == "2025-02")
        .unwrap();
    assert_eq!(revenue_feb.0.value, -1_234_000.0);

    let cogs_jan = facts
        .iter()
        .find(|(_, p, name)| name == "Cost of Sales" && p.label == "2025-01")
        .unwrap();
    assert_eq!(cogs_jan.0.value, -400_000.0);
    Ok(())
}

#[test]
fn test_reingesting_the_same_file_is_a_no_op() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_csv(
        dir.path(),
        "pack.csv",
        ",Jan 2025,Feb 2025\n\
         Revenue,100,200\n\
         Gross Profit,40,80\n",
    )?;

    let pipeline = pipeline()?;
    let first = pipeline.ingest(&path, 1, None)?;
    assert_eq!(first.rows_persisted, 4);

    let second = pipeline.ingest(&path, 1, None)?;
    assert_eq!(second.rows_persisted, 0);
    assert_eq!(second.rows_skipped, first.rows_normalized);
    assert_eq!(pipeline.store().metrics_for_company(1)?.len(), 4);

    // The raw audit trail is written unconditionally for both uploads.
    assert_ne!(first.document_id, second.document_id);
    assert_eq!(
        pipeline
            .store()
            .raw_rows_for_document(second.document_id)?
            .len(),
        4
    );
    Ok(())
}

#[test]
fn test_unresolved_line_items_are_rejected_with_audit() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_csv(
        dir.path(),
        "pack.csv",
        ",Jan 2025\n\
         Revenue,100\n\
         Mystery Widget Count,5\n",
    )?;

    let pipeline = pipeline()?;
    let summary = pipeline.ingest(&path, 1, None)?;
    assert_eq!(summary.rows_extracted, 2);
    assert_eq!(summary.rows_persisted, 1);
    assert_eq!(summary.rows_rejected, 1);

    let rejections = pipeline
        .store()
        .rejections_for_document(summary.document_id)?;
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].reason, RejectionReason::LineItemUnresolved);
    assert_eq!(rejections[0].line_item_text, "Mystery Widget Count");
    Ok(())
}

#[test]
fn test_quarter_rollup_agreement_produces_no_findings() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_csv(
        dir.path(),
        "q1.csv",
        ",Jan 2025,Feb 2025,Mar 2025,Q1 2025\n\
         Revenue,100,200,300,600\n",
    )?;

    let pipeline = pipeline()?;
    pipeline.ingest(&path, 1, None)?;

    // Monthly and quarterly labels both canonicalize.
    let facts = pipeline.store().metrics_with_periods(1)?;
    assert!(facts
        .iter()
        .any(|(_, p, _)| p.label == "2025-Q1" && p.period_type == PeriodType::Quarterly));
    assert!(facts
        .iter()
        .any(|(_, p, _)| p.label == "2025-03" && p.period_type == PeriodType::Monthly));

    pipeline.run_reconciliation(1, None, true)?;
    assert!(pipeline.store().findings_for_company(1)?.is_empty());
    Ok(())
}

#[test]
fn test_quarter_rollup_mismatch_is_flagged_with_evidence() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_csv(
        dir.path(),
        "q1.csv",
        ",Jan 2025,Feb 2025,Mar 2025,Q1 2025\n\
         Revenue,100,200,300,650\n",
    )?;

    let pipeline = pipeline()?;
    pipeline.ingest(&path, 1, None)?;
    let summary = pipeline.run_reconciliation(1, None, true)?;
    assert_eq!(summary.findings_created, 1);

    let findings = pipeline.store().findings_for_company(1)?;
    assert_eq!(findings.len(), 1);
    let finding = &findings[0];
    assert_eq!(finding.finding_type, FindingType::TimeRollupMismatch);
    assert_eq!(finding.severity, Severity::Warning);
    assert_eq!(finding.metric_name, "Revenue");
    assert_eq!(finding.evidence["rolled_sum"], 600.0);
    assert_eq!(finding.evidence["reported_total"], 650.0);
    assert_eq!(finding.evidence["components"].as_array().unwrap().len(), 3);
    assert_eq!(pipeline.store().period(finding.period_id)?.label, "2025-Q1");

    // Findings are recomputed, never accumulated.
    pipeline.run_reconciliation(1, None, true)?;
    assert_eq!(pipeline.store().findings_for_company(1)?.len(), 1);
    Ok(())
}

#[test]
fn test_cross_document_restatement_on_closed_period() -> Result<()> {
    let dir = TempDir::new()?;
    let first = write_csv(dir.path(), "jan_v1.csv", ",Jan 2025\nRevenue,1000\n")?;
    let second = write_csv(dir.path(), "jan_v2.csv", ",Jan 2025\nRevenue,1100\n")?;

    let pipeline = pipeline()?;
    let doc_a = pipeline.ingest(&first, 1, None)?.document_id;
    let doc_b = pipeline.ingest(&second, 1, None)?.document_id;

    pipeline.run_reconciliation(1, None, true)?;
    let findings = pipeline.store().findings_for_company(1)?;
    assert_eq!(findings.len(), 1);
    let finding = &findings[0];
    assert_eq!(finding.finding_type, FindingType::CrossDocumentRestatement);
    assert_eq!(finding.severity, Severity::Error);
    assert_eq!(finding.evidence["min_value"], 1000.0);
    assert_eq!(finding.evidence["max_value"], 1100.0);
    assert_eq!(
        finding.evidence["documents"],
        serde_json::json!([doc_a, doc_b])
    );
    Ok(())
}

#[test]
fn test_quality_gate_on_contiguous_series() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_csv(
        dir.path(),
        "pack.csv",
        ",Jan 2025,Feb 2025\nRevenue,1000,1100\n",
    )?;

    let pipeline = pipeline()?;
    pipeline.ingest(&path, 1, None)?;
    let report = pipeline.assess_quality(1)?;
    assert!(report.ok_for_revenue_analyst);
    assert!(report.blockers.is_empty());
    // Ten of the trailing twelve months are absent, and neither
    // comparator covers the latest month.
    assert_eq!(report.months_missing, 10);
    assert_eq!(report.warnings.len(), 3);

    // The report snapshot lands in the latest document's metadata.
    let doc_ids = pipeline.store().document_ids_for_company(1)?;
    let document = pipeline.store().document(*doc_ids.last().unwrap())?;
    assert_eq!(
        document.metadata["quality_report"]["ok_for_revenue_analyst"],
        true
    );
    Ok(())
}

#[test]
fn test_quality_gate_blocks_on_gap_before_latest_month() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_csv(
        dir.path(),
        "pack.csv",
        ",Jan 2025,Mar 2025\nRevenue,1000,1200\n",
    )?;

    let pipeline = pipeline()?;
    pipeline.ingest(&path, 1, None)?;
    let report = pipeline.assess_quality(1)?;
    assert!(!report.ok_for_revenue_analyst);
    assert!(report.blockers.iter().any(|b| b.contains("2025-02")));
    Ok(())
}

#[test]
fn test_quality_gate_blocks_on_empty_store() -> Result<()> {
    let pipeline = pipeline()?;
    let report = pipeline.assess_quality(42)?;
    assert!(!report.ok_for_revenue_analyst);
    assert!(report.blockers.iter().any(|b| b.contains("Revenue")));
    Ok(())
}

#[test]
fn test_ytd_validation_flags_broken_running_sum() -> Result<()> {
    let dir = TempDir::new()?;
    let months = write_csv(
        dir.path(),
        "months.csv",
        ",Jan 2025,Feb 2025\nRevenue,100,200\n",
    )?;
    let ytd = write_csv(dir.path(), "revenue_ytd.csv", ",Feb 2025\nRevenue,350\n")?;

    let pipeline = pipeline()?;
    pipeline.ingest(&months, 1, None)?;
    pipeline.ingest(&ytd, 1, None)?;

    let report = pipeline.validate(1)?;
    assert!(!report.ok);
    assert_eq!(report.ytd_mismatches.len(), 1);
    let mismatch = &report.ytd_mismatches[0];
    assert_eq!(mismatch.period_label, "2025-02");
    assert_eq!(mismatch.expected, 300.0);
    assert_eq!(mismatch.reported, 350.0);
    assert_eq!(mismatch.abs_diff, 50.0);
    assert!(report.rollup_mismatches.is_empty());
    Ok(())
}

#[test]
fn test_ytd_validation_passes_within_tolerance() -> Result<()> {
    let dir = TempDir::new()?;
    let months = write_csv(
        dir.path(),
        "months.csv",
        ",Jan 2025,Feb 2025\nRevenue,100,200\n",
    )?;
    let ytd = write_csv(dir.path(), "revenue_ytd.csv", ",Feb 2025\nRevenue,300\n")?;

    let pipeline = pipeline()?;
    pipeline.ingest(&months, 1, None)?;
    pipeline.ingest(&ytd, 1, None)?;

    let report = pipeline.validate(1)?;
    assert!(report.ok);
    assert!(report.ytd_mismatches.is_empty());
    Ok(())
}
