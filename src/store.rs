use crate::config::LineItemSeed;
use crate::error::{FactStoreError, Result};
use crate::model::{
    Coordinates, Document, ExtractionMethod, FactRejection, FinancialMetric, FindingType,
    LineItemDefinition, NormalizedFact, Period, PeriodType, PersistOutcome, RawRow,
    ReconciliationFinding, RejectionReason, RejectionStage, Scope, Severity, ValueType,
};
use chrono::{NaiveDate, Utc};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed fact store.
///
/// One database file holds documents, canonical periods, the line item
/// vocabulary, the append-only fact table, the raw/rejection audit trail
/// and reconciliation findings. Thread-safe via an internal mutex on the
/// connection.
pub struct FactStore {
    conn: Mutex<Connection>,
}

const METRIC_COLUMNS: &str = "m.id, m.company_id, m.period_id, m.line_item_id, m.value_type, \
     m.frequency, m.value, m.currency, m.scope, m.source_file, m.page, m.tbl, m.row, m.col, \
     m.context_key, m.extraction_method, m.confidence, m.document_id, m.hash";

impl FactStore {
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_filename TEXT NOT NULL,
                stored_path TEXT NOT NULL,
                uploaded_at TEXT NOT NULL,
                company_id INTEGER NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}'
            );

            -- Canonical periods, immutable once created.
            CREATE TABLE IF NOT EXISTS periods (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                period_type TEXT NOT NULL,
                label TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                UNIQUE (label, period_type)
            );

            CREATE TABLE IF NOT EXISTS line_item_definitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                aliases_json TEXT NOT NULL DEFAULT '[]'
            );

            -- Append-only canonical facts. The composite key makes
            -- re-ingesting the same file a no-op.
            CREATE TABLE IF NOT EXISTS financial_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                period_id INTEGER NOT NULL REFERENCES periods(id),
                line_item_id INTEGER NOT NULL REFERENCES line_item_definitions(id),
                value_type TEXT NOT NULL,
                frequency TEXT NOT NULL,
                value REAL NOT NULL,
                currency TEXT NOT NULL,
                scope TEXT NOT NULL DEFAULT 'period',
                source_file TEXT NOT NULL,
                page INTEGER,
                tbl INTEGER,
                row INTEGER,
                col INTEGER,
                context_key TEXT NOT NULL,
                extraction_method TEXT NOT NULL,
                confidence REAL NOT NULL,
                document_id INTEGER NOT NULL REFERENCES documents(id),
                hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (company_id, period_id, line_item_id, value_type, source_file)
            );

            CREATE INDEX IF NOT EXISTS idx_metrics_company
                ON financial_metrics(company_id, line_item_id, value_type);
            CREATE INDEX IF NOT EXISTS idx_metrics_document
                ON financial_metrics(document_id);

            -- Raw extraction output, one JSON payload per candidate row.
            CREATE TABLE IF NOT EXISTS extracted_facts_raw (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents(id),
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fact_rejections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents(id),
                stage TEXT NOT NULL,
                reason TEXT NOT NULL,
                line_item_text TEXT NOT NULL,
                value_text TEXT NOT NULL,
                period_text TEXT,
                source_file TEXT NOT NULL,
                coordinates_json TEXT NOT NULL,
                context_key TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Findings are recomputed per run, never accumulated.
            CREATE TABLE IF NOT EXISTS reconciliation_findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                finding_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                company_id INTEGER NOT NULL,
                document_id INTEGER,
                metric_name TEXT NOT NULL,
                scenario TEXT NOT NULL,
                period_id INTEGER NOT NULL,
                message TEXT NOT NULL,
                evidence_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_findings_company
                ON reconciliation_findings(company_id, finding_type);

            PRAGMA foreign_keys = ON;

            -- WAL allows concurrent reads while an ingestion is writing.
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // === Line item vocabulary ===

    /// Insert configured line items that do not exist yet; refresh the
    /// alias list of those that do. Ids are stable across reseeds.
    pub fn seed_line_items(&self, seeds: &[LineItemSeed]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for seed in seeds {
            let aliases_json = serde_json::to_string(&seed.aliases)?;
            conn.execute(
                r#"
                INSERT INTO line_item_definitions (name, aliases_json)
                VALUES (?1, ?2)
                ON CONFLICT(name) DO UPDATE SET aliases_json = excluded.aliases_json
                "#,
                params![seed.name, aliases_json],
            )?;
        }
        debug!("seeded {} line item definitions", seeds.len());
        Ok(())
    }

    pub fn line_item_id(&self, name: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT id FROM line_item_definitions WHERE LOWER(name) = LOWER(?1)",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn line_items(&self) -> Result<Vec<LineItemDefinition>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, name, aliases_json FROM line_item_definitions ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut items = Vec::new();
        for row in rows {
            let (id, name, aliases_json) = row?;
            items.push(LineItemDefinition {
                id,
                name,
                aliases: serde_json::from_str(&aliases_json)?,
            });
        }
        Ok(items)
    }

    // === Periods ===

    /// Get-or-create the canonical period for a label. Existing rows are
    /// never modified; `(label, period_type)` is unique.
    pub fn resolve_period(
        &self,
        label: &str,
        period_type: PeriodType,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO periods (period_type, label, start_date, end_date)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(label, period_type) DO NOTHING
            "#,
            params![
                period_type.as_str(),
                label,
                start_date.to_string(),
                end_date.to_string()
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM periods WHERE label = ?1 AND period_type = ?2",
            params![label, period_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn period(&self, id: i64) -> Result<Period> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, period_type, label, start_date, end_date FROM periods WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some(parts) => Self::row_to_period(parts),
            None => Err(FactStoreError::PeriodResolution(format!("period id {id}"))),
        }
    }

    // === Documents ===

    pub fn create_document(
        &self,
        company_id: i64,
        original_filename: &str,
        stored_path: &str,
        metadata: &serde_json::Value,
    ) -> Result<Document> {
        let conn = self.conn.lock().unwrap();
        let uploaded_at = Utc::now();
        conn.execute(
            r#"
            INSERT INTO documents (original_filename, stored_path, uploaded_at, company_id, metadata_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                original_filename,
                stored_path,
                uploaded_at.to_rfc3339(),
                company_id,
                serde_json::to_string(metadata)?
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Document {
            id,
            original_filename: original_filename.to_string(),
            stored_path: stored_path.to_string(),
            uploaded_at,
            company_id,
            metadata: metadata.clone(),
        })
    }

    pub fn document(&self, id: i64) -> Result<Document> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, original_filename, stored_path, uploaded_at, company_id, metadata_json
                 FROM documents WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, original_filename, stored_path, uploaded_at, company_id, metadata_json)) =
            row
        else {
            return Err(FactStoreError::DocumentNotFound(id));
        };
        Ok(Document {
            id,
            original_filename,
            stored_path,
            uploaded_at: chrono::DateTime::parse_from_rfc3339(&uploaded_at)
                .map_err(|_| FactStoreError::CorruptStoredValue {
                    column: "documents.uploaded_at".to_string(),
                    value: uploaded_at,
                })?
                .with_timezone(&Utc),
            company_id,
            metadata: serde_json::from_str(&metadata_json)?,
        })
    }

    pub fn document_ids_for_company(&self, company_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM documents WHERE company_id = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![company_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Shallow-merge a metadata patch into a document. Existing keys not
    /// present in the patch are preserved.
    pub fn merge_document_metadata(&self, id: i64, patch: &serde_json::Value) -> Result<()> {
        let current = self.document(id)?.metadata;
        let merged = match (current, patch) {
            (serde_json::Value::Object(mut base), serde_json::Value::Object(overlay)) => {
                for (key, value) in overlay {
                    base.insert(key.clone(), value.clone());
                }
                serde_json::Value::Object(base)
            }
            (_, patch) => patch.clone(),
        };
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE documents SET metadata_json = ?1 WHERE id = ?2",
            params![serde_json::to_string(&merged)?, id],
        )?;
        if rows == 0 {
            return Err(FactStoreError::DocumentNotFound(id));
        }
        Ok(())
    }

    // === Audit trail ===

    pub fn record_raw_rows(&self, document_id: i64, rows: &[RawRow]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO extracted_facts_raw (document_id, payload_json, created_at)
                 VALUES (?1, ?2, ?3)",
            )?;
            let now = Utc::now().to_rfc3339();
            for row in rows {
                stmt.execute(params![document_id, serde_json::to_string(row)?, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn raw_rows_for_document(&self, document_id: i64) -> Result<Vec<RawRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM extracted_facts_raw WHERE document_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![document_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for payload in rows {
            out.push(serde_json::from_str(&payload?)?);
        }
        Ok(out)
    }

    pub fn record_rejections(&self, document_id: i64, rejections: &[FactRejection]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO fact_rejections
                    (document_id, stage, reason, line_item_text, value_text, period_text,
                     source_file, coordinates_json, context_key, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )?;
            let now = Utc::now().to_rfc3339();
            for rejection in rejections {
                stmt.execute(params![
                    document_id,
                    rejection.stage.as_str(),
                    rejection.reason.as_str(),
                    rejection.line_item_text,
                    rejection.value_text,
                    rejection.period_text,
                    rejection.source_file,
                    serde_json::to_string(&rejection.coordinates)?,
                    rejection.context_key,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn rejections_for_document(&self, document_id: i64) -> Result<Vec<FactRejection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT stage, reason, line_item_text, value_text, period_text, source_file,
                    coordinates_json, context_key
             FROM fact_rejections WHERE document_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![document_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (stage, reason, line_item_text, value_text, period_text, source_file, coords, key) =
                row?;
            out.push(FactRejection {
                stage: parse_stored(&stage, "fact_rejections.stage", stage_from_str)?,
                reason: parse_stored(&reason, "fact_rejections.reason", reason_from_str)?,
                line_item_text,
                value_text,
                period_text,
                source_file,
                coordinates: serde_json::from_str(&coords)?,
                context_key: key,
            });
        }
        Ok(out)
    }

    // === Facts ===

    /// Persist a batch of normalized facts. A row whose composite key
    /// already exists is skipped, making re-ingestion of the same file a
    /// no-op. A failing row is counted and logged without aborting the
    /// batch.
    pub fn persist(&self, facts: &[NormalizedFact]) -> Result<PersistOutcome> {
        let conn = self.conn.lock().unwrap();
        let mut outcome = PersistOutcome::default();
        let now = Utc::now().to_rfc3339();
        for fact in facts {
            let result = conn.execute(
                r#"
                INSERT INTO financial_metrics
                    (company_id, period_id, line_item_id, value_type, frequency, value,
                     currency, scope, source_file, page, tbl, row, col, context_key,
                     extraction_method, confidence, document_id, hash, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                ON CONFLICT(company_id, period_id, line_item_id, value_type, source_file)
                    DO NOTHING
                "#,
                params![
                    fact.company_id,
                    fact.period_id,
                    fact.line_item_id,
                    fact.value_type.as_str(),
                    fact.frequency.as_str(),
                    fact.value,
                    fact.currency,
                    fact.scope.as_str(),
                    fact.source_file,
                    fact.coordinates.page,
                    fact.coordinates.table,
                    fact.coordinates.row,
                    fact.coordinates.col,
                    fact.context_key,
                    fact.extraction_method.as_str(),
                    fact.confidence,
                    fact.document_id,
                    fact.hash,
                    now
                ],
            );
            match result {
                Ok(1) => outcome.inserted += 1,
                Ok(_) => outcome.skipped += 1,
                Err(e) => {
                    warn!(
                        "failed to persist fact {}/{} period {}: {}",
                        fact.line_item_name, fact.value_type.as_str(), fact.period_label, e
                    );
                    outcome.errors += 1;
                }
            }
        }
        Ok(outcome)
    }

    pub fn metrics_for_company(&self, company_id: i64) -> Result<Vec<FinancialMetric>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {METRIC_COLUMNS} FROM financial_metrics m WHERE m.company_id = ?1 ORDER BY m.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![company_id], Self::metric_row)?;
        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(Self::row_to_metric(row?)?);
        }
        Ok(metrics)
    }

    /// Facts joined with their canonical period and line item name, the
    /// shape the selector, reconciler and validator all consume.
    pub fn metrics_with_periods(
        &self,
        company_id: i64,
    ) -> Result<Vec<(FinancialMetric, Period, String)>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {METRIC_COLUMNS}, p.id, p.period_type, p.label, p.start_date, p.end_date, li.name
             FROM financial_metrics m
             JOIN periods p ON p.id = m.period_id
             JOIN line_item_definitions li ON li.id = m.line_item_id
             WHERE m.company_id = ?1
             ORDER BY p.start_date, m.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![company_id], |row| {
            let metric = Self::metric_row(row)?;
            let period = (
                row.get::<_, i64>(19)?,
                row.get::<_, String>(20)?,
                row.get::<_, String>(21)?,
                row.get::<_, String>(22)?,
                row.get::<_, String>(23)?,
            );
            let line_item_name = row.get::<_, String>(24)?;
            Ok((metric, period, line_item_name))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (metric_parts, period_parts, line_item_name) = row?;
            out.push((
                Self::row_to_metric(metric_parts)?,
                Self::row_to_period(period_parts)?,
                line_item_name,
            ));
        }
        Ok(out)
    }

    // === Findings ===

    /// Drop previous findings of one type before a recomputation run.
    /// Scope is the whole company, or one document when `document_id` is
    /// given.
    pub fn delete_findings(
        &self,
        finding_type: FindingType,
        company_id: i64,
        document_id: Option<i64>,
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = match document_id {
            Some(doc_id) => conn.execute(
                "DELETE FROM reconciliation_findings
                 WHERE finding_type = ?1 AND company_id = ?2 AND document_id = ?3",
                params![finding_type.as_str(), company_id, doc_id],
            )?,
            None => conn.execute(
                "DELETE FROM reconciliation_findings
                 WHERE finding_type = ?1 AND company_id = ?2",
                params![finding_type.as_str(), company_id],
            )?,
        };
        Ok(deleted)
    }

    pub fn insert_finding(
        &self,
        finding: &ReconciliationFinding,
        document_id: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO reconciliation_findings
                (finding_type, severity, company_id, document_id, metric_name, scenario,
                 period_id, message, evidence_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                finding.finding_type.as_str(),
                finding.severity.as_str(),
                finding.company_id,
                document_id,
                finding.metric_name,
                finding.scenario.as_str(),
                finding.period_id,
                finding.message,
                serde_json::to_string(&finding.evidence)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn findings_for_company(&self, company_id: i64) -> Result<Vec<ReconciliationFinding>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT finding_type, severity, company_id, metric_name, scenario, period_id,
                    message, evidence_json
             FROM reconciliation_findings WHERE company_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![company_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;
        let mut findings = Vec::new();
        for row in rows {
            let (finding_type, severity, company_id, metric_name, scenario, period_id, message, evidence) =
                row?;
            findings.push(ReconciliationFinding {
                finding_type: parse_stored(
                    &finding_type,
                    "reconciliation_findings.finding_type",
                    finding_type_from_str,
                )?,
                severity: parse_stored(
                    &severity,
                    "reconciliation_findings.severity",
                    severity_from_str,
                )?,
                company_id,
                metric_name,
                scenario: parse_stored(
                    &scenario,
                    "reconciliation_findings.scenario",
                    ValueType::from_str_opt,
                )?,
                period_id,
                message,
                evidence: serde_json::from_str(&evidence)?,
            });
        }
        Ok(findings)
    }

    // === Row mapping ===

    fn metric_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get::<_, String>(8)?,
            row.get(9)?,
            row.get(10)?,
            row.get(11)?,
            row.get(12)?,
            row.get(13)?,
            row.get(14)?,
            row.get::<_, String>(15)?,
            row.get(16)?,
            row.get(17)?,
            row.get(18)?,
        ))
    }

    fn row_to_metric(parts: MetricRow) -> Result<FinancialMetric> {
        let (
            id,
            company_id,
            period_id,
            line_item_id,
            value_type,
            frequency,
            value,
            currency,
            scope,
            source_file,
            page,
            table,
            row,
            col,
            context_key,
            extraction_method,
            confidence,
            document_id,
            hash,
        ) = parts;
        Ok(FinancialMetric {
            id,
            company_id,
            period_id,
            line_item_id,
            value_type: parse_stored(
                &value_type,
                "financial_metrics.value_type",
                ValueType::from_str_opt,
            )?,
            frequency: parse_stored(
                &frequency,
                "financial_metrics.frequency",
                PeriodType::from_str_opt,
            )?,
            value,
            currency,
            scope: parse_stored(&scope, "financial_metrics.scope", Scope::from_str_opt)?,
            source_file,
            coordinates: Coordinates {
                page,
                table,
                row,
                col,
            },
            context_key,
            extraction_method: parse_stored(
                &extraction_method,
                "financial_metrics.extraction_method",
                method_from_str,
            )?,
            confidence,
            document_id,
            hash,
        })
    }

    fn row_to_period(parts: (i64, String, String, String, String)) -> Result<Period> {
        let (id, period_type, label, start_date, end_date) = parts;
        Ok(Period {
            id,
            period_type: parse_stored(
                &period_type,
                "periods.period_type",
                PeriodType::from_str_opt,
            )?,
            label,
            start_date: parse_date(&start_date, "periods.start_date")?,
            end_date: parse_date(&end_date, "periods.end_date")?,
        })
    }
}

type MetricRow = (
    i64,
    i64,
    i64,
    i64,
    String,
    String,
    f64,
    String,
    String,
    String,
    Option<u32>,
    Option<u32>,
    Option<u32>,
    Option<u32>,
    String,
    String,
    f64,
    i64,
    String,
);

fn parse_stored<T>(value: &str, column: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| FactStoreError::CorruptStoredValue {
        column: column.to_string(),
        value: value.to_string(),
    })
}

fn parse_date(value: &str, column: &str) -> Result<NaiveDate> {
    value
        .parse()
        .map_err(|_| FactStoreError::CorruptStoredValue {
            column: column.to_string(),
            value: value.to_string(),
        })
}

fn stage_from_str(s: &str) -> Option<RejectionStage> {
    match s {
        "mapping" => Some(RejectionStage::Mapping),
        "normalization" => Some(RejectionStage::Normalization),
        _ => None,
    }
}

fn reason_from_str(s: &str) -> Option<RejectionReason> {
    match s {
        "missing_period" => Some(RejectionReason::MissingPeriod),
        "line_item_unresolved" => Some(RejectionReason::LineItemUnresolved),
        "value_unparseable" => Some(RejectionReason::ValueUnparseable),
        _ => None,
    }
}

fn method_from_str(s: &str) -> Option<ExtractionMethod> {
    match s {
        "structured_table" => Some(ExtractionMethod::StructuredTable),
        "month_matrix" => Some(ExtractionMethod::MonthMatrix),
        "header_mapped" => Some(ExtractionMethod::HeaderMapped),
        "text_pattern" => Some(ExtractionMethod::TextPattern),
        "statutory_accounts" => Some(ExtractionMethod::StatutoryAccounts),
        "ocr" => Some(ExtractionMethod::Ocr),
        _ => None,
    }
}

fn finding_type_from_str(s: &str) -> Option<FindingType> {
    match s {
        "intra_document_inconsistency" => Some(FindingType::IntraDocumentInconsistency),
        "cross_document_restatement" => Some(FindingType::CrossDocumentRestatement),
        "time_rollup_mismatch" => Some(FindingType::TimeRollupMismatch),
        _ => None,
    }
}

fn severity_from_str(s: &str) -> Option<Severity> {
    match s {
        "info" => Some(Severity::Info),
        "warning" => Some(Severity::Warning),
        "error" => Some(Severity::Error),
        _ => None,
    }
}
