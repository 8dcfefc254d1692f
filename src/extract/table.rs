//! Tabular extraction strategies. All three consume the shared cell grid
//! and differ only in how they recover the per-column period/scenario
//! mapping from the header area.

use super::{find_period_in_text, find_scenario, ExtractionStrategy, SourcePage};
use crate::config::{PipelineConfig, TaxonomyKind};
use crate::model::{
    Coordinates, ExtractionMethod, PeriodType, RawRow, Scope, ValueType,
};
use crate::normalize::{looks_numeric, parse_period_label};
use regex::Regex;

// Hand-assigned ordering signals per strategy; never combined
// arithmetically.
const STRUCTURED_CONFIDENCE: f64 = 0.9;
const MONTH_MATRIX_CONFIDENCE: f64 = 0.85;
const HEADER_MAPPED_CONFIDENCE: f64 = 0.7;

/// A month-matrix header must carry at least this many month columns.
const MIN_MONTH_COLUMNS: usize = 3;
/// A candidate matrix is only accepted once it yields this many facts,
/// which keeps noise tables out of the store.
const MIN_MATRIX_YIELD: usize = 6;
/// Header-mapped scanning looks at most this deep for header rows.
const MAX_HEADER_SCAN_ROWS: usize = 8;

fn is_line_item_cell(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && trimmed.len() < 80
        && !looks_numeric(trimmed)
        && trimmed.chars().any(|c| c.is_alphabetic())
}

struct ColumnHeader {
    col: usize,
    period: String,
    scenario: Option<ValueType>,
}

fn emit_row(
    page: &SourcePage,
    grid: &super::grid::Grid,
    row: usize,
    header: &ColumnHeader,
    line_item: &str,
    value: &str,
    method: ExtractionMethod,
    confidence: f64,
) -> RawRow {
    RawRow {
        line_item_text: line_item.to_string(),
        value_text: value.to_string(),
        period_text: Some(header.period.clone()),
        scenario_hint: header.scenario,
        coordinates: Coordinates::new(grid.page, grid.table_index, row as u32, header.col as u32),
        context_key: grid.context_key(),
        extraction_method: method,
        confidence,
        period_scope: if grid.ytd { Scope::Ytd } else { page.default_scope },
        unit_hint: page.unit_hint,
    }
}

/// Strategy 1: a clean grid whose first row is a header in which every
/// populated data column carries a recognizable period. The richest
/// signal when the source had a programmatically recognizable table.
pub struct StructuredTableStrategy;

impl ExtractionStrategy for StructuredTableStrategy {
    fn name(&self) -> &'static str {
        "structured_table"
    }

    fn attempt(&self, page: &SourcePage, config: &PipelineConfig) -> Vec<RawRow> {
        let mut out = Vec::new();
        for grid in &page.grids {
            if grid.n_rows() < 2 || grid.n_cols() < 2 {
                continue;
            }
            let mut headers = Vec::new();
            let mut all_periods = true;
            for col in 1..grid.n_cols() {
                let text = grid.cell(0, col);
                if text.is_empty() {
                    continue;
                }
                match find_period_in_text(text, config) {
                    Some((period, _)) => headers.push(ColumnHeader {
                        col,
                        period,
                        scenario: find_scenario(text, config),
                    }),
                    None => {
                        all_periods = false;
                        break;
                    }
                }
            }
            if !all_periods || headers.is_empty() {
                continue;
            }
            // A scenario row under the header means per-column scenarios
            // this strategy cannot represent; defer to the month-matrix
            // strategy.
            if MonthMatrixStrategy::scenario_row(grid, 1, config).is_some() {
                continue;
            }
            for row in 1..grid.n_rows() {
                let line_item = grid.cell(row, 0);
                if !is_line_item_cell(line_item) {
                    continue;
                }
                for header in &headers {
                    let value = grid.cell(row, header.col);
                    if looks_numeric(value) {
                        out.push(emit_row(
                            page,
                            grid,
                            row,
                            header,
                            line_item,
                            value,
                            ExtractionMethod::StructuredTable,
                            STRUCTURED_CONFIDENCE,
                        ));
                    }
                }
            }
        }
        out
    }
}

/// Strategy 2: month-matrix layouts. A header row is recognized by its
/// count of month tokens; an optional following row declares a per-column
/// scenario inherited by every numeric cell below until the next header
/// block.
pub struct MonthMatrixStrategy;

impl MonthMatrixStrategy {
    fn month_columns(
        grid: &super::grid::Grid,
        row: usize,
        config: &PipelineConfig,
    ) -> Vec<(usize, String)> {
        let mut columns = Vec::new();
        for col in 1..grid.n_cols() {
            let text = grid.cell(row, col);
            if text.is_empty() {
                continue;
            }
            if let Some((label, PeriodType::Monthly)) =
                parse_period_label(text, &config.period_aliases)
            {
                columns.push((col, label));
            }
        }
        columns
    }

    fn scenario_row(
        grid: &super::grid::Grid,
        row: usize,
        config: &PipelineConfig,
    ) -> Option<Vec<(usize, ValueType)>> {
        if row >= grid.n_rows() {
            return None;
        }
        let mut scenarios = Vec::new();
        let mut populated = 0;
        for col in 1..grid.n_cols() {
            let text = grid.cell(row, col);
            if text.is_empty() {
                continue;
            }
            populated += 1;
            match find_scenario(text, config) {
                Some(vt) => scenarios.push((col, vt)),
                None => return None,
            }
        }
        if populated == 0 {
            return None;
        }
        Some(scenarios)
    }
}

impl ExtractionStrategy for MonthMatrixStrategy {
    fn name(&self) -> &'static str {
        "month_matrix"
    }

    fn attempt(&self, page: &SourcePage, config: &PipelineConfig) -> Vec<RawRow> {
        let mut out = Vec::new();
        for grid in &page.grids {
            let mut matrix_rows: Vec<RawRow> = Vec::new();
            let mut headers: Vec<ColumnHeader> = Vec::new();
            let mut row = 0;
            while row < grid.n_rows() {
                let months = Self::month_columns(grid, row, config);
                if months.len() >= MIN_MONTH_COLUMNS {
                    // New header block; a scenario row may follow.
                    let scenario_by_col = Self::scenario_row(grid, row + 1, config);
                    headers = months
                        .into_iter()
                        .map(|(col, period)| ColumnHeader {
                            col,
                            period,
                            scenario: scenario_by_col.as_ref().and_then(|scenarios| {
                                scenarios.iter().find(|(c, _)| *c == col).map(|(_, vt)| *vt)
                            }),
                        })
                        .collect();
                    row += if scenario_by_col.is_some() { 2 } else { 1 };
                    continue;
                }
                if !headers.is_empty() {
                    let line_item = grid.cell(row, 0);
                    if is_line_item_cell(line_item) {
                        for header in &headers {
                            let value = grid.cell(row, header.col);
                            if looks_numeric(value) {
                                matrix_rows.push(emit_row(
                                    page,
                                    grid,
                                    row,
                                    header,
                                    line_item,
                                    value,
                                    ExtractionMethod::MonthMatrix,
                                    MONTH_MATRIX_CONFIDENCE,
                                ));
                            }
                        }
                    }
                }
                row += 1;
            }
            if matrix_rows.len() >= MIN_MATRIX_YIELD {
                out.extend(matrix_rows);
            }
        }
        out
    }
}

/// Strategy 3: generic tables whose header block (first few rows) mentions
/// a period or scenario keyword somewhere. One canonical period+scenario
/// is built per column from the concatenated header text.
pub struct HeaderMappedStrategy;

impl HeaderMappedStrategy {
    fn header_depth(grid: &super::grid::Grid, config: &PipelineConfig) -> Option<usize> {
        let patterns: Vec<Regex> = config
            .taxonomy
            .iter()
            .filter(|p| matches!(p.kind, TaxonomyKind::Period | TaxonomyKind::Scenario))
            .filter_map(|p| Regex::new(&p.pattern).ok())
            .collect();

        let scan = grid.n_rows().min(MAX_HEADER_SCAN_ROWS);
        let mut last_header_row = None;
        for row in 0..scan {
            for col in 0..grid.n_cols() {
                let text = grid.cell(row, col);
                if !text.is_empty() && patterns.iter().any(|re| re.is_match(text)) {
                    last_header_row = Some(row);
                    break;
                }
            }
        }
        last_header_row.map(|r| r + 1)
    }
}

impl ExtractionStrategy for HeaderMappedStrategy {
    fn name(&self) -> &'static str {
        "header_mapped"
    }

    fn attempt(&self, page: &SourcePage, config: &PipelineConfig) -> Vec<RawRow> {
        let mut out = Vec::new();
        for grid in &page.grids {
            if grid.n_rows() < 2 || grid.n_cols() < 2 {
                continue;
            }
            let Some(depth) = Self::header_depth(grid, config) else {
                continue;
            };
            let mut headers = Vec::new();
            for col in 1..grid.n_cols() {
                let concatenated: String = (0..depth)
                    .map(|row| grid.cell(row, col))
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                if concatenated.is_empty() {
                    continue;
                }
                if let Some((period, _)) = find_period_in_text(&concatenated, config) {
                    headers.push(ColumnHeader {
                        col,
                        period,
                        scenario: find_scenario(&concatenated, config),
                    });
                }
            }
            if headers.is_empty() {
                continue;
            }
            for row in depth..grid.n_rows() {
                let line_item = grid.cell(row, 0);
                if !is_line_item_cell(line_item) {
                    continue;
                }
                for header in &headers {
                    let value = grid.cell(row, header.col);
                    if looks_numeric(value) {
                        out.push(emit_row(
                            page,
                            grid,
                            row,
                            header,
                            line_item,
                            value,
                            ExtractionMethod::HeaderMapped,
                            HEADER_MAPPED_CONFIDENCE,
                        ));
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::grid::Grid;

    fn page_with(rows: Vec<Vec<&str>>) -> SourcePage {
        let rows = rows
            .into_iter()
            .map(|r| r.into_iter().map(String::from).collect())
            .collect();
        SourcePage {
            page_number: 1,
            text: String::new(),
            grids: vec![Grid::new(1, 0, rows)],
            unit_hint: None,
            default_scope: Scope::Period,
        }
    }

    #[test]
    fn test_structured_table() {
        let page = page_with(vec![
            vec!["", "Jan 2025", "Feb 2025"],
            vec!["Revenue", "100", "200"],
            vec!["Gross Profit", "40", "80"],
        ]);
        let config = PipelineConfig::default();
        let rows = StructuredTableStrategy.attempt(&page, &config);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].period_text.as_deref(), Some("2025-01"));
        assert_eq!(rows[0].extraction_method, ExtractionMethod::StructuredTable);
        assert_eq!(rows[0].coordinates.col, Some(1));
    }

    #[test]
    fn test_structured_table_rejects_non_period_header() {
        let page = page_with(vec![
            vec!["Item", "Notes", "Amount"],
            vec!["Revenue", "see p4", "100"],
        ]);
        let config = PipelineConfig::default();
        assert!(StructuredTableStrategy.attempt(&page, &config).is_empty());
    }

    #[test]
    fn test_month_matrix_with_scenario_row() {
        let page = page_with(vec![
            vec!["", "Jan 2025", "Feb 2025", "Mar 2025"],
            vec!["", "Actual", "Actual", "Budget"],
            vec!["Revenue", "100", "200", "300"],
            vec!["Opex", "(50)", "(60)", "(70)"],
        ]);
        let config = PipelineConfig::default();
        let rows = MonthMatrixStrategy.attempt(&page, &config);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].scenario_hint, Some(ValueType::Actual));
        assert_eq!(rows[2].scenario_hint, Some(ValueType::Budget));
        assert!(rows.iter().all(|r| r.extraction_method == ExtractionMethod::MonthMatrix));
    }

    #[test]
    fn test_month_matrix_minimum_yield() {
        // Only one data row across three months: 3 facts < 6, rejected.
        let page = page_with(vec![
            vec!["", "Jan 2025", "Feb 2025", "Mar 2025"],
            vec!["Revenue", "100", "200", "300"],
        ]);
        let config = PipelineConfig::default();
        assert!(MonthMatrixStrategy.attempt(&page, &config).is_empty());
    }

    #[test]
    fn test_month_matrix_requires_three_months() {
        let page = page_with(vec![
            vec!["", "Jan 2025", "Feb 2025"],
            vec!["Revenue", "100", "200"],
            vec!["Opex", "10", "20"],
            vec!["Cash", "5", "5"],
        ]);
        let config = PipelineConfig::default();
        assert!(MonthMatrixStrategy.attempt(&page, &config).is_empty());
    }

    #[test]
    fn test_header_mapped_concatenated_header() {
        let page = page_with(vec![
            vec!["P&L", "Actual", "Budget"],
            vec!["", "Feb 2025", "Feb 2025"],
            vec!["Revenue", "1,000", "1,100"],
            vec!["Opex", "(400)", "(380)"],
        ]);
        let config = PipelineConfig::default();
        let rows = HeaderMappedStrategy.attempt(&page, &config);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].scenario_hint, Some(ValueType::Actual));
        assert_eq!(rows[1].scenario_hint, Some(ValueType::Budget));
        assert_eq!(rows[0].period_text.as_deref(), Some("2025-02"));
    }

    #[test]
    fn test_ytd_grid_sets_scope() {
        let mut page = page_with(vec![
            vec!["", "Feb 2025"],
            vec!["Revenue", "100"],
        ]);
        page.grids[0].ytd = true;
        let config = PipelineConfig::default();
        let rows = StructuredTableStrategy.attempt(&page, &config);
        assert_eq!(rows[0].period_scope, Scope::Ytd);
        assert!(rows[0].context_key.ends_with("_ytd"));
    }
}
