//! CSV extraction: the whole file is one source page with one grid.

use super::grid::{detect_section_tag, detect_ytd, Grid};
use super::pdf::detect_unit_hint;
use super::SourcePage;
use crate::model::Scope;
use log::warn;
use std::path::Path;

/// Read a CSV export into a single grid. Ragged rows are tolerated; an
/// unreadable file is logged and yields nothing.
pub fn extract_pages(path: &Path) -> Vec<SourcePage> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path);
    let mut reader = match reader {
        Ok(reader) => reader,
        Err(e) => {
            warn!("{}: failed to open CSV: {}", path.display(), e);
            return Vec::new();
        }
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        match record {
            Ok(record) => rows.push(record.iter().map(|c| c.trim().to_string()).collect()),
            Err(e) => {
                warn!("{}: skipping malformed CSV record: {}", path.display(), e);
            }
        }
    }
    if rows.is_empty() {
        return Vec::new();
    }

    let banner: String = rows
        .iter()
        .take(5)
        .flat_map(|r| r.iter())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let context = format!("{filename} {banner}");

    let mut grid = Grid::new(1, 0, rows);
    grid.section_tag = detect_section_tag(&context);
    grid.ytd = detect_ytd(filename);

    vec![SourcePage {
        page_number: 1,
        text: String::new(),
        grids: vec![grid],
        unit_hint: detect_unit_hint(&context),
        default_scope: if detect_ytd(&context) {
            Scope::Ytd
        } else {
            Scope::Period
        },
    }]
}
