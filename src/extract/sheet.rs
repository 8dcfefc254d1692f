//! Workbook extraction: each sheet becomes one source page carrying a
//! single grid.

use super::grid::{detect_section_tag, detect_ytd, Grid};
use super::pdf::detect_unit_hint;
use super::SourcePage;
use crate::model::Scope;
use calamine::{open_workbook_auto, Data, Reader};
use log::warn;
use std::path::Path;

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                format!("{}", *f as i64)
            } else {
                format!("{f}")
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

/// Read every sheet of a workbook. An unreadable workbook or sheet is
/// logged and yields nothing.
pub fn extract_pages(path: &Path) -> Vec<SourcePage> {
    let mut workbook = match open_workbook_auto(path) {
        Ok(wb) => wb,
        Err(e) => {
            warn!("{}: failed to open workbook: {}", path.display(), e);
            return Vec::new();
        }
    };

    let sheet_names = workbook.sheet_names().to_vec();
    let mut pages = Vec::new();

    for (index, name) in sheet_names.iter().enumerate() {
        let range = match workbook.worksheet_range(name) {
            Ok(range) => range,
            Err(e) => {
                warn!("{}: sheet '{}' unreadable: {}", path.display(), name, e);
                continue;
            }
        };
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();
        if rows.is_empty() {
            continue;
        }

        // Banner cells near the top carry the unit scale for the whole
        // sheet.
        let banner: String = rows
            .iter()
            .take(5)
            .flat_map(|r| r.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        let sheet_context = format!("{name} {banner}");

        let page_number = index as u32 + 1;
        let mut grid = Grid::new(page_number, 0, rows);
        grid.section_tag = detect_section_tag(&sheet_context);
        grid.ytd = detect_ytd(name);

        pages.push(SourcePage {
            page_number,
            text: String::new(),
            grids: vec![grid],
            unit_hint: detect_unit_hint(&sheet_context),
            default_scope: if detect_ytd(&sheet_context) {
                Scope::Ytd
            } else {
                Scope::Period
            },
        });
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_to_string() {
        assert_eq!(cell_to_string(&Data::Empty), "");
        assert_eq!(cell_to_string(&Data::String(" Revenue ".to_string())), "Revenue");
        assert_eq!(cell_to_string(&Data::Float(1234.0)), "1234");
        assert_eq!(cell_to_string(&Data::Float(12.5)), "12.5");
        assert_eq!(cell_to_string(&Data::Int(-3)), "-3");
    }

    #[test]
    fn test_missing_workbook_yields_nothing() {
        assert!(extract_pages(Path::new("/no/such/book.xlsx")).is_empty());
    }
}
