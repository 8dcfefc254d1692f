//! PDF page extraction. In-process text extraction first, then a
//! layout-preserving `pdftotext -layout` subprocess, then (driven by the
//! caller) rasterize-and-OCR. All external tools run under a process
//! timeout and their absence is never fatal.

use super::grid::{detect_section_tag, detect_ytd, Grid};
use super::SourcePage;
use crate::model::{Scope, UnitHint};
use log::{debug, warn};
use regex::Regex;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Split one PDF file into source pages. Never raises: on total failure
/// the result is simply empty and the caller falls through to OCR.
pub fn extract_pages(path: &Path) -> Vec<SourcePage> {
    let text = match pdf_extract::extract_text(path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            debug!("{}: pdf-extract produced no text, trying pdftotext", path.display());
            run_pdftotext(path).unwrap_or_default()
        }
        Err(e) => {
            warn!("{}: pdf-extract failed ({}), trying pdftotext", path.display(), e);
            run_pdftotext(path).unwrap_or_default()
        }
    };
    if text.trim().is_empty() {
        return Vec::new();
    }
    split_pages(&text)
}

/// Build pages from raw multi-page text, splitting on form feeds.
pub fn split_pages(text: &str) -> Vec<SourcePage> {
    text.split('\x0C')
        .filter(|t| !t.trim().is_empty())
        .enumerate()
        .map(|(i, page_text)| build_page(i as u32 + 1, page_text))
        .collect()
}

/// Assemble one source page: unit hint, YTD default scope and layout
/// grids, all derived from the page text.
pub fn build_page(page_number: u32, text: &str) -> SourcePage {
    let unit_hint = detect_unit_hint(text);
    let ytd = detect_ytd(text);
    let section = detect_section_tag(text);
    let mut grids = layout_grids(text, page_number);
    for grid in &mut grids {
        grid.section_tag = section.clone();
    }
    SourcePage {
        page_number,
        text: text.to_string(),
        grids,
        unit_hint,
        default_scope: if ytd { Scope::Ytd } else { Scope::Period },
    }
}

/// Detect a page-level unit banner such as "£'000" or "in millions".
pub fn detect_unit_hint(text: &str) -> Option<UnitHint> {
    let lowered = text.to_lowercase();
    if lowered.contains("£'000")
        || lowered.contains("£000")
        || lowered.contains("'000s")
        || lowered.contains("in thousands")
        || lowered.contains("£k")
    {
        Some(UnitHint::Thousands)
    } else if lowered.contains("£m") || lowered.contains("£'m") || lowered.contains("in millions") {
        Some(UnitHint::Millions)
    } else {
        None
    }
}

fn column_splitter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").unwrap())
}

/// Split a layout-preserved line into cells on runs of two or more
/// spaces. A line starting with such a run keeps an empty leading cell,
/// which is how month-matrix rows align with their line-item column.
fn split_columns(line: &str) -> Vec<String> {
    let line = line.replace('\t', "  ");
    let trimmed_end = line.trim_end();
    if trimmed_end.is_empty() {
        return Vec::new();
    }
    let mut cells: Vec<String> = column_splitter()
        .split(trimmed_end)
        .map(|s| s.trim().to_string())
        .collect();
    // `split` already yields a leading empty cell for indented lines; a
    // single leading space should not.
    if !cells.is_empty() && cells[0].is_empty() && !trimmed_end.starts_with("  ") {
        cells.remove(0);
    }
    cells
}

/// Recover tabular blocks from layout-preserved text: consecutive lines
/// with two or more columns form one grid.
pub fn layout_grids(page_text: &str, page: u32) -> Vec<Grid> {
    let mut grids = Vec::new();
    let mut block: Vec<Vec<String>> = Vec::new();
    let mut block_first_line = String::new();
    let mut table_index = 0u32;

    let mut flush = |block: &mut Vec<Vec<String>>, first_line: &str, grids: &mut Vec<Grid>, table_index: &mut u32| {
        if block.len() >= 2 {
            let mut grid = Grid::new(page, *table_index, std::mem::take(block));
            grid.ytd = detect_ytd(first_line);
            grids.push(grid);
            *table_index += 1;
        } else {
            block.clear();
        }
    };

    for line in page_text.lines() {
        let cells = split_columns(line);
        if cells.len() >= 2 {
            if block.is_empty() {
                block_first_line = line.to_string();
            }
            block.push(cells);
        } else {
            flush(&mut block, &block_first_line, &mut grids, &mut table_index);
        }
    }
    flush(&mut block, &block_first_line, &mut grids, &mut table_index);
    grids
}

/// Run a command to completion under the subprocess timeout, killing it
/// if it overruns. Output is expected on disk, not on stdout.
fn run_with_timeout(cmd: &mut Command) -> bool {
    let spawned = cmd.stdout(Stdio::null()).stderr(Stdio::null()).spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            debug!("subprocess spawn failed: {e}");
            return false;
        }
    };
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return status.success(),
            Ok(None) => {
                if start.elapsed() > SUBPROCESS_TIMEOUT {
                    warn!("subprocess exceeded {}s, killing", SUBPROCESS_TIMEOUT.as_secs());
                    let _ = child.kill();
                    let _ = child.wait();
                    return false;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                debug!("subprocess wait failed: {e}");
                return false;
            }
        }
    }
}

fn tool_available(tool: &str, probe_arg: &str) -> bool {
    Command::new(tool)
        .arg(probe_arg)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Layout-preserving text extraction via the external `pdftotext` tool.
pub fn run_pdftotext(path: &Path) -> Option<String> {
    if !tool_available("pdftotext", "-v") {
        warn!("pdftotext not installed; layout fallback unavailable");
        return None;
    }
    let dir = tempfile::tempdir().ok()?;
    let out = dir.path().join("layout.txt");
    let ok = run_with_timeout(
        Command::new("pdftotext")
            .arg("-layout")
            .arg(path)
            .arg(&out),
    );
    if !ok {
        return None;
    }
    std::fs::read_to_string(&out).ok()
}

/// Whether the OCR fallback can run at all.
pub fn ocr_available() -> bool {
    tool_available("tesseract", "--version") && tool_available("pdftoppm", "-v")
}

/// Rasterize every page and OCR it, rebuilding source pages from the
/// recognized text. Only called when `ocr_available()` is true.
pub fn extract_pages_via_ocr(path: &Path) -> Vec<SourcePage> {
    let Ok(dir) = tempfile::tempdir() else {
        return Vec::new();
    };
    let prefix = dir.path().join("page");
    let ok = run_with_timeout(
        Command::new("pdftoppm")
            .arg("-r")
            .arg("200")
            .arg("-png")
            .arg(path)
            .arg(&prefix),
    );
    if !ok {
        return Vec::new();
    }

    let mut images: Vec<_> = match std::fs::read_dir(dir.path()) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("png"))
            .collect(),
        Err(_) => return Vec::new(),
    };
    images.sort();

    let mut pages = Vec::new();
    for (i, image) in images.iter().enumerate() {
        let out_base = dir.path().join(format!("ocr_{i}"));
        let ok = run_with_timeout(Command::new("tesseract").arg(image).arg(&out_base));
        if !ok {
            continue;
        }
        let text_path = out_base.with_extension("txt");
        if let Ok(text) = std::fs::read_to_string(&text_path) {
            if !text.trim().is_empty() {
                pages.push(build_page(i as u32 + 1, &text));
            }
        }
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_columns() {
        assert_eq!(split_columns("Revenue   100   200"), vec!["Revenue", "100", "200"]);
        assert_eq!(
            split_columns("          Jan 2025   Feb 2025"),
            vec!["", "Jan 2025", "Feb 2025"]
        );
        assert!(split_columns("   ").is_empty());
        assert_eq!(split_columns("Just a sentence of prose."), vec!["Just a sentence of prose."]);
    }

    #[test]
    fn test_layout_grids() {
        let text = "Management Pack\n\n            Jan 2025    Feb 2025\nRevenue     100         200\nOpex        (40)        (50)\n\nSome closing narrative.";
        let grids = layout_grids(text, 1);
        assert_eq!(grids.len(), 1);
        assert_eq!(grids[0].n_rows(), 3);
        assert_eq!(grids[0].cell(0, 1), "Jan 2025");
        assert_eq!(grids[0].cell(1, 0), "Revenue");
    }

    #[test]
    fn test_single_wide_line_is_not_a_grid() {
        let grids = layout_grids("Total   100", 1);
        assert!(grids.is_empty());
    }

    #[test]
    fn test_build_page_detects_units_and_scope() {
        let page = build_page(1, "P&L YTD summary (£'000)\n\nRevenue   100   200\nOpex      10    20");
        assert_eq!(page.unit_hint, Some(UnitHint::Thousands));
        assert_eq!(page.default_scope, Scope::Ytd);
        assert_eq!(page.grids[0].section_tag.as_deref(), Some("pl"));
    }

    #[test]
    fn test_split_pages_on_form_feed() {
        let pages = split_pages("page one text\nRevenue  1  2\x0Cpage two text");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[1].page_number, 2);
    }

    #[test]
    fn test_detect_unit_hint() {
        assert_eq!(detect_unit_hint("all figures £'000"), Some(UnitHint::Thousands));
        assert_eq!(detect_unit_hint("in millions of pounds"), Some(UnitHint::Millions));
        assert_eq!(detect_unit_hint("no banner here"), None);
    }
}
