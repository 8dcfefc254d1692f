/// A rectangular region of text cells recovered from a page, sheet or CSV.
/// All tabular strategies consume this shape regardless of source format.
#[derive(Debug, Clone, Default)]
pub struct Grid {
    /// 1-based page (or sheet) number the grid was found on.
    pub page: u32,
    /// 0-based index of the grid within its page.
    pub table_index: u32,
    /// Statement section the grid belongs to, when detectable ("pl", "bs", "cf").
    pub section_tag: Option<String>,
    /// True when the surrounding context marks this table as year-to-date.
    pub ytd: bool,
    pub rows: Vec<Vec<String>>,
}

impl Grid {
    pub fn new(page: u32, table_index: u32, rows: Vec<Vec<String>>) -> Self {
        Self {
            page,
            table_index,
            section_tag: None,
            ytd: false,
            rows,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    /// Cell text at (row, col), empty string when out of range.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.trim())
            .unwrap_or("")
    }

    /// Grouping token identifying this table, e.g. `p3_t1_pl_ytd`.
    /// Prevents unrelated sections sharing coordinates from being treated
    /// as the same logical cell during reconciliation.
    pub fn context_key(&self) -> String {
        let mut key = format!("p{}_t{}", self.page, self.table_index);
        if let Some(tag) = &self.section_tag {
            key.push('_');
            key.push_str(tag);
        }
        if self.ytd {
            key.push_str("_ytd");
        }
        key
    }
}

/// Classify surrounding text into a statement section tag.
pub fn detect_section_tag(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    if lowered.contains("profit and loss")
        || lowered.contains("profit & loss")
        || lowered.contains("income statement")
        || lowered.contains("p&l")
    {
        Some("pl".to_string())
    } else if lowered.contains("balance sheet") || lowered.contains("financial position") {
        Some("bs".to_string())
    } else if lowered.contains("cash flow") || lowered.contains("cashflow") {
        Some("cf".to_string())
    } else {
        None
    }
}

/// True when the surrounding text marks figures as year-to-date.
pub fn detect_ytd(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("ytd") || lowered.contains("year to date") || lowered.contains("year-to-date")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_key() {
        let mut grid = Grid::new(3, 1, vec![]);
        assert_eq!(grid.context_key(), "p3_t1");
        grid.section_tag = Some("pl".to_string());
        grid.ytd = true;
        assert_eq!(grid.context_key(), "p3_t1_pl_ytd");
    }

    #[test]
    fn test_cell_out_of_range_is_empty() {
        let grid = Grid::new(1, 0, vec![vec!["a".to_string()]]);
        assert_eq!(grid.cell(0, 0), "a");
        assert_eq!(grid.cell(0, 5), "");
        assert_eq!(grid.cell(9, 0), "");
    }

    #[test]
    fn test_section_detection() {
        assert_eq!(
            detect_section_tag("Consolidated Profit and Loss account"),
            Some("pl".to_string())
        );
        assert_eq!(detect_section_tag("Balance Sheet as at"), Some("bs".to_string()));
        assert_eq!(detect_section_tag("Cash flow statement"), Some("cf".to_string()));
        assert_eq!(detect_section_tag("Notes to the accounts"), None);
    }

    #[test]
    fn test_ytd_detection() {
        assert!(detect_ytd("Revenue YTD March"));
        assert!(detect_ytd("year to date performance"));
        assert!(!detect_ytd("monthly performance"));
    }
}
