use crate::config::{PipelineConfig, TaxonomyKind};
use crate::error::{FactStoreError, Result};
use crate::model::{MappedRow, RawRow};
use log::debug;
use regex::Regex;
use std::collections::HashMap;

/// Canonicalizes free-form line item text against the configured alias
/// table, with the regex taxonomy as a secondary signal for header tokens
/// that leaked into the line-item position.
pub struct FieldMapper {
    alias_map: HashMap<String, String>,
    taxonomy: Vec<(TaxonomyKind, Regex)>,
}

impl FieldMapper {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let mut alias_map = HashMap::new();
        for seed in &config.line_items {
            alias_map.insert(seed.name.to_lowercase(), seed.name.clone());
            for alias in &seed.aliases {
                alias_map.insert(alias.to_lowercase(), seed.name.clone());
            }
        }

        let mut taxonomy = Vec::new();
        for pattern in &config.taxonomy {
            let compiled =
                Regex::new(&pattern.pattern).map_err(|e| FactStoreError::InvalidPattern {
                    pattern: pattern.pattern.clone(),
                    details: e.to_string(),
                })?;
            taxonomy.push((pattern.kind, compiled));
        }

        Ok(Self { alias_map, taxonomy })
    }

    /// Classify an unresolved header token via the taxonomy patterns.
    pub fn classify_header(&self, token: &str) -> Option<TaxonomyKind> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.taxonomy
            .iter()
            .find(|(_, re)| re.is_match(trimmed))
            .map(|(kind, _)| *kind)
    }

    /// Map one raw candidate. Returns `None` only when the row is
    /// structurally unusable: no line item at all, or the line-item slot
    /// holds a pure header token (a currency banner, a period, a
    /// scenario). Unknown but plausible metric names pass through
    /// unchanged and are rejected later with a reason code if the store
    /// cannot resolve them.
    pub fn map(&self, raw: RawRow) -> Option<MappedRow> {
        let trimmed = raw.line_item_text.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(canonical) = self.alias_map.get(&trimmed.to_lowercase()) {
            return Some(MappedRow {
                canonical_line_item: canonical.clone(),
                raw,
            });
        }

        if let Some(kind) = self.classify_header(trimmed) {
            debug!("dropping row: line-item slot holds a {kind:?} header token ('{trimmed}')");
            return None;
        }

        Some(MappedRow {
            canonical_line_item: trimmed.to_string(),
            raw,
        })
    }
}
