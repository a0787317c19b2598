//! Core domain model shared by the Siglario loader stages.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "siglario-core";

pub const DEFAULT_SOURCE_FILE: &str = "Siglario_csvjson.json";
pub const DEFAULT_TABLE: &str = "Cad_Siglario";
pub const DEFAULT_ABBREVIATION_COLUMN: &str = "ABREVIATURA";
pub const DEFAULT_MEANING_COLUMN: &str = "SIGNIFICADO";
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PREVIEW_ROWS: usize = 5;

/// One cleaned glossary row, ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub abbreviation: String,
    pub meaning: String,
}

impl GlossaryEntry {
    pub fn new(abbreviation: impl Into<String>, meaning: impl Into<String>) -> Self {
        Self {
            abbreviation: abbreviation.into(),
            meaning: meaning.into(),
        }
    }
}

/// Normalized header names the two projected fields are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub abbreviation: String,
    pub meaning: String,
}

impl ColumnMapping {
    /// Header names are compared after trimming and uppercasing, so the
    /// mapping is stored in that form too.
    pub fn new(abbreviation: &str, meaning: &str) -> Self {
        Self {
            abbreviation: abbreviation.trim().to_uppercase(),
            meaning: meaning.trim().to_uppercase(),
        }
    }
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self::new(DEFAULT_ABBREVIATION_COLUMN, DEFAULT_MEANING_COLUMN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_stored_normalized() {
        let mapping = ColumnMapping::new("  abreviatura ", "Significado");
        assert_eq!(mapping, ColumnMapping::default());
    }

    #[test]
    fn entry_serializes_with_field_names() {
        let json = serde_json::to_value(GlossaryEntry::new("ABNT", "Associação Brasileira de Normas Técnicas"))
            .expect("serialize");
        assert_eq!(json["abbreviation"], "ABNT");
        assert_eq!(json["meaning"], "Associação Brasileira de Normas Técnicas");
    }
}
