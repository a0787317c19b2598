//! Glossary file reading and cleaning: JSON parsing, control-character
//! sanitization, header normalization and row projection.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use siglario_core::{ColumnMapping, GlossaryEntry};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "siglario-source";

/// One flat object from the source array, keys in document order.
pub type RawRecord = Map<String, JsonValue>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source file {} could not be read: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("source file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("source document must be a JSON array of objects")]
    NotAnArray,
    #[error("record {index} is not a JSON object")]
    NotAnObject { index: usize },
    #[error("source document holds no records; check the file contents")]
    EmptyDocument,
    #[error("column {0} does not appear in any record")]
    MissingColumn(String),
}

/// Parsed source file together with its provenance digest.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub digest: String,
    pub records: Vec<RawRecord>,
}

/// Cleaned rows plus the accounting of what was dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub entries: Vec<GlossaryEntry>,
    pub total_records: usize,
    pub dropped_missing: usize,
    pub dropped_blank: usize,
}

pub fn read_document(path: impl AsRef<Path>) -> Result<SourceDocument, SourceError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: JsonValue = serde_json::from_slice(&bytes).map_err(|source| SourceError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let records = records_from_value(value)?;
    debug!(path = %path.display(), records = records.len(), "source document parsed");
    Ok(SourceDocument {
        path: path.to_path_buf(),
        digest: source_digest(&bytes),
        records,
    })
}

pub fn records_from_value(value: JsonValue) -> Result<Vec<RawRecord>, SourceError> {
    let JsonValue::Array(items) = value else {
        return Err(SourceError::NotAnArray);
    };

    let records = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            JsonValue::Object(map) => Ok(map),
            _ => Err(SourceError::NotAnObject { index }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if records.iter().all(|r| r.is_empty()) {
        return Err(SourceError::EmptyDocument);
    }
    Ok(records)
}

pub fn source_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Removes ASCII control characters (0x00-0x1F and 0x7F).
pub fn sanitize_text(input: &str) -> String {
    input.chars().filter(|c| !is_stripped_control(*c)).collect()
}

fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{1F}' | '\u{7F}')
}

/// Sanitizes string-valued fields; other values pass through untouched.
pub fn sanitize_record(record: RawRecord) -> RawRecord {
    record
        .into_iter()
        .map(|(key, value)| match value {
            JsonValue::String(s) => (key, JsonValue::String(sanitize_text(&s))),
            other => (key, other),
        })
        .collect()
}

pub fn normalize_header(header: &str) -> String {
    header.trim().to_uppercase()
}

pub fn project(records: &[RawRecord], mapping: &ColumnMapping) -> Result<Projection, SourceError> {
    for column in [&mapping.abbreviation, &mapping.meaning] {
        let present = records
            .iter()
            .any(|r| r.keys().any(|k| normalize_header(k) == *column));
        if !present {
            return Err(SourceError::MissingColumn(column.clone()));
        }
    }

    let mut projection = Projection {
        total_records: records.len(),
        ..Default::default()
    };

    for record in records {
        let (Some(abbreviation), Some(meaning)) = (
            field_text(record, &mapping.abbreviation),
            field_text(record, &mapping.meaning),
        ) else {
            projection.dropped_missing += 1;
            continue;
        };

        let abbreviation = abbreviation.trim();
        let meaning = meaning.trim();
        if abbreviation.is_empty() || meaning.is_empty() {
            projection.dropped_blank += 1;
            continue;
        }
        projection
            .entries
            .push(GlossaryEntry::new(abbreviation, meaning));
    }

    Ok(projection)
}

/// Sanitizes every record and projects it onto the mapped columns.
pub fn clean_records(records: Vec<RawRecord>, mapping: &ColumnMapping) -> Result<Projection, SourceError> {
    let sanitized = records.into_iter().map(sanitize_record).collect::<Vec<_>>();
    project(&sanitized, mapping)
}

// First non-null field whose normalized header matches.
fn field_text(record: &RawRecord, header: &str) -> Option<String> {
    record
        .iter()
        .filter(|(key, _)| normalize_header(key) == header)
        .find_map(|(_, value)| value_text(value))
}

fn value_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(true) => Some("True".to_string()),
        JsonValue::Bool(false) => Some("False".to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn records(value: JsonValue) -> Vec<RawRecord> {
        records_from_value(value).expect("records")
    }

    #[test]
    fn sanitize_strips_ascii_controls_only() {
        assert_eq!(sanitize_text("A\u{0}B\tC\r\nD\u{7F}E"), "ABCDE");
        assert_eq!(sanitize_text("Ação \u{80}ü"), "Ação \u{80}ü");
        assert_eq!(sanitize_text(""), "");
    }

    #[test]
    fn sanitize_record_leaves_non_strings_alone() {
        let record = records(json!([{ "a": "x\u{1}y", "b": 12, "c": null, "d": ["\u{2}"] }]))
            .remove(0);
        let clean = sanitize_record(record);
        assert_eq!(clean["a"], "xy");
        assert_eq!(clean["b"], 12);
        assert!(clean["c"].is_null());
        assert_eq!(clean["d"], json!(["\u{2}"]));
    }

    #[test]
    fn headers_are_trimmed_and_uppercased() {
        assert_eq!(normalize_header("  abreviatura\t"), "ABREVIATURA");
        assert_eq!(normalize_header("Significado"), "SIGNIFICADO");
    }

    #[test]
    fn projection_drops_missing_and_blank_rows() {
        let input = records(json!([
            { " abreviatura ": " ABNT ", "significado": "Normas Técnicas", "extra": 1 },
            { "ABREVIATURA": "CPF" },
            { "ABREVIATURA": null, "SIGNIFICADO": "Sem sigla" },
            { "ABREVIATURA": "   ", "SIGNIFICADO": "Vazio" },
            { "ABREVIATURA": "\u{0}\u{1}", "SIGNIFICADO": "Somente controle" },
            { "ABREVIATURA": 42, "SIGNIFICADO": "Número" },
        ]));
        let projection = clean_records(input, &ColumnMapping::default()).expect("projection");

        assert_eq!(projection.total_records, 6);
        assert_eq!(projection.dropped_missing, 2);
        assert_eq!(projection.dropped_blank, 2);
        assert_eq!(
            projection.entries,
            vec![
                GlossaryEntry::new("ABNT", "Normas Técnicas"),
                GlossaryEntry::new("42", "Número"),
            ]
        );
    }

    #[test]
    fn scalar_values_render_as_text() {
        let input = records(json!([
            { "ABREVIATURA": true, "SIGNIFICADO": 1.0 },
            { "ABREVIATURA": false, "SIGNIFICADO": ["a", 1] },
        ]));
        let projection = project(&input, &ColumnMapping::default()).expect("projection");
        assert_eq!(
            projection.entries,
            vec![
                GlossaryEntry::new("True", "1.0"),
                GlossaryEntry::new("False", r#"["a",1]"#),
            ]
        );
    }

    #[test]
    fn duplicate_headers_take_first_non_null_value() {
        let input = records(json!([
            { "abreviatura": null, "ABREVIATURA ": "RG", "SIGNIFICADO": "Registro Geral" },
        ]));
        let projection = project(&input, &ColumnMapping::default()).expect("projection");
        assert_eq!(projection.entries, vec![GlossaryEntry::new("RG", "Registro Geral")]);
    }

    #[test]
    fn missing_column_is_reported() {
        let input = records(json!([{ "ABREVIATURA": "RG" }]));
        let err = project(&input, &ColumnMapping::default()).unwrap_err();
        assert!(matches!(err, SourceError::MissingColumn(ref c) if c == "SIGNIFICADO"));
    }

    #[test]
    fn document_shape_is_validated() {
        assert!(matches!(records_from_value(json!({})), Err(SourceError::NotAnArray)));
        assert!(matches!(records_from_value(json!([])), Err(SourceError::EmptyDocument)));
        assert!(matches!(records_from_value(json!([{}, {}])), Err(SourceError::EmptyDocument)));
        assert!(matches!(
            records_from_value(json!([{ "a": 1 }, "b"])),
            Err(SourceError::NotAnObject { index: 1 })
        ));
    }

    #[test]
    fn read_document_reports_missing_and_invalid_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.json");
        assert!(matches!(read_document(&missing), Err(SourceError::Read { .. })));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "[{\"ABREVIATURA\": ").expect("write");
        assert!(matches!(read_document(&broken), Err(SourceError::Parse { .. })));
    }

    #[test]
    fn read_document_parses_and_digests() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(r#"[{"ABREVIATURA":"ONU","SIGNIFICADO":"Organização das Nações Unidas"}]"#.as_bytes())
            .expect("write");

        let doc = read_document(file.path()).expect("document");
        assert_eq!(doc.records.len(), 1);
        assert_eq!(doc.digest.len(), 64);
        assert_eq!(doc.digest, source_digest(&fs::read(file.path()).expect("read")));
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(
            source_digest(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
