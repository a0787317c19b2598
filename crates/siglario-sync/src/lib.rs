//! Load pipeline orchestration: read, clean, insert, report.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use siglario_core::{
    ColumnMapping, GlossaryEntry, DEFAULT_ABBREVIATION_COLUMN, DEFAULT_BATCH_SIZE, DEFAULT_MEANING_COLUMN,
    DEFAULT_PREVIEW_ROWS, DEFAULT_SOURCE_FILE, DEFAULT_TABLE,
};
use siglario_source::{clean_records, read_document};
use siglario_storage::{load_entries, BatchPlan, DbSettings, TargetTable};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "siglario-sync";

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub source_file: PathBuf,
    pub table: String,
    pub abbreviation_column: String,
    pub meaning_column: String,
    pub batch_size: usize,
    pub preview_rows: usize,
    pub reports_dir: Option<PathBuf>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl LoadConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            source_file: lookup("SIGLARIO_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_FILE)),
            table: lookup("SIGLARIO_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            abbreviation_column: lookup("SIGLARIO_ABBREVIATION_COLUMN")
                .unwrap_or_else(|| DEFAULT_ABBREVIATION_COLUMN.to_string()),
            meaning_column: lookup("SIGLARIO_MEANING_COLUMN")
                .unwrap_or_else(|| DEFAULT_MEANING_COLUMN.to_string()),
            batch_size: lookup("SIGLARIO_BATCH_SIZE")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_BATCH_SIZE),
            preview_rows: DEFAULT_PREVIEW_ROWS,
            reports_dir: lookup("SIGLARIO_REPORTS_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn column_mapping(&self) -> ColumnMapping {
        ColumnMapping::new(&self.abbreviation_column, &self.meaning_column)
    }
}

/// Cleaned rows read from the source file, ready to be inserted.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub source_path: PathBuf,
    pub source_sha256: String,
    pub entries: Vec<GlossaryEntry>,
    pub total_records: usize,
    pub dropped_missing: usize,
    pub dropped_blank: usize,
}

impl PreparedDataset {
    pub fn preview(&self, rows: usize) -> &[GlossaryEntry] {
        &self.entries[..rows.min(self.entries.len())]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_path: String,
    pub source_sha256: String,
    pub total_records: usize,
    pub dropped_missing: usize,
    pub dropped_blank: usize,
    pub batch_size: usize,
    pub batches: usize,
    pub inserted_rows: u64,
    pub target: String,
    pub report_path: Option<String>,
}

pub struct LoadPipeline {
    config: LoadConfig,
    target: TargetTable,
    db: DbSettings,
}

impl LoadPipeline {
    pub fn new(config: LoadConfig, db: DbSettings) -> Result<Self> {
        let target = TargetTable::new(&config.table, &config.abbreviation_column, &config.meaning_column)
            .context("validating target table")?;
        BatchPlan::new(0, config.batch_size).context("validating batch size")?;
        Ok(Self { config, target, db })
    }

    pub fn prepare(&self) -> Result<PreparedDataset> {
        prepare_dataset(&self.config.source_file, &self.config.column_mapping())
    }

    pub async fn run_once(&self) -> Result<LoadRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let dataset = self.prepare()?;
        log_preview(&dataset, self.config.preview_rows);
        if dataset.entries.is_empty() {
            warn!("no rows survived cleaning; the transaction will be empty");
        }

        let report = load_entries(&self.db, &self.target, &dataset.entries, self.config.batch_size)
            .await
            .with_context(|| format!("loading entries into {}", self.target))?;

        let mut summary = LoadRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            source_path: dataset.source_path.display().to_string(),
            source_sha256: dataset.source_sha256,
            total_records: dataset.total_records,
            dropped_missing: dataset.dropped_missing,
            dropped_blank: dataset.dropped_blank,
            batch_size: self.config.batch_size,
            batches: report.batches,
            inserted_rows: report.inserted_rows,
            target: self.target.to_string(),
            report_path: None,
        };
        info!(%run_id, inserted_rows = summary.inserted_rows, "all records inserted");

        if let Some(dir) = &self.config.reports_dir {
            let path = write_run_report(dir, &summary).await?;
            summary.report_path = Some(path.display().to_string());
        }
        Ok(summary)
    }
}

pub fn prepare_dataset(path: &Path, mapping: &ColumnMapping) -> Result<PreparedDataset> {
    let document = read_document(path).with_context(|| format!("reading source {}", path.display()))?;
    let projection = clean_records(document.records, mapping)
        .with_context(|| format!("cleaning records from {}", path.display()))?;

    info!(
        path = %path.display(),
        total_records = projection.total_records,
        kept = projection.entries.len(),
        dropped_missing = projection.dropped_missing,
        dropped_blank = projection.dropped_blank,
        "source cleaned"
    );

    Ok(PreparedDataset {
        source_path: document.path,
        source_sha256: document.digest,
        entries: projection.entries,
        total_records: projection.total_records,
        dropped_missing: projection.dropped_missing,
        dropped_blank: projection.dropped_blank,
    })
}

fn log_preview(dataset: &PreparedDataset, rows: usize) {
    for entry in dataset.preview(rows) {
        info!(abbreviation = %entry.abbreviation, meaning = %entry.meaning, "preview");
    }
    info!(rows = dataset.entries.len(), "total rows after cleaning");
}

pub async fn write_run_report(reports_dir: &Path, summary: &LoadRunSummary) -> Result<PathBuf> {
    let run_dir = reports_dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let path = run_dir.join("load_summary.json");
    let bytes = serde_json::to_vec_pretty(summary).context("serializing load summary")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Runs one load with `config`, taking database settings from the environment.
pub async fn run_load_once(config: LoadConfig) -> Result<LoadRunSummary> {
    LoadPipeline::new(config, DbSettings::from_env())?.run_once().await
}
