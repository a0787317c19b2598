//! Database settings, batch planning and transactional multi-row inserts.

use std::fmt;
use std::ops::Range;

use async_trait::async_trait;
use siglario_core::{GlossaryEntry, DEFAULT_ABBREVIATION_COLUMN, DEFAULT_MEANING_COLUMN, DEFAULT_TABLE};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Connection, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "siglario-storage";

/// Postgres accepts at most this many bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;
pub const COLUMNS_PER_ROW: usize = 2;
pub const DEFAULT_PORT: u16 = 5432;

pub const ENV_SERVER: &str = "DB_SERVER";
pub const ENV_DATABASE: &str = "DB_NAME";
pub const ENV_USER: &str = "DB_USER";
pub const ENV_PASSWORD: &str = "DB_PASSWORD";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database setting {0} is not set")]
    MissingSetting(&'static str),
    #[error("invalid DB_SERVER value {0:?}; expected host, host:port or host,port")]
    InvalidServer(String),
    #[error("invalid SQL identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("batch size must be between 1 and {max}, got {got}")]
    InvalidBatchSize { got: usize, max: usize },
    #[error("connecting to database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Connection settings taken verbatim from the environment. Nothing has a
/// default; gaps surface when the connection is attempted.
#[derive(Clone, Default)]
pub struct DbSettings {
    pub server: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for DbSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSettings")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl DbSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            server: lookup(ENV_SERVER),
            database: lookup(ENV_DATABASE),
            user: lookup(ENV_USER),
            password: lookup(ENV_PASSWORD),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.server.is_some() && self.database.is_some() && self.user.is_some() && self.password.is_some()
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, StorageError> {
        let server = required(&self.server, ENV_SERVER)?;
        let database = required(&self.database, ENV_DATABASE)?;
        let user = required(&self.user, ENV_USER)?;
        let password = required(&self.password, ENV_PASSWORD)?;
        let (host, port) = parse_server(server)?;

        // TLS when offered, certificate not verified.
        Ok(PgConnectOptions::new_without_pgpass()
            .host(&host)
            .port(port)
            .database(database)
            .username(user)
            .password(password)
            .ssl_mode(PgSslMode::Prefer)
            .application_name("siglario"))
    }
}

fn required<'a>(value: &'a Option<String>, key: &'static str) -> Result<&'a str, StorageError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(StorageError::MissingSetting(key))
}

/// Accepts `host`, `host:port`, `[v6]:port` or the SQL Server style `host,port`.
pub fn parse_server(raw: &str) -> Result<(String, u16), StorageError> {
    let raw = raw.trim();
    let invalid = || StorageError::InvalidServer(raw.to_string());

    let (host, port) = if let Some(bracketed) = raw.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']').ok_or_else(invalid)?;
        let port = match rest {
            "" => None,
            _ => Some(rest.strip_prefix([':', ',']).ok_or_else(invalid)?),
        };
        (host, port)
    } else {
        match raw
            .rsplit_once(',')
            .or_else(|| raw.rsplit_once(':').filter(|(host, _)| !host.contains(':')))
        {
            Some((host, port)) => (host, Some(port)),
            None => (raw, None),
        }
    };

    let port = match port {
        Some(port) => port.trim().parse::<u16>().map_err(|_| invalid())?,
        None => DEFAULT_PORT,
    };
    let host = host.trim();
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Destination table and the two columns entries are written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTable {
    table: String,
    abbreviation_column: String,
    meaning_column: String,
}

impl TargetTable {
    pub fn new(table: &str, abbreviation_column: &str, meaning_column: &str) -> Result<Self, StorageError> {
        Ok(Self {
            table: validate_qualified_identifier(table)?,
            abbreviation_column: validate_identifier(abbreviation_column)?,
            meaning_column: validate_identifier(meaning_column)?,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn abbreviation_column(&self) -> &str {
        &self.abbreviation_column
    }

    pub fn meaning_column(&self) -> &str {
        &self.meaning_column
    }
}

impl Default for TargetTable {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            abbreviation_column: DEFAULT_ABBREVIATION_COLUMN.to_string(),
            meaning_column: DEFAULT_MEANING_COLUMN.to_string(),
        }
    }
}

impl fmt::Display for TargetTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.table, self.abbreviation_column, self.meaning_column)
    }
}

pub fn validate_identifier(raw: &str) -> Result<String, StorageError> {
    let ident = raw.trim();
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(ident.to_string())
    } else {
        Err(StorageError::InvalidIdentifier(raw.to_string()))
    }
}

fn validate_qualified_identifier(raw: &str) -> Result<String, StorageError> {
    match raw.trim().split_once('.') {
        Some((schema, table)) => Ok(format!(
            "{}.{}",
            validate_identifier(schema).map_err(|_| StorageError::InvalidIdentifier(raw.to_string()))?,
            validate_identifier(table).map_err(|_| StorageError::InvalidIdentifier(raw.to_string()))?
        )),
        None => validate_identifier(raw),
    }
}

/// Fixed-size chunking of `total_rows`; the last batch holds the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    total_rows: usize,
    batch_size: usize,
}

impl BatchPlan {
    pub fn max_batch_size() -> usize {
        MAX_BIND_PARAMS / COLUMNS_PER_ROW
    }

    pub fn new(total_rows: usize, batch_size: usize) -> Result<Self, StorageError> {
        let max = Self::max_batch_size();
        if batch_size == 0 || batch_size > max {
            return Err(StorageError::InvalidBatchSize { got: batch_size, max });
        }
        Ok(Self { total_rows, batch_size })
    }

    pub fn batch_count(&self) -> usize {
        self.total_rows.div_ceil(self.batch_size)
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.total_rows)
            .step_by(self.batch_size)
            .map(move |start| start..(start + self.batch_size).min(self.total_rows))
    }
}

/// One multi-row INSERT with exactly `rows.len()` value tuples.
pub fn insert_statement<'a>(target: &TargetTable, rows: &'a [GlossaryEntry]) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({}, {}) ",
        target.table, target.abbreviation_column, target.meaning_column
    ));
    builder.push_values(rows, |mut row, entry| {
        row.push_bind(entry.abbreviation.as_str())
            .push_bind(entry.meaning.as_str());
    });
    builder
}

#[async_trait]
pub trait BatchWriter: Send {
    /// Writes one batch and returns the number of affected rows.
    async fn write_batch(&mut self, batch: &[GlossaryEntry]) -> Result<u64, StorageError>;
}

/// Writes batches through an open connection, normally a transaction.
pub struct PgBatchWriter<'c> {
    conn: &'c mut PgConnection,
    target: &'c TargetTable,
}

impl<'c> PgBatchWriter<'c> {
    pub fn new(conn: &'c mut PgConnection, target: &'c TargetTable) -> Self {
        Self { conn, target }
    }
}

#[async_trait]
impl<'c> BatchWriter for PgBatchWriter<'c> {
    async fn write_batch(&mut self, batch: &[GlossaryEntry]) -> Result<u64, StorageError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut builder = insert_statement(self.target, batch);
        let result = builder.build().execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchLoadReport {
    pub batches: usize,
    pub inserted_rows: u64,
}

/// Writes every planned batch in order, stopping at the first failure.
pub async fn write_in_batches<W>(
    writer: &mut W,
    entries: &[GlossaryEntry],
    batch_size: usize,
) -> Result<BatchLoadReport, StorageError>
where
    W: BatchWriter + ?Sized,
{
    let plan = BatchPlan::new(entries.len(), batch_size)?;
    let total = plan.batch_count();
    let mut report = BatchLoadReport::default();

    for (index, range) in plan.ranges().enumerate() {
        let rows = range.len();
        let span = info_span!("insert_batch", batch = index + 1, of = total, rows);
        let affected = writer.write_batch(&entries[range]).instrument(span).await?;
        report.batches += 1;
        report.inserted_rows += affected;
    }

    Ok(report)
}

/// Connects, writes every batch inside a single transaction and commits once.
/// Any failure rolls the whole transaction back; the connection is closed
/// either way.
pub async fn load_entries(
    settings: &DbSettings,
    target: &TargetTable,
    entries: &[GlossaryEntry],
    batch_size: usize,
) -> Result<BatchLoadReport, StorageError> {
    BatchPlan::new(entries.len(), batch_size)?;
    let options = settings.connect_options()?;
    let mut conn = PgConnection::connect_with(&options)
        .await
        .map_err(StorageError::Connect)?;
    info!(target_table = %target, "connected to database");

    let outcome = insert_in_transaction(&mut conn, target, entries, batch_size).await;

    match conn.close().await {
        Ok(()) => info!("database connection closed"),
        Err(err) => warn!(error = %err, "closing database connection failed"),
    }
    outcome
}

async fn insert_in_transaction(
    conn: &mut PgConnection,
    target: &TargetTable,
    entries: &[GlossaryEntry],
    batch_size: usize,
) -> Result<BatchLoadReport, StorageError> {
    let mut tx = conn.begin().await?;
    info!(rows = entries.len(), batch_size, "inserting entries in batches");

    let written = {
        let mut writer = PgBatchWriter::new(&mut tx, target);
        write_in_batches(&mut writer, entries, batch_size).await
    };

    match written {
        Ok(report) => {
            tx.commit().await?;
            info!(
                batches = report.batches,
                inserted_rows = report.inserted_rows,
                "transaction committed"
            );
            Ok(report)
        }
        Err(err) => {
            warn!(error = %err, "insert failed; rolling back transaction");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
