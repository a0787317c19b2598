use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use siglario_core::DEFAULT_PREVIEW_ROWS;
use siglario_sync::{prepare_dataset, run_load_once, LoadConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "siglario")]
#[command(about = "Load a JSON abbreviation glossary into a database table")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Clean the source file and insert it in batches (default)
    Load(LoadArgs),
    /// Clean the source file and print what would be inserted
    Preview(PreviewArgs),
}

#[derive(Debug, Default, Args)]
struct LoadArgs {
    /// Source JSON file [env: SIGLARIO_FILE]
    #[arg(long)]
    file: Option<PathBuf>,
    /// Rows per INSERT statement [env: SIGLARIO_BATCH_SIZE]
    #[arg(long)]
    batch_size: Option<usize>,
    /// Target table, optionally schema-qualified [env: SIGLARIO_TABLE]
    #[arg(long)]
    table: Option<String>,
    /// Directory for per-run JSON summaries [env: SIGLARIO_REPORTS_DIR]
    #[arg(long)]
    reports_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PreviewArgs {
    #[arg(long)]
    file: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_PREVIEW_ROWS)]
    rows: usize,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("siglario_cli=info,siglario_sync=info,siglario_storage=info,siglario_source=info")
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = LoadConfig::from_env();

    match cli.command.unwrap_or(Commands::Load(LoadArgs::default())) {
        Commands::Load(args) => {
            if let Some(file) = args.file {
                config.source_file = file;
            }
            if let Some(batch_size) = args.batch_size {
                config.batch_size = batch_size;
            }
            if let Some(table) = args.table {
                config.table = table;
            }
            if let Some(dir) = args.reports_dir {
                config.reports_dir = Some(dir);
            }

            let summary = run_load_once(config).await?;
            println!(
                "load complete: run_id={} records={} inserted={} batches={} dropped_missing={} dropped_blank={} target={}",
                summary.run_id,
                summary.total_records,
                summary.inserted_rows,
                summary.batches,
                summary.dropped_missing,
                summary.dropped_blank,
                summary.target
            );
            if let Some(path) = summary.report_path {
                println!("report: {path}");
            }
        }
        Commands::Preview(args) => {
            if let Some(file) = args.file {
                config.source_file = file;
            }
            let dataset = prepare_dataset(&config.source_file, &config.column_mapping())?;
            let width = dataset
                .preview(args.rows)
                .iter()
                .map(|e| e.abbreviation.chars().count())
                .max()
                .unwrap_or(0)
                .max(config.abbreviation_column.len());

            println!("{:<width$}  {}", config.abbreviation_column, config.meaning_column);
            for entry in dataset.preview(args.rows) {
                println!("{:<width$}  {}", entry.abbreviation, entry.meaning);
            }
            println!(
                "\nrecords={} kept={} dropped_missing={} dropped_blank={}",
                dataset.total_records,
                dataset.entries.len(),
                dataset.dropped_missing,
                dataset.dropped_blank
            );
        }
    }

    Ok(())
}
