mod config;

use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use rxdose_core::RxError;
use rxdose_rag::{
    build_index, run_extraction, EmbeddingClient, ExtractionConfig, IndexRetriever, Pipeline,
    ProgressUpdate, RunReport, RunStage, SupportedModel,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{resolve_config, ConfigFlags, DEFAULT_CONFIG};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_PROBE_QUERY: &str = "amoxicillin 500mg twice daily";

#[derive(Parser, Debug)]
#[command(
    name = "rxdose",
    version = VERSION,
    about = "Extract daily frequency, dose and duration from free-text prescriptions"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(flatten)]
    overrides: ConfigFlags,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Embed a labeled reference table and persist it as the similarity index
    BuildIndex {
        /// CSV or TSV with the eight reference columns
        reference: PathBuf,
    },
    /// Print the closest reference examples for a sample query
    ProbeIndex {
        #[arg(long, default_value = DEFAULT_PROBE_QUERY)]
        query: String,
        #[arg(long = "top-k")]
        top_k: Option<usize>,
    },
    /// Run the extraction pipeline over an input table
    Extract {
        input: PathBuf,
        /// Defaults to `<input stem>_dosage.<ext>` beside the input
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
        #[arg(long, action = ArgAction::SetTrue)]
        quiet: bool,
    },
    /// List the supported models with their selection index
    Models,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose || env_flag("RXDOSE_VERBOSE"));

    if matches!(cli.command, Commands::Models) {
        print_models();
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = resolve_config(&config_path, &cli.overrides)?;

    match cli.command {
        Commands::BuildIndex { reference } => cmd_build_index(&config, &reference),
        Commands::ProbeIndex { query, top_k } => cmd_probe_index(&config, &query, top_k),
        Commands::Extract { input, out, quiet } => cmd_extract(&config, &input, out, quiet),
        Commands::Models => Ok(()),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn print_models() {
    for (index, model) in SupportedModel::ALL.iter().enumerate() {
        let marker = if *model == SupportedModel::default() {
            " (default)"
        } else {
            ""
        };
        println!("{index}  {}{marker}", model.as_str());
    }
}

fn cmd_build_index(config: &ExtractionConfig, reference: &Path) -> Result<()> {
    let embeddings = EmbeddingClient::new(&config.embedding)?;
    let report = build_index(reference, &config.index_dir, &embeddings)?;
    println!(
        "[rxdose] indexed {} reference rows into {} ({} skipped, embedding {})",
        report.records,
        report.dir.display(),
        report.skipped.len(),
        report.embedding
    );
    for skipped in &report.skipped {
        println!("  skipped row {}: {}", skipped.row, skipped.reason);
    }
    Ok(())
}

fn cmd_probe_index(config: &ExtractionConfig, query: &str, top_k: Option<usize>) -> Result<()> {
    let k = top_k.unwrap_or(config.settings.retrieval_k()).max(1);
    let result = EmbeddingClient::new(&config.embedding)
        .and_then(|embeddings| IndexRetriever::open(&config.index_dir, embeddings))
        .and_then(|retriever| retriever.search(query, k));
    let hits = match result {
        Ok(hits) => hits,
        Err(err) => {
            println!("Index probe failed: {err:#}");
            return Err(err);
        }
    };
    println!("Query: {query}");
    if hits.is_empty() {
        println!("Index is empty; no examples returned.");
        return Ok(());
    }
    for (rank, hit) in hits.iter().enumerate() {
        let record = &hit.record;
        println!("\nExample {} (score {:.3})", rank + 1, hit.score);
        println!("  Raw Antibiotic: {}", record.raw_antibiotic_name);
        println!("  Raw Dose: {}", record.raw_dose_quantity);
        println!("  Instructions: {}", record.patient_instructions);
        println!(
            "  Extracted: frequency={} dose={} duration={}",
            record.clean_frequency, record.clean_dose, record.clean_duration
        );
    }
    println!("\nIndex probe succeeded: {} examples", hits.len());
    Ok(())
}

fn cmd_extract(
    config: &ExtractionConfig,
    input: &Path,
    out: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    if !config.index_dir.exists() {
        return Err(RxError::IndexNotFound(config.index_dir.clone()).into());
    }
    let out = out.unwrap_or_else(|| default_output_path(input));
    info!(
        input = %input.display(),
        output = %out.display(),
        model = config.model.as_str(),
        chunk_size = config.settings.chunk_size(),
        "starting extraction"
    );

    let started = Instant::now();
    let progress = |update: &ProgressUpdate| {
        if quiet && update.stage != RunStage::Failed {
            return;
        }
        match update.fraction {
            Some(fraction) => eprintln!("[{:>3.0}%] {}", fraction * 100.0, update.message),
            None => eprintln!("[    ] {}", update.message),
        }
    };
    let report = run_extraction(input, || Pipeline::from_config(config), &progress)?;
    report
        .table
        .write_path(&out)
        .with_context(|| format!("failed to write results to {}", out.display()))?;
    print_summary(&report, &out, started.elapsed().as_secs_f64());
    Ok(())
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = input
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    input.with_file_name(format!("{stem}_dosage.{ext}"))
}

fn print_summary(report: &RunReport, out: &Path, elapsed_secs: f64) {
    println!("Rows processed: {}", report.input_rows);
    println!(
        "Batches processed: {} of {}",
        report.succeeded_batches(),
        report.batches
    );
    println!("Output rows: {}", report.table.len());
    println!("Elapsed: {elapsed_secs:.1}s");
    if let Some(dose) = report.mean_dose() {
        println!("Mean dose (mg): {dose:.1}");
    }
    if let Some(frequency) = report.mean_frequency() {
        println!("Mean daily frequency: {frequency:.2}");
    }
    if report.dropped_lines > 0 {
        println!("Malformed response lines dropped: {}", report.dropped_lines);
    }
    for failure in &report.failed_batches {
        println!("Batch {} failed: {}", failure.index + 1, failure.message);
    }
    println!("Results written to {}", out.display());
}
