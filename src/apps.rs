//! Command-line drivers behind the `preprocess`, `normalize`, and
//! `verify_import` binaries.

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum, error::ErrorKind};

use crate::config::PipelineConfig;
use crate::constants::holdout::{DEFAULT_HOLDOUT_FRACTION, DEFAULT_HOLDOUT_SEED};
use crate::errors::NormalizeError;
use crate::loader::{CsvRecordLoader, LoadedRecords, RecordLoader, split_holdout, write_csv_path};
use crate::metrics::graph_stats;
use crate::pipeline::NormalizationPipeline;
use crate::store::{FileGraphStore, GraphStore, StoreMode};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Recreate,
    Additive,
}

impl From<ModeArg> for StoreMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Recreate => StoreMode::Recreate,
            ModeArg::Additive => StoreMode::Additive,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "preprocess",
    disable_help_subcommand = true,
    about = "Clean a raw orders CSV and split off a holdout set",
    long_about = "Drop rows with null cells, coerce types, expand country aliases, cap text widths, and write the cleaned rows (optionally holding out a deterministic fraction)."
)]
struct PreprocessCli {
    #[arg(long, value_name = "CSV", help = "Raw orders CSV")]
    input: PathBuf,
    #[arg(long, value_name = "CSV", help = "Destination for cleaned primary rows")]
    output: PathBuf,
    #[arg(
        long = "holdout-output",
        value_name = "CSV",
        help = "Destination for held-out rows; without it no rows are held out"
    )]
    holdout_output: Option<PathBuf>,
    #[arg(
        long = "holdout-fraction",
        default_value_t = DEFAULT_HOLDOUT_FRACTION,
        value_parser = parse_fraction,
        help = "Fraction of rows held out, within [0, 1]"
    )]
    holdout_fraction: f64,
    #[arg(long, default_value_t = DEFAULT_HOLDOUT_SEED, help = "Seed for the holdout split")]
    seed: u64,
}

#[derive(Debug, Parser)]
#[command(
    name = "normalize",
    disable_help_subcommand = true,
    about = "Normalize an orders CSV into a persisted star schema",
    after_help = "Without --store-path or --store-dir the store lives at .starschema_store/graph_store.bin."
)]
struct NormalizeCli {
    #[arg(long, value_name = "CSV", help = "Cleaned orders CSV")]
    input: PathBuf,
    #[command(flatten)]
    store: StoreArgs,
    #[arg(
        long,
        value_enum,
        default_value = "recreate",
        help = "Wipe the store first, or add to what it holds"
    )]
    mode: ModeArg,
}

#[derive(Debug, Parser)]
#[command(
    name = "verify_import",
    disable_help_subcommand = true,
    about = "Check that a persisted star schema reproduces an orders CSV",
    after_help = "Exits non-zero when any discrepancy is found."
)]
struct VerifyCli {
    #[arg(long, value_name = "CSV", help = "Orders CSV the store was built from")]
    input: PathBuf,
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, clap::Args)]
struct StoreArgs {
    #[arg(
        long = "store-path",
        value_name = "STORE_PATH",
        help = "Explicit path of the graph store file"
    )]
    store_path: Option<PathBuf>,
    #[arg(
        long = "store-dir",
        value_name = "DIR",
        conflicts_with = "store_path",
        help = "Directory for the graph store file (uses graph_store.bin filename)"
    )]
    store_dir: Option<PathBuf>,
}

impl StoreArgs {
    fn resolve(self) -> PathBuf {
        if let Some(path) = self.store_path {
            path
        } else if let Some(dir) = self.store_dir {
            FileGraphStore::default_path_in_dir(dir)
        } else {
            FileGraphStore::default_path()
        }
    }
}

/// Clean a raw CSV and optionally split off a holdout set.
pub fn run_preprocess<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();
    let Some(cli) =
        parse_cli::<PreprocessCli, _>(std::iter::once("preprocess".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let config = PipelineConfig::default();
    let loaded = load(&cli.input, &config)?;
    let (primary, holdout) = match &cli.holdout_output {
        Some(_) => split_holdout(loaded.records, cli.holdout_fraction, cli.seed)?,
        None => (loaded.records, Default::default()),
    };
    write_csv_path(&primary, &cli.output)?;
    println!("Wrote {} rows to {}", primary.len(), cli.output.display());
    if let Some(path) = &cli.holdout_output {
        write_csv_path(&holdout, path)?;
        println!("Wrote {} held-out rows to {}", holdout.len(), path.display());
    }
    println!(
        "Read {} rows; dropped {} with null cells; truncated {} text cells",
        loaded.report.rows_read, loaded.report.dropped_null_rows, loaded.report.truncated_fields
    );
    Ok(())
}

/// Normalize a CSV into the file-backed graph store.
pub fn run_normalize<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();
    let Some(cli) =
        parse_cli::<NormalizeCli, _>(std::iter::once("normalize".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let pipeline = NormalizationPipeline::new(PipelineConfig::default())?;
    let loaded = load(&cli.input, pipeline.config())?;
    let store_path = cli.store.resolve();
    println!("Persisting star schema to {}", store_path.display());
    let store = FileGraphStore::open(&store_path)?;
    let report = pipeline.run(&loaded.records, &store, cli.mode.into())?;
    print!("{report}");

    let stats = graph_stats(&store.read_graph()?);
    println!("Stored facts: {}", stats.facts);
    for dimension in &stats.dimensions {
        println!(
            "  {:<12} entries={} facts/entry min={} max={} mean={:.2}",
            dimension.dimension.table_name(),
            dimension.entries,
            dimension.min_facts,
            dimension.max_facts,
            dimension.mean_facts
        );
    }
    Ok(())
}

/// Verify a persisted store against the CSV it was built from.
pub fn run_verify<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();
    let Some(cli) =
        parse_cli::<VerifyCli, _>(std::iter::once("verify_import".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let pipeline = NormalizationPipeline::new(PipelineConfig::default())?;
    let loaded = load(&cli.input, pipeline.config())?;
    let store = FileGraphStore::open(cli.store.resolve())?;
    let report = pipeline.verify(&loaded.records, &pipeline.store_view(&store))?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    if !report.passed() {
        return Err(NormalizeError::VerificationFailed(Box::new(report)).into());
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn load(path: &Path, config: &PipelineConfig) -> Result<LoadedRecords, NormalizeError> {
    CsvRecordLoader::new(path, config.ingestion.clone()).load()
}

fn parse_fraction(raw: &str) -> Result<f64, String> {
    let parsed = raw
        .parse::<f64>()
        .map_err(|_| format!("Could not parse --holdout-fraction value '{raw}' as a number"))?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err("--holdout-fraction must be within [0, 1]".to_string());
    }
    Ok(parsed)
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
