//! klm-inspect command-line interface.
//!
//! Decodes raw KLM event files into occupancy and timing histograms.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand, ValueEnum};

use klm_core::{EntrySelection, NUM_SECTORS};
use klm_histogram::HitAggregator;
use klm_io::{
    inspect_events, inspect_events_parallel, load_channel_map, sector_counts,
    write_histograms_json, ChannelMapTable, RawEventFileReader, DEFAULT_BATCH_SIZE,
};
use klm_raw::{CalibrationConfig, HitDecoder};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    KlmIo(#[from] klm_io::Error),

    #[error("Calibration error: {0}")]
    Raw(#[from] klm_raw::Error),
}

#[derive(Parser)]
#[command(name = "klm-inspect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a raw event file and write histograms
    Inspect {
        /// Raw event file
        input: PathBuf,

        /// Output JSON file
        #[arg(short, long)]
        output: PathBuf,

        /// Channel map CSV; all hits are unmapped without one
        #[arg(short, long)]
        channel_map: Option<PathBuf>,

        /// Calibration JSON; Belle II defaults without one
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Which hits enter the histograms
        #[arg(short, long, value_enum, default_value = "all")]
        selection: Selection,

        /// Experiment number, overriding the calibration file, then the file header
        #[arg(short, long)]
        experiment: Option<u32>,

        /// Decode events on the rayon thread pool
        #[arg(short, long)]
        parallel: bool,

        /// Events per parallel batch
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// Show file header and content totals
    Info {
        /// Raw event file
        input: PathBuf,
    },

    /// Summarise a channel map
    Map {
        /// Channel map CSV
        input: PathBuf,
    },

    /// Write the default calibration as JSON
    Config {
        /// Output file; stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Selection {
    All,
    Single,
    Multi,
}

impl From<Selection> for EntrySelection {
    fn from(selection: Selection) -> Self {
        match selection {
            Selection::All => Self::All,
            Selection::Single => Self::SingleEntry,
            Selection::Multi => Self::MultiEntry,
        }
    }
}

/// Inserts the selection suffix before the extension: `out.json` becomes
/// `out-singleEntry.json`.
fn output_path(path: &Path, selection: EntrySelection) -> PathBuf {
    let suffix = selection.suffix();
    if suffix.is_empty() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    path.with_file_name(name)
}

/// Command-line flag first, then the calibration file, then the file header.
fn resolve_experiment(flag: Option<u32>, calibration: Option<u32>, header: u32) -> u32 {
    flag.or(calibration).unwrap_or(header)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Inspect {
            input,
            output,
            channel_map,
            calibration,
            selection,
            experiment,
            parallel,
            batch_size,
        } => {
            let reader = RawEventFileReader::open(&input)?;
            let header = reader.header();

            let config = match &calibration {
                Some(path) => CalibrationConfig::from_file(path)?,
                None => CalibrationConfig::belle2_defaults(),
            };
            let experiment = resolve_experiment(
                experiment,
                calibration.is_some().then_some(config.experiment),
                header.experiment,
            );
            let config = config.with_experiment(experiment);
            info!(
                "experiment {} run {} (legacy ctime: {})",
                config.experiment,
                header.run,
                config.applies_legacy_ctime()
            );

            let map = match &channel_map {
                Some(path) => load_channel_map(path)?,
                None => ChannelMapTable::default(),
            };
            if map.is_empty() {
                info!("no channel map; every hit is treated as unmapped");
            }

            let selection = EntrySelection::from(selection);
            let decoder = HitDecoder::new(config, map);
            let aggregator = HitAggregator::new(selection);

            let start = Instant::now();
            let report = if parallel {
                inspect_events_parallel(reader.events(), &decoder, aggregator, batch_size)
            } else {
                inspect_events(reader.events(), &decoder, aggregator)
            };
            let elapsed = start.elapsed();

            // Outputs are flushed even when the source failed part way.
            let output = output_path(&output, selection);
            write_histograms_json(&output, &report.histograms)?;

            println!("{}", report.diagnostics);
            println!(
                "Processed {} events in {:.2}s -> {}",
                report.events,
                elapsed.as_secs_f64(),
                output.display()
            );

            if let Some(e) = report.error {
                eprintln!("Error: {e}");
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Info { input } => {
            let reader = RawEventFileReader::open(&input)?;
            let header = reader.header();
            let file_size = reader.file_size();

            println!("File: {}", input.display());
            println!(
                "Size: {} bytes ({:.2} MB)",
                file_size,
                file_size as f64 / 1_000_000.0
            );
            println!("Experiment: {}", header.experiment);
            println!("Run: {}", header.run);

            let mut events = 0u64;
            let mut coppers = 0u64;
            let mut buffers = 0u64;
            let mut words = 0u64;
            for event in reader.events() {
                let event = event?;
                events += 1;
                for copper in &event.coppers {
                    coppers += 1;
                    for buffer in copper.buffers.iter().filter(|b| !b.is_empty()) {
                        buffers += 1;
                        words += buffer.len() as u64;
                    }
                }
            }

            println!("Events: {}", events);
            println!("COPPER records: {}", coppers);
            println!("Non-empty buffers: {}", buffers);
            println!("Words: {}", words);
        }

        Commands::Map { input } => {
            let map = load_channel_map(&input)?;
            println!("File: {}", input.display());
            println!("Mapped channels: {}", map.len());

            let counts = sector_counts(&map);
            println!("{:<8} | {:>8}", "Sector", "Channels");
            println!("{:-<19}", "");
            for (sector, count) in counts.iter().enumerate() {
                let label = if sector < NUM_SECTORS / 2 {
                    format!("BB{}", sector)
                } else {
                    format!("BF{}", sector - NUM_SECTORS / 2)
                };
                println!("{:<8} | {:>8}", label, count);
            }
        }

        Commands::Config { output } => {
            let json = CalibrationConfig::belle2_defaults().to_json_string()?;
            match output {
                Some(path) => {
                    fs::write(&path, json)?;
                    println!("Wrote default calibration to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
