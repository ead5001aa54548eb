use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use sigscan::config::AnalysisConfig;
use sigscan::data::filter;
use sigscan::data::loader;
use sigscan::data::model::Role;
use sigscan::data::writer;
use sigscan::expr::Predicate;
use sigscan::pipeline;
use sigscan::scan::{CancelToken, ScanStrategy};

#[derive(Parser, Debug)]
#[command(name = "sigscan", version)]
#[command(about = "Derive features, score events and scan for the most significant selection")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline described by an analysis file
    Run {
        /// Analysis TOML file
        config: PathBuf,

        /// Lower edge of the threshold range
        #[arg(long, allow_hyphen_values = true)]
        lo: Option<f64>,

        /// Upper edge of the threshold range (exclusive)
        #[arg(long, allow_hyphen_values = true)]
        hi: Option<f64>,

        /// Number of thresholds
        #[arg(long)]
        steps: Option<usize>,

        /// Signal scale factor
        #[arg(long)]
        scale: Option<f64>,

        /// Worker threads for the scan
        #[arg(long)]
        workers: Option<usize>,

        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },

    /// Count records of one table passing a cut
    Count {
        data: PathBuf,
        cut: String,

        /// Per-record weight
        #[arg(long, default_value_t = 1.0)]
        weight: f64,
    },

    /// Show a table's schema, size and first rows
    Inspect {
        data: PathBuf,

        /// Rows to preview
        #[arg(long, default_value_t = 10)]
        rows: usize,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Rescan,
    Cumulative,
}

impl From<StrategyArg> for ScanStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Rescan => ScanStrategy::Rescan,
            StrategyArg::Cumulative => ScanStrategy::Cumulative,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Run {
            config,
            lo,
            hi,
            steps,
            scale,
            workers,
            strategy,
        } => {
            let mut analysis = AnalysisConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let scan = &mut analysis.scan;
            scan.lo = lo.unwrap_or(scan.lo);
            scan.hi = hi.unwrap_or(scan.hi);
            scan.steps = steps.unwrap_or(scan.steps);
            scan.scale = scale.unwrap_or(scan.scale);
            scan.workers = workers.unwrap_or(scan.workers);
            if let Some(s) = strategy {
                scan.strategy = s.into();
            }

            let report = pipeline::run(&analysis, &CancelToken::new())?;
            match report.operating_point {
                Some(op) => println!(
                    "{} >= {:.4}: S/sqrt(S+B) = {:.4} ({} points)",
                    report.score_field, op.threshold, op.fom, report.points
                ),
                None => println!("scan incomplete after {} points", report.points),
            }
        }
        Command::Count { data, cut, weight } => {
            let predicate: Predicate = cut.parse().context("parsing cut")?;
            let dataset = loader::load_dataset(&data, Role::Signal, weight)?;
            let count = filter::count(&dataset, &predicate)?;
            info!("{predicate}: {} of {} records", count.unweighted, dataset.len());
            println!("{}\t{}", count.unweighted, count.weighted);
        }
        Command::Inspect { data, rows } => {
            let source = loader::open(&data)?;
            for field in source.schema().fields() {
                println!("{:<24} {}", field.name, field.ty);
            }
            let dataset = loader::read_all(&source, Role::Signal, 1.0)?;
            println!("{} records", dataset.len());

            let batch = writer::to_record_batch(&dataset)?;
            let preview = batch.slice(0, rows.min(batch.num_rows()));
            println!("{}", arrow::util::pretty::pretty_format_batches(&[preview])?);
        }
    }
    Ok(())
}
