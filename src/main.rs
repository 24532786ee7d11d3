// Impact Footprint - Command Line
// Results go to stdout as pretty JSON, logs go to stderr (RUST_LOG).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use impact_footprint::resolver::disambiguate;
use impact_footprint::{
    AggregateOptions, CandidateMode, CbpDatabase, CrosswalkResolver, CsvSnapshot,
    FootprintConfig, GeographyId, GeographyLevel, GeographyRollup, ImpactAggregator,
    ImpactModelStore, IndustrySource, VERSION,
};

#[derive(Parser)]
#[command(name = "impact-footprint")]
#[command(about = "Expected environmental impacts of the industries in a US geography")]
#[command(version = VERSION)]
struct Cli {
    /// JSON config file (FOOTPRINT_* environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Model sectors a NAICS-2017 code maps to
    Resolve {
        naics: String,
    },

    /// Expected impacts of one geography (zipcode/30301, state/13/county/121, state/13)
    Aggregate {
        geography: GeographyId,
        #[command(flatten)]
        sampling: SamplingArgs,
    },

    /// Aggregate every geography of a level and store the results
    Rollup {
        level: GeographyLevel,
        #[command(flatten)]
        sampling: SamplingArgs,
    },

    /// Load a County Business Patterns CSV export into the CBP database
    ImportCbp {
        level: GeographyLevel,
        csv: PathBuf,
    },

    /// Impact indicator catalog
    Indicators,
}

#[derive(clap::Args)]
struct SamplingArgs {
    /// Monte Carlo trials per ambiguous industry
    #[arg(long)]
    trials: Option<u32>,

    /// disambiguated | ambiguous
    #[arg(long)]
    mode: Option<CandidateMode>,

    /// Fixed random seed
    #[arg(long)]
    seed: Option<u64>,
}

impl SamplingArgs {
    fn options(&self, config: &FootprintConfig) -> AggregateOptions {
        let mut options = config.aggregate_options();
        if let Some(trials) = self.trials {
            options.trials = trials;
        }
        if let Some(mode) = self.mode {
            options.candidate_mode = mode;
        }
        if let Some(seed) = self.seed {
            options.seed = Some(seed);
        }
        options
    }
}

#[derive(Serialize)]
struct RollupOutput {
    run_id: String,
    snapshot_version: String,
    geographies: usize,
    failed: Vec<impact_footprint::RollupFailure>,
    unresolved_industries: usize,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = FootprintConfig::load(cli.config.as_deref())?;
    let store = ImpactModelStore::new(CsvSnapshot::new(&config.snapshot_dir));

    match cli.command {
        Command::Resolve { naics } => {
            let resolution = CrosswalkResolver::new(&store).candidates(&naics)?;
            let best = disambiguate(resolution.clone());
            print_json(&serde_json::json!({
                "resolution": resolution,
                "disambiguated": best,
            }))?;
        }

        Command::Aggregate { geography, sampling } => {
            let options = sampling.options(&config);
            let cbp = CbpDatabase::open(&config.cbp_database)?;
            let records = cbp.fetch_industry_records(&geography)?;
            info!("{}: {} detailed industries", geography, records.len());

            let report = ImpactAggregator::new(&store).aggregate_report(&geography.to_string(), &records, &options)?;
            print_json(&report)?;
        }

        Command::Rollup { level, sampling } => {
            let options = sampling.options(&config);
            let cbp = CbpDatabase::open(&config.cbp_database)?;
            let rollup = GeographyRollup::new(&store, &cbp, options);
            let summary = rollup.run_level(level)?;

            let conn = Connection::open(&config.impacts_database)
                .with_context(|| format!("Failed to open {:?}", config.impacts_database))?;
            impact_footprint::setup_database(&conn)?;
            let run = rollup.save(&conn, &summary)?;

            print_json(&RollupOutput {
                run_id: run.run_id,
                snapshot_version: run.snapshot_version,
                geographies: summary.geographies(),
                unresolved_industries: summary.unresolved_count(),
                failed: summary.failures,
            })?;
        }

        Command::ImportCbp { level, csv } => {
            let mut cbp = CbpDatabase::open(&config.cbp_database)?;
            let imported = cbp.import_cbp_csv(level, &csv)?;
            print_json(&serde_json::json!({
                "level": level.as_str(),
                "source": csv,
                "imported": imported,
            }))?;
        }

        Command::Indicators => {
            print_json(&store.get_indicators()?)?;
        }
    }

    Ok(())
}
