//! Command-line entry point for the data pipeline: pull Statcast data, inspect
//! season tables, build plate-appearance features, fit preprocessors and
//! evaluate a trained model.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pull_the_pitcher::acquisition::{query_db, query_pitches, query_statcast, AcquisitionRequest, SavantClient};
use pull_the_pitcher::config::PipelineConfig;
use pull_the_pitcher::pipeline::{get_starts, prep_data_for_modeling};
use pull_the_pitcher::processing::{get_games_pitchers_years, process_pitches};
use pull_the_pitcher::types::PlateAppearance;

#[derive(Parser)]
#[command(name = "ptp")]
#[command(about = "Pitching-change data pipeline", long_about = None)]
struct Cli {
    /// Pipeline configuration (JSON); built-in defaults when omitted
    #[arg(short, long, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download pitches from Baseball Savant
    Acquire {
        /// First day, YYYY-MM-DD
        #[arg(long)]
        start_dt: String,
        /// Last day, YYYY-MM-DD (defaults to start_dt)
        #[arg(long)]
        end_dt: Option<String>,
        /// Restrict to one team abbreviation
        #[arg(long)]
        team: Option<String>,
        /// db or csv
        #[arg(long, default_value = "db")]
        output_type: String,
        /// Replace the season table instead of appending
        #[arg(long)]
        overwrite: bool,
        #[arg(long, default_value = "./data/raw")]
        output_path: PathBuf,
    },
    /// Print rows of a season table as CSV
    Query {
        #[arg(long, env = "DB_PATH", default_value = "./data/raw/statcast_pitches.db")]
        db: PathBuf,
        #[arg(long)]
        year: i32,
        /// Comma-separated column names (all when omitted)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Aggregate pitches into starter plate appearances and write them as CSV
    Process {
        #[arg(long, env = "DB_PATH", default_value = "./data/raw/statcast_pitches.db")]
        db: PathBuf,
        #[arg(long, value_delimiter = ',', required = true)]
        years: Vec<i32>,
        #[arg(long, default_value = "./data/processed/appearances.csv")]
        output: PathBuf,
    },
    /// Split starts, fit preprocessors on the training split and save them
    Prep {
        #[arg(long, env = "DB_PATH", default_value = "./data/raw/statcast_pitches.db")]
        db: PathBuf,
        #[arg(long, value_delimiter = ',', required = true)]
        years: Vec<i32>,
        #[arg(long, default_value = "./data/processed")]
        out_dir: PathBuf,
    },
    /// Score a trained model on the validation split
    Evaluate {
        #[arg(long, env = "DB_PATH", default_value = "./data/raw/statcast_pitches.db")]
        db: PathBuf,
        #[arg(long, value_delimiter = ',', required = true)]
        years: Vec<i32>,
        #[arg(long, env = "MODEL_PATH")]
        model: PathBuf,
        /// Preprocessors saved by `prep` for the same years
        #[arg(long, env = "PREPROCESSORS_PATH")]
        preprocessors: PathBuf,
        /// Probability at which a step counts as a predicted pull
        #[arg(long, default_value = "0.5")]
        threshold: f32,
    },
}

fn load_appearances(db: &Path, years: &[i32], config: &PipelineConfig) -> Result<Vec<PlateAppearance>> {
    let mut pitches = Vec::new();
    for &year in years {
        let rows = query_pitches(db, year, None, None)
            .with_context(|| format!("failed to read {} season from {}", year, db.display()))?;
        info!("{}: {} pitches", year, rows.len());
        pitches.extend(rows);
    }
    Ok(process_pitches(pitches, config))
}

fn write_appearances(path: &Path, appearances: &[PlateAppearance], config: &PipelineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("cannot create {}", path.display()))?;
    let mut header: Vec<String> = [
        "game_pk",
        "game_date",
        "game_year",
        "at_bat_number",
        "inning_topbot",
        "pitcher",
        "batter",
        "pitcher_team",
        "batter_team",
        "events",
        "outs_after",
        "pulled",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(config.feature_cols.iter().map(|c| c.to_string()));
    wtr.write_record(&header)?;

    for pa in appearances {
        let mut record = vec![
            pa.game_pk.to_string(),
            pa.game_date.clone(),
            pa.game_year.to_string(),
            pa.at_bat_number.to_string(),
            pa.half.to_string(),
            pa.pitcher.to_string(),
            pa.batter.to_string(),
            pa.pitcher_team.clone(),
            pa.batter_team.clone(),
            pa.events.clone().unwrap_or_default(),
            pa.outs_after.to_string(),
            pa.pulled.to_string(),
        ];
        record.extend(
            config
                .feature_cols
                .iter()
                .map(|c| pa.get(*c).map(|v| v.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn years_tag(years: &[i32]) -> String {
    years.iter().map(|y| y.to_string()).collect::<Vec<_>>().join("_")
}

#[cfg_attr(not(feature = "torch"), allow(dead_code))]
struct EvaluateArgs<'a> {
    db: &'a Path,
    years: &'a [i32],
    model: &'a Path,
    preprocessors: &'a Path,
    threshold: f32,
}

#[cfg(feature = "torch")]
fn evaluate(args: &EvaluateArgs, config: &PipelineConfig) -> Result<()> {
    use pull_the_pitcher::metrics::{print_all_metrics, targets_per_start};
    use pull_the_pitcher::model::{load_drsa, Predictor};
    use pull_the_pitcher::pipeline::{prep_data_for_inference, split_starts, Preprocessors};

    let prep = Preprocessors::load(args.preprocessors)
        .with_context(|| format!("failed to read preprocessors {}", args.preprocessors.display()))?;
    if prep.feature_cols() != config.feature_cols.as_slice() {
        tracing::warn!(
            "{} was fitted on different feature columns than the pipeline config",
            args.preprocessors.display()
        );
    }
    let starts = get_starts(load_appearances(args.db, args.years, config)?);
    let (_, val) = split_starts(&starts, &config.split);
    let inputs = prep_data_for_inference(&val, &prep);
    let predictor =
        load_drsa(args.model).with_context(|| format!("failed to load model {}", args.model.display()))?;
    let mut preds = Vec::with_capacity(inputs.len());
    let mut targets = Vec::with_capacity(inputs.len());
    for batch in inputs.batches(64, config.split.seed) {
        preds.extend(predictor.predict(&batch)?);
        targets.extend(targets_per_start(&batch));
    }
    let report = print_all_metrics(&preds, &targets, args.threshold);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(not(feature = "torch"))]
fn evaluate(args: &EvaluateArgs, _config: &PipelineConfig) -> Result<()> {
    anyhow::bail!(
        "cannot load {}: built without the `torch` feature",
        args.model.display()
    )
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(io::stderr)
        .init();

    let config = PipelineConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Acquire {
            start_dt,
            end_dt,
            team,
            output_type,
            overwrite,
            output_path,
        } => {
            std::fs::create_dir_all(&output_path)
                .with_context(|| format!("cannot create {}", output_path.display()))?;
            let request = AcquisitionRequest {
                start_dt,
                end_dt,
                team,
                verbose: cli.verbose,
                output_type,
                overwrite,
                output_path,
            };
            let client = SavantClient::new(cli.verbose)?;
            let path = query_statcast(&request, &client)?;
            info!("saved pitches to {}", path.display());
        }
        Commands::Query {
            db,
            year,
            columns,
            limit,
            output,
        } => {
            let columns = (!columns.is_empty()).then_some(columns);
            let table = query_db(&db, year, columns.as_deref(), limit)?;
            info!("{} rows from statcast_{}", table.len(), year);
            match output {
                Some(path) => table.write_csv(File::create(&path)?)?,
                None => {
                    let stdout = io::stdout();
                    let mut lock = stdout.lock();
                    table.write_csv(&mut lock)?;
                    lock.flush()?;
                }
            }
        }
        Commands::Process { db, years, output } => {
            let appearances = load_appearances(&db, &years, &config)?;
            let starts = get_games_pitchers_years(&appearances);
            write_appearances(&output, &appearances, &config)?;
            info!(
                "wrote {} appearances from {} starts to {}",
                appearances.len(),
                starts.len(),
                output.display()
            );
        }
        Commands::Prep { db, years, out_dir } => {
            let starts = get_starts(load_appearances(&db, &years, &config)?);
            let data = prep_data_for_modeling(&starts, &config);
            std::fs::create_dir_all(&out_dir)?;
            let path = out_dir.join(format!("preprocessors_{}.json", years_tag(&years)));
            data.preprocessors.save(&path)?;
            info!(
                "train {:?} / val {:?}; preprocessors saved to {}",
                data.train.features.shape(),
                data.val.features.shape(),
                path.display()
            );
        }
        Commands::Evaluate {
            db,
            years,
            model,
            preprocessors,
            threshold,
        } => {
            let args = EvaluateArgs {
                db: &db,
                years: &years,
                model: &model,
                preprocessors: &preprocessors,
                threshold,
            };
            evaluate(&args, &config)?
        }
    }
    Ok(())
}
