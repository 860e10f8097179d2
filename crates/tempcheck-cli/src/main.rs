mod chart;

use anyhow::{anyhow, bail, Context, Result};
use chart::{ChartFile, ChartKind};
use chrono::{Duration, Local, NaiveDateTime};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::path::{Path, PathBuf};
use tempcheck_lib::{
    conditioning::FusionKind,
    config::{read_config, PipelineConfig},
    io::{
        ingest::{last_stored, record, IngestGate, ZigbeeMessage},
        sqlite::{is_database_file, SqliteStore},
        store::{parse_timestamp, CsvStore, ReadingStore, Row, Source},
    },
    pipeline::run_dashboard,
    plot::{figure_from_dashboard, figure_from_sensors, PlotBackend},
    render::DashboardPayload,
    synthetic::{populate, SyntheticConfig},
};

#[derive(Parser)]
#[command(
    name = "tempcheck",
    version,
    about = "tempcheck: temperature sensor dashboard tools"
)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SourceArg {
    Probe,
    Zigbee,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Probe => Source::Probe,
            SourceArg::Zigbee => Source::Zigbee,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FusionArg {
    Mean,
    Calibrated,
}

impl From<FusionArg> for FusionKind {
    fn from(arg: FusionArg) -> Self {
        match arg {
            FusionArg::Mean => FusionKind::Mean,
            FusionArg::Calibrated => FusionKind::Calibrated,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum BackendArg {
    /// `home` tables in temper.db and zigbee.db, or one shared .db file
    #[default]
    Sqlite,
    /// temper.csv and zigbee.csv
    Csv,
}

#[derive(clap::Args)]
struct StoreArgs {
    /// Store directory, or a single SQLite file holding every column
    #[arg(long)]
    store: PathBuf,
    #[arg(long, value_enum, default_value_t)]
    backend: BackendArg,
}

impl StoreArgs {
    fn open(&self) -> Box<dyn ReadingStore> {
        match self.backend {
            BackendArg::Sqlite if is_database_file(&self.store) => Box::new(SqliteStore::shared(&self.store)),
            BackendArg::Sqlite => Box::new(SqliteStore::new(&self.store)),
            BackendArg::Csv => Box::new(CsvStore::new(&self.store)),
        }
    }

    fn path_of(&self, source: Source) -> PathBuf {
        match self.backend {
            BackendArg::Sqlite if is_database_file(&self.store) => self.store.clone(),
            BackendArg::Sqlite => SqliteStore::new(&self.store).db_path(source),
            BackendArg::Csv => CsvStore::new(&self.store).table_path(source),
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PlotFormat {
    Png,
    Svg,
    /// The figure model as JSON, without drawing
    Json,
}

#[derive(clap::Args)]
struct PipelineArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// TOML pipeline configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// End of the display window (defaults to the local wall clock)
    #[arg(long)]
    now: Option<String>,
    #[arg(long)]
    fusion: Option<FusionArg>,
    /// Forecast steps
    #[arg(long)]
    horizon: Option<usize>,
    #[arg(long)]
    no_forecast: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline and print the dashboard payload as JSON
    Dashboard {
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[arg(long)]
        pretty: bool,
    },
    /// Draw the dashboard chart
    Plot {
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "png")]
        format: PlotFormat,
        /// Chart each sensor instead of the fused dashboard
        #[arg(long)]
        sensors: bool,
    },
    /// Append one reading to the store, subject to the ingest rate limit
    Record {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        source: SourceArg,
        /// Column value as NAME=VALUE; repeat per column
        #[arg(long = "value")]
        values: Vec<String>,
        /// Zigbee JSON message (temperature, humidity)
        #[arg(long)]
        message: Option<String>,
        /// Reading time (defaults to the local wall clock)
        #[arg(long)]
        time: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write a synthetic store
    Simulate {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t)]
        backend: BackendArg,
        #[arg(long, default_value_t = 48.0)]
        hours: f64,
        #[arg(long, default_value_t = 7)]
        seed: u64,
        /// Hours after the start at which temp_out sticks
        #[arg(long)]
        glitch_hour: Option<f64>,
        /// First reading time (defaults to `hours` before the local wall clock)
        #[arg(long)]
        start: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();
    match cli.command {
        Commands::Dashboard { pipeline, pretty } => cmd_dashboard(&pipeline, pretty)?,
        Commands::Plot {
            pipeline,
            out,
            format,
            sensors,
        } => cmd_plot(&pipeline, &out, format, sensors)?,
        Commands::Record {
            store,
            source,
            values,
            message,
            time,
            config,
        } => cmd_record(
            &store,
            source.into(),
            &values,
            message.as_deref(),
            time.as_deref(),
            config.as_deref(),
        )?,
        Commands::Simulate {
            out,
            backend,
            hours,
            seed,
            glitch_hour,
            start,
        } => cmd_simulate(
            &StoreArgs { store: out, backend },
            hours,
            seed,
            glitch_hour,
            start.as_deref(),
        )?,
    }
    Ok(())
}

fn parse_time_arg(text: Option<&str>) -> Result<NaiveDateTime> {
    match text {
        Some(t) => parse_timestamp(t).ok_or_else(|| anyhow!("unrecognised timestamp {:?}", t)),
        None => Ok(Local::now().naive_local()),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => read_config(p),
        None => Ok(PipelineConfig::default()),
    }
}

impl PipelineArgs {
    fn resolve(&self) -> Result<(Box<dyn ReadingStore>, PipelineConfig, NaiveDateTime)> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(fusion) = self.fusion {
            config.fusion.strategy = fusion.into();
        }
        if let Some(horizon) = self.horizon {
            config.forecast.horizon = horizon;
        }
        if self.no_forecast {
            config.forecast.enabled = false;
        }
        config.validate()?;
        let now = parse_time_arg(self.now.as_deref())?;
        Ok((self.store.open(), config, now))
    }
}

fn cmd_dashboard(args: &PipelineArgs, pretty: bool) -> Result<()> {
    let (store, config, now) = args.resolve()?;
    let dash = run_dashboard(store.as_ref(), &config, now)?;
    let payload = DashboardPayload::from(&dash);
    let js = if pretty {
        serde_json::to_string_pretty(&payload)?
    } else {
        serde_json::to_string(&payload)?
    };
    println!("{}", js);
    Ok(())
}

fn cmd_plot(args: &PipelineArgs, out: &Path, format: PlotFormat, sensors: bool) -> Result<()> {
    let (store, config, now) = args.resolve()?;
    let dash = run_dashboard(store.as_ref(), &config, now)?;
    let fig = if sensors {
        figure_from_sensors(&dash, &config.display)
    } else {
        figure_from_dashboard(&dash, &config.display)
    };
    match format {
        PlotFormat::Png => ChartFile::new(out, ChartKind::Png).draw(&fig)?,
        PlotFormat::Svg => ChartFile::new(out, ChartKind::Svg).draw(&fig)?,
        PlotFormat::Json => std::fs::write(out, serde_json::to_string(&fig)?)
            .with_context(|| format!("writing {}", out.display()))?,
    }
    info!("wrote chart to {}", out.display());
    Ok(())
}

/// Values for every column of `source`, in column order, from NAME=VALUE pairs.
fn row_values(source: Source, pairs: &[String]) -> Result<Vec<Option<f64>>> {
    let columns = source.columns();
    let mut values = vec![None; columns.len()];
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected NAME=VALUE, got {:?}", pair))?;
        let idx = columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| anyhow!("{} has no column {:?}", source.table_name(), name))?;
        let parsed: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("value for {}", name))?;
        values[idx] = Some(parsed);
    }
    if values.iter().all(Option::is_none) {
        bail!("no readings given for {}", source.table_name());
    }
    Ok(values)
}

fn cmd_record(
    store_args: &StoreArgs,
    source: Source,
    pairs: &[String],
    message: Option<&str>,
    time: Option<&str>,
    config: Option<&Path>,
) -> Result<()> {
    let config = load_config(config)?;
    let time = parse_time_arg(time)?;
    let row = match (source, message) {
        (Source::Zigbee, Some(msg)) => ZigbeeMessage::parse(msg)?.into_row(time),
        (Source::Probe, Some(_)) => bail!("--message only applies to the zigbee source"),
        (_, None) => Row::new(time, row_values(source, pairs)?),
    };

    let mut store = store_args.open();
    let min_interval = Duration::seconds(config.ingest.min_interval_secs);
    let mut gate = IngestGate::resume_from(min_interval, last_stored(store.as_ref(), source)?);
    let stored = record(store.as_mut(), &mut gate, source, &row)?;
    println!(
        "{}",
        serde_json::json!({
            "source": source,
            "stored": stored,
            "path": store_args.path_of(source),
        })
    );
    Ok(())
}

fn cmd_simulate(
    out: &StoreArgs,
    hours: f64,
    seed: u64,
    glitch_hour: Option<f64>,
    start: Option<&str>,
) -> Result<()> {
    let start = match start {
        Some(_) => parse_time_arg(start)?,
        None => Local::now().naive_local() - Duration::seconds((hours * 3600.0) as i64),
    };
    let cfg = SyntheticConfig {
        seed,
        start,
        hours,
        glitch_hour,
        ..SyntheticConfig::default()
    };
    let mut store = out.open();
    let (probe, zigbee) = populate(store.as_mut(), &cfg)?;
    println!(
        "{}",
        serde_json::json!({
            "probe_rows": probe,
            "zigbee_rows": zigbee,
            "start": cfg.start,
            "end": cfg.end(),
        })
    );
    Ok(())
}
