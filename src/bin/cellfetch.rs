//! Command-line entry point: resolve a cell identifier file into locations.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use cellfetch::{
    CellfetchConfig, CellfetchError, Pipeline, ResponseFormat, Scheduling, check_line,
};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Resumable cell tower geolocation fetcher.
#[derive(Debug, Parser)]
#[command(name = "cellfetch", version, about, long_about = None)]
struct Cli {
    /// Source file with one `mcc,mnc,lac,cid` row per line
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Output dataset (appended to; default results/cell_towers_YYYYMMDD.csv)
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Start from this 0-based source line, overwriting the cursor
    #[arg(long)]
    line: Option<u64>,

    /// Seconds to back off after a throttled lookup is requeued
    #[arg(short = 's', long = "sleep-time")]
    sleep_time: Option<u64>,

    /// Prepend the packed identifier key column
    #[arg(long)]
    key: bool,

    /// Print the byte position of a source line and exit
    #[arg(short = 'c', long = "check-line", value_name = "LINE")]
    check_line: Option<u64>,

    /// Run a pool of this many concurrent fetchers instead of one (0 = one per CPU)
    #[arg(long)]
    workers: Option<usize>,

    /// Primary lookup URL template
    #[arg(long)]
    url: Option<String>,

    /// Fallback URL template tried once after a throttled lookup
    #[arg(long = "fallback-url")]
    fallback_url: Option<String>,

    /// Response body shape
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Cursor file
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Delimited,
}

impl From<FormatArg> for ResponseFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => Self::Json,
            FormatArg::Delimited => Self::Delimited,
        }
    }
}

impl Cli {
    fn resolve_config(&self) -> cellfetch::Result<CellfetchConfig> {
        let mut config = match &self.config {
            Some(path) => CellfetchConfig::from_file(path)?,
            None => CellfetchConfig::default(),
        };
        if let Some(file) = &self.file {
            config.source = Some(file.clone());
        }
        if let Some(out) = &self.out {
            config.output = out.clone();
        }
        if let Some(checkpoint) = &self.checkpoint {
            config.checkpoint = checkpoint.clone();
        }
        if let Some(secs) = self.sleep_time {
            config.pipeline.sleep_ms = secs.saturating_mul(1000);
        }
        if self.key {
            config.pipeline.generate_key = true;
        }
        match self.workers {
            Some(0) => config.pipeline.scheduling = Scheduling::pool_default(),
            Some(workers) => config.pipeline.scheduling = Scheduling::Pool { workers },
            None => {}
        }
        if let Some(url) = &self.url {
            config.fetch.primary_url = url.clone();
        }
        if let Some(url) = &self.fallback_url {
            config.fetch.fallback_url = Some(url.clone());
        }
        if let Some(format) = self.format {
            config.fetch.format = format.into();
        }
        Ok(config)
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs_err::create_dir_all(parent)?;
            }
            let file = fs_err::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?
                .into_parts()
                .0;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
    Ok(())
}

/// First Ctrl-C stops admission and lets in-flight lookups finish; a second
/// one exits immediately.
fn install_interrupt_handler(pipeline: &Pipeline) {
    let signal = pipeline.shutdown_signal();
    let installed = ctrlc::set_handler(move || {
        if signal.is_raised() {
            eprintln!("cellfetch: interrupted again, exiting");
            std::process::exit(130);
        }
        signal.raise();
    });
    if let Err(err) = installed {
        tracing::warn!(%err, "cannot install Ctrl-C handler; interrupting will not save progress cleanly");
    }
}

fn run(cli: &Cli) -> cellfetch::Result<()> {
    let config = cli.resolve_config()?;

    if let Some(line) = cli.check_line {
        let position = check_line(config.source_path()?, line)?;
        println!("line {line} ---> position {position}");
        return Ok(());
    }

    let pipeline = Pipeline::with_http(config)?;
    if let Some(line) = cli.line {
        pipeline.reset_to_line(line)?;
    }
    install_interrupt_handler(&pipeline);
    let summary = pipeline.run()?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli.log_level, cli.log_file.as_deref()) {
        eprintln!("cellfetch: cannot open log file: {err}");
        return ExitCode::from(2);
    }
    tracing::debug!(version = cellfetch::CELLFETCH_VERSION, "starting");

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ (CellfetchError::InvalidConfig { .. } | CellfetchError::ConfigParse(_))) => {
            tracing::error!(%err, "configuration rejected");
            ExitCode::from(2)
        }
        Err(err) => {
            tracing::error!(%err, "run failed");
            ExitCode::FAILURE
        }
    }
}
