use anyhow::{Context, Result};
use blackvuesync::{
    ConfigOverrides, ErrorClass, Grouping, Priority, SyncConfig, SyncError, Synchronizer,
    CRON_TARGET,
};
use clap::{ArgAction, Parser};
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "blackvuesync")]
#[command(about = "Synchronizes BlackVue dashcam recordings with a local directory")]
#[command(version)]
#[command(long_about = "Downloads the recordings of a BlackVue dashcam reachable over Wi-Fi \
into a local directory. Meant to run unattended, e.g. from cron: files already downloaded are \
skipped, outdated recordings are removed and a lock keeps concurrent runs apart.")]
struct Args {
    /// Dashcam IP address or hostname
    #[arg(value_name = "ADDRESS")]
    address: Option<String>,

    /// Destination directory
    #[arg(short, long, value_name = "DEST")]
    destination: Option<String>,

    /// Group recordings into per-period subdirectories
    #[arg(short, long, value_enum)]
    grouping: Option<Grouping>,

    /// Keep recordings in this range, e.g. 30d or 4w; removes older downloads
    #[arg(short, long, value_name = "KEEP")]
    keep: Option<String>,

    /// Download order
    #[arg(short, long, value_enum)]
    priority: Option<Priority>,

    /// Only download these type+direction codes, e.g. PF PR
    #[arg(short, long, num_args = 1.., value_name = "FILTER")]
    filter: Option<Vec<String>>,

    /// Stop downloading once the destination disk is fuller than this percentage
    #[arg(short = 'u', long = "max-used-disk", value_name = "PERCENT",
          value_parser = clap::value_parser!(u8).range(5..=99))]
    max_used_disk: Option<u8>,

    /// Connection timeout in seconds
    #[arg(short, long, value_name = "SECONDS")]
    timeout: Option<f64>,

    /// Hours to wait before retrying a file that failed to download
    #[arg(long, value_name = "HOURS")]
    retry_failed_after: Option<u32>,

    /// Client affinity token sent with every request
    #[arg(long, value_name = "KEY")]
    session_key: Option<String>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Enable quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Cron mode: only log downloaded recordings and errors, exit 0 when the dashcam is away
    #[arg(long)]
    cron: bool,

    /// Report what would be done without downloading or deleting anything
    #[arg(long)]
    dry_run: bool,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print default configuration in TOML format and exit
    #[arg(long)]
    print_config: bool,

    /// Log output format: json, pretty, or compact
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            address: self.address.clone(),
            destination: self.destination.clone(),
            grouping: self.grouping,
            keep: self.keep.clone(),
            priority: self.priority,
            filter: self.filter.clone(),
            max_used_disk_percent: self.max_used_disk,
            timeout_seconds: self.timeout,
            retry_failed_after_hours: self.retry_failed_after,
            session_key: self.session_key.clone(),
            dry_run: self.dry_run,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.print_config {
        return match print_default_config() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{:#}", e);
                ExitCode::from(3)
            }
        };
    }

    if let Err(e) = init_logging(&args) {
        eprintln!("{:#}", e);
        return ExitCode::from(3);
    }

    let code = guarded(run(&args)).await;
    ExitCode::from(code as u8)
}

/// Turn a panic into the internal error exit code instead of the runtime's 101
async fn guarded<F: Future<Output = i32>>(run: F) -> i32 {
    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(code) => code,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Unexpected internal error: {}", message);
            3
        }
    }
}

async fn run(args: &Args) -> i32 {
    let overrides = args.overrides();
    let loaded = match &args.config {
        Some(path) => SyncConfig::load_from_file(path, true, &overrides),
        None => SyncConfig::load(&overrides),
    };

    let config = match loaded {
        Ok(config) => config,
        Err(e) => return report(&SyncError::from(e), args.cron),
    };

    if config.dry_run {
        info!("DRY RUN No action will be taken");
    }

    match Synchronizer::new(config).run().await {
        Ok(summary) => {
            info!("Sync complete: {}", summary);
            0
        }
        Err(e) => report(&e, args.cron),
    }
}

/// Log a run-ending error at the severity of its class and pick the exit code
fn report(error: &SyncError, cron: bool) -> i32 {
    match error.class() {
        ErrorClass::Warning => warn!("{}", error),
        ErrorClass::Fatal => error!("{}", error),
        ErrorClass::Internal => error!("Unexpected error: {:?}", error),
    }
    let code = error.exit_code(cron);
    debug!("Exiting with code {}", code);
    code
}

/// Filter directives derived from the verbosity flags, used when RUST_LOG is unset
fn log_directives(args: &Args) -> String {
    let (level, cron_level) = if args.quiet {
        ("error", "error")
    } else {
        match args.verbose {
            0 if args.cron => ("error", "info"),
            0 => ("warn", "warn"),
            1 => ("info", "info"),
            _ => ("debug", "debug"),
        }
    };
    format!("{},{}={}", level, CRON_TARGET, cron_level)
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let debug = args.verbose >= 2;

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directives(args)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(debug)
            .with_line_number(debug)
            .boxed(),
        Some("compact") | None => fmt::layer()
            .compact()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().compact().with_target(false).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    let text = toml::to_string_pretty(&SyncConfig::default())
        .context("Failed to serialize default configuration")?;

    println!("# BlackVue Sync Configuration File");
    println!("# This is the default configuration with all available options");
    println!("# Set dashcam.address, and optionally destination.keep and dashcam.session_key");
    println!();
    print!("{}", text);

    Ok(())
}
