//! serialgauged - Serial thermometer collector daemon.
//!
//! Polls a serial port on a fixed interval, decodes temperature frames and
//! writes them as gauge metrics to stdout or a file.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use serialgauge_core::collector::{PollStats, SerialCollector, SystemSerial};
use serialgauge_core::config::{ConfigError, Parity, SerialConfig, StopBits};
use serialgauge_core::metrics::{MetricWriter, OutputFormat};

/// Serial thermometer collector daemon.
#[derive(Parser)]
#[command(
    name = "serialgauged",
    about = "Serial thermometer collector daemon",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_SHA"), ")")
)]
struct Args {
    /// TOML configuration file. Command line options override its values.
    #[arg(short, long, env = "SERIALGAUGE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Collection interval in seconds.
    #[arg(short, long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Serial device to open. Defaults to the first enumerated port.
    #[arg(long, env = "SERIALGAUGE_PORT")]
    port: Option<String>,

    /// Parity: N, O, E, M or S.
    #[arg(long, env = "SERIALGAUGE_PARITY")]
    parity: Option<Parity>,

    /// Baud rate.
    #[arg(long, env = "SERIALGAUGE_BAUDRATE")]
    baudrate: Option<u32>,

    /// Data bits (5-8).
    #[arg(long, env = "SERIALGAUGE_DATABITS")]
    databits: Option<u8>,

    /// Stop bits: 1, 1.5 or 2.
    #[arg(long, env = "SERIALGAUGE_STOPBITS")]
    stopbits: Option<StopBits>,

    /// RTS line level after connecting.
    #[arg(long, env = "SERIALGAUGE_RTS", action = clap::ArgAction::Set)]
    rts: Option<bool>,

    /// DTR line level after connecting.
    #[arg(long, env = "SERIALGAUGE_DTR", action = clap::ArgAction::Set)]
    dtr: Option<bool>,

    /// Metric output format.
    #[arg(long, value_enum, default_value_t = Format::Line)]
    format: Format,

    /// Append metrics to this file instead of stdout.
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// InfluxDB line protocol.
    Line,
    /// JSON lines.
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Line => OutputFormat::LineProtocol,
            Format::Json => OutputFormat::Json,
        }
    }
}

/// Builds the serial configuration from the optional file plus CLI overrides.
fn build_config(args: &Args) -> Result<SerialConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => SerialConfig::load(path)?,
        None => SerialConfig::default(),
    };

    if let Some(ref port) = args.port {
        config.port = Some(port.clone());
    }
    if let Some(parity) = args.parity {
        config.parity = parity;
    }
    if let Some(baudrate) = args.baudrate {
        config.baudrate = baudrate;
    }
    if let Some(databits) = args.databits {
        config.databits = databits;
    }
    if let Some(stopbits) = args.stopbits {
        config.stopbits = stopbits;
    }
    if let Some(rts) = args.rts {
        config.rts = rts;
    }
    if let Some(dtr) = args.dtr {
        config.dtr = dtr;
    }

    Ok(config)
}

/// Opens the metric output: a file in append mode, or stdout.
fn open_output(path: Option<&Path>) -> io::Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(Box::new(io::BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
/// Logs go to stderr so metrics on stdout stay parseable.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["serialgauged", "serialgauge_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Summarizes collector counters for periodic logging.
fn describe_stats(stats: &PollStats) -> String {
    let mut parts = vec![
        format!("{} polls", stats.polls),
        format!("{} samples", stats.samples),
        format!("{} connects", stats.connects),
    ];
    if stats.read_errors > 0 {
        parts.push(format!("{} read errors", stats.read_errors));
    }
    if stats.decode_errors > 0 {
        parts.push(format!("{} decode errors", stats.decode_errors));
    }
    if stats.discarded_bytes > 0 {
        parts.push(format!("{} bytes discarded", stats.discarded_bytes));
    }
    parts.join(", ")
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    info!(version = env!("CARGO_PKG_VERSION"), "serialgauged starting");

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    info!(
        interval_secs = args.interval,
        line = %config.describe(),
        port = config.port.as_deref().unwrap_or("<first available>"),
        rts = config.rts,
        dtr = config.dtr,
        "configuration loaded"
    );

    let mut collector = match SerialCollector::new(SystemSerial::new(), config) {
        Ok(collector) => collector,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    let output = match open_output(args.output.as_deref()) {
        Ok(output) => output,
        Err(e) => {
            error!(error = %e, "cannot open metric output");
            std::process::exit(2);
        }
    };
    let mut sink = MetricWriter::new(output, args.format.into());

    match collector.try_connect() {
        Ok(()) => info!(
            port = collector.port_name().unwrap_or_default(),
            "serial port ready"
        ),
        Err(e) => warn!(
            error = %e,
            retry_secs = args.interval,
            "initial connection failed"
        ),
    }

    let interval = Duration::from_secs(args.interval);

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to set Ctrl-C handler");
    }

    info!("Starting collection loop");

    let mut poll_count: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let outcome = collector.poll(&mut sink);
        poll_count += 1;
        debug!(poll = poll_count, ?outcome, state = %collector.state(), "poll complete");

        // Log counters every 60 polls
        if poll_count.is_multiple_of(60) {
            info!(
                stats = %describe_stats(collector.stats()),
                written = sink.written(),
                "collector stats"
            );
        }

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    // Graceful shutdown
    info!("Shutting down...");
    collector.shutdown();
    info!(
        stats = %describe_stats(collector.stats()),
        written = sink.written(),
        "shutdown complete"
    );
}
