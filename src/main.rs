use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scanner_bridge::watchdog::FlagChannel;
use scanner_bridge::{devices, Service, ServiceConfig};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scannerd")]
#[command(about = "Document scanner bridge service with a self-healing connection watchdog")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge service (the default)
    Run,

    /// Print the current status report written by a running service
    Status,

    /// Ask a running service to reinitialize its device
    Reconnect,

    /// List USB devices as the service sees them
    Devices,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ServiceConfig::load(cli.config.as_deref())?;
    let debug = cli.debug || config.debug;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let _log_guard = init_logging(&config, debug);
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "scannerd starting");
            let service = Service::start(config)?;
            service.run()?;
            Ok(())
        }

        Commands::Status => {
            match FlagChannel::read_status(&config.data_dir()) {
                Some(status) => println!("{status}"),
                None => println!(
                    "no status report at {} (is the service running?)",
                    config.data_dir().display()
                ),
            }
            Ok(())
        }

        Commands::Reconnect => {
            let flags = FlagChannel::new(config.data_dir());
            flags
                .request_manual_recovery()
                .context("failed to write the reconnect flag")?;
            println!(
                "reconnect requested via {}",
                flags.reconnect_flag_path().display()
            );
            Ok(())
        }

        Commands::Devices => {
            let list = devices::usb::connected_usb_devices()
                .context("USB enumeration failed")?;
            if list.is_empty() {
                println!("no USB devices found");
            } else {
                for device in &list {
                    let marker = if device.contains(&config.device.usb_id_fragment) {
                        "  <- scanner"
                    } else {
                        ""
                    };
                    println!("{device}{marker}");
                }
            }
            Ok(())
        }
    }
}

/// Console logging, plus a daily-rolling file when `log_dir` is set.
/// The returned guard must stay alive for the file writer to flush.
fn init_logging(
    config: &ServiceConfig,
    debug: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "scannerd.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(file_writer)
                        .with_ansi(false),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    }
}
