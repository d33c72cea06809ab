//! LED service entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use led_common::interrupt;
use led_service::{ConfigOverrides, ServiceConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// led-service - expose a sysfs LED on the bus
#[derive(Parser, Debug)]
#[command(name = "led-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// LED class device to drive
    #[arg(long, value_name = "NAME")]
    device: Option<String>,

    /// Directory holding LED class devices
    #[arg(long, value_name = "DIR")]
    leds_root: Option<PathBuf>,

    /// Router connect spec
    #[arg(long, value_name = "SPEC")]
    address: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Set up logging with file output for debugging.
/// In debug builds, defaults to debug level and logs to timestamped file.
/// In release builds, defaults to info level and logs to stderr.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ledbus={default_level},led_service={default_level},led_common={default_level}"
        ))
    });

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("led-service-{timestamp}.log");
        let log_path = temp_dir.join(&log_filename);

        #[cfg(unix)]
        {
            let symlink_path = temp_dir.join("led-service.log");
            let _ = std::fs::remove_file(&symlink_path);
            let _ = std::os::unix::fs::symlink(&log_path, &symlink_path);
        }

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        std::mem::forget(guard);

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_line_number(true),
            )
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();

        eprintln!("Logging to: {} (and stderr)", log_path.display());
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging();

    info!("Starting LED service, ledbus {}", ledbus::VERSION);

    let overrides = ConfigOverrides {
        device: args.device,
        leds_root: args.leds_root,
        address: args.address,
    };
    let config = match ServiceConfig::resolve(args.config.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(e.status());
        }
    };
    info!(
        device = %config.device,
        leds_root = %config.leds_root.display(),
        "Driving LED"
    );

    if let Err(e) = interrupt::install_handler() {
        warn!("Cannot install interrupt handler: {e}");
    }

    let status = match led_service::run(&config, interrupt::flag()).await {
        Ok(()) => 0,
        Err(e) => e.status(),
    };
    info!("Exiting with status {status}");
    ExitCode::from(status)
}
