//! ledbus router entry point.
//!
//! Attachments connect here to own names, advertise them, bind session
//! ports and exchange method calls.

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// ledbusd - message bus router for ledbus attachments
#[derive(Parser, Debug)]
#[command(name = "ledbusd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Connect spec to listen on, e.g. `unix:abstract=alljoyn` or `unix:path=/run/ledbus.sock`
    #[arg(long, value_name = "SPEC", default_value = ledbus::DEFAULT_ADDRESS)]
    address: String,
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
        EnvFilter::new(format!("ledbus={default_level},ledbus_daemon={default_level}"))
    });

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("ledbusd-{timestamp}.log");
        let log_path = temp_dir.join(&log_filename);

        #[cfg(unix)]
        {
            let symlink_path = temp_dir.join("ledbusd.log");
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
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging();

    info!("Starting ledbus router {}", ledbus::VERSION);

    ledbus_daemon::run(&args.address).await?;

    info!("Router stopped");
    Ok(())
}
