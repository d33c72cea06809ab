//! LED client entry point.

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use led_client::{Cli, cli, invoke};
use led_common::interrupt;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Logs go to stderr only; stdout carries the result line.
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(cli::exit_status(&e));
        }
    };

    setup_logging();
    debug!("ledbus {}", ledbus::VERSION);

    if let Err(e) = interrupt::install_handler() {
        warn!("Cannot install interrupt handler: {e}");
    }

    let command = args.command.to_led_command();
    let status = match invoke(&args.invoke_options(), command, interrupt::flag()).await {
        Ok(state) => {
            let mut stdout = std::io::stdout().lock();
            let line = args.format.render(command.member_name(), state);
            if let Err(e) = stdout.write_all(line.as_bytes()).and_then(|()| stdout.flush()) {
                warn!("Cannot write result: {e}");
            }
            0
        }
        Err(e) => {
            error!("{} failed: {e}", command.member_name());
            e.status()
        }
    };
    info!("Exiting with status {status}");
    ExitCode::from(status)
}
