//! Command-line grammar.

use std::time::Duration;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand, ValueEnum};
use led_common::{LedCommand, LedState};

use crate::invoke::InvokeOptions;
use crate::output;

/// Exit status for any command-line violation.
pub const USAGE_STATUS: u8 = 1;

/// led-client - switch the bus LED service's LED
#[derive(Parser, Debug)]
#[command(name = "led-client")]
#[command(version, about, long_about = None)]
#[command(after_help = "\
Examples:
  led-client off               Switch the LED off
  led-client on 1.0            Switch the LED on
  led-client flash 1.0 500     Blink with 500 ms on, 500 ms off
  led-client status            Report the LED state
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Router connect spec
    #[arg(long, global = true, value_name = "SPEC", default_value = ledbus::DEFAULT_ADDRESS)]
    pub address: String,

    /// Method call timeout in milliseconds
    #[arg(long, global = true, value_name = "MS", default_value_t = 5000)]
    pub timeout: u64,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Json)]
    pub format: Format,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Switch the LED off
    Off,

    /// Report the LED state as read back from the kernel
    Status,

    /// Switch the LED on, solid
    On {
        /// Brightness in [0, 1]
        #[arg(value_parser = parse_brightness, allow_negative_numbers = true)]
        brightness: f64,
    },

    /// Blink the LED
    Flash {
        /// Brightness in [0, 1]
        #[arg(value_parser = parse_brightness, allow_negative_numbers = true)]
        brightness: f64,

        /// Half-period in milliseconds, 0 for solid
        frequency: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// `{ "cmd": ..., "brightness": ..., "frequency": ... }`, no newline
    #[default]
    Json,
    /// `cmd - <name>, brightness: <b>, frequency: <f>`
    Text,
}

impl Format {
    #[must_use]
    pub fn render(self, name: &str, state: LedState) -> String {
        match self {
            Format::Json => output::format_json(name, state),
            Format::Text => output::format_text(name, state),
        }
    }
}

impl Command {
    #[must_use]
    pub fn to_led_command(self) -> LedCommand {
        match self {
            Command::Off => LedCommand::Off,
            Command::Status => LedCommand::Status,
            Command::On { brightness } => LedCommand::On { brightness },
            Command::Flash {
                brightness,
                frequency,
            } => LedCommand::Flash {
                brightness,
                frequency,
            },
        }
    }
}

impl Cli {
    #[must_use]
    pub fn invoke_options(&self) -> InvokeOptions {
        InvokeOptions {
            address: self.address.clone(),
            timeout: Duration::from_millis(self.timeout),
        }
    }
}

fn parse_brightness(value: &str) -> Result<f64, String> {
    let brightness: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number"))?;
    if brightness.is_finite() {
        Ok(brightness)
    } else {
        Err(format!("`{value}` is not a finite number"))
    }
}

/// Exit status for a parse failure: `0` for help and version output, the
/// usage status for everything else.
#[must_use]
pub fn exit_status(error: &clap::Error) -> u8 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => USAGE_STATUS,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)] // Exact float comparisons are intentional in tests

    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("led-client").chain(args.iter().copied()))
    }

    fn usage_status(args: &[&str]) -> u8 {
        exit_status(&parse(args).unwrap_err())
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse(&["off"]).unwrap().command, Command::Off);
        assert_eq!(parse(&["status"]).unwrap().command, Command::Status);
        assert_eq!(
            parse(&["on", "0.5"]).unwrap().command,
            Command::On { brightness: 0.5 }
        );
        assert_eq!(
            parse(&["flash", "1.0", "500"]).unwrap().command,
            Command::Flash {
                brightness: 1.0,
                frequency: 500
            }
        );
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["status"]).unwrap();
        assert_eq!(cli.address, "unix:abstract=alljoyn");
        assert_eq!(cli.format, Format::Json);
        assert_eq!(cli.invoke_options().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_global_options_after_command() {
        let cli = parse(&["on", "1", "--format", "text", "--timeout", "250"]).unwrap();
        assert_eq!(cli.format, Format::Text);
        assert_eq!(cli.timeout, 250);
    }

    #[test]
    fn test_negative_brightness_is_a_value() {
        assert_eq!(
            parse(&["on", "-0.5"]).unwrap().command,
            Command::On { brightness: -0.5 }
        );
    }

    #[test]
    fn test_usage_errors_exit_one() {
        assert_eq!(usage_status(&["foo"]), USAGE_STATUS);
        assert_eq!(usage_status(&[]), USAGE_STATUS);
        assert_eq!(usage_status(&["on"]), USAGE_STATUS);
        assert_eq!(usage_status(&["on", "1", "2"]), USAGE_STATUS);
        assert_eq!(usage_status(&["off", "1"]), USAGE_STATUS);
        assert_eq!(usage_status(&["flash", "1.0"]), USAGE_STATUS);
        assert_eq!(usage_status(&["flash", "1.0", "-1"]), USAGE_STATUS);
        assert_eq!(usage_status(&["flash", "1.0", "4294967296"]), USAGE_STATUS);
        assert_eq!(usage_status(&["on", "bright"]), USAGE_STATUS);
        assert_eq!(usage_status(&["on", "inf"]), USAGE_STATUS);
        assert_eq!(usage_status(&["on", "NaN"]), USAGE_STATUS);
        assert_eq!(usage_status(&["status", "--format", "xml"]), USAGE_STATUS);
    }

    #[test]
    fn test_help_and_version_exit_zero() {
        assert_eq!(usage_status(&["--help"]), 0);
        assert_eq!(usage_status(&["--version"]), 0);
    }

    #[test]
    fn test_command_maps_to_member() {
        let command = parse(&["flash", "0.25", "100"])
            .unwrap()
            .command
            .to_led_command();
        assert_eq!(command.member_name(), "flash");
        assert_eq!(
            command,
            LedCommand::Flash {
                brightness: 0.25,
                frequency: 100
            }
        );
    }
}
