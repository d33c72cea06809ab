//! One-shot client for the LED service.
//!
//! Parses one command, finds `org.alljoyn.sample.ledcontroller.beagle` on
//! the bus, joins its session, calls the matching method and renders the
//! reply as a single line.

pub mod cli;
pub mod invoke;
pub mod output;

pub use cli::{Cli, Command, Format};
pub use invoke::{InvokeOptions, invoke};
