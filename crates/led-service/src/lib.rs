//! LED controller service.
//!
//! Publishes `/beagle` under `org.alljoyn.sample.ledcontroller.beagle`,
//! accepts sessions on port 42 and maps `on`, `off`, `flash` and `status`
//! onto one LED class device in sysfs.

pub mod config;
pub mod error;
pub mod handlers;
pub mod led;
pub mod service;

pub use config::{ConfigOverrides, ServiceConfig};
pub use error::{LedError, Result, ServiceError, StartupStep};
pub use led::LedController;
pub use service::{LedService, run};
