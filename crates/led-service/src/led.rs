//! Sysfs-backed LED controller.
//!
//! Drives one LED class device through its `trigger`, `brightness`,
//! `delay_on` and `delay_off` files. Blinking is delegated to the kernel
//! `timer` trigger. Operations are not serialized against each other; a
//! `status` racing a `flash` may observe any prefix of the flash's writes.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use led_common::LedState;
use tracing::{debug, warn};

use crate::error::LedError;

/// Reads consider at most this many bytes of a file.
pub const READ_LIMIT: u64 = 1023;

const TRIGGER_NONE: &str = "none";
const TRIGGER_TIMER: &str = "timer";

#[derive(Debug, Clone)]
pub struct LedController {
    trigger: PathBuf,
    brightness: PathBuf,
    delay_on: PathBuf,
    delay_off: PathBuf,
}

impl LedController {
    /// Controller for `<leds_root>/<device>`.
    #[must_use]
    pub fn new(leds_root: &Path, device: &str) -> Self {
        let dir = leds_root.join(device);
        Self {
            trigger: dir.join("trigger"),
            brightness: dir.join("brightness"),
            delay_on: dir.join("delay_on"),
            delay_off: dir.join("delay_off"),
        }
    }

    /// Turn the LED on, solid when `frequency` is `0`, otherwise blinking
    /// with `frequency` ms half-periods. `brightness` is not applied; the
    /// hardware is on/off only.
    pub fn enable(&self, brightness: f64, frequency: u32) {
        debug!(brightness, frequency, "Enabling LED");
        if frequency == 0 {
            write_logged(&self.trigger, TRIGGER_NONE);
            write_logged(&self.brightness, "1");
        } else {
            let delay = frequency.to_string();
            write_logged(&self.trigger, TRIGGER_TIMER);
            write_logged(&self.brightness, "1");
            write_logged(&self.delay_on, &delay);
            write_logged(&self.delay_off, &delay);
        }
    }

    pub fn disable(&self) {
        debug!("Disabling LED");
        write_logged(&self.trigger, TRIGGER_NONE);
        write_logged(&self.brightness, "0");
    }

    #[must_use]
    pub fn is_on(&self) -> bool {
        read_logged(&self.brightness).is_some_and(|s| s.starts_with('1'))
    }

    #[must_use]
    pub fn is_blinking(&self) -> bool {
        read_logged(&self.trigger).is_some_and(|s| active_trigger(&s) == Some(TRIGGER_TIMER))
    }

    /// Current blink half-period in ms, `0` if unreadable.
    #[must_use]
    pub fn blink_frequency(&self) -> u32 {
        read_logged(&self.delay_on).map_or(0, |s| parse_frequency(&s))
    }

    /// State as re-read from the kernel.
    #[must_use]
    pub fn status(&self) -> LedState {
        if self.is_blinking() {
            LedState::new(1.0, self.blink_frequency())
        } else if self.is_on() {
            LedState::new(1.0, 0)
        } else {
            LedState::OFF
        }
    }
}

/// The bracketed entry of a trigger listing such as `none [timer] heartbeat`.
#[must_use]
pub fn active_trigger(listing: &str) -> Option<&str> {
    let start = listing.find('[')? + 1;
    let len = listing[start..].find(']')?;
    Some(&listing[start..start + len])
}

/// Parse a `delay_on` value, ignoring surrounding whitespace. Anything that
/// is not a non-negative decimal `u32` reads as `0`.
#[must_use]
pub fn parse_frequency(text: &str) -> u32 {
    text.trim().parse().unwrap_or(0)
}

fn read_file(path: &Path) -> Result<String, LedError> {
    let file = File::open(path).map_err(|source| LedError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut buf = Vec::new();
    file.take(READ_LIMIT)
        .read_to_end(&mut buf)
        .map_err(|source| LedError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_file(path: &Path, value: &str) -> Result<(), LedError> {
    let mut file = File::create(path).map_err(|source| LedError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    file.write_all(value.as_bytes())
        .map_err(|source| LedError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn read_logged(path: &Path) -> Option<String> {
    read_file(path).inspect_err(|e| warn!("{e}")).ok()
}

fn write_logged(path: &Path, value: &str) {
    if let Err(e) = write_file(path, value) {
        warn!("{e}");
    }
}

/// A temporary LED class device whose `trigger` file can be made to read
/// back the way the kernel lists it.
#[cfg(test)]
pub(crate) mod fake_kernel {
    use std::path::Path;

    use tempfile::TempDir;

    use super::{LedController, active_trigger};

    pub const DEVICE: &str = "test:green:usr1";
    const TRIGGERS: [&str; 3] = ["none", "timer", "heartbeat"];

    /// Fresh device with the LED off and no trigger.
    pub fn boot() -> (TempDir, LedController) {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join(DEVICE);
        std::fs::create_dir_all(&device).unwrap();
        std::fs::write(device.join("trigger"), "[none] timer heartbeat\n").unwrap();
        std::fs::write(device.join("brightness"), "0\n").unwrap();
        let led = LedController::new(dir.path(), DEVICE);
        (dir, led)
    }

    /// Replace a bare trigger name written by the controller with the
    /// listing the kernel would return, e.g. `timer` becomes
    /// `none [timer] heartbeat`. Listings and unknown names are left alone.
    pub fn settle(dir: &Path) {
        let path = dir.join(DEVICE).join("trigger");
        let Ok(written) = std::fs::read_to_string(&path) else {
            return;
        };
        let written = written.trim();
        if active_trigger(written).is_some() || !TRIGGERS.contains(&written) {
            return;
        }
        let listing = TRIGGERS
            .iter()
            .map(|t| if *t == written { format!("[{t}]") } else { (*t).to_string() })
            .collect::<Vec<_>>()
            .join(" ");
        std::fs::write(path, listing + "\n").unwrap();
    }
}
