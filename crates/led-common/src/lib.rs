//! Shared pieces of the LED controller service and client.
//!
//! Both sides build the same interface description, agree on the service's
//! well-known name, object path and session port, and exchange LED state as
//! a `(double brightness, uint32 frequency)` pair.

use ledbus::{
    InterfaceDescription, MsgArg, Proximity, SessionOpts, TrafficType, TransportMask,
};

pub mod interrupt;

/// Interface implemented by the LED object.
pub const INTERFACE_NAME: &str = "org.alljoyn.sample.ledcontroller";
/// Well-known name owned by the service.
pub const SERVICE_NAME: &str = "org.alljoyn.sample.ledcontroller.beagle";
pub const OBJECT_PATH: &str = "/beagle";
pub const SERVICE_PORT: ledbus::SessionPort = 42;

pub const SERVICE_APP_NAME: &str = "ledApp";
pub const CLIENT_APP_NAME: &str = "myApp";

/// LED class device driven when none is configured.
pub const DEFAULT_DEVICE: &str = "beaglebone:green:usr1";
pub const DEFAULT_LEDS_ROOT: &str = "/sys/class/leds";

/// Build and activate the LED controller interface.
///
/// # Errors
///
/// Returns an error only if the member table itself is malformed.
pub fn led_interface() -> ledbus::Result<InterfaceDescription> {
    let mut builder = InterfaceDescription::builder(INTERFACE_NAME)?;
    builder
        .add_method(
            "flash",
            "du",
            "du",
            "brightnessIn,frequencyIn,brightnessOut,frequencyOut",
        )?
        .add_method("on", "d", "du", "brightnessIn,brightnessOut,frequencyOut")?
        .add_method("off", "", "du", "brightnessOut,frequencyOut")?
        .add_method("status", "", "du", "brightnessOut,frequencyOut")?;
    Ok(builder.activate())
}

/// Options the service binds its port with and the client joins with.
#[must_use]
pub fn session_opts() -> SessionOpts {
    SessionOpts::new(
        TrafficType::Messages,
        false,
        Proximity::ANY,
        TransportMask::ANY,
    )
}

/// Observable LED state: brightness in `[0, 1]` and blink half-period in
/// milliseconds (`0` when not blinking).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LedState {
    pub brightness: f64,
    pub frequency: u32,
}

impl LedState {
    pub const OFF: LedState = LedState {
        brightness: 0.0,
        frequency: 0,
    };

    #[must_use]
    pub fn new(brightness: f64, frequency: u32) -> Self {
        Self {
            brightness,
            frequency,
        }
    }

    /// Reply arguments, signature `du`.
    #[must_use]
    pub fn to_args(self) -> [MsgArg; 2] {
        [
            MsgArg::Double(self.brightness),
            MsgArg::Uint32(self.frequency),
        ]
    }

    /// # Errors
    ///
    /// Returns [`ledbus::BusError::MissingArg`] or
    /// [`ledbus::BusError::SignatureMismatch`] if `args` is not a `du` pair.
    pub fn from_args(args: &[MsgArg]) -> ledbus::Result<Self> {
        Ok(Self {
            brightness: MsgArg::get(args, 0)?,
            frequency: MsgArg::get(args, 1)?,
        })
    }
}

/// One invocation of the LED interface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LedCommand {
    Off,
    Status,
    On { brightness: f64 },
    Flash { brightness: f64, frequency: u32 },
}

impl LedCommand {
    /// Interface member this command invokes.
    #[must_use]
    pub fn member_name(&self) -> &'static str {
        match self {
            LedCommand::Off => "off",
            LedCommand::Status => "status",
            LedCommand::On { .. } => "on",
            LedCommand::Flash { .. } => "flash",
        }
    }

    #[must_use]
    pub fn args(&self) -> Vec<MsgArg> {
        match *self {
            LedCommand::Off | LedCommand::Status => Vec::new(),
            LedCommand::On { brightness } => vec![MsgArg::Double(brightness)],
            LedCommand::Flash {
                brightness,
                frequency,
            } => vec![MsgArg::Double(brightness), MsgArg::Uint32(frequency)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledbus::BusError;

    #[test]
    fn test_interface_members() {
        let iface = led_interface().unwrap();
        assert_eq!(iface.name(), INTERFACE_NAME);
        assert_eq!(iface.members().count(), 4);

        let flash = iface.member("flash").unwrap();
        assert_eq!(flash.input.as_str(), "du");
        assert_eq!(flash.output.as_str(), "du");
        assert_eq!(
            flash.arg_names,
            vec!["brightnessIn", "frequencyIn", "brightnessOut", "frequencyOut"]
        );

        let on = iface.member("on").unwrap();
        assert_eq!(on.input.as_str(), "d");

        for name in ["off", "status"] {
            let member = iface.member(name).unwrap();
            assert!(member.input.is_empty());
            assert_eq!(member.output.as_str(), "du");
        }
    }

    #[test]
    fn test_interfaces_compare_equal() {
        assert_eq!(led_interface().unwrap(), led_interface().unwrap());
    }

    #[test]
    fn test_session_opts() {
        let opts = session_opts();
        assert_eq!(opts.traffic, TrafficType::Messages);
        assert!(!opts.is_multipoint);
        assert_eq!(opts.proximity, Proximity::ANY);
        assert_eq!(opts.transports, TransportMask::ANY);
    }

    #[test]
    fn test_led_state_args() {
        let state = LedState::new(0.5, 250);
        let args = state.to_args();
        assert_eq!(args[0], MsgArg::Double(0.5));
        assert_eq!(args[1], MsgArg::Uint32(250));
        assert_eq!(LedState::from_args(&args).unwrap(), state);
    }

    #[test]
    fn test_led_state_from_bad_args() {
        assert!(matches!(
            LedState::from_args(&[MsgArg::Double(1.0)]),
            Err(BusError::MissingArg(1))
        ));
        assert!(matches!(
            LedState::from_args(&[MsgArg::Uint32(1), MsgArg::Uint32(1)]),
            Err(BusError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn test_commands_match_interface() {
        let iface = led_interface().unwrap();
        let commands = [
            LedCommand::Off,
            LedCommand::Status,
            LedCommand::On { brightness: 1.0 },
            LedCommand::Flash {
                brightness: 1.0,
                frequency: 500,
            },
        ];
        for command in commands {
            let member = iface.member(command.member_name()).unwrap();
            assert!(member.input.matches(&command.args()), "{command:?}");
        }
    }
}
