//! Method handlers for the LED interface.
//!
//! Each call decodes its inputs, drives the controller and replies with the
//! state as requested. `status` replies with the state as re-read from the
//! kernel. Handlers hold no state between calls.

use std::sync::Arc;

use led_common::LedState;
use ledbus::{BusObject, FromMsgArg, InterfaceDescription, MethodCall, MsgArg};
use tracing::{debug, warn};

use crate::led::LedController;

/// Install the four member handlers on `object`, which must already carry
/// `iface`.
///
/// # Errors
///
/// Returns an error if `iface` lacks one of the members or is not attached
/// to `object`.
pub fn install(
    object: &mut BusObject,
    iface: &InterfaceDescription,
    led: &Arc<LedController>,
) -> ledbus::Result<()> {
    let controller = led.clone();
    object.add_method_handler(iface.require_member("on")?, move |call: MethodCall| {
        let brightness = decode(&call.member().name, call.args(), 0);
        reply(&call, on(&controller, brightness));
    })?;

    let controller = led.clone();
    object.add_method_handler(iface.require_member("off")?, move |call: MethodCall| {
        reply(&call, off(&controller));
    })?;

    let controller = led.clone();
    object.add_method_handler(iface.require_member("flash")?, move |call: MethodCall| {
        let brightness = decode(&call.member().name, call.args(), 0);
        let frequency = decode(&call.member().name, call.args(), 1);
        reply(&call, flash(&controller, brightness, frequency));
    })?;

    let controller = led.clone();
    object.add_method_handler(iface.require_member("status")?, move |call: MethodCall| {
        reply(&call, status(&controller));
    })?;

    Ok(())
}

#[must_use]
pub fn on(led: &LedController, brightness: f64) -> LedState {
    led.enable(brightness, 0);
    LedState::new(brightness, 0)
}

#[must_use]
pub fn off(led: &LedController) -> LedState {
    led.disable();
    LedState::OFF
}

/// Blink with `frequency` ms half-periods; `0` is the same as [`on`].
#[must_use]
pub fn flash(led: &LedController, brightness: f64, frequency: u32) -> LedState {
    led.enable(brightness, frequency);
    LedState::new(brightness, frequency)
}

#[must_use]
pub fn status(led: &LedController) -> LedState {
    led.status()
}

/// Argument `index` of a call to `member`, or zero if it is missing or of
/// another type. The attachment checks inputs against the member signature
/// before dispatch, so only a call that bypasses that check reaches the
/// fallback.
fn decode<T: FromMsgArg + Default>(member: &str, args: &[MsgArg], index: usize) -> T {
    MsgArg::get(args, index).unwrap_or_else(|e| {
        warn!(member, "Bad argument {index}: {e}");
        T::default()
    })
}

fn reply(call: &MethodCall, state: LedState) {
    debug!(
        member = %call.member().name,
        sender = call.sender(),
        brightness = state.brightness,
        frequency = state.frequency,
        "Replying"
    );
    if let Err(e) = call.reply(&state.to_args()) {
        warn!(member = %call.member().name, "Reply failed: {e}");
        if let Err(e) = call.reply_empty() {
            warn!(member = %call.member().name, "Empty reply failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)] // Exact float comparisons are intentional in tests

    use super::*;
    use crate::led::fake_kernel::{boot as controller, settle};

    #[test]
    fn test_replies_echo_request() {
        let (_dir, led) = controller();
        assert_eq!(on(&led, 0.25), LedState::new(0.25, 0));
        assert_eq!(flash(&led, 0.75, 300), LedState::new(0.75, 300));
        assert_eq!(off(&led), LedState::OFF);
    }

    #[test]
    fn test_status_after_each_command() {
        let (dir, led) = controller();
        let _ = off(&led);
        settle(dir.path());
        assert_eq!(status(&led), LedState::OFF);
        let _ = on(&led, 0.5);
        settle(dir.path());
        assert_eq!(status(&led), LedState::new(1.0, 0));
        let _ = flash(&led, 0.5, 500);
        settle(dir.path());
        assert_eq!(status(&led), LedState::new(1.0, 500));
        let _ = off(&led);
        settle(dir.path());
        assert_eq!(status(&led), LedState::OFF);
    }

    #[test]
    fn test_flash_zero_matches_on() {
        let (dir, led) = controller();
        let flashed = flash(&led, 0.5, 0);
        settle(dir.path());
        let flashed_status = status(&led);
        let _ = off(&led);
        let switched = on(&led, 0.5);
        settle(dir.path());
        assert_eq!(flashed, switched);
        assert_eq!(flashed_status, status(&led));
    }

    #[test]
    fn test_replies_ignore_missing_hardware() {
        let dir = tempfile::tempdir().unwrap();
        let led = LedController::new(dir.path(), "absent");
        assert_eq!(on(&led, 1.0), LedState::new(1.0, 0));
        assert_eq!(flash(&led, 1.0, 100), LedState::new(1.0, 100));
        assert_eq!(status(&led), LedState::OFF);
    }

    #[test]
    fn test_decode_falls_back_to_zero() {
        let args = [MsgArg::Double(0.5), MsgArg::Uint32(250)];
        assert_eq!(decode::<f64>("flash", &args, 0), 0.5);
        assert_eq!(decode::<u32>("flash", &args, 1), 250);

        assert_eq!(decode::<u32>("flash", &args, 0), 0);
        assert_eq!(decode::<f64>("flash", &args, 1), 0.0);
        assert_eq!(decode::<f64>("on", &[], 0), 0.0);
    }

    #[test]
    fn test_install_all_members() {
        let (_dir, led) = controller();
        let iface = led_common::led_interface().unwrap();
        let mut object = BusObject::new(led_common::OBJECT_PATH).unwrap();
        object.add_interface(&iface).unwrap();
        install(&mut object, &iface, &Arc::new(led)).unwrap();
    }

    #[test]
    fn test_install_requires_interface_on_object() {
        let (_dir, led) = controller();
        let iface = led_common::led_interface().unwrap();
        let mut object = BusObject::new(led_common::OBJECT_PATH).unwrap();
        assert!(install(&mut object, &iface, &Arc::new(led)).is_err());
    }
}
