//! Result line formatting.

use led_common::LedState;

/// `{ "cmd": "<name>", "brightness": <b>, "frequency": <f> }` with no
/// trailing newline. Consumers read it as a fixed record.
#[must_use]
pub fn format_json(name: &str, state: LedState) -> String {
    format!(
        "{{ \"cmd\": \"{name}\", \"brightness\": {}, \"frequency\": {} }}",
        c_double(state.brightness),
        state.frequency
    )
}

/// Human-readable line, newline-terminated.
#[must_use]
pub fn format_text(name: &str, state: LedState) -> String {
    format!(
        "cmd - {name}, brightness: {}, frequency: {}\n",
        state.brightness, state.frequency
    )
}

/// A double the way C's `%lf` prints it: six fractional digits, with
/// `inf` and `nan` spelled in lower case.
#[must_use]
pub fn c_double(value: f64) -> String {
    let sign = if value.is_sign_negative() { "-" } else { "" };
    if value.is_nan() {
        format!("{sign}nan")
    } else if value.is_infinite() {
        format!("{sign}inf")
    } else {
        format!("{value:.6}")
    }
}
