//! Bus names, ownership flags and reply codes, plus name validation.

use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::{BusError, Result};

const MAX_NAME_LEN: usize = 255;

/// Flags passed to `request_name`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameFlags(pub u32);

impl NameFlags {
    pub const NONE: NameFlags = NameFlags(0);
    /// Let a later requester with `REPLACE_EXISTING` take the name over.
    pub const ALLOW_REPLACEMENT: NameFlags = NameFlags(0x1);
    /// Take the name from its owner if the owner allows replacement.
    pub const REPLACE_EXISTING: NameFlags = NameFlags(0x2);
    /// Fail instead of waiting in the queue.
    pub const DO_NOT_QUEUE: NameFlags = NameFlags(0x4);

    #[must_use]
    pub fn contains(self, other: NameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for NameFlags {
    type Output = NameFlags;

    fn bitor(self, rhs: NameFlags) -> NameFlags {
        NameFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestNameReply {
    PrimaryOwner,
    InQueue,
    Exists,
    AlreadyOwner,
}

impl RequestNameReply {
    /// Numeric reply code as used by D-Bus style buses.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            RequestNameReply::PrimaryOwner => 1,
            RequestNameReply::InQueue => 2,
            RequestNameReply::Exists => 3,
            RequestNameReply::AlreadyOwner => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseNameReply {
    Released,
    NonExistent,
    NotOwner,
}

impl ReleaseNameReply {
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            ReleaseNameReply::Released => 1,
            ReleaseNameReply::NonExistent => 2,
            ReleaseNameReply::NotOwner => 3,
        }
    }
}

fn is_element_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn invalid(kind: &str, name: &str) -> BusError {
    BusError::InvalidName(format!("{kind} {name:?}"))
}

/// Unique names start with `:` and are assigned by the router.
#[must_use]
pub fn is_unique_name(name: &str) -> bool {
    name.starts_with(':')
}

/// Validate a well-known bus name such as `org.example.led`.
///
/// # Errors
///
/// Returns [`BusError::InvalidName`] if the name has fewer than two elements,
/// an empty element, an element starting with a digit or a character outside
/// `[A-Za-z0-9_-]`.
pub fn validate_bus_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || is_unique_name(name) {
        return Err(invalid("bus name", name));
    }
    let elements: Vec<&str> = name.split('.').collect();
    let ok = elements.len() >= 2
        && elements.iter().all(|e| {
            !e.is_empty()
                && !e.starts_with(|c: char| c.is_ascii_digit())
                && e.chars().all(is_element_char)
        });
    if ok { Ok(()) } else { Err(invalid("bus name", name)) }
}

/// Validate either a well-known name or a router-assigned unique name.
///
/// # Errors
///
/// Returns [`BusError::InvalidName`] for malformed names.
pub fn validate_destination(name: &str) -> Result<()> {
    if is_unique_name(name) {
        if name.len() > 1 && name.len() <= MAX_NAME_LEN {
            return Ok(());
        }
        return Err(invalid("unique name", name));
    }
    validate_bus_name(name)
}

/// Validate an interface name; same rules as bus names without `-`.
///
/// # Errors
///
/// Returns [`BusError::InvalidName`] for malformed names.
pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.contains('-') {
        return Err(invalid("interface name", name));
    }
    validate_bus_name(name).map_err(|_| invalid("interface name", name))
}

/// # Errors
///
/// Returns [`BusError::InvalidName`] unless the name is a non-empty
/// identifier of `[A-Za-z0-9_]` not starting with a digit.
pub fn validate_member_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok { Ok(()) } else { Err(invalid("member name", name)) }
}

/// # Errors
///
/// Returns [`BusError::InvalidName`] unless the path is `/` or a sequence of
/// `/element` parts made of `[A-Za-z0-9_]`.
pub fn validate_object_path(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    let ok = path
        .strip_prefix('/')
        .is_some_and(|rest| {
            rest.split('/').all(|e| {
                !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            })
        });
    if ok { Ok(()) } else { Err(invalid("object path", path)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let flags = NameFlags::REPLACE_EXISTING | NameFlags::DO_NOT_QUEUE;
        assert_eq!(flags.bits(), 6);
        assert!(flags.contains(NameFlags::DO_NOT_QUEUE));
        assert!(!flags.contains(NameFlags::ALLOW_REPLACEMENT));
        assert_eq!(serde_json::to_string(&flags).unwrap(), "6");
    }

    #[test]
    fn test_reply_codes() {
        assert_eq!(RequestNameReply::PrimaryOwner.as_u32(), 1);
        assert_eq!(RequestNameReply::AlreadyOwner.as_u32(), 4);
        assert_eq!(ReleaseNameReply::NotOwner.as_u32(), 3);
        assert_eq!(
            serde_json::to_string(&RequestNameReply::InQueue).unwrap(),
            "\"in_queue\""
        );
    }

    #[test]
    fn test_bus_names() {
        assert!(validate_bus_name("org.alljoyn.sample.ledcontroller.beagle").is_ok());
        assert!(validate_bus_name("a.b-c").is_ok());
        assert!(validate_bus_name("single").is_err());
        assert!(validate_bus_name("org..led").is_err());
        assert!(validate_bus_name("org.1led").is_err());
        assert!(validate_bus_name(":1.2").is_err());
        assert!(validate_bus_name("").is_err());
    }

    #[test]
    fn test_destinations() {
        assert!(validate_destination(":abcd1234.7").is_ok());
        assert!(validate_destination(":").is_err());
        assert!(validate_destination("org.example").is_ok());
    }

    #[test]
    fn test_interface_and_member_names() {
        assert!(validate_interface_name("org.alljoyn.sample.ledcontroller").is_ok());
        assert!(validate_interface_name("org.led-ctl").is_err());
        assert!(validate_member_name("flash").is_ok());
        assert!(validate_member_name("get_2").is_ok());
        assert!(validate_member_name("2x").is_err());
        assert!(validate_member_name("a.b").is_err());
    }

    #[test]
    fn test_object_paths() {
        assert!(validate_object_path("/").is_ok());
        assert!(validate_object_path("/beagle").is_ok());
        assert!(validate_object_path("/a/b_c").is_ok());
        assert!(validate_object_path("beagle").is_err());
        assert!(validate_object_path("/a/").is_err());
        assert!(validate_object_path("/a//b").is_err());
    }
}
