//! Typed method arguments and their signatures.
//!
//! Arguments cross the wire as single-key objects whose key is the type code,
//! e.g. `{"d":0.5}` or `{"u":500}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BusError, Result};

/// Type codes understood by the bus.
pub const TYPE_CODES: &str = "duisb";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MsgArg {
    /// `d`: IEEE-754 double
    #[serde(rename = "d")]
    Double(f64),
    /// `u`: unsigned 32-bit integer
    #[serde(rename = "u")]
    Uint32(u32),
    /// `i`: signed 32-bit integer
    #[serde(rename = "i")]
    Int32(i32),
    /// `s`: UTF-8 string
    #[serde(rename = "s")]
    String(String),
    /// `b`: boolean
    #[serde(rename = "b")]
    Bool(bool),
}

impl MsgArg {
    #[must_use]
    pub fn type_code(&self) -> char {
        match self {
            MsgArg::Double(_) => 'd',
            MsgArg::Uint32(_) => 'u',
            MsgArg::Int32(_) => 'i',
            MsgArg::String(_) => 's',
            MsgArg::Bool(_) => 'b',
        }
    }

    /// Extract a typed value from the argument at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MissingArg`] if there is no argument at `index` and
    /// [`BusError::SignatureMismatch`] if it has a different type.
    pub fn get<T: FromMsgArg>(args: &[MsgArg], index: usize) -> Result<T> {
        let arg = args.get(index).ok_or(BusError::MissingArg(index))?;
        T::from_msg_arg(arg).ok_or_else(|| BusError::SignatureMismatch {
            expected: T::TYPE_CODE.to_string(),
            found: arg.type_code().to_string(),
        })
    }
}

impl From<f64> for MsgArg {
    fn from(v: f64) -> Self {
        MsgArg::Double(v)
    }
}

impl From<u32> for MsgArg {
    fn from(v: u32) -> Self {
        MsgArg::Uint32(v)
    }
}

impl From<i32> for MsgArg {
    fn from(v: i32) -> Self {
        MsgArg::Int32(v)
    }
}

impl From<&str> for MsgArg {
    fn from(v: &str) -> Self {
        MsgArg::String(v.to_string())
    }
}

impl From<bool> for MsgArg {
    fn from(v: bool) -> Self {
        MsgArg::Bool(v)
    }
}

/// Conversion from a [`MsgArg`] into a Rust value of the matching type code.
pub trait FromMsgArg: Sized {
    const TYPE_CODE: char;

    fn from_msg_arg(arg: &MsgArg) -> Option<Self>;
}

impl FromMsgArg for f64 {
    const TYPE_CODE: char = 'd';

    fn from_msg_arg(arg: &MsgArg) -> Option<Self> {
        match arg {
            MsgArg::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromMsgArg for u32 {
    const TYPE_CODE: char = 'u';

    fn from_msg_arg(arg: &MsgArg) -> Option<Self> {
        match arg {
            MsgArg::Uint32(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromMsgArg for i32 {
    const TYPE_CODE: char = 'i';

    fn from_msg_arg(arg: &MsgArg) -> Option<Self> {
        match arg {
            MsgArg::Int32(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromMsgArg for String {
    const TYPE_CODE: char = 's';

    fn from_msg_arg(arg: &MsgArg) -> Option<Self> {
        match arg {
            MsgArg::String(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromMsgArg for bool {
    const TYPE_CODE: char = 'b';

    fn from_msg_arg(arg: &MsgArg) -> Option<Self> {
        match arg {
            MsgArg::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// A validated argument signature such as `"du"`. The empty signature is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature(String);

impl Signature {
    /// Parse a signature string.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::BadSignature`] if any character is not a known type code.
    pub fn parse(sig: &str) -> Result<Self> {
        if let Some(bad) = sig.chars().find(|c| !TYPE_CODES.contains(*c)) {
            return Err(BusError::BadSignature(format!(
                "{sig:?}: unknown type code {bad:?}"
            )));
        }
        Ok(Self(sig.to_string()))
    }

    #[must_use]
    pub fn of(args: &[MsgArg]) -> Self {
        Self(args.iter().map(MsgArg::type_code).collect())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn matches(&self, args: &[MsgArg]) -> bool {
        args.len() == self.0.len()
            && args
                .iter()
                .zip(self.0.chars())
                .all(|(arg, code)| arg.type_code() == code)
    }

    /// # Errors
    ///
    /// Returns [`BusError::SignatureMismatch`] if `args` do not match.
    pub fn check(&self, args: &[MsgArg]) -> Result<()> {
        if self.matches(args) {
            Ok(())
        } else {
            Err(BusError::SignatureMismatch {
                expected: self.0.clone(),
                found: Signature::of(args).0,
            })
        }
    }
}

impl FromStr for Signature {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Signature {
    type Error = BusError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Signature> for String {
    fn from(sig: Signature) -> Self {
        sig.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)] // Exact float comparisons are intentional in tests

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wire_shape() {
        let args = vec![MsgArg::Double(1.0), MsgArg::Uint32(500)];
        let json = serde_json::to_string(&args).unwrap();
        assert_eq!(json, r#"[{"d":1.0},{"u":500}]"#);
    }

    #[test]
    fn test_signature_of_args() {
        let args = [MsgArg::from(0.5), MsgArg::from(3u32), MsgArg::from("x")];
        assert_eq!(Signature::of(&args).as_str(), "dus");
        assert_eq!(Signature::of(&[]).as_str(), "");
    }

    #[test]
    fn test_signature_rejects_unknown_codes() {
        assert!(Signature::parse("du").is_ok());
        assert!(Signature::parse("").is_ok());
        assert!(matches!(
            Signature::parse("dz"),
            Err(BusError::BadSignature(_))
        ));
        assert!(serde_json::from_str::<Signature>("\"(ii)\"").is_err());
    }

    #[test]
    fn test_signature_check() {
        let sig = Signature::parse("du").unwrap();
        assert!(sig.check(&[MsgArg::Double(0.0), MsgArg::Uint32(0)]).is_ok());

        let err = sig.check(&[MsgArg::Double(0.0)]).unwrap_err();
        match err {
            BusError::SignatureMismatch { expected, found } => {
                assert_eq!(expected, "du");
                assert_eq!(found, "d");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_get_typed_arguments() {
        let args = [MsgArg::Double(0.25), MsgArg::Uint32(9)];
        assert_eq!(MsgArg::get::<f64>(&args, 0).unwrap(), 0.25);
        assert_eq!(MsgArg::get::<u32>(&args, 1).unwrap(), 9);
        assert!(matches!(
            MsgArg::get::<u32>(&args, 0),
            Err(BusError::SignatureMismatch { .. })
        ));
        assert!(matches!(
            MsgArg::get::<f64>(&args, 2),
            Err(BusError::MissingArg(2))
        ));
    }

    proptest! {
        #[test]
        fn prop_double_and_uint_survive_json(b in any::<f64>().prop_filter("finite", |v| v.is_finite()), f in any::<u32>()) {
            let args = vec![MsgArg::Double(b), MsgArg::Uint32(f)];
            let json = serde_json::to_string(&args).unwrap();
            let back: Vec<MsgArg> = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(MsgArg::get::<f64>(&back, 0).unwrap().to_bits(), b.to_bits());
            prop_assert_eq!(MsgArg::get::<u32>(&back, 1).unwrap(), f);
        }

        #[test]
        fn prop_signature_parse_accepts_only_type_codes(s in "[a-z]{0,6}") {
            let ok = s.chars().all(|c| TYPE_CODES.contains(c));
            prop_assert_eq!(Signature::parse(&s).is_ok(), ok);
        }
    }
}
