//! Interface descriptions.
//!
//! An interface is declared with [`InterfaceDescription::builder`], filled
//! with members and then activated. Activated descriptions are immutable and
//! cheap to clone.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{BusError, Result};
use crate::msgarg::Signature;
use crate::names::{validate_interface_name, validate_member_name};

/// A method member of an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub interface: String,
    pub name: String,
    pub input: Signature,
    pub output: Signature,
    pub arg_names: Vec<String>,
}

#[derive(Debug)]
struct Description {
    name: String,
    members: BTreeMap<String, Member>,
}

#[derive(Debug, Clone)]
pub struct InterfaceDescription {
    inner: Arc<Description>,
}

impl InterfaceDescription {
    /// Start declaring an interface.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidName`] if `name` is not a valid interface name.
    pub fn builder(name: &str) -> Result<InterfaceBuilder> {
        validate_interface_name(name)?;
        Ok(InterfaceBuilder {
            name: name.to_string(),
            members: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.inner.members.get(name)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.inner.members.values()
    }

    /// Look up a member, failing with [`BusError::NoSuchMember`].
    ///
    /// # Errors
    ///
    /// Returns an error if the interface has no member called `name`.
    pub fn require_member(&self, name: &str) -> Result<&Member> {
        self.member(name)
            .ok_or_else(|| BusError::NoSuchMember(format!("{}.{name}", self.name())))
    }
}

impl PartialEq for InterfaceDescription {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.name == other.inner.name && self.inner.members == other.inner.members)
    }
}

impl Eq for InterfaceDescription {}

#[derive(Debug)]
pub struct InterfaceBuilder {
    name: String,
    members: BTreeMap<String, Member>,
}

impl InterfaceBuilder {
    /// Add a method member.
    ///
    /// `arg_names` is a comma separated list naming the input arguments
    /// followed by the output arguments; it may be empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the member name or a signature is invalid, the
    /// member already exists, or the number of argument names does not match
    /// the signatures.
    pub fn add_method(
        &mut self,
        name: &str,
        input: &str,
        output: &str,
        arg_names: &str,
    ) -> Result<&mut Self> {
        validate_member_name(name)?;
        let input = Signature::parse(input)?;
        let output = Signature::parse(output)?;

        let arg_names: Vec<String> = if arg_names.is_empty() {
            Vec::new()
        } else {
            arg_names.split(',').map(|s| s.trim().to_string()).collect()
        };
        if !arg_names.is_empty() && arg_names.len() != input.len() + output.len() {
            return Err(BusError::BadSignature(format!(
                "{name}: {} argument names for signatures \"{input}\" and \"{output}\"",
                arg_names.len()
            )));
        }

        if self.members.contains_key(name) {
            return Err(BusError::InvalidName(format!(
                "member {name:?}: already declared on {}",
                self.name
            )));
        }

        self.members.insert(
            name.to_string(),
            Member {
                interface: self.name.clone(),
                name: name.to_string(),
                input,
                output,
                arg_names,
            },
        );
        Ok(self)
    }

    /// Freeze the declaration.
    #[must_use]
    pub fn activate(self) -> InterfaceDescription {
        InterfaceDescription {
            inner: Arc::new(Description {
                name: self.name,
                members: self.members,
            }),
        }
    }
}
