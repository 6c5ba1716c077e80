// src/formula/placeholder.rs

//! Placeholder substitution for install step templates
//!
//! Templates reference install locations with `%(key)s`:
//! - `%(prefix)s`, `%(libexec)s`, `%(vendor)s`: install destinations
//! - `%(name)s`, `%(version)s`: formula metadata
//! - `%(source)s`: the extracted main source tree
//! - `%(staging)s`: the resource staging root
//! - `%(resource:NAME)s`: the staged tree of resource NAME

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Keys that are always defined during an install
pub const BUILTIN_KEYS: &[&str] = &[
    "prefix", "libexec", "vendor", "name", "version", "source", "staging",
];

const RESOURCE_PREFIX: &str = "resource:";

/// A placeholder reference found in a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Builtin(String),
    Resource(String),
}

/// Find every placeholder referenced by a template
///
/// Fails on unterminated references and unknown keys.
pub fn scan(template: &str) -> Result<Vec<Placeholder>> {
    let mut found = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("%(") {
        let after = &rest[start + 2..];
        let end = after.find(")s").ok_or_else(|| {
            Error::ParseError(format!("unterminated placeholder in '{}'", template))
        })?;
        let key = &after[..end];

        if let Some(resource) = key.strip_prefix(RESOURCE_PREFIX) {
            if resource.is_empty() {
                return Err(Error::ParseError(format!(
                    "empty resource reference in '{}'",
                    template
                )));
            }
            found.push(Placeholder::Resource(resource.to_string()));
        } else if BUILTIN_KEYS.contains(&key) {
            found.push(Placeholder::Builtin(key.to_string()));
        } else {
            return Err(Error::ParseError(format!(
                "unknown placeholder '%({})s' in '{}'",
                key, template
            )));
        }

        rest = &after[end + 2..];
    }

    Ok(found)
}

/// Values for placeholders during one install run
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    values: BTreeMap<String, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a builtin key
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// Set the staged location of a resource
    pub fn set_resource(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.values
            .insert(format!("{}{}", RESOURCE_PREFIX, name), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Replace every `%(key)s` in a template
    pub fn apply(&self, template: &str) -> Result<String> {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("%(") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find(")s").ok_or_else(|| {
                Error::ParseError(format!("unterminated placeholder in '{}'", template))
            })?;
            let key = &after[..end];
            let value = self.values.get(key).ok_or_else(|| {
                Error::ParseError(format!(
                    "placeholder '%({})s' has no value in this install",
                    key
                ))
            })?;
            result.push_str(value);
            rest = &after[end + 2..];
        }

        result.push_str(rest);
        Ok(result)
    }
}
