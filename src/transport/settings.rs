//! Loosely typed settings bag handed to backends at construction.

use std::collections::BTreeMap;
use std::str::FromStr;

use super::TransportError;

/// String-keyed settings merged from a connection declaration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Merges credentials and explicit settings; settings win on collision.
    #[must_use]
    pub fn merged(
        credentials: &BTreeMap<String, String>,
        settings: &BTreeMap<String, String>,
    ) -> Self {
        let mut values = credentials.clone();
        values.extend(settings.iter().map(|(key, value)| (key.clone(), value.clone())));
        Self { values }
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the trimmed value under `key` when it is present and non-blank.
    #[must_use]
    pub fn optional(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|value| !value.is_empty())
    }

    /// Returns the trimmed value under `key`, failing when it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidSettings`] when the key is absent or
    /// blank.
    pub fn require(&self, transport: &str, key: &str) -> Result<&str, TransportError> {
        self.optional(key)
            .ok_or_else(|| invalid(transport, key, "is required"))
    }

    /// Parses the value under `key`, falling back to `default` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidSettings`] when the value does not
    /// parse.
    pub fn parse_or<T: FromStr>(
        &self,
        transport: &str,
        key: &str,
        default: T,
    ) -> Result<T, TransportError> {
        Ok(self.parse_optional(transport, key)?.unwrap_or(default))
    }

    /// Parses the value under `key` when it is present.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidSettings`] when the value does not
    /// parse.
    pub fn parse_optional<T: FromStr>(
        &self,
        transport: &str,
        key: &str,
    ) -> Result<Option<T>, TransportError> {
        self.optional(key)
            .map(|raw| {
                raw.parse()
                    .map_err(|_| invalid(transport, key, &format!("has invalid value '{raw}'")))
            })
            .transpose()
    }

    /// Stores `value` under `key` unless a non-blank value is already there.
    #[must_use]
    pub fn or_insert(mut self, key: &str, value: impl Into<String>) -> Self {
        if self.optional(key).is_none() {
            self.values.insert(key.to_owned(), value.into());
        }
        self
    }

    /// Reads a boolean flag accepting `true/false`, `yes/no`, and `1/0`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidSettings`] for any other value.
    pub fn flag(&self, transport: &str, key: &str, default: bool) -> Result<bool, TransportError> {
        let Some(raw) = self.optional(key) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(invalid(
                transport,
                key,
                &format!("must be a boolean, got '{raw}'"),
            )),
        }
    }
}

impl From<BTreeMap<String, String>> for Settings {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Settings {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .collect(),
        }
    }
}

fn invalid(transport: &str, key: &str, reason: &str) -> TransportError {
    TransportError::InvalidSettings {
        transport: transport.to_owned(),
        key: key.to_owned(),
        reason: reason.to_owned(),
    }
}
