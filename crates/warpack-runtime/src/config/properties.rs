// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-level properties and `${NAME}` substitution.

use std::collections::BTreeMap;

/// Work directory of the extracted runtime.
pub const WORK_DIR: &str = "warpack.work.dir";
/// Temp directory inside the work directory.
pub const TEMP_DIR: &str = "warpack.temp.dir";
/// Log directory inside the work directory.
pub const LOG_DIR: &str = "warpack.log.dir";
/// Directory holding extracted native libraries.
pub const LIBRARY_PATH: &str = "warpack.library.path";

/// Process-level property table.
///
/// Filled from the configuration's `systemProperties` and from values derived
/// at runtime (work directory layout). Lookups during substitution consult
/// this table before the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemProperties {
    values: BTreeMap<String, String>,
}

impl SystemProperties {
    /// Create an empty property table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Get a property.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Iterate properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolve a variable: properties first, then the process environment.
    pub fn resolve(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(str::to_string)
            .or_else(|| std::env::var(name).ok())
    }

    /// Substitute a whole-value `${NAME}` placeholder.
    ///
    /// Only values that are exactly one placeholder (after trimming) are
    /// substituted. Unresolved placeholders and all other values are
    /// returned unchanged.
    pub fn substitute(&self, value: &str) -> String {
        let trimmed = value.trim();
        let name = trimmed
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'));

        match name {
            Some(name) => self.resolve(name).unwrap_or_else(|| trimmed.to_string()),
            None => trimmed.to_string(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SystemProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Self::new();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_from_properties() {
        let props: SystemProperties = [("http.port", "9090")].into_iter().collect();
        assert_eq!(props.substitute("${http.port}"), "9090");
        assert_eq!(props.substitute("  ${http.port} "), "9090");
    }

    #[test]
    fn test_substitute_from_environment() {
        let props = SystemProperties::new();
        // PATH is set in every test environment
        let path = std::env::var("PATH").unwrap();
        assert_eq!(props.substitute("${PATH}"), path);
    }

    #[test]
    fn test_properties_win_over_environment() {
        let props: SystemProperties = [("PATH", "/custom")].into_iter().collect();
        assert_eq!(props.substitute("${PATH}"), "/custom");
    }

    #[test]
    fn test_unresolved_placeholder_is_kept() {
        let props = SystemProperties::new();
        assert_eq!(
            props.substitute("${WARPACK_SURELY_UNDEFINED_VARIABLE}"),
            "${WARPACK_SURELY_UNDEFINED_VARIABLE}"
        );
    }

    #[test]
    fn test_partial_placeholders_are_not_substituted() {
        let props: SystemProperties = [("a", "1")].into_iter().collect();
        assert_eq!(props.substitute("x${a}"), "x${a}");
        assert_eq!(props.substitute("8080"), "8080");
    }
}
