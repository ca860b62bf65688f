// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Key-value attribute maps for graph nodes and edges.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;
use crate::error::{GraphError, Result};

/// Arbitrary key/value pairs attached to a node, an edge or a subgraph.
///
/// Keys are unique; insertion order is irrelevant. Iteration is in key
/// order so that logs and serialized documents are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyValueAttributes {
    values: BTreeMap<String, AttributeValue>,
}

impl KeyValueAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, failing if the key is unknown.
    pub fn get(&self, key: &str) -> Result<&AttributeValue> {
        self.values
            .get(key)
            .ok_or_else(|| GraphError::UnknownAttribute(key.to_string()))
    }

    /// Returns the value for `key` if present.
    pub fn try_get(&self, key: &str) -> Option<&AttributeValue> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.values.insert(key.into(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the text form of an attribute, or "" when absent.
    pub fn get_text(&self, key: &str) -> &str {
        self.values.get(key).map(AttributeValue::as_text).unwrap_or("")
    }

    /// Parses an attribute into an arbitrary `FromStr` type, if present.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.values.get(key)?.as_text().parse().ok()
    }

    /// Adds all attributes of another set, overwriting per key.
    pub fn merge(&mut self, other: &KeyValueAttributes) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    /// Swaps the contents with another attribute set.
    pub fn swap(&mut self, other: &mut KeyValueAttributes) {
        std::mem::swap(&mut self.values, &mut other.values);
    }

    pub fn is_equal(&self, other: &KeyValueAttributes) -> bool {
        self == other
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates all attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for KeyValueAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for (k, v) in &self.values {
            write!(f, "{}={} ", k, v)?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for KeyValueAttributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        KeyValueAttributes {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_has() {
        let mut attrs = KeyValueAttributes::new();
        assert!(!attrs.has("latency"));
        attrs.set("latency", AttributeValue::number(10.0));
        assert!(attrs.has("latency"));
        assert_eq!(attrs.get("latency").unwrap().as_number().unwrap(), 10.0);
        assert!(attrs.get("missing").is_err());
    }

    #[test]
    fn test_merge_last_write_wins() {
        let mut a: KeyValueAttributes = [("type", "6D"), ("latency", "10")].into_iter().collect();
        let b: KeyValueAttributes = [("latency", "5"), ("mode", "push")].into_iter().collect();
        a.merge(&b);
        assert_eq!(a.get_text("latency"), "5");
        assert_eq!(a.get_text("type"), "6D");
        assert_eq!(a.get_text("mode"), "push");
    }

    #[test]
    fn test_swap() {
        let mut a: KeyValueAttributes = [("x", "1")].into_iter().collect();
        let mut b: KeyValueAttributes = [("y", "2")].into_iter().collect();
        a.swap(&mut b);
        assert!(a.has("y") && !a.has("x"));
        assert!(b.has("x") && !b.has("y"));
    }

    #[test]
    fn test_equality_is_numeric_aware() {
        let a: KeyValueAttributes = [("v", "10")].into_iter().collect();
        let mut b = KeyValueAttributes::new();
        b.set("v", AttributeValue::number(10.0));
        assert!(a.is_equal(&b));
    }
}
