// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Attribute value container.

Stores attributes as extracted from UTQL documents and supports dynamic
conversion with lazy evaluation between text and double representations.
XML payloads are carried as opaque markup so that embedded configuration
subtrees survive a read/match/write cycle untouched.
*/

use std::fmt;
use std::sync::OnceLock;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{GraphError, Result};

#[derive(Debug, Clone)]
enum ValueRepr {
    Empty,
    /// Textual value; the numeric interpretation is computed on first use.
    Text {
        text: String,
        number: OnceLock<Option<f64>>,
    },
    /// Numeric value; the text rendering is computed on first use.
    Number {
        value: f64,
        text: OnceLock<String>,
    },
    /// Opaque XML markup. The text form is the markup itself.
    Xml {
        markup: String,
        number: OnceLock<Option<f64>>,
    },
}

/// A single attribute value: empty, text, number or an opaque XML subtree.
///
/// Conversion between text and number is lazy and cached. Equality is
/// numeric if both sides are numbers, textual otherwise.
#[derive(Debug, Clone)]
pub struct AttributeValue {
    repr: ValueRepr,
}

impl AttributeValue {
    /// Creates an empty value.
    pub fn empty() -> Self {
        AttributeValue { repr: ValueRepr::Empty }
    }

    /// Creates a value from text. Empty text yields an empty value.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            return Self::empty();
        }
        AttributeValue {
            repr: ValueRepr::Text { text, number: OnceLock::new() },
        }
    }

    /// Creates a numeric value.
    pub fn number(value: f64) -> Self {
        AttributeValue {
            repr: ValueRepr::Number { value, text: OnceLock::new() },
        }
    }

    /// Creates a value carrying opaque XML markup.
    pub fn xml(markup: impl Into<String>) -> Self {
        let markup = markup.into();
        if markup.is_empty() {
            return Self::empty();
        }
        AttributeValue {
            repr: ValueRepr::Xml { markup, number: OnceLock::new() },
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.repr, ValueRepr::Empty)
    }

    /// True if the value can be interpreted as a number.
    pub fn is_number(&self) -> bool {
        match &self.repr {
            ValueRepr::Empty => false,
            ValueRepr::Number { .. } => true,
            ValueRepr::Text { text, number } => {
                number.get_or_init(|| parse_number(text)).is_some()
            }
            ValueRepr::Xml { markup, number } => {
                number.get_or_init(|| parse_number(markup)).is_some()
            }
        }
    }

    /// Returns the text form of the value. Empty values render as "".
    pub fn as_text(&self) -> &str {
        match &self.repr {
            ValueRepr::Empty => "",
            ValueRepr::Text { text, .. } => text,
            ValueRepr::Xml { markup, .. } => markup,
            ValueRepr::Number { value, text } => {
                text.get_or_init(|| format_number(*value))
            }
        }
    }

    /// Returns the numeric form of the value.
    ///
    /// Fails with [`GraphError::NotANumber`] for empty or non-numeric values.
    pub fn as_number(&self) -> Result<f64> {
        match &self.repr {
            ValueRepr::Number { value, .. } => Ok(*value),
            ValueRepr::Empty => Err(GraphError::NotANumber(String::new())),
            ValueRepr::Text { text, number } => number
                .get_or_init(|| parse_number(text))
                .ok_or_else(|| GraphError::NotANumber(text.clone())),
            ValueRepr::Xml { markup, number } => number
                .get_or_init(|| parse_number(markup))
                .ok_or_else(|| GraphError::NotANumber(markup.clone())),
        }
    }

    /// Returns the raw XML markup, if this value carries any.
    pub fn as_xml(&self) -> Option<&str> {
        match &self.repr {
            ValueRepr::Xml { markup, .. } => Some(markup),
            _ => None,
        }
    }
}

impl Default for AttributeValue {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        // XML payloads compare as markup; everything else compares
        // numerically when both sides are numbers, textually otherwise.
        if let (Some(a), Some(b)) = (self.as_xml(), other.as_xml()) {
            return a == b;
        }
        if self.is_number() && other.is_number() {
            // as_number cannot fail after is_number returned true
            return self.as_number().unwrap_or(f64::NAN) == other.as_number().unwrap_or(f64::NAN);
        }
        self.as_text() == other.as_text()
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text())
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::number(v)
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_text())
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.starts_with('<') && text.ends_with('>') {
            return Err(D::Error::custom("XML attribute values cannot be deserialized from text"));
        }
        Ok(AttributeValue::text(text))
    }
}

fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

fn format_number(value: f64) -> String {
    // integral doubles render without a trailing ".0" so that values
    // written back into documents look like the ones that were read
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip() {
        let v = AttributeValue::text("6D");
        assert_eq!(v.as_text(), "6D");
        assert!(!v.is_number());
        assert!(v.as_number().is_err());
    }

    #[test]
    fn test_lazy_number_parse() {
        let v = AttributeValue::text("33.5");
        assert!(v.is_number());
        assert_eq!(v.as_number().unwrap(), 33.5);
        assert_eq!(v.as_text(), "33.5");
    }

    #[test]
    fn test_number_to_text() {
        assert_eq!(AttributeValue::number(10.0).as_text(), "10");
        assert_eq!(AttributeValue::number(0.5).as_text(), "0.5");
    }

    #[test]
    fn test_numeric_equality() {
        assert_eq!(AttributeValue::text("10"), AttributeValue::number(10.0));
        assert_eq!(AttributeValue::text("1e1"), AttributeValue::text("10"));
        assert_ne!(AttributeValue::text("10"), AttributeValue::text("ten"));
        assert_eq!(AttributeValue::text("abc"), AttributeValue::text("abc"));
    }

    #[test]
    fn test_empty() {
        let v = AttributeValue::empty();
        assert!(v.is_empty());
        assert_eq!(v.as_text(), "");
        assert!(!v.is_number());
    }

    #[test]
    fn test_xml_opaque() {
        let v = AttributeValue::xml("<Attribute name=\"x\"><Value>1</Value></Attribute>");
        assert!(v.as_xml().is_some());
        assert_eq!(v.as_text(), "<Attribute name=\"x\"><Value>1</Value></Attribute>");
    }
}
