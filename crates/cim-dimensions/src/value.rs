//! Key values for data coordinates

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// The value of one dimension in a data coordinate
///
/// Integer keys (detector, visit, tract, pixel indices) and string keys
/// (instrument, band, physical filter) share one totally-ordered type so
/// coordinates can live in ordered sets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    /// Integer key
    Int(i64),
    /// String key
    Str(String),
}

impl KeyValue {
    /// Integer value, if this is an integer key
    #[inline]
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Str(_) => None,
        }
    }

    /// String value, if this is a string key
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Int(_) => None,
            Self::Str(value) => Some(value),
        }
    }

    /// Parse a literal from a query expression: integers first, then
    /// optionally quoted strings.
    #[must_use]
    pub fn parse_literal(text: &str) -> Self {
        let text = text.trim();
        if let Ok(value) = text.parse::<i64>() {
            return Self::Int(value);
        }
        let unquoted = text
            .strip_prefix('\'')
            .and_then(|t| t.strip_suffix('\''))
            .or_else(|| text.strip_prefix('"').and_then(|t| t.strip_suffix('"')))
            .unwrap_or(text);
        Self::Str(unquoted.to_string())
    }
}

impl Display for KeyValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_literal_prefers_integers() {
        assert_eq!(KeyValue::parse_literal(" 42 "), KeyValue::Int(42));
        assert_eq!(KeyValue::parse_literal("'r'"), KeyValue::from("r"));
        assert_eq!(KeyValue::parse_literal("\"HSC\""), KeyValue::from("HSC"));
        assert_eq!(KeyValue::parse_literal("HSC-R"), KeyValue::from("HSC-R"));
    }

    #[test]
    fn untagged_serde() {
        let json = serde_json::to_string(&vec![KeyValue::Int(3), KeyValue::from("i")]).unwrap();
        assert_eq!(json, r#"[3,"i"]"#);
        let back: Vec<KeyValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![KeyValue::Int(3), KeyValue::from("i")]);
    }

    #[test]
    fn ints_sort_before_strings() {
        assert!(KeyValue::Int(1000) < KeyValue::from("a"));
    }
}
