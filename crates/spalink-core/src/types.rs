/*!
 * Core data types for spalink.
 *
 * This module defines the decoded value model used by the structure
 * accessors when reading fields out of a spa status block.
 */
use std::fmt;

use serde::{Deserialize, Serialize};

/// A decoded field value from the spa structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value (single bit fields)
    Bool(bool),
    /// Numeric value (byte and word fields, and raw enum indices)
    Number(u16),
    /// Enumeration label (decoded from the field's declared item list)
    Label(String),
    /// Time-of-day value (word fields holding hour/minute)
    Time {
        /// Hour of the day (0-23)
        hour: u8,
        /// Minute of the hour (0-59)
        minute: u8,
    },
}

impl Value {
    /// Check if the value is a boolean
    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    /// Check if the value is numeric
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    /// Check if the value is an enumeration label
    pub fn is_label(&self) -> bool {
        matches!(self, Value::Label(_))
    }

    /// Check if the value is a time of day
    pub fn is_time(&self) -> bool {
        matches!(self, Value::Time { .. })
    }

    /// Try to get a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get a numeric value
    pub fn as_number(&self) -> Option<u16> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(u16::from(*b)),
            _ => None,
        }
    }

    /// Try to get an enumeration label
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Value::Label(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get a time-of-day value
    pub fn as_time(&self) -> Option<(u8, u8)> {
        match self {
            Value::Time { hour, minute } => Some((*hour, *minute)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Label(s) => write!(f, "{}", s),
            Value::Time { hour, minute } => write!(f, "{:02}:{:02}", hour, minute),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<u8> for Value {
    fn from(n: u8) -> Self {
        Value::Number(u16::from(n))
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Label(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Label(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_checks() {
        assert!(Value::Bool(true).is_bool());
        assert!(Value::Number(42).is_number());
        assert!(Value::Label("HI".to_string()).is_label());
        assert!(Value::Time { hour: 7, minute: 30 }.is_time());
    }

    #[test]
    fn test_value_conversions() {
        let v: Value = true.into();
        assert_eq!(v.as_bool(), Some(true));

        let v: Value = 42u8.into();
        assert_eq!(v.as_number(), Some(42));

        let v: Value = 512u16.into();
        assert_eq!(v.as_number(), Some(512));

        let v: Value = "LO".into();
        assert_eq!(v.as_label(), Some("LO"));

        let v = Value::Time { hour: 7, minute: 5 };
        assert_eq!(v.as_time(), Some((7, 5)));
        assert_eq!(v.as_number(), None);
    }

    #[test]
    fn test_bool_coerces_to_number() {
        assert_eq!(Value::Bool(true).as_number(), Some(1));
        assert_eq!(Value::Bool(false).as_number(), Some(0));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Number(5)), "5");
        assert_eq!(format!("{}", Value::Label("OFF".to_string())), "OFF");
        assert_eq!(format!("{}", Value::Time { hour: 9, minute: 3 }), "09:03");
    }
}
