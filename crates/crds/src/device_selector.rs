//! Device selector
//!
//! A label-selector style policy evaluated against the labels derived from a
//! device's tags. Semantics follow Kubernetes label selectors: all terms are
//! ANDed, and an empty selector matches everything.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while validating a device selector
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    /// Operator string not recognized
    #[error("unknown selector operator: {0}")]
    UnknownOperator(String),

    #[error("operator {operator} on key {key:?} requires {expected}, got {got} values")]
    /// Wrong number of values for the operator
    InvalidValueCount {
        /// Requirement key
        key: String,
        /// Requirement operator
        operator: SelectionOperator,
        /// Allowed count, in words
        expected: &'static str,
        /// Values given
        got: usize,
    },

    /// Requirement without a key
    #[error("selector requirement has an empty key")]
    EmptyKey,
}

/// Set-based selection operator
///
/// Parsed case-insensitively, so both `In` and `in` are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOperator {
    /// Label value is one of the values
    In,
    /// Label is absent or its value is none of the values
    NotIn,
    /// Label is present
    Exists,
    /// Label is absent
    DoesNotExist,
    /// `=`, same as `In` with one value
    Equals,
    /// `==`, same as `Equals`
    DoubleEquals,
    /// `!=`, same as `NotIn` with one value
    NotEquals,
}

impl SelectionOperator {
    fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::NotIn => "notin",
            Self::Exists => "exists",
            Self::DoesNotExist => "!",
            Self::Equals => "=",
            Self::DoubleEquals => "==",
            Self::NotEquals => "!=",
        }
    }
}

impl fmt::Display for SelectionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionOperator {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(Self::In),
            "notin" => Ok(Self::NotIn),
            "exists" => Ok(Self::Exists),
            "!" | "doesnotexist" => Ok(Self::DoesNotExist),
            "=" | "equals" => Ok(Self::Equals),
            "==" | "doubleequals" => Ok(Self::DoubleEquals),
            "!=" | "notequals" => Ok(Self::NotEquals),
            _ => Err(SelectorError::UnknownOperator(s.to_string())),
        }
    }
}

/// A single set-based requirement
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSelectorRequirement {
    /// Label key
    pub key: String,

    /// One of In, NotIn, Exists, DoesNotExist, Equals, DoubleEquals, NotEquals
    pub operator: String,

    /// Operand values; empty for Exists and DoesNotExist
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl DeviceSelectorRequirement {
    fn validate(&self) -> Result<SelectionOperator, SelectorError> {
        if self.key.is_empty() {
            return Err(SelectorError::EmptyKey);
        }
        let operator: SelectionOperator = self.operator.parse()?;
        let got = self.values.len();
        let expected = match operator {
            SelectionOperator::In | SelectionOperator::NotIn if got == 0 => Some("at least one value"),
            SelectionOperator::Exists | SelectionOperator::DoesNotExist if got != 0 => Some("no values"),
            SelectionOperator::Equals | SelectionOperator::DoubleEquals | SelectionOperator::NotEquals
                if got != 1 =>
            {
                Some("exactly one value")
            }
            _ => None,
        };
        match expected {
            Some(expected) => Err(SelectorError::InvalidValueCount {
                key: self.key.clone(),
                operator,
                expected,
                got,
            }),
            None => Ok(operator),
        }
    }

    fn matches(&self, operator: SelectionOperator, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match operator {
            SelectionOperator::In | SelectionOperator::Equals | SelectionOperator::DoubleEquals => {
                value.is_some_and(|v| self.values.contains(v))
            }
            SelectionOperator::NotIn | SelectionOperator::NotEquals => {
                value.is_none_or(|v| !self.values.contains(v))
            }
            SelectionOperator::Exists => value.is_some(),
            SelectionOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// Selects devices by the labels encoded in their tags
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSelector {
    /// Exact key/value matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<DeviceSelectorRequirement>,
}

impl DeviceSelector {
    /// True if the selector has no terms at all
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Validate every requirement without evaluating it
    pub fn validate(&self) -> Result<(), SelectorError> {
        for requirement in &self.match_expressions {
            requirement.validate()?;
        }
        Ok(())
    }

    /// Evaluate the selector against a label set
    ///
    /// # Errors
    ///
    /// Returns a `SelectorError` if any requirement is malformed.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool, SelectorError> {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }
        for requirement in &self.match_expressions {
            let operator = requirement.validate()?;
            if !requirement.matches(operator, labels) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    fn requirement(key: &str, operator: &str, values: &[&str]) -> DeviceSelectorRequirement {
        DeviceSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: values.iter().map(|v| (*v).to_string()).collect(),
        }
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = DeviceSelector::default();
        assert!(selector.matches(&BTreeMap::new()).unwrap());
        assert!(selector.matches(&labels(&[("deviceType", "pool")])).unwrap());
    }

    #[test]
    fn test_match_labels() {
        let selector = DeviceSelector {
            match_labels: labels(&[("deviceType", "pool")]),
            ..Default::default()
        };
        assert!(selector.matches(&labels(&[("deviceType", "pool"), ("rack", "a1")])).unwrap());
        assert!(!selector.matches(&labels(&[("deviceType", "hvCustom")])).unwrap());
        assert!(!selector.matches(&BTreeMap::new()).unwrap());
    }

    #[test]
    fn test_operators_are_case_insensitive() {
        let selector = DeviceSelector {
            match_expressions: vec![requirement("deviceType", "IN", &["pool", "hvCustom"])],
            ..Default::default()
        };
        assert!(selector.matches(&labels(&[("deviceType", "hvCustom")])).unwrap());

        let selector = DeviceSelector {
            match_expressions: vec![requirement("deviceType", "notin", &["pool"])],
            ..Default::default()
        };
        assert!(selector.matches(&labels(&[("deviceType", "hvCustom")])).unwrap());
        assert!(!selector.matches(&labels(&[("deviceType", "pool")])).unwrap());
    }

    #[test]
    fn test_negative_operators_match_missing_key() {
        let selector = DeviceSelector {
            match_expressions: vec![
                requirement("deviceType", "NotIn", &["pool"]),
                requirement("rack", "!=", &["a1"]),
                requirement("gpu", "DoesNotExist", &[]),
            ],
            ..Default::default()
        };
        assert!(selector.matches(&BTreeMap::new()).unwrap());
    }

    #[test]
    fn test_exists() {
        let selector = DeviceSelector {
            match_expressions: vec![requirement("gpu", "Exists", &[])],
            ..Default::default()
        };
        assert!(selector.matches(&labels(&[("gpu", "a100")])).unwrap());
        assert!(!selector.matches(&BTreeMap::new()).unwrap());
    }

    #[test]
    fn test_invalid_requirements_are_rejected() {
        let in_without_values = DeviceSelector {
            match_expressions: vec![requirement("deviceType", "In", &[])],
            ..Default::default()
        };
        assert!(matches!(
            in_without_values.validate(),
            Err(SelectorError::InvalidValueCount { .. })
        ));

        let exists_with_values = DeviceSelector {
            match_expressions: vec![requirement("gpu", "Exists", &["x"])],
            ..Default::default()
        };
        assert!(exists_with_values.matches(&BTreeMap::new()).is_err());

        let unknown = DeviceSelector {
            match_expressions: vec![requirement("gpu", "Like", &["x"])],
            ..Default::default()
        };
        assert_eq!(
            unknown.validate(),
            Err(SelectorError::UnknownOperator("Like".to_string()))
        );
    }
}
