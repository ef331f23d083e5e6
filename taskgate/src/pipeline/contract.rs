//! Declarative output-shape contracts.
//!
//! A contract is a list of field rules evaluated by a pure function. No
//! reflection, no schema engine: each rule names a top-level field and the
//! shape its value must have.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Expected shape of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum FieldShape {
    /// Any value, including null.
    Any,
    /// A string.
    String,
    /// A string with at least one non-whitespace character.
    NonEmptyString,
    /// A number.
    Number,
    /// A boolean.
    Bool,
    /// An array.
    Array,
    /// An array with at least one element.
    NonEmptyArray,
    /// An object.
    Object,
    /// A string drawn from a fixed set.
    OneOf(Vec<String>),
}

impl FieldShape {
    /// Creates a [`FieldShape::OneOf`] from string slices.
    #[must_use]
    pub fn one_of(values: &[&str]) -> Self {
        Self::OneOf(values.iter().map(|v| (*v).to_string()).collect())
    }

    fn check(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::NonEmptyString => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::NonEmptyArray => value.as_array().is_some_and(|a| !a.is_empty()),
            Self::Object => value.is_object(),
            Self::OneOf(allowed) => value
                .as_str()
                .is_some_and(|s| allowed.iter().any(|a| a == s)),
        }
    }
}

impl fmt::Display for FieldShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any value"),
            Self::String => f.write_str("a string"),
            Self::NonEmptyString => f.write_str("a non-empty string"),
            Self::Number => f.write_str("a number"),
            Self::Bool => f.write_str("a boolean"),
            Self::Array => f.write_str("an array"),
            Self::NonEmptyArray => f.write_str("a non-empty array"),
            Self::Object => f.write_str("an object"),
            Self::OneOf(values) => write!(f, "one of [{}]", values.join(", ")),
        }
    }
}

/// A rule for one top-level field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Field name.
    pub field: String,
    /// Expected shape.
    pub shape: FieldShape,
    /// Whether the field must be present.
    pub required: bool,
}

/// Required output fields of a stage.
///
/// An empty contract accepts any value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageContract {
    rules: Vec<FieldRule>,
}

impl StageContract {
    /// Creates a contract with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required field.
    #[must_use]
    pub fn require(mut self, field: impl Into<String>, shape: FieldShape) -> Self {
        self.rules.push(FieldRule {
            field: field.into(),
            shape,
            required: true,
        });
        self
    }

    /// Adds a field that is checked only when present.
    #[must_use]
    pub fn optional(mut self, field: impl Into<String>, shape: FieldShape) -> Self {
        self.rules.push(FieldRule {
            field: field.into(),
            shape,
            required: false,
        });
        self
    }

    /// The contract's rules in declaration order.
    #[must_use]
    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// Returns true if the contract has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Checks `output` against every rule.
    ///
    /// Returns every violation found, not just the first.
    pub fn validate(&self, output: &Value) -> Result<(), Vec<String>> {
        if self.rules.is_empty() {
            return Ok(());
        }
        let Some(object) = output.as_object() else {
            return Err(vec![format!(
                "output must be a JSON object, got {}",
                type_name(output)
            )]);
        };

        let reasons: Vec<String> = self
            .rules
            .iter()
            .filter_map(|rule| match object.get(&rule.field) {
                None if rule.required => Some(format!("missing required field '{}'", rule.field)),
                None => None,
                Some(value) if rule.shape.check(value) => None,
                Some(value) => Some(format!(
                    "field '{}' must be {}, got {}",
                    rule.field,
                    rule.shape,
                    describe(value)
                )),
            })
            .collect();

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(reasons)
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        other => type_name(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn classify_contract() -> StageContract {
        StageContract::new()
            .require("kind", FieldShape::one_of(&["question", "task", "chat"]))
            .require("confidence", FieldShape::Number)
            .optional("notes", FieldShape::String)
    }

    #[test]
    fn test_valid_output_passes() {
        let output = json!({"kind": "task", "confidence": 0.9});
        assert!(classify_contract().validate(&output).is_ok());
    }

    #[test]
    fn test_reports_every_violation() {
        let output = json!({"kind": "poem", "notes": 3});
        let reasons = classify_contract().validate(&output).unwrap_err();
        assert_eq!(
            reasons,
            vec![
                "field 'kind' must be one of [question, task, chat], got \"poem\"".to_string(),
                "missing required field 'confidence'".to_string(),
                "field 'notes' must be a string, got a number".to_string(),
            ]
        );
    }

    #[test]
    fn test_non_object_output_rejected() {
        let reasons = classify_contract().validate(&json!("task")).unwrap_err();
        assert_eq!(reasons, vec!["output must be a JSON object, got a string".to_string()]);
    }

    #[test]
    fn test_empty_contract_accepts_anything() {
        let contract = StageContract::new();
        assert!(contract.is_empty());
        assert!(contract.validate(&json!(null)).is_ok());
        assert!(contract.validate(&json!([1, 2])).is_ok());
    }

    #[test]
    fn test_shapes() {
        assert!(FieldShape::NonEmptyString.check(&json!("x")));
        assert!(!FieldShape::NonEmptyString.check(&json!("  ")));
        assert!(FieldShape::NonEmptyArray.check(&json!([1])));
        assert!(!FieldShape::NonEmptyArray.check(&json!([])));
        assert!(FieldShape::Object.check(&json!({})));
        assert!(FieldShape::Bool.check(&json!(false)));
        assert!(FieldShape::Any.check(&json!(null)));
        assert!(!FieldShape::Number.check(&json!("1")));
    }

    #[test]
    fn test_contract_deserializes() {
        let contract: StageContract = serde_json::from_value(json!({
            "rules": [
                {"field": "kind", "shape": {"type": "one_of", "values": ["a", "b"]}, "required": true},
                {"field": "body", "shape": {"type": "non_empty_string"}, "required": true}
            ]
        }))
        .unwrap();
        assert_eq!(contract.rules().len(), 2);
        assert!(contract.validate(&json!({"kind": "a", "body": "x"})).is_ok());
    }
}
