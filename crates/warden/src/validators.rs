//! Result shapes and the validators that enforce them.
//!
//! Scripts return arbitrary JSON; these validators are the only path from a
//! raw value to a typed result. They are pure, never panic, and produce
//! messages precise enough for the script author to fix their code - the
//! message always names the offending field and the expected type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Decision returned by a `packagePolicy` script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagePolicyResult {
    /// Whether the dependency is allowed
    pub allowed: bool,
    /// Human-readable findings that explain the decision
    pub reasons: Vec<String>,
}

impl PackagePolicyResult {
    /// The fail-closed default: denied, with the failure as the sole reason.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reasons: vec![reason.into()],
        }
    }
}

/// Status returned by `projectStatus` and `pullRequestCheck` scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatusResult {
    /// One of the organization's configured status names
    pub status: String,
    /// Violations supporting the status
    pub violations: Vec<String>,
}

impl ProjectStatusResult {
    /// The fail-closed default: the given fallback status with the failure
    /// as the sole violation.
    pub fn fallback(status: impl Into<String>, violation: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            violations: vec![violation.into()],
        }
    }
}

/// A structural mismatch between what a script returned and what its entry
/// point must return.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShapeError {
    /// The script returned something that is not an object.
    #[error("script must return an object, got {0}")]
    NotAnObject(String),
    /// A required field is absent.
    #[error("result is missing required field `{field}`")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },
    /// A field exists but has the wrong type.
    #[error("expected `{field}` to be {expected}, got {found}")]
    WrongType {
        /// Name of the offending field.
        field: &'static str,
        /// Type the validator requires.
        expected: &'static str,
        /// Type the script actually returned.
        found: String,
    },
    /// An element of a string array has the wrong type.
    #[error("every element of `{field}` must be a string, element {index} is {found}")]
    NonStringElement {
        /// Name of the array field.
        field: &'static str,
        /// Index of the offending element.
        index: usize,
        /// Type of the offending element.
        found: String,
    },
    /// `status` was present but empty.
    #[error("`status` must be a non-empty string")]
    EmptyStatus,
}

fn type_name(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "a boolean".to_string(),
        Value::Number(_) => "a number".to_string(),
        Value::String(_) => "a string".to_string(),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}

fn string_array(raw: &Value, field: &'static str) -> Result<Vec<String>, ShapeError> {
    let items = match raw {
        Value::Array(items) => items,
        other => {
            return Err(ShapeError::WrongType {
                field,
                expected: "an array of strings",
                found: type_name(other),
            });
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match item {
            Value::String(s) => out.push(s.clone()),
            other => {
                return Err(ShapeError::NonStringElement {
                    field,
                    index,
                    found: type_name(other),
                });
            }
        }
    }
    Ok(out)
}

fn require<'a>(
    object: &'a serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, ShapeError> {
    object.get(field).ok_or(ShapeError::MissingField { field })
}

fn as_object(raw: &Value) -> Result<&serde_json::Map<String, Value>, ShapeError> {
    raw.as_object()
        .ok_or_else(|| ShapeError::NotAnObject(type_name(raw)))
}

/// Validate a raw `packagePolicy` result: an object with boolean `allowed`
/// and an array `reasons` whose every element is a string.
pub fn validate_package_result(raw: &Value) -> Result<PackagePolicyResult, ShapeError> {
    let object = as_object(raw)?;
    let allowed = match require(object, "allowed")? {
        Value::Bool(b) => *b,
        other => {
            return Err(ShapeError::WrongType {
                field: "allowed",
                expected: "a boolean",
                found: type_name(other),
            });
        }
    };
    let reasons = string_array(require(object, "reasons")?, "reasons")?;
    Ok(PackagePolicyResult { allowed, reasons })
}

/// Validate a raw `projectStatus`/`pullRequestCheck` result: an object with
/// a non-empty string `status` and an array `violations` of strings.
pub fn validate_status_result(raw: &Value) -> Result<ProjectStatusResult, ShapeError> {
    let object = as_object(raw)?;
    let status = match require(object, "status")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::String(_) => return Err(ShapeError::EmptyStatus),
        other => {
            return Err(ShapeError::WrongType {
                field: "status",
                expected: "a non-empty string",
                found: type_name(other),
            });
        }
    };
    let violations = string_array(require(object, "violations")?, "violations")?;
    Ok(ProjectStatusResult { status, violations })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_package_result_passes_through_unchanged() {
        let raw = json!({"allowed": true, "reasons": []});
        let result = validate_package_result(&raw).unwrap();
        assert!(result.allowed);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_package_result_with_reasons() {
        let raw = json!({"allowed": false, "reasons": ["banned license", "low score"]});
        let result = validate_package_result(&raw).unwrap();
        assert!(!result.allowed);
        assert_eq!(result.reasons.len(), 2);
    }

    #[test]
    fn test_null_is_rejected() {
        let err = validate_package_result(&Value::Null).unwrap_err();
        assert_eq!(err, ShapeError::NotAnObject("null".to_string()));
    }

    #[test]
    fn test_single_string_reason_is_rejected() {
        // Authors routinely return a bare string; the message must name the
        // field so they can fix it.
        let raw = json!({"allowed": false, "reasons": "banned license"});
        let err = validate_package_result(&raw).unwrap_err();
        assert!(err.to_string().contains("`reasons`"));
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_non_string_reason_element_is_rejected() {
        let raw = json!({"allowed": false, "reasons": ["ok", 42]});
        let err = validate_package_result(&raw).unwrap_err();
        assert_eq!(
            err,
            ShapeError::NonStringElement {
                field: "reasons",
                index: 1,
                found: "a number".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_allowed_is_rejected() {
        let raw = json!({"reasons": []});
        let err = validate_package_result(&raw).unwrap_err();
        assert_eq!(err, ShapeError::MissingField { field: "allowed" });
    }

    #[test]
    fn test_truthy_allowed_is_not_coerced() {
        let raw = json!({"allowed": 1, "reasons": []});
        let err = validate_package_result(&raw).unwrap_err();
        assert!(err.to_string().contains("`allowed`"));
        assert!(err.to_string().contains("boolean"));
    }

    #[test]
    fn test_valid_status_result() {
        let raw = json!({"status": "compliant", "violations": []});
        let result = validate_status_result(&raw).unwrap();
        assert_eq!(result.status, "compliant");
    }

    #[test]
    fn test_empty_status_is_rejected() {
        let raw = json!({"status": "", "violations": []});
        let err = validate_status_result(&raw).unwrap_err();
        assert_eq!(err, ShapeError::EmptyStatus);
    }

    #[test]
    fn test_null_violations_is_rejected() {
        let raw = json!({"status": "compliant", "violations": null});
        let err = validate_status_result(&raw).unwrap_err();
        assert!(err.to_string().contains("`violations`"));
    }
}
