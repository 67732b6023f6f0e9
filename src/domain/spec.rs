//! Declarative action specifications.
//!
//! An `ActionSpec` names an action and lists the arguments it accepts.
//! Specs are parsed from a nested mapping (usually written inline with
//! `serde_json::json!` at registration time) and used by the executor to
//! validate bound arguments before an action is invoked.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Declared type of an action argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    String,
    Int,
    Float,
    Bool,
    Dict,
    List,
    Any,
}

impl ArgType {
    /// Parse a type tag, accepting the common aliases used in spec documents
    pub fn parse(tag: &str) -> Option<Self> {
        let parsed = match tag.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Self::String,
            "int" | "integer" => Self::Int,
            "float" | "number" => Self::Float,
            "bool" | "boolean" => Self::Bool,
            "dict" | "object" | "map" => Self::Dict,
            "list" | "array" => Self::List,
            "any" => Self::Any,
            _ => return None,
        };
        Some(parsed)
    }

    /// Canonical tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Dict => "dict",
            Self::List => "list",
            Self::Any => "any",
        }
    }

    /// Check a runtime value against this type.
    ///
    /// `Any` accepts everything, `Float` accepts integers (widening),
    /// nothing else is coerced.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Dict => value.is_object(),
            Self::List => value.is_array(),
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Name of the runtime type of a JSON value, for error messages
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// What to do with arguments an action does not declare
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraArgs {
    /// Drop unknown named arguments, keep trailing positional values
    #[default]
    Ignore,

    /// Fail binding on any unknown named argument or surplus positional value
    Reject,
}

/// A single declared argument
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionArg {
    pub name: String,

    pub description: String,

    #[serde(rename = "type")]
    pub arg_type: ArgType,

    pub required: bool,
}

impl ActionArg {
    pub fn new(name: impl Into<String>, arg_type: ArgType, required: bool) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            arg_type,
            required,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Declared name, description and argument list of an action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSpec {
    pub name: String,

    pub description: String,

    pub arguments: Vec<ActionArg>,

    pub extra_arguments: ExtraArgs,
}

/// Raw document shape, before field-level checks
#[derive(Debug, Deserialize)]
struct RawSpec {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    arguments: Vec<RawArg>,
    #[serde(default)]
    extra_arguments: ExtraArgs,
}

#[derive(Debug, Deserialize)]
struct RawArg {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "type", default)]
    arg_type: Option<String>,
    #[serde(default)]
    required: bool,
}

impl ActionSpec {
    /// Create an empty spec with the given name
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arguments: Vec::new(),
            extra_arguments: ExtraArgs::default(),
        }
    }

    /// Append an argument (builder style, for specs written in code)
    pub fn with_argument(mut self, arg: ActionArg) -> Self {
        self.arguments.push(arg);
        self
    }

    pub fn with_extra_arguments(mut self, policy: ExtraArgs) -> Self {
        self.extra_arguments = policy;
        self
    }

    /// Parse a full spec document (`name`, `description`, `arguments`)
    pub fn from_value(doc: &Value) -> Result<Self, SpecError> {
        let raw: RawSpec = serde_json::from_value(doc.clone())?;
        Self::from_raw(raw)
    }

    /// Parse a registration document where the name is given separately
    pub fn declare(name: &str, doc: &Value) -> Result<Self, SpecError> {
        let mut raw: RawSpec = serde_json::from_value(doc.clone())?;
        raw.name = Some(name.to_string());
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSpec) -> Result<Self, SpecError> {
        let name = raw
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(SpecError::MissingName)?;

        let mut seen = HashSet::new();
        let mut arguments = Vec::with_capacity(raw.arguments.len());

        for (index, arg) in raw.arguments.into_iter().enumerate() {
            let arg_name = arg
                .name
                .filter(|n| !n.trim().is_empty())
                .ok_or(SpecError::MissingArgumentField {
                    index,
                    field: "name",
                })?;
            let tag = arg.arg_type.ok_or(SpecError::MissingArgumentField {
                index,
                field: "type",
            })?;
            let arg_type = ArgType::parse(&tag).ok_or_else(|| SpecError::UnknownType {
                argument: arg_name.clone(),
                tag: tag.clone(),
            })?;

            if !seen.insert(arg_name.clone()) {
                return Err(SpecError::DuplicateArgument {
                    action: name,
                    argument: arg_name,
                });
            }

            arguments.push(ActionArg {
                name: arg_name,
                description: arg.description.unwrap_or_default(),
                arg_type,
                required: arg.required,
            });
        }

        Ok(Self {
            name,
            description: raw.description.unwrap_or_default(),
            arguments,
            extra_arguments: raw.extra_arguments,
        })
    }

    /// Serialize back into the document shape accepted by `from_value`
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Look up a declared argument
    pub fn argument(&self, name: &str) -> Option<&ActionArg> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// Check fully bound arguments against the declaration.
    ///
    /// All missing required arguments are reported together; otherwise the
    /// first type mismatch in declaration order is returned. `null` is
    /// treated as absent.
    pub fn validate(&self, bound: &Map<String, Value>) -> Result<(), ArgumentError> {
        let missing: Vec<String> = self
            .arguments
            .iter()
            .filter(|arg| arg.required)
            .filter(|arg| bound.get(&arg.name).map_or(true, Value::is_null))
            .map(|arg| arg.name.clone())
            .collect();

        if !missing.is_empty() {
            return Err(ArgumentError::Missing(missing));
        }

        for arg in &self.arguments {
            match bound.get(&arg.name) {
                None | Some(Value::Null) => {}
                Some(value) if arg.arg_type.accepts(value) => {}
                Some(value) => {
                    return Err(ArgumentError::TypeMismatch {
                        name: arg.name.clone(),
                        expected: arg.arg_type,
                        found: value_kind(value),
                    })
                }
            }
        }

        Ok(())
    }
}

/// Malformed spec documents
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("action spec has no name")]
    MissingName,

    #[error("argument #{index} is missing '{field}'")]
    MissingArgumentField { index: usize, field: &'static str },

    #[error("argument '{argument}' declared twice in action '{action}'")]
    DuplicateArgument { action: String, argument: String },

    #[error("argument '{argument}' has unknown type '{tag}'")]
    UnknownType { argument: String, tag: String },

    #[error("malformed action spec: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Bound arguments that do not satisfy a spec
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArgumentError {
    #[error("missing required argument(s): {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("argument '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: ArgType,
        found: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_spec() -> Value {
        json!({
            "name": "file.write",
            "description": "Write content to a file.",
            "arguments": [
                {"name": "file", "description": "File path", "type": "string", "required": true},
                {"name": "mode", "description": "Write mode", "type": "string", "required": false},
                {"name": "content", "description": "Content", "type": "any", "required": true}
            ]
        })
    }

    #[test]
    fn test_spec_parsing() {
        let spec = ActionSpec::from_value(&write_spec()).unwrap();

        assert_eq!(spec.name, "file.write");
        assert_eq!(spec.arguments.len(), 3);
        assert_eq!(spec.arguments[0].arg_type, ArgType::String);
        assert!(spec.arguments[0].required);
        assert!(!spec.arguments[1].required);
        assert_eq!(spec.extra_arguments, ExtraArgs::Ignore);
    }

    #[test]
    fn test_spec_parsing_is_idempotent() {
        let first = ActionSpec::from_value(&write_spec()).unwrap();
        let second = ActionSpec::from_value(&first.to_value()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_declare_injects_name() {
        let spec = ActionSpec::declare(
            "file.exists",
            &json!({"description": "Test if file exists.", "arguments": []}),
        )
        .unwrap();
        assert_eq!(spec.name, "file.exists");
    }

    #[test]
    fn test_missing_name() {
        let result = ActionSpec::from_value(&json!({"description": "nameless"}));
        assert!(matches!(result, Err(SpecError::MissingName)));
    }

    #[test]
    fn test_argument_missing_type() {
        let result = ActionSpec::from_value(&json!({
            "name": "x",
            "arguments": [{"name": "a"}]
        }));
        assert!(matches!(
            result,
            Err(SpecError::MissingArgumentField { index: 0, field: "type" })
        ));
    }

    #[test]
    fn test_duplicate_argument() {
        let result = ActionSpec::from_value(&json!({
            "name": "x",
            "arguments": [
                {"name": "a", "type": "int"},
                {"name": "a", "type": "string"}
            ]
        }));
        assert!(matches!(result, Err(SpecError::DuplicateArgument { .. })));
    }

    #[test]
    fn test_type_aliases() {
        assert_eq!(ArgType::parse("str"), Some(ArgType::String));
        assert_eq!(ArgType::parse("Integer"), Some(ArgType::Int));
        assert_eq!(ArgType::parse("object"), Some(ArgType::Dict));
        assert_eq!(ArgType::parse("array"), Some(ArgType::List));
        assert_eq!(ArgType::parse("tuple"), None);
    }

    #[test]
    fn test_validate_reports_all_missing() {
        let spec = ActionSpec::from_value(&write_spec()).unwrap();
        let err = spec.validate(&Map::new()).unwrap_err();
        assert_eq!(
            err,
            ArgumentError::Missing(vec!["file".to_string(), "content".to_string()])
        );
    }

    #[test]
    fn test_validate_null_counts_as_missing() {
        let spec = ActionSpec::from_value(&write_spec()).unwrap();
        let bound = json!({"file": null, "content": "x", "mode": null});
        let err = spec.validate(bound.as_object().unwrap()).unwrap_err();
        assert_eq!(err, ArgumentError::Missing(vec!["file".to_string()]));
    }

    #[test]
    fn test_validate_type_rules() {
        let spec = ActionSpec::new("math", "")
            .with_argument(ActionArg::new("ratio", ArgType::Float, true))
            .with_argument(ActionArg::new("count", ArgType::Int, true));

        let widened = json!({"ratio": 2, "count": 3});
        assert!(spec.validate(widened.as_object().unwrap()).is_ok());

        let narrowed = json!({"ratio": 2.5, "count": 3.5});
        let err = spec.validate(narrowed.as_object().unwrap()).unwrap_err();
        assert_eq!(
            err,
            ArgumentError::TypeMismatch {
                name: "count".to_string(),
                expected: ArgType::Int,
                found: "float",
            }
        );

        let stringly = json!({"ratio": "2", "count": 3});
        assert!(spec.validate(stringly.as_object().unwrap()).is_err());
    }
}
