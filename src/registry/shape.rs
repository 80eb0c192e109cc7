//! Declared argument shapes.
//!
//! Every tool declares the fields it accepts. The dispatcher checks incoming
//! arguments against the shape before any handler runs.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// FieldKind
// ============================================================================

/// JSON kind accepted for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Any string.
    String,
    /// A string that parses as an absolute URL.
    Url,
    /// Any JSON number.
    Number,
    /// A number with no fractional part.
    Integer,
    /// `true` or `false`.
    Boolean,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
    /// Anything, including `null`.
    Any,
}

impl FieldKind {
    /// Returns `true` if `value` is of this kind.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Url => value.as_str().is_some_and(|s| Url::parse(s).is_ok()),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Url => "url",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

// ============================================================================
// FieldSpec
// ============================================================================

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Accepted kind.
    pub kind: FieldKind,
    /// Whether the field must be present.
    pub required: bool,
}

// ============================================================================
// ArgumentShape
// ============================================================================

/// The set of fields a tool accepts.
///
/// `null` arguments are treated as an empty object. Fields not declared are
/// rejected unless [`allow_unknown`](Self::allow_unknown) is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArgumentShape {
    /// Declared fields, in declaration order.
    pub fields: Vec<FieldSpec>,
    /// Accept undeclared fields.
    #[serde(rename = "additionalProperties")]
    pub allow_unknown: bool,
}

impl ArgumentShape {
    /// Creates a shape with no fields.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a required field.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    /// Declares an optional field.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    /// Accepts fields that are not declared.
    #[inline]
    #[must_use]
    pub fn allow_unknown(mut self) -> Self {
        self.allow_unknown = true;
        self
    }

    /// Looks up a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Checks `args` against the shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArguments`] naming the first offending field.
    pub fn validate(&self, tool: &str, args: &Value) -> Result<()> {
        let empty = serde_json::Map::new();
        let object = match args {
            Value::Null => &empty,
            Value::Object(object) => object,
            other => {
                return Err(Error::invalid_arguments(
                    tool,
                    format!("expected an object, got {}", json_kind(other)),
                ));
            }
        };

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(Error::invalid_arguments(
                        tool,
                        format!("missing required field '{}'", field.name),
                    ));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.kind.matches(value) => {
                    return Err(Error::invalid_arguments(
                        tool,
                        format!("field '{}' must be {}", field.name, field.kind),
                    ));
                }
                Some(_) => {}
            }
        }

        if !self.allow_unknown
            && let Some(unknown) = object.keys().find(|key| self.field(key).is_none())
        {
            return Err(Error::invalid_arguments(
                tool,
                format!("unknown field '{unknown}'"),
            ));
        }

        Ok(())
    }
}

/// Names a value's JSON kind for error messages.
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================
