//! Structural payload schemas
//!
//! A small declarative subset of JSON Schema, enough for the OCPP 1.6 message
//! definitions: typed fields, required flags, string length limits, enums and
//! nested objects/arrays. Schemas are built in code and registered per action
//! in a [`SchemaRegistry`].

use std::collections::HashMap;
use std::fmt;

use chrono::DateTime;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub enum FieldType {
    String { max_len: Option<usize> },
    Integer,
    Number,
    Boolean,
    Enum(&'static [&'static str]),
    /// RFC 3339 timestamp.
    DateTime,
    Object(Schema),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn string(max_len: usize) -> Self {
        Self::String {
            max_len: Some(max_len),
        }
    }

    pub fn any_string() -> Self {
        Self::String { max_len: None }
    }

    pub fn array_of(item: FieldType) -> Self {
        Self::Array(Box::new(item))
    }

    fn check(&self, value: &Value, path: &str, out: &mut Vec<Violation>) {
        match self {
            Self::String { max_len } => match value.as_str() {
                Some(s) => {
                    if let Some(max) = max_len {
                        if s.chars().count() > *max {
                            out.push(Violation::new(path, format!("longer than {} characters", max)));
                        }
                    }
                }
                None => out.push(Violation::new(path, "expected string")),
            },
            Self::Integer => {
                if !(value.is_i64() || value.is_u64()) {
                    out.push(Violation::new(path, "expected integer"));
                }
            }
            Self::Number => {
                if !value.is_number() {
                    out.push(Violation::new(path, "expected number"));
                }
            }
            Self::Boolean => {
                if !value.is_boolean() {
                    out.push(Violation::new(path, "expected boolean"));
                }
            }
            Self::Enum(allowed) => match value.as_str() {
                Some(s) if allowed.contains(&s) => {}
                Some(s) => out.push(Violation::new(path, format!("'{}' is not an allowed value", s))),
                None => out.push(Violation::new(path, "expected string")),
            },
            Self::DateTime => match value.as_str() {
                Some(s) if DateTime::parse_from_rfc3339(s).is_ok() => {}
                Some(_) => out.push(Violation::new(path, "expected RFC 3339 date-time")),
                None => out.push(Violation::new(path, "expected date-time string")),
            },
            Self::Object(schema) => match value.as_object() {
                Some(map) => schema.check_object(map, path, out),
                None => out.push(Violation::new(path, "expected object")),
            },
            Self::Array(item) => match value.as_array() {
                Some(items) => {
                    for (i, element) in items.iter().enumerate() {
                        item.check(element, &format!("{}[{}]", path, i), out);
                    }
                }
                None => out.push(Violation::new(path, "expected array")),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Field {
    name: &'static str,
    ty: FieldType,
    required: bool,
}

/// Object schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
    /// Reject properties the schema does not name.
    closed: bool,
}

impl Schema {
    pub fn object() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &'static str, ty: FieldType) -> Self {
        self.fields.push(Field {
            name,
            ty,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &'static str, ty: FieldType) -> Self {
        self.fields.push(Field {
            name,
            ty,
            required: false,
        });
        self
    }

    /// Disallow additional properties.
    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }

    pub fn validate(&self, payload: &Value) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        match payload.as_object() {
            Some(map) => self.check_object(map, "", &mut violations),
            None => violations.push(Violation::new("", "expected object")),
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn check_object(&self, map: &Map<String, Value>, path: &str, out: &mut Vec<Violation>) {
        for field in &self.fields {
            let field_path = join(path, field.name);
            match map.get(field.name) {
                // Optional fields sent as null are treated as absent.
                Some(Value::Null) | None if !field.required => {}
                Some(Value::Null) | None => out.push(Violation::new(&field_path, "is required")),
                Some(value) => field.ty.check(value, &field_path, out),
            }
        }
        if self.closed {
            for key in map.keys() {
                if !self.fields.iter().any(|f| f.name == key.as_str()) {
                    out.push(Violation::new(&join(path, key), "is not allowed"));
                }
            }
        }
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

/// One schema violation, addressed by a dotted path into the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "payload {}", self.message)
        } else {
            write!(f, "{} {}", self.path, self.message)
        }
    }
}

/// Request and response schemas by action name.
///
/// An action without a schema is not an error: validation is skipped.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    requests: HashMap<String, Schema>,
    responses: HashMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request(mut self, action: &str, schema: Schema) -> Self {
        self.requests.insert(action.to_string(), schema);
        self
    }

    pub fn with_response(mut self, action: &str, schema: Schema) -> Self {
        self.responses.insert(action.to_string(), schema);
        self
    }

    pub fn has_request_schema(&self, action: &str) -> bool {
        self.requests.contains_key(action)
    }

    pub fn validate_request(&self, action: &str, payload: &Value) -> Result<(), Vec<Violation>> {
        match self.requests.get(action) {
            Some(schema) => schema.validate(payload),
            None => Ok(()),
        }
    }

    pub fn validate_response(&self, action: &str, payload: &Value) -> Result<(), Vec<Violation>> {
        match self.responses.get(action) {
            Some(schema) => schema.validate(payload),
            None => Ok(()),
        }
    }
}

/// Render violations as one human-readable line.
pub fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
