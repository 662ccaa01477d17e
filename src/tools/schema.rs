//! Declarative input schemas for tools.
//!
//! An [`InputSchema`] is both the validator the dispatcher runs before a
//! handler is invoked and the source of the `inputSchema` JSON advertised by
//! `tools/list`, so the two can never drift apart.

use serde_json::{json, Map, Value};

use crate::error::RpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Boolean,
}

impl FieldType {
    /// JSON Schema type name, also used as `expected` in InvalidParams data.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub description: &'static str,
    /// Closed set of accepted string values; empty means unrestricted.
    pub allowed: &'static [&'static str],
}

/// Accepted arguments of one tool.
#[derive(Debug, Clone, Default)]
pub struct InputSchema {
    fields: Vec<FieldSpec>,
}

impl InputSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(self, name: &'static str, ty: FieldType, description: &'static str) -> Self {
        self.field(name, ty, true, description, &[])
    }

    #[must_use]
    pub fn optional(self, name: &'static str, ty: FieldType, description: &'static str) -> Self {
        self.field(name, ty, false, description, &[])
    }

    /// Optional string restricted to `allowed` (case-insensitive).
    #[must_use]
    pub fn one_of(
        self,
        name: &'static str,
        allowed: &'static [&'static str],
        description: &'static str,
    ) -> Self {
        self.field(name, FieldType::String, false, description, allowed)
    }

    fn field(
        mut self,
        name: &'static str,
        ty: FieldType,
        required: bool,
        description: &'static str,
        allowed: &'static [&'static str],
    ) -> Self {
        self.fields.push(FieldSpec {
            name,
            ty,
            required,
            description,
            allowed,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Check `params` and return the arguments the handler will see.
    ///
    /// Required fields must be present and non-null; present fields must
    /// have the declared type. Optional fields given as `null` are dropped.
    /// Undeclared fields are rejected when `strict`, silently dropped
    /// otherwise. Every failure is InvalidParams naming the field.
    pub fn validate(
        &self,
        params: &Map<String, Value>,
        strict: bool,
    ) -> Result<Map<String, Value>, RpcError> {
        let mut accepted = Map::new();

        for field in &self.fields {
            match params.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(RpcError::invalid_params(
                        field.name,
                        field.ty.name(),
                        format!("missing required parameter '{}'", field.name),
                    ));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.ty.matches(value) => {
                    return Err(RpcError::invalid_params(
                        field.name,
                        field.ty.name(),
                        format!("parameter '{}' must be a {}", field.name, field.ty.name()),
                    ));
                }
                Some(value) => {
                    if !field.allowed.is_empty() {
                        let given = value.as_str().unwrap_or_default();
                        if !field.allowed.iter().any(|a| a.eq_ignore_ascii_case(given)) {
                            return Err(RpcError::invalid_params(
                                field.name,
                                &field.allowed.join("|"),
                                format!(
                                    "parameter '{}' must be one of: {}",
                                    field.name,
                                    field.allowed.join(", ")
                                ),
                            ));
                        }
                    }
                    accepted.insert(field.name.to_string(), value.clone());
                }
            }
        }

        if strict {
            if let Some(unknown) = params
                .keys()
                .find(|k| !self.fields.iter().any(|f| f.name == k.as_str()))
            {
                return Err(RpcError::invalid_params(
                    unknown,
                    "undeclared",
                    format!("unknown parameter '{unknown}'"),
                ));
            }
        }

        Ok(accepted)
    }

    /// JSON Schema object for `tools/list`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        for f in &self.fields {
            let mut prop = json!({ "type": f.ty.name(), "description": f.description });
            if !f.allowed.is_empty() {
                prop["enum"] = json!(f.allowed);
            }
            properties.insert(f.name.to_string(), prop);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();

        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": false,
        });
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn schema() -> InputSchema {
        InputSchema::new()
            .required("rule_uuid", FieldType::String, "Rule to delete")
            .optional("apply", FieldType::Boolean, "Apply immediately")
            .optional("limit", FieldType::Integer, "Max rows")
            .one_of("action", &["pass", "block"], "Rule action")
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_required_names_field_and_type() {
        let err = schema().validate(&params(json!({"apply": true})), true).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert_eq!(err.data, Some(json!({"field": "rule_uuid", "expected": "string"})));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = schema()
            .validate(&params(json!({"rule_uuid": "x", "limit": "ten"})), true)
            .unwrap_err();
        assert_eq!(err.data.unwrap()["field"], "limit");
    }

    #[test]
    fn null_optional_is_dropped() {
        let ok = schema()
            .validate(&params(json!({"rule_uuid": "x", "apply": null})), true)
            .unwrap();
        assert!(!ok.contains_key("apply"));
    }

    #[test]
    fn unknown_fields_follow_policy() {
        let p = params(json!({"rule_uuid": "x", "colour": "red"}));
        let err = schema().validate(&p, true).unwrap_err();
        assert_eq!(err.data.unwrap()["field"], "colour");

        let ok = schema().validate(&p, false).unwrap();
        assert_eq!(ok.len(), 1);
    }

    #[test]
    fn enum_values_checked_case_insensitively() {
        let ok = schema().validate(&params(json!({"rule_uuid": "x", "action": "BLOCK"})), true);
        assert!(ok.is_ok());
        let err = schema()
            .validate(&params(json!({"rule_uuid": "x", "action": "allow"})), true)
            .unwrap_err();
        assert_eq!(err.data.unwrap()["expected"], "pass|block");
    }

    #[test]
    fn json_schema_lists_required_and_enum() {
        let js = schema().to_json();
        assert_eq!(js["required"], json!(["rule_uuid"]));
        assert_eq!(js["properties"]["limit"]["type"], "integer");
        assert_eq!(js["properties"]["action"]["enum"], json!(["pass", "block"]));
        assert!(InputSchema::new().to_json().get("required").is_none());
    }
}
