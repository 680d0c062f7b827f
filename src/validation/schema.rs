use std::sync::Arc;

use serde_json::{Map, Value};

use super::rule::{field, FieldCheck, Rule};
use crate::error::BuildError;
use crate::middleware::Middleware;
use crate::request::Location;
use crate::sanitizer::Sanitizer;

/// An ordered set of field checks declared by an action.
///
/// Schemas can be built in code or parsed from the JSON form:
///
/// ```
/// use blueprint::Schema;
/// use serde_json::json;
///
/// let schema = Schema::from_json(&json!({
///     "email": {"in": "body", "trim": true, "isEmail": {"errorMessage": "Enter a valid email"}},
///     "age":   {"in": "body", "optional": true, "isInt": {"options": {"min": 18}}, "toInt": true}
/// }))
/// .unwrap();
/// assert_eq!(schema.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Schema {
    checks: Vec<FieldCheck>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field check.
    pub fn field(mut self, check: FieldCheck) -> Self {
        self.checks.push(check);
        self
    }

    /// The declared checks, in order.
    pub fn checks(&self) -> &[FieldCheck] {
        &self.checks
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Returns true if no field is declared.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Compiles one middleware per field.
    pub(crate) fn compile(&self) -> Result<Vec<Arc<dyn Middleware>>, BuildError> {
        self.checks
            .iter()
            .map(|c| -> Result<Arc<dyn Middleware>, BuildError> { Ok(Arc::new(c.compile()?)) })
            .collect()
    }

    /// Parses the JSON form of a schema.
    ///
    /// Each field maps to an object whose keys are applied in order:
    /// `in` (a location or list of locations), `optional`, `errorMessage`
    /// (the field's default message), any rule (`exists`, `notEmpty`,
    /// `isEmail`, `isInt`, `isLength`, `isIn`, `matches`, `isBoolean`) and
    /// any sanitizer (`trim`, `escape`, `toInt`, ...). A rule's value is
    /// `true`, its options, or `{"options": .., "errorMessage": ..}`.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidRule` for unknown keys or malformed options.
    pub fn from_json(value: &Value) -> Result<Self, BuildError> {
        let fields = value
            .as_object()
            .ok_or_else(|| invalid("<root>", "schema must be an object"))?;

        let mut schema = Schema::new();
        for (name, decl) in fields {
            let decl = decl
                .as_object()
                .ok_or_else(|| invalid(name, "field declaration must be an object"))?;
            schema.checks.push(parse_field(name, decl)?);
        }
        Ok(schema)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> BuildError {
    BuildError::InvalidRule {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn parse_field(name: &str, decl: &Map<String, Value>) -> Result<FieldCheck, BuildError> {
    let mut check = field(name);

    for (key, spec) in decl {
        if spec == &Value::Bool(false) {
            continue;
        }

        match key.as_str() {
            "in" => check = check.in_locations(parse_locations(name, spec)?),
            "optional" => check = check.optional(),
            "errorMessage" => {
                let message = spec
                    .as_str()
                    .ok_or_else(|| invalid(name, "errorMessage must be a string"))?;
                check = check.with_message(message);
            }
            other => {
                let (options, message) = split_options(spec);
                if let Some(rule) = parse_rule(name, other, options)? {
                    check = check.rule(rule);
                    if let Some(message) = message {
                        check = check.with_message(message);
                    }
                } else if let Some(sanitizer) = Sanitizer::from_schema(other, options) {
                    check = check.sanitize(sanitizer);
                } else {
                    return Err(invalid(name, format!("unknown rule or sanitizer {}", other)));
                }
            }
        }
    }
    Ok(check)
}

fn parse_locations(name: &str, spec: &Value) -> Result<Vec<Location>, BuildError> {
    let parse_one = |v: &Value| {
        v.as_str()
            .and_then(Location::parse)
            .ok_or_else(|| invalid(name, format!("unknown location {}", v)))
    };

    match spec {
        Value::Array(items) => items.iter().map(parse_one).collect(),
        other => Ok(vec![parse_one(other)?]),
    }
}

/// Splits `{"options": .., "errorMessage": ..}` into its parts.
fn split_options(spec: &Value) -> (&Value, Option<&str>) {
    let message = spec.get("errorMessage").and_then(Value::as_str);
    let options = spec.get("options").unwrap_or(spec);
    (options, message)
}

fn parse_rule(name: &str, key: &str, options: &Value) -> Result<Option<Rule>, BuildError> {
    let int_bound = |k: &str| options.get(k).and_then(Value::as_i64);
    let len_bound = |k: &str| options.get(k).and_then(Value::as_u64).map(|n| n as usize);

    Ok(Some(match key {
        "exists" => Rule::Exists,
        "notEmpty" => Rule::NotEmpty,
        "isEmail" => Rule::IsEmail,
        "isBoolean" => Rule::IsBoolean,
        "isInt" => Rule::IsInt {
            min: int_bound("min"),
            max: int_bound("max"),
        },
        "isLength" => Rule::IsLength {
            min: len_bound("min"),
            max: len_bound("max"),
        },
        "isIn" => {
            let values = options
                .as_array()
                .ok_or_else(|| invalid(name, "isIn expects a list of values"))?;
            Rule::IsIn(
                values
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            )
        }
        "matches" => {
            let pattern = options
                .as_str()
                .ok_or_else(|| invalid(name, "matches expects a pattern string"))?;
            Rule::Matches(pattern.to_string())
        }
        _ => return Ok(None),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_rules_in_declared_order() {
        let schema = Schema::from_json(&json!({
            "email": {"in": "body", "trim": true, "isEmail": true},
            "role": {"in": ["query", "body"], "isIn": {"options": ["admin", "user"], "errorMessage": "bad role"}}
        }))
        .unwrap();

        let names: Vec<&str> = schema.checks().iter().map(FieldCheck::field_name).collect();
        assert_eq!(names, vec!["email", "role"]);
        assert_eq!(schema.checks()[1].locations(), &[Location::Query, Location::Body]);
    }

    #[test]
    fn rejects_unknown_rule() {
        let err = Schema::from_json(&json!({"x": {"isUuid": true}})).unwrap_err();
        assert!(err.to_string().contains("isUuid"));
    }

    #[test]
    fn rejects_unknown_location() {
        let err = Schema::from_json(&json!({"x": {"in": "cookies"}})).unwrap_err();
        assert!(err.to_string().contains("cookies"));
    }

    #[test]
    fn rejects_non_object_root() {
        assert!(Schema::from_json(&json!(["email"])).is_err());
    }

    #[test]
    fn false_disables_a_key() {
        let schema = Schema::from_json(&json!({"x": {"isEmail": false, "optional": false}})).unwrap();
        assert_eq!(schema.len(), 1);
    }

    #[tokio::test]
    async fn compiled_schema_validates() {
        let schema = Schema::from_json(&json!({
            "age": {"in": "body", "isInt": {"options": {"min": 18}, "errorMessage": "adults only"}}
        }))
        .unwrap();
        let chain = schema.compile().unwrap();

        let mut req = crate::request::Request::post("/").with_json(json!({"age": 12}));
        for mw in &chain {
            mw.handle(&mut req).await.unwrap();
        }
        assert_eq!(req.validation_errors()[0].message, "adults only");
    }
}
