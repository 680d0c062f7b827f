//! Field sanitizers and the legacy `sanitize` declaration of actions.
//!
//! A [`Sanitizer`] rewrites one JSON value in place of the original request
//! field. Sanitizers normally run as steps of a
//! [`FieldCheck`](crate::FieldCheck); the standalone [`SanitizeSchema`] form
//! is kept for actions that still declare `sanitize` separately.

use std::fmt;

use async_trait::async_trait;
use serde_json::{Number, Value};

use crate::error::{BuildError, HttpError};
use crate::middleware::{Flow, Middleware};
use crate::request::{Location, Request};
use crate::validation::FieldError;

/// Error returned when a sanitizer cannot convert a value.
///
/// The message describes the constraint that was violated; it never
/// contains the rejected input.
///
/// # Examples
///
/// ```
/// use blueprint::{SanitizationError, SanitizationErrorKind};
///
/// let error = SanitizationError::new(SanitizationErrorKind::TooLong, "value exceeds 10 characters");
/// assert_eq!(error.kind(), SanitizationErrorKind::TooLong);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizationError {
    kind: SanitizationErrorKind,
    message: String,
}

impl SanitizationError {
    /// Creates a new sanitization error.
    pub fn new(kind: SanitizationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SanitizationErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SanitizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sanitization failed ({}): {}", self.kind, self.message)
    }
}

impl std::error::Error for SanitizationError {}

/// Kind of sanitization error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizationErrorKind {
    /// Value cannot be converted to the requested type
    InvalidInput,
    /// Value is not in the expected format
    MalformedInput,
    /// Value is empty or contains only whitespace
    Empty,
    /// Value exceeds the maximum allowed length
    TooLong,
    /// Value contains control or non-printable characters
    ContainsControlChars,
}

impl fmt::Display for SanitizationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid input"),
            Self::MalformedInput => write!(f, "malformed input"),
            Self::Empty => write!(f, "empty input"),
            Self::TooLong => write!(f, "input too long"),
            Self::ContainsControlChars => write!(f, "contains control characters"),
        }
    }
}

/// A conversion applied to a request field.
///
/// String sanitizers leave non-string values untouched, except the type
/// conversions (`ToInt`, `ToBoolean`) which accept numbers and booleans too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sanitizer {
    /// Strip leading and trailing whitespace
    Trim,
    /// Replace HTML-significant characters with entities
    Escape,
    /// Lowercase the string
    ToLowerCase,
    /// Uppercase the string
    ToUpperCase,
    /// Convert to an integer; fails on non-numeric input
    ToInt,
    /// Convert to a boolean; `""`, `"0"` and `"false"` are false
    ToBoolean,
    /// Lowercase an email address and canonicalise Gmail local parts
    NormalizeEmail,
    /// Trim, then reject empty values, control characters and values
    /// longer than `max_len` characters
    StripControl {
        /// Maximum length after trimming
        max_len: usize,
    },
}

impl Sanitizer {
    /// Name used in declarative schemas (`"toInt"`, `"normalizeEmail"`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Sanitizer::Trim => "trim",
            Sanitizer::Escape => "escape",
            Sanitizer::ToLowerCase => "toLowerCase",
            Sanitizer::ToUpperCase => "toUpperCase",
            Sanitizer::ToInt => "toInt",
            Sanitizer::ToBoolean => "toBoolean",
            Sanitizer::NormalizeEmail => "normalizeEmail",
            Sanitizer::StripControl { .. } => "stripControl",
        }
    }

    /// Parses a sanitizer declared in a schema.
    ///
    /// `options` is the value given for the key; `stripControl` reads
    /// `max_len` from it (`{"stripControl": {"max_len": 64}}`), defaulting to 256.
    pub fn from_schema(name: &str, options: &Value) -> Option<Self> {
        Some(match name {
            "trim" => Sanitizer::Trim,
            "escape" => Sanitizer::Escape,
            "toLowerCase" => Sanitizer::ToLowerCase,
            "toUpperCase" => Sanitizer::ToUpperCase,
            "toInt" => Sanitizer::ToInt,
            "toBoolean" => Sanitizer::ToBoolean,
            "normalizeEmail" => Sanitizer::NormalizeEmail,
            "stripControl" => Sanitizer::StripControl {
                max_len: options
                    .get("max_len")
                    .and_then(Value::as_u64)
                    .map_or(256, |n| n as usize),
            },
            _ => return None,
        })
    }

    /// Applies the sanitizer.
    ///
    /// # Errors
    ///
    /// Returns a `SanitizationError` when the value cannot be converted.
    pub fn apply(&self, value: Value) -> Result<Value, SanitizationError> {
        match self {
            Sanitizer::Trim => Ok(map_str(value, |s| s.trim().to_string())),
            Sanitizer::Escape => Ok(map_str(value, escape)),
            Sanitizer::ToLowerCase => Ok(map_str(value, |s| s.to_lowercase())),
            Sanitizer::ToUpperCase => Ok(map_str(value, |s| s.to_uppercase())),
            Sanitizer::ToInt => to_int(value),
            Sanitizer::ToBoolean => Ok(to_boolean(value)),
            Sanitizer::NormalizeEmail => match value {
                Value::String(s) => normalize_email(&s).map(Value::String),
                other => Ok(other),
            },
            Sanitizer::StripControl { max_len } => match value {
                Value::String(s) => strip_control(&s, *max_len).map(Value::String),
                other => Ok(other),
            },
        }
    }
}

fn map_str(value: Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            '\\' => out.push_str("&#x5C;"),
            '`' => out.push_str("&#96;"),
            c => out.push(c),
        }
    }
    out
}

fn to_int(value: Value) -> Result<Value, SanitizationError> {
    let invalid = || SanitizationError::new(SanitizationErrorKind::InvalidInput, "not an integer");

    match value {
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return Ok(Value::Number(n));
            }
            // 2^63: the first float past `i64::MAX`.
            const BOUND: f64 = 9_223_372_036_854_775_808.0;
            let truncated = n.as_f64().map(f64::trunc).ok_or_else(invalid)?;
            if !(-BOUND..BOUND).contains(&truncated) {
                return Err(SanitizationError::new(
                    SanitizationErrorKind::InvalidInput,
                    "integer out of range",
                ));
            }
            Ok(Value::Number(Number::from(truncated as i64)))
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| invalid()),
        Value::Bool(b) => Ok(Value::Number(Number::from(i64::from(b)))),
        _ => Err(invalid()),
    }
}

fn to_boolean(value: Value) -> Value {
    let truthy = match &value {
        Value::Bool(b) => *b,
        Value::String(s) => {
            let s = s.trim();
            !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
        }
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    };
    Value::Bool(truthy)
}

fn normalize_email(raw: &str) -> Result<String, SanitizationError> {
    let lowered = raw.trim().to_lowercase();
    let Some((local, domain)) = lowered.rsplit_once('@') else {
        return Err(SanitizationError::new(
            SanitizationErrorKind::MalformedInput,
            "not an email address",
        ));
    };
    if local.is_empty() || domain.is_empty() {
        return Err(SanitizationError::new(
            SanitizationErrorKind::MalformedInput,
            "not an email address",
        ));
    }

    if domain == "gmail.com" || domain == "googlemail.com" {
        let local = local.split('+').next().unwrap_or(local).replace('.', "");
        return Ok(format!("{}@gmail.com", local));
    }
    Ok(format!("{}@{}", local, domain))
}

fn strip_control(raw: &str, max_len: usize) -> Result<String, SanitizationError> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err(SanitizationError::new(
            SanitizationErrorKind::Empty,
            "value is empty or contains only whitespace",
        ));
    }

    if trimmed.chars().any(|c| c.is_control()) {
        return Err(SanitizationError::new(
            SanitizationErrorKind::ContainsControlChars,
            "value contains control or non-printable characters",
        ));
    }

    if trimmed.chars().count() > max_len {
        return Err(SanitizationError::new(
            SanitizationErrorKind::TooLong,
            format!("value exceeds maximum length of {}", max_len),
        ));
    }

    Ok(trimmed.to_string())
}

/// Applies `sanitizers` to one field of the request.
///
/// Missing fields are skipped. A failing conversion records a validation
/// error for the field and leaves the value unchanged.
pub(crate) fn sanitize_field(
    req: &mut Request,
    field: &str,
    locations: &[Location],
    sanitizers: &[Sanitizer],
) {
    let Some((location, mut value)) = locations
        .iter()
        .find_map(|loc| req.field(*loc, field).map(|v| (*loc, v)))
    else {
        return;
    };

    let original = value.clone();
    for sanitizer in sanitizers {
        match sanitizer.apply(value) {
            Ok(next) => value = next,
            Err(e) => {
                req.add_validation_error(FieldError::new(field, location, e.message(), original));
                return;
            }
        }
    }
    req.set_field(location, field, value);
}

/// Per-field sanitizers declared separately from validation.
///
/// Prefer declaring sanitizers on a [`FieldCheck`](crate::FieldCheck);
/// actions that return a `SanitizeSchema` are compiled with a deprecation
/// warning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizeSchema {
    fields: Vec<SanitizeField>,
}

#[derive(Debug, Clone, PartialEq)]
struct SanitizeField {
    name: String,
    location: Option<Location>,
    sanitizers: Vec<Sanitizer>,
}

impl SanitizeSchema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitizes `name` wherever it is found in the request.
    pub fn field(mut self, name: &str, sanitizers: impl IntoIterator<Item = Sanitizer>) -> Self {
        self.fields.push(SanitizeField {
            name: name.to_string(),
            location: None,
            sanitizers: sanitizers.into_iter().collect(),
        });
        self
    }

    /// Sanitizes `name` in one location only.
    pub fn field_in(
        mut self,
        location: Location,
        name: &str,
        sanitizers: impl IntoIterator<Item = Sanitizer>,
    ) -> Self {
        self.fields.push(SanitizeField {
            name: name.to_string(),
            location: Some(location),
            sanitizers: sanitizers.into_iter().collect(),
        });
        self
    }

    /// Parses `{"email": {"in": "body", "normalizeEmail": true}}`.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidRule` for unknown sanitizers or locations.
    pub fn from_json(value: &Value) -> Result<Self, BuildError> {
        let invalid = |field: &str, reason: String| BuildError::InvalidRule {
            field: field.to_string(),
            reason,
        };

        let fields = value
            .as_object()
            .ok_or_else(|| invalid("<root>", "sanitize schema must be an object".to_string()))?;

        let mut schema = SanitizeSchema::new();
        for (name, decl) in fields {
            let decl = decl
                .as_object()
                .ok_or_else(|| invalid(name, "field declaration must be an object".to_string()))?;

            let mut location = None;
            let mut sanitizers = Vec::new();
            for (key, options) in decl {
                if key == "in" {
                    let loc = options.as_str().and_then(Location::parse);
                    location = Some(loc.ok_or_else(|| invalid(name, format!("unknown location {}", options)))?);
                    continue;
                }
                if options == &Value::Bool(false) {
                    continue;
                }
                let sanitizer = Sanitizer::from_schema(key, options)
                    .ok_or_else(|| invalid(name, format!("unknown sanitizer {}", key)))?;
                sanitizers.push(sanitizer);
            }

            schema.fields.push(SanitizeField {
                name: name.clone(),
                location,
                sanitizers,
            });
        }
        Ok(schema)
    }

    /// Returns true if no field is declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Middleware that applies a [`SanitizeSchema`].
pub(crate) struct SanitizeMiddleware {
    schema: SanitizeSchema,
}

impl SanitizeMiddleware {
    pub(crate) fn new(schema: SanitizeSchema) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl Middleware for SanitizeMiddleware {
    async fn handle(&self, req: &mut Request) -> Result<Flow, HttpError> {
        for field in &self.schema.fields {
            let locations = match field.location {
                Some(loc) => vec![loc],
                None => Location::ALL.to_vec(),
            };
            sanitize_field(req, &field.name, &locations, &field.sanitizers);
        }
        Ok(Flow::Next)
    }

    fn name(&self) -> &str {
        "sanitize"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitization_error_display() {
        let error = SanitizationError::new(SanitizationErrorKind::MalformedInput, "not an email");
        let output = format!("{}", error);
        assert!(output.contains("sanitization failed"));
        assert!(output.contains("malformed input"));
    }

    #[test]
    fn trim_and_case() {
        assert_eq!(Sanitizer::Trim.apply(json!("  hi  ")).unwrap(), json!("hi"));
        assert_eq!(Sanitizer::ToUpperCase.apply(json!("hi")).unwrap(), json!("HI"));
        assert_eq!(Sanitizer::ToLowerCase.apply(json!(5)).unwrap(), json!(5));
    }

    #[test]
    fn escape_html() {
        let out = Sanitizer::Escape.apply(json!("<b>\"x\" & 'y'</b>")).unwrap();
        assert_eq!(
            out,
            json!("&lt;b&gt;&quot;x&quot; &amp; &#x27;y&#x27;&lt;&#x2F;b&gt;")
        );
    }

    #[test]
    fn to_int_converts_strings_and_floats() {
        assert_eq!(Sanitizer::ToInt.apply(json!(" 42 ")).unwrap(), json!(42));
        assert_eq!(Sanitizer::ToInt.apply(json!(3.9)).unwrap(), json!(3));
        let err = Sanitizer::ToInt.apply(json!("abc")).unwrap_err();
        assert_eq!(err.kind(), SanitizationErrorKind::InvalidInput);
    }

    #[test]
    fn to_int_rejects_floats_outside_i64() {
        let err = Sanitizer::ToInt.apply(json!(1e30)).unwrap_err();
        assert_eq!(err.kind(), SanitizationErrorKind::InvalidInput);
        assert!(Sanitizer::ToInt.apply(json!(-1e19)).is_err());
        assert_eq!(Sanitizer::ToInt.apply(json!(-2.5)).unwrap(), json!(-2));
    }

    #[test]
    fn to_boolean_falsy_strings() {
        for falsy in ["", "0", "false", "FALSE"] {
            assert_eq!(Sanitizer::ToBoolean.apply(json!(falsy)).unwrap(), json!(false));
        }
        assert_eq!(Sanitizer::ToBoolean.apply(json!("yes")).unwrap(), json!(true));
        assert_eq!(Sanitizer::ToBoolean.apply(json!(0)).unwrap(), json!(false));
    }

    #[test]
    fn normalize_email_lowercases_and_folds_gmail() {
        assert_eq!(
            Sanitizer::NormalizeEmail.apply(json!("Alice@Example.COM")).unwrap(),
            json!("alice@example.com")
        );
        assert_eq!(
            Sanitizer::NormalizeEmail.apply(json!("J.Doe+news@googlemail.com")).unwrap(),
            json!("jdoe@gmail.com")
        );
        assert!(Sanitizer::NormalizeEmail.apply(json!("nobody")).is_err());
    }

    #[test]
    fn strip_control_rejects_control_chars() {
        let s = Sanitizer::StripControl { max_len: 256 };
        assert_eq!(s.apply(json!("  hello world  ")).unwrap(), json!("hello world"));
        for bad in ["hello\nworld", "hello\0world", "hello\tworld"] {
            let err = s.apply(json!(bad)).unwrap_err();
            assert_eq!(err.kind(), SanitizationErrorKind::ContainsControlChars);
        }
        assert_eq!(s.apply(json!("   ")).unwrap_err().kind(), SanitizationErrorKind::Empty);
    }

    #[test]
    fn strip_control_length_counts_chars_and_hides_input() {
        let s = Sanitizer::StripControl { max_len: 10 };
        assert!(s.apply(json!("Hello 世界")).is_ok());

        let err = s.apply(json!("SECRET_PASSWORD_12345")).unwrap_err();
        assert_eq!(err.kind(), SanitizationErrorKind::TooLong);
        assert!(!err.to_string().contains("SECRET"));
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn schema_from_json_preserves_order() {
        let schema = SanitizeSchema::from_json(&json!({
            "email": {"in": "body", "trim": true, "normalizeEmail": true},
            "page": {"toInt": true, "escape": false}
        }))
        .unwrap();

        assert_eq!(
            schema,
            SanitizeSchema::new()
                .field_in(Location::Body, "email", [Sanitizer::Trim, Sanitizer::NormalizeEmail])
                .field("page", [Sanitizer::ToInt])
        );
    }

    #[test]
    fn schema_from_json_rejects_unknown_sanitizer() {
        let err = SanitizeSchema::from_json(&json!({"x": {"rot13": true}})).unwrap_err();
        assert!(err.to_string().contains("rot13"));
    }

    #[tokio::test]
    async fn middleware_rewrites_fields_and_records_failures() {
        let mw = SanitizeMiddleware::new(
            SanitizeSchema::new()
                .field("name", [Sanitizer::Trim])
                .field("age", [Sanitizer::ToInt])
                .field("missing", [Sanitizer::Trim]),
        );
        let mut req = Request::post("/").with_json(json!({"name": " Ann ", "age": "old"}));

        assert_eq!(mw.handle(&mut req).await.unwrap(), Flow::Next);
        assert_eq!(req.body()["name"], "Ann");
        assert_eq!(req.body()["age"], "old");
        assert_eq!(req.validation_errors().len(), 1);
        assert_eq!(req.validation_errors()[0].field, "age");
    }
}
