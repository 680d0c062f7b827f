use std::fmt;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::FieldError;
use crate::error::{BuildError, HttpError};
use crate::middleware::{Flow, Middleware};
use crate::request::{Location, Request};
use crate::sanitizer::Sanitizer;

const DEFAULT_MESSAGE: &str = "Invalid value";

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$";

/// A single validation rule applied to a field value.
///
/// Text rules compare the value's string form: strings as-is, numbers and
/// booleans rendered, a missing field as the empty string. Arrays and
/// objects fail them.
#[derive(Clone)]
pub enum Rule {
    /// The field is present
    Exists,
    /// The field is present and not an empty string, array or object
    NotEmpty,
    /// The field is an email address
    IsEmail,
    /// The field is an integer within the optional bounds
    IsInt {
        /// Inclusive lower bound
        min: Option<i64>,
        /// Inclusive upper bound
        max: Option<i64>,
    },
    /// The field's length in characters is within the optional bounds
    IsLength {
        /// Inclusive lower bound
        min: Option<usize>,
        /// Inclusive upper bound
        max: Option<usize>,
    },
    /// The field equals one of the listed values
    IsIn(Vec<String>),
    /// The field matches a regular expression
    Matches(String),
    /// The field is `true`, `false`, `1` or `0`
    IsBoolean,
    /// The field satisfies a predicate
    Custom(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl Rule {
    /// Name used in declarative schemas.
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Exists => "exists",
            Rule::NotEmpty => "notEmpty",
            Rule::IsEmail => "isEmail",
            Rule::IsInt { .. } => "isInt",
            Rule::IsLength { .. } => "isLength",
            Rule::IsIn(_) => "isIn",
            Rule::Matches(_) => "matches",
            Rule::IsBoolean => "isBoolean",
            Rule::Custom(_) => "custom",
        }
    }

    fn compile(&self, field: &str) -> Result<CompiledRule, BuildError> {
        let regex = |pattern: &str| {
            Regex::new(pattern).map_err(|e| BuildError::InvalidRule {
                field: field.to_string(),
                reason: e.to_string(),
            })
        };

        Ok(match self {
            Rule::Exists => CompiledRule::Exists,
            Rule::NotEmpty => CompiledRule::NotEmpty,
            Rule::IsEmail => CompiledRule::Matches(regex(EMAIL_PATTERN)?),
            Rule::IsInt { min, max } => {
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        return Err(BuildError::InvalidRule {
                            field: field.to_string(),
                            reason: format!("isInt min {} exceeds max {}", lo, hi),
                        });
                    }
                }
                CompiledRule::IsInt { min: *min, max: *max }
            }
            Rule::IsLength { min, max } => CompiledRule::IsLength { min: *min, max: *max },
            Rule::IsIn(values) => CompiledRule::IsIn(values.clone()),
            Rule::Matches(pattern) => CompiledRule::Matches(regex(pattern)?),
            Rule::IsBoolean => CompiledRule::IsBoolean,
            Rule::Custom(f) => CompiledRule::Custom(f.clone()),
        })
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::IsInt { min, max } => write!(f, "isInt({:?}..={:?})", min, max),
            Rule::IsLength { min, max } => write!(f, "isLength({:?}..={:?})", min, max),
            Rule::IsIn(values) => write!(f, "isIn({:?})", values),
            Rule::Matches(pattern) => write!(f, "matches({:?})", pattern),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[derive(Debug, Clone)]
enum Step {
    Rule { rule: Rule, message: Option<String> },
    Sanitize(Sanitizer),
}

/// Validation and sanitization chain for one request field.
///
/// Steps run in declaration order; a sanitizer changes the value seen by
/// the rules after it and the value written back into the request.
///
/// # Examples
///
/// ```
/// use blueprint::{body, query};
///
/// let email = body("email").trim().is_email().with_message("Enter a valid email");
/// let page = query("page").optional().is_int_in(1..).to_int();
/// assert_eq!(email.field_name(), "email");
/// ```
#[derive(Debug, Clone)]
pub struct FieldCheck {
    field: String,
    locations: Vec<Location>,
    optional: bool,
    message: Option<String>,
    steps: Vec<Step>,
}

/// Checks `name` in params, query, body and headers (first found wins).
pub fn field(name: &str) -> FieldCheck {
    FieldCheck::new(name, Location::ALL.to_vec())
}

/// Checks `name` in the JSON body.
pub fn body(name: &str) -> FieldCheck {
    FieldCheck::new(name, vec![Location::Body])
}

/// Checks the route parameter `name`.
pub fn param(name: &str) -> FieldCheck {
    FieldCheck::new(name, vec![Location::Params])
}

/// Checks the query string value `name`.
pub fn query(name: &str) -> FieldCheck {
    FieldCheck::new(name, vec![Location::Query])
}

/// Checks the header `name`.
pub fn header(name: &str) -> FieldCheck {
    FieldCheck::new(name, vec![Location::Headers])
}

impl FieldCheck {
    fn new(name: &str, locations: Vec<Location>) -> Self {
        Self {
            field: name.to_string(),
            locations,
            optional: false,
            message: None,
            steps: Vec::new(),
        }
    }

    /// Restricts the search to `locations`, in order.
    pub fn in_locations(mut self, locations: impl IntoIterator<Item = Location>) -> Self {
        let locations: Vec<Location> = locations.into_iter().collect();
        if !locations.is_empty() {
            self.locations = locations;
        }
        self
    }

    /// Skips every step when the field is missing or `null`.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Sets the message of the most recent rule, or the field's default
    /// message when no rule has been added yet.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        match self.steps.iter_mut().rev().find_map(|s| match s {
            Step::Rule { message, .. } => Some(message),
            Step::Sanitize(_) => None,
        }) {
            Some(slot) => *slot = Some(message),
            None => self.message = Some(message),
        }
        self
    }

    /// Adds a rule.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.steps.push(Step::Rule { rule, message: None });
        self
    }

    /// Adds a sanitizer.
    pub fn sanitize(mut self, sanitizer: Sanitizer) -> Self {
        self.steps.push(Step::Sanitize(sanitizer));
        self
    }

    /// The field is present.
    pub fn exists(self) -> Self {
        self.rule(Rule::Exists)
    }

    /// The field is present and not empty.
    pub fn not_empty(self) -> Self {
        self.rule(Rule::NotEmpty)
    }

    /// The field is an email address.
    pub fn is_email(self) -> Self {
        self.rule(Rule::IsEmail)
    }

    /// The field is an integer.
    pub fn is_int(self) -> Self {
        self.rule(Rule::IsInt { min: None, max: None })
    }

    /// The field is an integer within `range`.
    pub fn is_int_in(self, range: impl RangeBounds<i64>) -> Self {
        let min = match range.start_bound() {
            Bound::Included(n) => Some(*n),
            Bound::Excluded(n) => Some(n.saturating_add(1)),
            Bound::Unbounded => None,
        };
        let max = match range.end_bound() {
            Bound::Included(n) => Some(*n),
            Bound::Excluded(n) => Some(n.saturating_sub(1)),
            Bound::Unbounded => None,
        };
        self.rule(Rule::IsInt { min, max })
    }

    /// The field's length in characters is within `range`.
    pub fn is_length(self, range: impl RangeBounds<usize>) -> Self {
        let min = match range.start_bound() {
            Bound::Included(n) => Some(*n),
            Bound::Excluded(n) => Some(n.saturating_add(1)),
            Bound::Unbounded => None,
        };
        let max = match range.end_bound() {
            Bound::Included(n) => Some(*n),
            Bound::Excluded(n) => Some(n.saturating_sub(1)),
            Bound::Unbounded => None,
        };
        self.rule(Rule::IsLength { min, max })
    }

    /// The field equals one of `values`.
    pub fn is_in<S: Into<String>>(self, values: impl IntoIterator<Item = S>) -> Self {
        self.rule(Rule::IsIn(values.into_iter().map(Into::into).collect()))
    }

    /// The field matches `pattern`. The pattern is compiled at build time.
    pub fn matches(self, pattern: &str) -> Self {
        self.rule(Rule::Matches(pattern.to_string()))
    }

    /// The field is a boolean.
    pub fn is_boolean(self) -> Self {
        self.rule(Rule::IsBoolean)
    }

    /// The field satisfies `predicate`.
    pub fn custom<F>(self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.rule(Rule::Custom(Arc::new(predicate)))
    }

    /// Trims surrounding whitespace.
    pub fn trim(self) -> Self {
        self.sanitize(Sanitizer::Trim)
    }

    /// Escapes HTML-significant characters.
    pub fn escape(self) -> Self {
        self.sanitize(Sanitizer::Escape)
    }

    /// Lowercases the value.
    pub fn to_lower_case(self) -> Self {
        self.sanitize(Sanitizer::ToLowerCase)
    }

    /// Uppercases the value.
    pub fn to_upper_case(self) -> Self {
        self.sanitize(Sanitizer::ToUpperCase)
    }

    /// Converts the value to an integer.
    pub fn to_int(self) -> Self {
        self.sanitize(Sanitizer::ToInt)
    }

    /// Converts the value to a boolean.
    pub fn to_boolean(self) -> Self {
        self.sanitize(Sanitizer::ToBoolean)
    }

    /// Canonicalises an email address.
    pub fn normalize_email(self) -> Self {
        self.sanitize(Sanitizer::NormalizeEmail)
    }

    /// Rejects control characters and values longer than `max_len`.
    pub fn strip_control(self, max_len: usize) -> Self {
        self.sanitize(Sanitizer::StripControl { max_len })
    }

    /// Name of the checked field.
    pub fn field_name(&self) -> &str {
        &self.field
    }

    /// Locations searched, in order.
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// Compiles the chain into middleware.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidRule` for an unusable rule (e.g. a bad
    /// regular expression).
    pub(crate) fn compile(&self) -> Result<FieldValidator, BuildError> {
        let default_message = self.message.as_deref().unwrap_or(DEFAULT_MESSAGE);
        let steps = self
            .steps
            .iter()
            .map(|step| -> Result<CompiledStep, BuildError> {
                Ok(match step {
                    Step::Rule { rule, message } => CompiledStep::Rule {
                        rule: rule.compile(&self.field)?,
                        message: message.as_deref().unwrap_or(default_message).to_string(),
                    },
                    Step::Sanitize(s) => CompiledStep::Sanitize(s.clone()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FieldValidator {
            field: self.field.clone(),
            locations: self.locations.clone(),
            optional: self.optional,
            steps,
        })
    }
}

enum CompiledRule {
    Exists,
    NotEmpty,
    IsInt { min: Option<i64>, max: Option<i64> },
    IsLength { min: Option<usize>, max: Option<usize> },
    IsIn(Vec<String>),
    Matches(Regex),
    IsBoolean,
    Custom(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl CompiledRule {
    fn test(&self, value: Option<&Value>) -> bool {
        match self {
            CompiledRule::Exists => value.is_some(),
            CompiledRule::NotEmpty => match value {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.is_empty(),
                Some(Value::Array(a)) => !a.is_empty(),
                Some(Value::Object(o)) => !o.is_empty(),
                Some(_) => true,
            },
            CompiledRule::IsInt { min, max } => text(value)
                .and_then(|t| t.parse::<i64>().ok())
                .map_or(false, |n| within(n, *min, *max)),
            CompiledRule::IsLength { min, max } => {
                text(value).map_or(false, |t| within(t.chars().count(), *min, *max))
            }
            CompiledRule::IsIn(values) => text(value).map_or(false, |t| values.contains(&t)),
            CompiledRule::Matches(re) => text(value).map_or(false, |t| re.is_match(&t)),
            CompiledRule::IsBoolean => {
                text(value).map_or(false, |t| matches!(t.as_str(), "true" | "false" | "1" | "0"))
            }
            CompiledRule::Custom(f) => f(value.unwrap_or(&Value::Null)),
        }
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => Some(String::new()),
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(Value::Array(_)) | Some(Value::Object(_)) => None,
    }
}

fn within<T: PartialOrd>(n: T, min: Option<T>, max: Option<T>) -> bool {
    min.map_or(true, |lo| n >= lo) && max.map_or(true, |hi| n <= hi)
}

enum CompiledStep {
    Rule { rule: CompiledRule, message: String },
    Sanitize(Sanitizer),
}

/// Middleware compiled from a [`FieldCheck`].
pub(crate) struct FieldValidator {
    field: String,
    locations: Vec<Location>,
    optional: bool,
    steps: Vec<CompiledStep>,
}

#[async_trait]
impl Middleware for FieldValidator {
    async fn handle(&self, req: &mut Request) -> Result<Flow, HttpError> {
        let found = self
            .locations
            .iter()
            .find_map(|loc| req.field(*loc, &self.field).map(|v| (*loc, v)));

        let missing = matches!(found, None | Some((_, Value::Null)));
        if self.optional && missing {
            return Ok(Flow::Next);
        }

        let (location, mut value) = match found {
            Some((loc, v)) => (loc, Some(v)),
            None => (self.locations.first().copied().unwrap_or(Location::Body), None),
        };

        let mut changed = false;
        for step in &self.steps {
            match step {
                CompiledStep::Rule { rule, message } => {
                    if !rule.test(value.as_ref()) {
                        let shown = value.clone().unwrap_or(Value::Null);
                        req.add_validation_error(FieldError::new(&self.field, location, message, shown));
                    }
                }
                CompiledStep::Sanitize(sanitizer) => {
                    let Some(current) = value.take() else {
                        continue;
                    };
                    match sanitizer.apply(current.clone()) {
                        Ok(next) => {
                            changed |= next != current;
                            value = Some(next);
                        }
                        Err(e) => {
                            req.add_validation_error(FieldError::new(&self.field, location, e.message(), current));
                            return Ok(Flow::Next);
                        }
                    }
                }
            }
        }

        if let (true, Some(value)) = (changed, value) {
            req.set_field(location, &self.field, value);
        }
        Ok(Flow::Next)
    }

    fn name(&self) -> &str {
        "field_validator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn run(check: FieldCheck, mut req: Request) -> Request {
        let validator = check.compile().unwrap();
        validator.handle(&mut req).await.unwrap();
        req
    }

    #[tokio::test]
    async fn email_rule() {
        let req = run(body("email").is_email(), Request::post("/").with_json(json!({"email": "a@b.io"}))).await;
        assert!(req.validation_errors().is_empty());

        let req = run(body("email").is_email(), Request::post("/").with_json(json!({"email": "nope"}))).await;
        assert_eq!(req.validation_errors().len(), 1);
        assert_eq!(req.validation_errors()[0].message, DEFAULT_MESSAGE);
        assert_eq!(req.validation_errors()[0].value, json!("nope"));
    }

    #[tokio::test]
    async fn encoded_query_email_is_checked_decoded() {
        let check = query("email").trim().is_email();
        let req = run(check, Request::get("/signup?email=%20ada%40example.com")).await;
        assert!(req.validation_errors().is_empty());
        assert_eq!(req.query("email"), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn missing_field_fails_rules() {
        let req = run(body("email").is_email().with_message("email required"), Request::post("/")).await;
        let errors = req.validation_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "email required");
        assert_eq!(errors[0].location, Location::Body);
        assert_eq!(errors[0].value, Value::Null);
    }

    #[tokio::test]
    async fn optional_skips_missing_field() {
        let req = run(query("page").optional().is_int(), Request::get("/")).await;
        assert!(req.validation_errors().is_empty());
    }

    #[tokio::test]
    async fn int_bounds() {
        let check = || query("page").is_int_in(1..=10);
        assert!(run(check(), Request::get("/?page=10")).await.validation_errors().is_empty());
        assert_eq!(run(check(), Request::get("/?page=0")).await.validation_errors().len(), 1);
        assert_eq!(run(check(), Request::get("/?page=x")).await.validation_errors().len(), 1);
    }

    #[tokio::test]
    async fn every_failing_rule_is_reported() {
        let check = body("name").is_length(3..).matches("^[a-z]+$").with_message("lowercase only");
        let req = run(check, Request::post("/").with_json(json!({"name": "A"}))).await;
        let messages: Vec<&str> = req.validation_errors().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec![DEFAULT_MESSAGE, "lowercase only"]);
    }

    #[tokio::test]
    async fn sanitizers_feed_later_rules_and_write_back() {
        let check = body("email").trim().to_lower_case().is_email();
        let req = run(check, Request::post("/").with_json(json!({"email": "  Bob@Example.com "}))).await;
        assert!(req.validation_errors().is_empty());
        assert_eq!(req.body()["email"], "bob@example.com");
    }

    #[tokio::test]
    async fn failed_conversion_stops_the_chain() {
        let check = query("limit").to_int().is_int_in(..100);
        let req = run(check, Request::get("/?limit=many")).await;
        assert_eq!(req.validation_errors().len(), 1);
        assert_eq!(req.query("limit"), Some("many"));
    }

    #[tokio::test]
    async fn field_searches_locations_in_order() {
        let mut req = Request::post("/?id=from-query").with_json(json!({"id": "from-body"}));
        req.set_params([("id".to_string(), "7".to_string())].into_iter().collect());
        let req = run(field("id").is_int(), req).await;
        assert!(req.validation_errors().is_empty());
    }

    #[test]
    fn bad_regex_is_a_build_error() {
        let err = body("code").matches("(").compile().err().unwrap();
        assert!(matches!(err, BuildError::InvalidRule { field, .. } if field == "code"));
    }

    #[test]
    fn with_message_before_any_rule_sets_default() {
        let check = body("x").with_message("bad x").exists().not_empty();
        assert_eq!(check.message.as_deref(), Some("bad x"));
    }

    #[test]
    fn is_in_and_boolean() {
        let in_rule = Rule::IsIn(vec!["a".into(), "b".into()]).compile("f").unwrap();
        assert!(in_rule.test(Some(&json!("a"))));
        assert!(!in_rule.test(Some(&json!("c"))));

        let boolean = Rule::IsBoolean.compile("f").unwrap();
        assert!(boolean.test(Some(&json!(true))));
        assert!(boolean.test(Some(&json!("0"))));
        assert!(!boolean.test(Some(&json!("yes"))));
    }
}
