use std::fmt;

use http::{header, HeaderValue, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::request::Response;

/// Code reported when a policy fails without naming its own code.
pub const DEFAULT_POLICY_FAILURE_CODE: &str = "policy_failed";

/// Message reported when a policy fails without naming its own message.
pub const DEFAULT_POLICY_FAILURE_MESSAGE: &str = "The request did not satisfy the policy";

/// Code reported when request validation fails.
pub const VALIDATION_FAILED_CODE: &str = "validation_failed";

/// A structured policy failure: the code and message reported to the client.
///
/// Policies either deny a request outright (the failing policy's own
/// `failure_code`/`failure_message` are used) or return a `Violation`
/// describing exactly why the request was rejected.
///
/// # Examples
///
/// ```
/// use blueprint::Violation;
///
/// let v = Violation::new("banned", "This account has been suspended");
/// assert_eq!(v.code, "banned");
/// assert_eq!(v.to_string(), "banned: This account has been suspended");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Machine-readable failure code
    pub code: String,
    /// Human-readable message explaining the failure
    pub message: String,
}

impl Violation {
    /// Creates a new violation.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl Default for Violation {
    fn default() -> Self {
        Self::new(DEFAULT_POLICY_FAILURE_CODE, DEFAULT_POLICY_FAILURE_MESSAGE)
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Violation {}

/// Configuration errors detected while compiling router specifications.
///
/// These are raised by [`RouterBuilder::build`](crate::RouterBuilder::build)
/// and are fatal to application startup: a misconfigured route never
/// reaches live traffic.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No controller is registered under the given name
    #[error("{0} not found")]
    ControllerNotFound(String),

    /// The controller exists but does not define the method
    #[error("{controller} does not define method {method}")]
    MethodNotFound {
        /// Controller name from the action string
        controller: String,
        /// Method name from the action string
        method: String,
    },

    /// A non-optional check names a policy that is not registered
    #[error("policy {0} not found")]
    PolicyNotFound(String),

    /// A policy factory rejected the parameters of a check
    #[error("invalid parameters for policy {policy}: {reason}")]
    InvalidPolicyParams {
        /// Registry path of the policy
        policy: String,
        /// Why the parameters were rejected
        reason: String,
    },

    /// A resource declared both an allow-list and a deny-list
    #[error("resource {0} cannot define both allow and deny")]
    AllowAndDeny(String),

    /// An allow/deny/actions entry names an action the controller does not declare
    #[error("resource {resource} does not declare action {action}")]
    UnknownResourceAction {
        /// Controller backing the resource
        resource: String,
        /// The unknown action name
        action: String,
    },

    /// `resource: {controller}` names a controller that is not a resource controller
    #[error("{0} is not a resource controller")]
    NotAResource(String),

    /// A controller method produced a handler that cannot be used where it is mounted
    #[error("{target} must return a Function, object, or Action (got {found})")]
    InvalidHandler {
        /// The action string or parameter being compiled
        target: String,
        /// The kind of handler the method returned
        found: &'static str,
    },

    /// A route renders a view but the application has no view engine
    #[error("route {0} renders a view but no view engine is configured")]
    MissingViewEngine(String),

    /// The router specification itself is malformed
    #[error("invalid router specification at {path}: {reason}")]
    InvalidSpec {
        /// Route (or key) where the problem was found
        path: String,
        /// What is wrong with it
        reason: String,
    },

    /// A validation rule could not be compiled (e.g. a bad regular expression)
    #[error("invalid validation rule for {field}: {reason}")]
    InvalidRule {
        /// Field the rule applies to
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Configuration could not be parsed or holds invalid values
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BuildError {
    pub(crate) fn invalid_spec(path: impl Into<String>, reason: impl Into<String>) -> Self {
        BuildError::InvalidSpec {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A per-request failure that ends the middleware chain.
///
/// Every failure inside the request pipeline (validation, policy, action
/// execution) is carried as an `HttpError` and rendered by the compiled
/// router as a JSON error document with the error's status:
///
/// ```json
/// {"errors": [{"code": "not_found", "message": "Not found"}]}
/// ```
///
/// # Examples
///
/// ```
/// use blueprint::HttpError;
/// use http::StatusCode;
///
/// let err = HttpError::not_found("No such user");
/// assert_eq!(err.status(), StatusCode::NOT_FOUND);
/// assert_eq!(err.code(), "not_found");
/// ```
#[derive(Debug, Clone, Error)]
#[error("{status} {code}: {message}")]
pub struct HttpError {
    status: StatusCode,
    code: String,
    message: String,
    details: Option<Value>,
}

impl HttpError {
    /// Creates an error with an explicit status, code and message.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attaches structured details (e.g. per-field validation errors).
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// 400 Bad Request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// 401 Unauthorized.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// 403 Forbidden.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    /// 404 Not Found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    /// 400 `validation_failed` carrying the collected field errors.
    pub fn validation_failed(message: impl Into<String>, details: Value) -> Self {
        Self::new(StatusCode::BAD_REQUEST, VALIDATION_FAILED_CODE, message).with_details(details)
    }

    /// 403 carrying the code and message of a policy violation.
    pub fn policy_failed(violation: Violation) -> Self {
        Self::new(StatusCode::FORBIDDEN, violation.code, violation.message)
    }

    /// Replaces the status while keeping code, message and details.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Returns the HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the machine-readable code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the structured details, if any.
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Renders the JSON error document.
    pub fn to_body(&self) -> Value {
        let mut entry = json!({
            "code": self.code,
            "message": self.message,
        });
        if let (Some(details), Some(obj)) = (&self.details, entry.as_object_mut()) {
            obj.insert("details".to_string(), details.clone());
        }
        json!({ "errors": [entry] })
    }

    /// Converts the error into the response sent to the client.
    pub fn into_response(self) -> Response {
        let body = self.to_body();
        Response::new(self.status, body).with_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )
    }
}

impl From<Violation> for HttpError {
    fn from(v: Violation) -> Self {
        HttpError::policy_failed(v)
    }
}
