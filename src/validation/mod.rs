//! Declarative request validation.
//!
//! Validators never reject a request themselves. Each one records
//! [`FieldError`]s on the request and passes it on; the
//! [`HandleValidationResult`] step placed after them turns the collected
//! errors into a single `validation_failed` response. This keeps every
//! field's problems in one answer instead of failing on the first.

mod rule;
mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::config::ValidationConfig;
use crate::error::HttpError;
use crate::middleware::{Flow, Middleware};
use crate::request::{Location, Request};

pub use rule::{body, field, header, param, query, FieldCheck, Rule};
pub use schema::Schema;

/// One failed validation of one request field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    /// Field name (dotted for nested body fields)
    pub field: String,
    /// Where the field was read from
    #[serde(serialize_with = "serialize_location")]
    pub location: Location,
    /// What is wrong with it
    pub message: String,
    /// The offending value (`null` when the field is missing)
    pub value: Value,
}

impl FieldError {
    /// Creates a field error.
    pub fn new(
        field: impl Into<String>,
        location: Location,
        message: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            field: field.into(),
            location,
            message: message.into(),
            value,
        }
    }
}

fn serialize_location<S: serde::Serializer>(loc: &Location, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(loc)
}

/// Hand-written validation returning the problems it found.
///
/// Closures `Fn(&Request) -> Vec<FieldError>` implement this trait.
#[async_trait]
pub trait ValidateFn: Send + Sync {
    /// Validates the request.
    ///
    /// # Errors
    ///
    /// An `Err` aborts the request; it is not a validation failure.
    async fn validate(&self, req: &Request) -> Result<Vec<FieldError>, HttpError>;
}

#[async_trait]
impl<F> ValidateFn for F
where
    F: Fn(&Request) -> Vec<FieldError> + Send + Sync,
{
    async fn validate(&self, req: &Request) -> Result<Vec<FieldError>, HttpError> {
        Ok(self(req))
    }
}

/// Runs a [`ValidateFn`] and records what it reports.
pub(crate) struct ValidateFnMiddleware {
    f: Arc<dyn ValidateFn>,
}

impl ValidateFnMiddleware {
    pub(crate) fn new(f: Arc<dyn ValidateFn>) -> Self {
        Self { f }
    }
}

#[async_trait]
impl Middleware for ValidateFnMiddleware {
    async fn handle(&self, req: &mut Request) -> Result<Flow, HttpError> {
        for error in self.f.validate(req).await? {
            req.add_validation_error(error);
        }
        Ok(Flow::Next)
    }

    fn name(&self) -> &str {
        "validate"
    }
}

/// Fails the request if any validator recorded an error.
///
/// The response carries the configured status and code, with every
/// collected [`FieldError`] under `details`.
pub struct HandleValidationResult {
    status: StatusCode,
    code: String,
    message: String,
}

impl HandleValidationResult {
    /// Creates the step from configuration.
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            status: config.status_code(),
            code: config.code.clone(),
            message: config.message.clone(),
        }
    }
}

#[async_trait]
impl Middleware for HandleValidationResult {
    async fn handle(&self, req: &mut Request) -> Result<Flow, HttpError> {
        let errors = req.validation_errors();
        if errors.is_empty() {
            return Ok(Flow::Next);
        }

        tracing::debug!(
            request_id = %req.request_id(),
            fields = errors.len(),
            "request failed validation"
        );
        let details = serde_json::to_value(errors)
            .map_err(|e| HttpError::internal(format!("failed to encode validation errors: {}", e)))?;
        Err(HttpError::new(self.status, self.code.clone(), self.message.clone()).with_details(details))
    }

    fn name(&self) -> &str {
        "handle_validation_result"
    }
}
