//! Actions and their compilation into middleware chains.
//!
//! An [`Action`] is what a controller method hands the router for a verb:
//! the code to execute plus the validation it wants run first. The router
//! compiles every action into the same fixed sequence:
//!
//! ```text
//! schema validators → validate → handle_validation_result
//!   → sanitize → handle_validation_result → route policy → execute
//! ```
//!
//! Steps an action does not declare are left out.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use crate::config::Config;
use crate::error::{BuildError, HttpError};
use crate::messaging::{Listener, Messenger};
use crate::middleware::{Flow, Middleware};
use crate::policy::{Policy, PolicyMiddleware};
use crate::request::{Request, Response};
use crate::sanitizer::{SanitizeMiddleware, SanitizeSchema};
use crate::validation::{FieldCheck, HandleValidationResult, Schema, ValidateFn, ValidateFnMiddleware};

/// Validation declared by an action's `validate`.
#[derive(Clone)]
pub enum Validate {
    /// Field checks, compiled like a schema
    Checks(Vec<FieldCheck>),
    /// Ready-made validation middleware
    Middleware(Vec<Arc<dyn Middleware>>),
    /// A hand-written validation function
    Function(Arc<dyn ValidateFn>),
    /// A schema declared through `validate` instead of `schema` (deprecated)
    LegacySchema(Schema),
}

/// Sanitization declared separately from validation (deprecated).
#[derive(Clone)]
pub enum Sanitize {
    /// Per-field sanitizers
    Fields(SanitizeSchema),
    /// Ready-made sanitization middleware
    Middleware(Vec<Arc<dyn Middleware>>),
}

/// The unit of request handling.
///
/// Only [`execute`](Action::execute) is required. Validation declared through
/// [`schema`](Action::schema) and [`validate`](Action::validate) runs
/// before it, and the request is rejected with `validation_failed` if any
/// field fails.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use blueprint::{body, Action, HttpError, Request, Response, Validate};
/// use serde_json::json;
///
/// struct CreateUser;
///
/// #[async_trait]
/// impl Action for CreateUser {
///     fn validate(&self) -> Option<Validate> {
///         Some(Validate::Checks(vec![body("email").is_email()]))
///     }
///
///     async fn execute(&self, req: &mut Request) -> Result<Response, HttpError> {
///         Ok(Response::created(json!({"email": req.body()["email"]})))
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync {
    /// Declarative per-field validation.
    fn schema(&self) -> Option<Schema> {
        None
    }

    /// Additional validation.
    fn validate(&self) -> Option<Validate> {
        None
    }

    /// Separate sanitization (deprecated in favour of sanitizers on field checks).
    fn sanitize(&self) -> Option<Sanitize> {
        None
    }

    /// Messenger of the controller that produced this action.
    fn messenger(&self) -> Option<&Messenger> {
        None
    }

    /// Subscribes to a topic on the owning controller's messenger.
    fn on(&self, topic: &str, listener: Listener) {
        if let Some(m) = self.messenger() {
            m.on(topic, move |v: &Value| listener(v));
        }
    }

    /// Subscribes once to a topic on the owning controller's messenger.
    fn once(&self, topic: &str, listener: Listener) {
        if let Some(m) = self.messenger() {
            m.once(topic, move |v: &Value| listener(v));
        }
    }

    /// Publishes on the owning controller's messenger. Returns the number
    /// of listeners reached (zero without a messenger).
    fn emit(&self, topic: &str, payload: &Value) -> usize {
        self.messenger().map_or(0, |m| m.emit(topic, payload))
    }

    /// Handles the request.
    ///
    /// # Errors
    ///
    /// Any error is rendered as the request's response.
    async fn execute(&self, req: &mut Request) -> Result<Response, HttpError>;
}

/// Adapter turning a synchronous closure into an [`Action`].
pub struct FnAction<F> {
    f: F,
    schema: Option<Schema>,
    validate: Option<Validate>,
    messenger: Option<Messenger>,
}

/// Wraps a closure as an action.
///
/// # Examples
///
/// ```
/// use blueprint::{action_fn, body, Response};
/// use serde_json::json;
///
/// let echo = action_fn(|req| Ok(Response::ok(req.body().clone())))
///     .with_validate(vec![body("message").not_empty()]);
/// ```
pub fn action_fn<F>(f: F) -> FnAction<F>
where
    F: Fn(&mut Request) -> Result<Response, HttpError> + Send + Sync,
{
    FnAction {
        f,
        schema: None,
        validate: None,
        messenger: None,
    }
}

impl<F> FnAction<F> {
    /// Declares a schema.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Declares field checks.
    pub fn with_validate(mut self, checks: Vec<FieldCheck>) -> Self {
        self.validate = Some(Validate::Checks(checks));
        self
    }

    /// Publishes through `messenger`. Controllers bind their own messenger
    /// to the actions they return, so this is only needed for actions
    /// mounted directly as handlers.
    pub fn with_messenger(mut self, messenger: Messenger) -> Self {
        self.messenger = Some(messenger);
        self
    }
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&mut Request) -> Result<Response, HttpError> + Send + Sync,
{
    fn schema(&self) -> Option<Schema> {
        self.schema.clone()
    }

    fn validate(&self) -> Option<Validate> {
        self.validate.clone()
    }

    fn messenger(&self) -> Option<&Messenger> {
        self.messenger.as_ref()
    }

    async fn execute(&self, req: &mut Request) -> Result<Response, HttpError> {
        (self.f)(req)
    }
}

/// An action answering through the messenger of the controller that
/// returned it.
struct Bound {
    action: Arc<dyn Action>,
    messenger: Messenger,
}

#[async_trait]
impl Action for Bound {
    fn schema(&self) -> Option<Schema> {
        self.action.schema()
    }

    fn validate(&self) -> Option<Validate> {
        self.action.validate()
    }

    fn sanitize(&self) -> Option<Sanitize> {
        self.action.sanitize()
    }

    fn messenger(&self) -> Option<&Messenger> {
        Some(&self.messenger)
    }

    async fn execute(&self, req: &mut Request) -> Result<Response, HttpError> {
        self.action.execute(req).await
    }
}

/// Attaches `messenger` to `action` unless it already has one.
pub(crate) fn bind(action: Arc<dyn Action>, messenger: Option<&Messenger>) -> Arc<dyn Action> {
    match messenger {
        Some(messenger) if action.messenger().is_none() => Arc::new(Bound {
            action,
            messenger: messenger.clone(),
        }),
        _ => action,
    }
}

/// An action that always fails with 404 `not_found`.
///
/// Resource controllers return it for every operation they do not
/// implement, so unsupported routes look exactly like missing resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

#[async_trait]
impl Action for NotFound {
    async fn execute(&self, _req: &mut Request) -> Result<Response, HttpError> {
        Err(HttpError::not_found("Not found"))
    }
}

/// Final step of an action chain.
///
/// Stores the action's response on the request and passes it on, so
/// `after` middleware can still see it. A panic inside the action becomes
/// a 500 response instead of unwinding through the router.
struct Execute {
    action: Arc<dyn Action>,
}

#[async_trait]
impl Middleware for Execute {
    async fn handle(&self, req: &mut Request) -> Result<Flow, HttpError> {
        let request_id = req.request_id().to_string();
        req.set_messenger(self.action.messenger().cloned());
        let outcome = AssertUnwindSafe(self.action.execute(req)).catch_unwind().await;

        match outcome {
            Ok(Ok(response)) => {
                req.set_response(response);
                Ok(Flow::Next)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::error!(request_id = %request_id, "action panicked");
                Err(HttpError::internal("The action failed unexpectedly"))
            }
        }
    }

    fn name(&self) -> &str {
        "execute"
    }
}

/// Compiles an action into its middleware chain.
pub(crate) fn compile(
    action: Arc<dyn Action>,
    route_policy: Option<Arc<dyn Policy>>,
    config: &Config,
    target: &str,
) -> Result<Vec<Arc<dyn Middleware>>, BuildError> {
    let mut chain: Vec<Arc<dyn Middleware>> = Vec::new();
    let mut validates = false;

    if let Some(schema) = action.schema() {
        chain.extend(schema.compile()?);
        validates = true;
    }

    if let Some(validate) = action.validate() {
        match validate {
            Validate::Checks(checks) => {
                for check in &checks {
                    chain.push(Arc::new(check.compile()?));
                }
            }
            Validate::Middleware(mw) => chain.extend(mw),
            Validate::Function(f) => chain.push(Arc::new(ValidateFnMiddleware::new(f))),
            Validate::LegacySchema(schema) => {
                tracing::warn!(route = %target, "validate declares a schema; move it to schema()");
                chain.extend(schema.compile()?);
            }
        }
        validates = true;
    }

    if validates {
        chain.push(Arc::new(HandleValidationResult::new(&config.validation)));
    }

    if let Some(sanitize) = action.sanitize() {
        tracing::warn!(route = %target, "sanitize is deprecated; declare sanitizers on field checks");
        match sanitize {
            Sanitize::Fields(schema) => chain.push(Arc::new(SanitizeMiddleware::new(schema))),
            Sanitize::Middleware(mw) => chain.extend(mw),
        }
        chain.push(Arc::new(HandleValidationResult::new(&config.validation)));
    }

    if let Some(policy) = route_policy {
        chain.push(Arc::new(PolicyMiddleware::new(policy, config.policy.status_code())));
    }

    chain.push(Arc::new(Execute { action }));
    Ok(chain)
}
