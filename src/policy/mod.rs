//! Authorization policies, lazy checks and policy combinators.
//!
//! A [`Policy`] is a predicate evaluated against each request. Routes never
//! hold policies directly; they hold a [`PolicySpec`] (a [`Check`] naming a
//! registered policy, or a combination of them) which the router builder
//! resolves once, at build time, against the application's
//! [`PolicyRegistry`].
//!
//! # Outcomes
//!
//! ```text
//! run_check ──► Ok(Granted)        → request continues
//!           ├─► Ok(Denied)         → 403 with the policy's failure code/message
//!           ├─► Ok(Failed(v))      → 403 with v.code / v.message
//!           └─► Err(e)             → e is forwarded unchanged (500 class)
//! ```

mod check;
mod composite;

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde_json::Value;

use crate::error::{
    BuildError, HttpError, Violation, DEFAULT_POLICY_FAILURE_CODE, DEFAULT_POLICY_FAILURE_MESSAGE,
};
use crate::middleware::{Flow, Middleware};
use crate::registry::Registry;
use crate::request::Request;

pub use check::{check, Check};
pub use composite::{all, any, any_ordered, negate, All, Any, AnyOrdered, Negate, PolicySpec};

/// Result of evaluating a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The request may proceed
    Granted,
    /// The request is rejected with the policy's own failure code and message
    Denied,
    /// The request is rejected with a specific reason
    Failed(Violation),
}

impl PolicyDecision {
    /// Returns true for [`PolicyDecision::Granted`].
    pub fn is_granted(&self) -> bool {
        matches!(self, PolicyDecision::Granted)
    }
}

impl From<bool> for PolicyDecision {
    fn from(granted: bool) -> Self {
        if granted {
            PolicyDecision::Granted
        } else {
            PolicyDecision::Denied
        }
    }
}

impl From<Violation> for PolicyDecision {
    fn from(v: Violation) -> Self {
        PolicyDecision::Failed(v)
    }
}

/// An authorization predicate evaluated per request.
///
/// Policies are stateless with respect to requests; any configuration comes
/// from the check parameters handed to their [`PolicyFactory`].
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use blueprint::{HttpError, Policy, PolicyDecision, Request};
///
/// struct IsAdmin;
///
/// #[async_trait]
/// impl Policy for IsAdmin {
///     fn failure_code(&self) -> &str {
///         "admin_required"
///     }
///
///     async fn run_check(&self, req: &Request) -> Result<PolicyDecision, HttpError> {
///         Ok(req.principal().map_or(false, |p| p.has_role("admin")).into())
///     }
/// }
/// ```
#[async_trait]
pub trait Policy: Send + Sync {
    /// Code reported when the policy denies a request.
    fn failure_code(&self) -> &str {
        DEFAULT_POLICY_FAILURE_CODE
    }

    /// Message reported when the policy denies a request.
    fn failure_message(&self) -> &str {
        DEFAULT_POLICY_FAILURE_MESSAGE
    }

    /// Evaluates the policy.
    ///
    /// # Errors
    ///
    /// An `Err` is not a denial: it aborts the request with that error.
    async fn run_check(&self, req: &Request) -> Result<PolicyDecision, HttpError>;

    /// The violation reported when this policy returns `Denied`.
    fn violation(&self) -> Violation {
        Violation::new(self.failure_code(), self.failure_message())
    }
}

/// Builds policy instances from check parameters.
///
/// Every check that names a policy gets its own instance, created at build
/// time with the check's parameters (`check("identity").param(false)`).
pub trait PolicyFactory: Send + Sync {
    /// Creates a policy configured with `params`.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidPolicyParams` if the parameters are unusable.
    fn create(&self, params: &[Value]) -> Result<Arc<dyn Policy>, BuildError>;
}

impl<F> PolicyFactory for F
where
    F: Fn(&[Value]) -> Result<Arc<dyn Policy>, BuildError> + Send + Sync,
{
    fn create(&self, params: &[Value]) -> Result<Arc<dyn Policy>, BuildError> {
        self(params)
    }
}

/// Factory that hands out the same instance for every check.
struct SharedInstance(Arc<dyn Policy>);

impl PolicyFactory for SharedInstance {
    fn create(&self, _params: &[Value]) -> Result<Arc<dyn Policy>, BuildError> {
        Ok(self.0.clone())
    }
}

/// Policies registered by dotted path (`user.create`, `test.user.create`).
pub type PolicyRegistry = Registry<Arc<dyn PolicyFactory>>;

impl PolicyRegistry {
    /// Registers a factory closure at `path`.
    pub fn register_factory<F>(&mut self, path: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Arc<dyn Policy>, BuildError> + Send + Sync + 'static,
    {
        self.insert(path, Arc::new(factory))
    }

    /// Registers a parameterless policy; every check shares the instance.
    pub fn register_policy(
        &mut self,
        path: impl Into<String>,
        policy: impl Policy + 'static,
    ) -> &mut Self {
        self.insert(path, Arc::new(SharedInstance(Arc::new(policy))))
    }
}

/// Adapter turning a synchronous predicate into a [`Policy`].
///
/// # Examples
///
/// ```
/// use blueprint::{FnPolicy, Policy, Request};
///
/// let authenticated = FnPolicy::new(|req: &Request| req.principal().is_some())
///     .with_failure("unauthenticated", "Sign in first");
/// assert_eq!(authenticated.failure_code(), "unauthenticated");
/// ```
pub struct FnPolicy<F> {
    f: F,
    code: String,
    message: String,
}

impl<F> FnPolicy<F>
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    /// Creates a policy with the default failure code and message.
    pub fn new(f: F) -> Self {
        Self {
            f,
            code: DEFAULT_POLICY_FAILURE_CODE.to_string(),
            message: DEFAULT_POLICY_FAILURE_MESSAGE.to_string(),
        }
    }

    /// Overrides the failure code and message.
    pub fn with_failure(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.code = code.into();
        self.message = message.into();
        self
    }
}

#[async_trait]
impl<F> Policy for FnPolicy<F>
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    fn failure_code(&self) -> &str {
        &self.code
    }

    fn failure_message(&self) -> &str {
        &self.message
    }

    async fn run_check(&self, req: &Request) -> Result<PolicyDecision, HttpError> {
        Ok((self.f)(req).into())
    }
}

/// Middleware that evaluates a resolved policy before the rest of the chain.
pub(crate) struct PolicyMiddleware {
    policy: Arc<dyn Policy>,
    status: StatusCode,
}

impl PolicyMiddleware {
    pub(crate) fn new(policy: Arc<dyn Policy>, status: StatusCode) -> Self {
        Self { policy, status }
    }
}

#[async_trait]
impl Middleware for PolicyMiddleware {
    async fn handle(&self, req: &mut Request) -> Result<Flow, HttpError> {
        let violation = match self.policy.run_check(req).await? {
            PolicyDecision::Granted => return Ok(Flow::Next),
            PolicyDecision::Denied => self.policy.violation(),
            PolicyDecision::Failed(v) => v,
        };

        tracing::debug!(
            request_id = %req.request_id(),
            code = %violation.code,
            "policy rejected request"
        );
        Err(HttpError::policy_failed(violation).with_status(self.status))
    }

    fn name(&self) -> &str {
        "policy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Identity(bool);

    #[async_trait]
    impl Policy for Identity {
        fn failure_code(&self) -> &str {
            "identity"
        }

        fn failure_message(&self) -> &str {
            "identity failed"
        }

        async fn run_check(&self, _req: &Request) -> Result<PolicyDecision, HttpError> {
            Ok(self.0.into())
        }
    }

    #[test]
    fn decision_from_bool() {
        assert_eq!(PolicyDecision::from(true), PolicyDecision::Granted);
        assert_eq!(PolicyDecision::from(false), PolicyDecision::Denied);
    }

    #[test]
    fn closure_factory_receives_params() {
        let mut registry = PolicyRegistry::new();
        registry.register_factory("identity", |params: &[Value]| {
            let value = params.first().and_then(Value::as_bool).unwrap_or(true);
            Ok(Arc::new(Identity(value)) as Arc<dyn Policy>)
        });

        let factory = registry.get("identity").unwrap();
        let policy = factory.create(&[json!(false)]).unwrap();
        assert_eq!(policy.failure_code(), "identity");
    }

    #[tokio::test]
    async fn middleware_passes_on_grant() {
        let mw = PolicyMiddleware::new(Arc::new(Identity(true)), StatusCode::FORBIDDEN);
        let mut req = Request::get("/");
        assert_eq!(mw.handle(&mut req).await.unwrap(), Flow::Next);
    }

    #[tokio::test]
    async fn middleware_reports_policy_failure_code() {
        let mw = PolicyMiddleware::new(Arc::new(Identity(false)), StatusCode::FORBIDDEN);
        let mut req = Request::get("/");
        let err = mw.handle(&mut req).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "identity");
        assert_eq!(err.message(), "identity failed");
    }

    #[tokio::test]
    async fn fn_policy_defaults() {
        let policy = FnPolicy::new(|req: &Request| req.principal().is_some());
        let req = Request::get("/");
        assert_eq!(policy.run_check(&req).await.unwrap(), PolicyDecision::Denied);
        assert_eq!(policy.violation(), Violation::default());
    }
}
