//! Policy combinators and the unresolved policy expressions routes carry.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;

use super::{check, Check, Policy, PolicyDecision, PolicyRegistry};
use crate::error::{BuildError, HttpError};
use crate::request::Request;

/// Succeeds only if every policy grants the request.
///
/// All policies are evaluated concurrently. When several fail, the failure
/// reported is the first one in list order, not the first to settle. A
/// plain `Denied` is reported with the failing policy's own code and message.
pub struct All {
    policies: Vec<Arc<dyn Policy>>,
}

impl All {
    /// Combines `policies`.
    pub fn new(policies: Vec<Arc<dyn Policy>>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl Policy for All {
    async fn run_check(&self, req: &Request) -> Result<PolicyDecision, HttpError> {
        let decisions = try_join_all(self.policies.iter().map(|p| p.run_check(req))).await?;

        for (policy, decision) in self.policies.iter().zip(decisions) {
            match decision {
                PolicyDecision::Granted => {}
                PolicyDecision::Denied => return Ok(PolicyDecision::Failed(policy.violation())),
                failed @ PolicyDecision::Failed(_) => return Ok(failed),
            }
        }
        Ok(PolicyDecision::Granted)
    }
}

/// Succeeds if at least one policy grants the request.
///
/// All policies are evaluated concurrently. If none grants, the first
/// failure in list order is reported.
pub struct Any {
    policies: Vec<Arc<dyn Policy>>,
}

impl Any {
    /// Combines `policies`.
    pub fn new(policies: Vec<Arc<dyn Policy>>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl Policy for Any {
    async fn run_check(&self, req: &Request) -> Result<PolicyDecision, HttpError> {
        let decisions = try_join_all(self.policies.iter().map(|p| p.run_check(req))).await?;

        if decisions.iter().any(PolicyDecision::is_granted) {
            return Ok(PolicyDecision::Granted);
        }
        Ok(first_failure(&self.policies, decisions))
    }
}

/// Succeeds if at least one policy grants the request, evaluating in order.
///
/// Evaluation stops at the first grant, so expensive policies placed later
/// in the list only run when the cheaper ones before them failed.
pub struct AnyOrdered {
    policies: Vec<Arc<dyn Policy>>,
}

impl AnyOrdered {
    /// Combines `policies`.
    pub fn new(policies: Vec<Arc<dyn Policy>>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl Policy for AnyOrdered {
    async fn run_check(&self, req: &Request) -> Result<PolicyDecision, HttpError> {
        let mut first: Option<PolicyDecision> = None;

        for policy in &self.policies {
            let decision = match policy.run_check(req).await? {
                PolicyDecision::Granted => return Ok(PolicyDecision::Granted),
                PolicyDecision::Denied => PolicyDecision::Failed(policy.violation()),
                failed => failed,
            };
            first.get_or_insert(decision);
        }
        Ok(first.unwrap_or(PolicyDecision::Denied))
    }
}

fn first_failure(policies: &[Arc<dyn Policy>], decisions: Vec<PolicyDecision>) -> PolicyDecision {
    policies
        .iter()
        .zip(decisions)
        .find_map(|(policy, decision)| match decision {
            PolicyDecision::Granted => None,
            PolicyDecision::Denied => Some(PolicyDecision::Failed(policy.violation())),
            failed => Some(failed),
        })
        .unwrap_or(PolicyDecision::Denied)
}

/// Inverts a policy.
///
/// `Granted` becomes `Denied` and `Denied` becomes `Granted`. A structured
/// failure of the inner policy counts as a grant.
pub struct Negate {
    inner: Arc<dyn Policy>,
}

impl Negate {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn Policy>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Policy for Negate {
    async fn run_check(&self, req: &Request) -> Result<PolicyDecision, HttpError> {
        Ok(match self.inner.run_check(req).await? {
            PolicyDecision::Granted => PolicyDecision::Denied,
            PolicyDecision::Denied | PolicyDecision::Failed(_) => PolicyDecision::Granted,
        })
    }
}

/// An unresolved policy expression attached to a route.
///
/// Resolution happens once, when the router is built. Optional checks whose
/// policy is not registered disappear from composites; a composite left
/// with no members installs no policy at all.
#[derive(Clone)]
pub enum PolicySpec {
    /// A named, registered policy
    Check(Check),
    /// A policy instance supplied directly by the application
    Instance(Arc<dyn Policy>),
    /// Every member must grant
    All(Vec<PolicySpec>),
    /// At least one member must grant (concurrent)
    Any(Vec<PolicySpec>),
    /// At least one member must grant (in order, stopping at the first grant)
    AnyOrdered(Vec<PolicySpec>),
    /// The member's outcome is inverted
    Negate(Box<PolicySpec>),
}

/// Every policy must grant.
pub fn all(specs: impl IntoIterator<Item = impl Into<PolicySpec>>) -> PolicySpec {
    PolicySpec::All(specs.into_iter().map(Into::into).collect())
}

/// At least one policy must grant; all are evaluated concurrently.
pub fn any(specs: impl IntoIterator<Item = impl Into<PolicySpec>>) -> PolicySpec {
    PolicySpec::Any(specs.into_iter().map(Into::into).collect())
}

/// At least one policy must grant; evaluated in order, stopping at the first grant.
pub fn any_ordered(specs: impl IntoIterator<Item = impl Into<PolicySpec>>) -> PolicySpec {
    PolicySpec::AnyOrdered(specs.into_iter().map(Into::into).collect())
}

/// Inverts a policy.
pub fn negate(spec: impl Into<PolicySpec>) -> PolicySpec {
    PolicySpec::Negate(Box::new(spec.into()))
}

impl PolicySpec {
    /// Resolves the expression into a policy instance.
    ///
    /// # Errors
    ///
    /// Returns the first resolution error of any member check.
    pub fn resolve(&self, policies: &PolicyRegistry) -> Result<Option<Arc<dyn Policy>>, BuildError> {
        match self {
            PolicySpec::Check(c) => c.resolve(policies),
            PolicySpec::Instance(p) => Ok(Some(p.clone())),
            PolicySpec::All(specs) => Ok(resolve_members(specs, policies)?
                .map(|members| Arc::new(All::new(members)) as Arc<dyn Policy>)),
            PolicySpec::Any(specs) => Ok(resolve_members(specs, policies)?
                .map(|members| Arc::new(Any::new(members)) as Arc<dyn Policy>)),
            PolicySpec::AnyOrdered(specs) => Ok(resolve_members(specs, policies)?
                .map(|members| Arc::new(AnyOrdered::new(members)) as Arc<dyn Policy>)),
            PolicySpec::Negate(inner) => Ok(inner
                .resolve(policies)?
                .map(|p| Arc::new(Negate::new(p)) as Arc<dyn Policy>)),
        }
    }
}

fn resolve_members(
    specs: &[PolicySpec],
    policies: &PolicyRegistry,
) -> Result<Option<Vec<Arc<dyn Policy>>>, BuildError> {
    let mut members = Vec::with_capacity(specs.len());
    for spec in specs {
        if let Some(policy) = spec.resolve(policies)? {
            members.push(policy);
        }
    }
    Ok(if members.is_empty() { None } else { Some(members) })
}

impl From<Check> for PolicySpec {
    fn from(c: Check) -> Self {
        PolicySpec::Check(c)
    }
}

impl From<&str> for PolicySpec {
    fn from(s: &str) -> Self {
        PolicySpec::Check(check(s))
    }
}

impl From<Arc<dyn Policy>> for PolicySpec {
    fn from(p: Arc<dyn Policy>) -> Self {
        PolicySpec::Instance(p)
    }
}

impl fmt::Debug for PolicySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicySpec::Check(c) => write!(f, "Check({})", c),
            PolicySpec::Instance(_) => write!(f, "Instance(..)"),
            PolicySpec::All(specs) => f.debug_tuple("All").field(specs).finish(),
            PolicySpec::Any(specs) => f.debug_tuple("Any").field(specs).finish(),
            PolicySpec::AnyOrdered(specs) => f.debug_tuple("AnyOrdered").field(specs).finish(),
            PolicySpec::Negate(inner) => f.debug_tuple("Negate").field(inner).finish(),
        }
    }
}
