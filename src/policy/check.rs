use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use super::{Negate, Policy, PolicyRegistry};
use crate::error::BuildError;

/// A lazy reference to a registered policy.
///
/// The name may carry prefixes: `?` marks the check optional (a missing
/// policy installs nothing instead of failing the build) and `!` negates
/// the policy's outcome. Both may be combined (`?!banned`); each further
/// `!` toggles the negation, so `!!banned` is a plain check.
///
/// # Examples
///
/// ```
/// use blueprint::check;
/// use serde_json::json;
///
/// let c = check("?user.create");
/// assert!(c.is_optional());
/// assert_eq!(c.policy_name(), "user.create");
///
/// let c = check("!banned");
/// assert!(c.is_negated());
///
/// let c = check("identity").param(false);
/// assert_eq!(c.params(), &[json!(false)]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    policy_name: String,
    params: Vec<Value>,
    optional: bool,
    negate: bool,
}

/// Creates a [`Check`] from a policy check string.
pub fn check(name: &str) -> Check {
    let mut optional = false;
    let mut negate = false;
    let mut rest = name;

    loop {
        if let Some(stripped) = rest.strip_prefix('?') {
            optional = true;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('!') {
            negate = !negate;
            rest = stripped;
        } else {
            break;
        }
    }

    Check {
        policy_name: rest.to_string(),
        params: Vec::new(),
        optional,
        negate,
    }
}

impl Check {
    /// Appends one parameter passed to the policy factory.
    pub fn param(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Replaces the parameters passed to the policy factory.
    pub fn with_params(mut self, params: impl IntoIterator<Item = Value>) -> Self {
        self.params = params.into_iter().collect();
        self
    }

    /// Marks the check optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Negates the check.
    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    /// Registry path of the policy.
    pub fn policy_name(&self) -> &str {
        &self.policy_name
    }

    /// Parameters passed to the policy factory.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Returns true if a missing policy is tolerated.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Returns true if the outcome is inverted.
    pub fn is_negated(&self) -> bool {
        self.negate
    }

    /// Resolves the check against a registry.
    ///
    /// Returns `Ok(None)` when the check is optional and no such policy is
    /// registered; no policy middleware is installed in that case.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::PolicyNotFound` when a mandatory policy is
    /// missing, or whatever the policy factory reports for bad parameters.
    pub fn resolve(&self, policies: &PolicyRegistry) -> Result<Option<Arc<dyn Policy>>, BuildError> {
        let Some(factory) = policies.get(&self.policy_name) else {
            if self.optional {
                tracing::debug!(policy = %self.policy_name, "optional policy not registered");
                return Ok(None);
            }
            return Err(BuildError::PolicyNotFound(self.policy_name.clone()));
        };

        let policy = factory.create(&self.params)?;
        tracing::debug!(policy = %self.policy_name, negate = self.negate, "policy resolved");

        if self.negate {
            Ok(Some(Arc::new(Negate::new(policy))))
        } else {
            Ok(Some(policy))
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            write!(f, "?")?;
        }
        if self.negate {
            write!(f, "!")?;
        }
        write!(f, "{}", self.policy_name)
    }
}

impl FromStr for Check {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = check(s);
        if parsed.policy_name.is_empty() {
            return Err(BuildError::invalid_spec(s, "policy check names no policy"));
        }
        Ok(parsed)
    }
}
