use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use http::Method;
use serde_json::{Map, Value};

use crate::controller::{Handler, ParamHandler};
use crate::error::BuildError;
use crate::middleware::Middleware;
use crate::policy::{all, any, any_ordered, negate, Check, PolicySpec};

/// HTTP verb key of a specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// A single method
    Method(Method),
    /// Every method
    All,
}

impl Verb {
    /// Parses a verb key (`get`, `post`, ..., `all`).
    pub fn parse(key: &str) -> Option<Self> {
        let method = match key.to_ascii_lowercase().as_str() {
            "all" => return Some(Verb::All),
            "get" => Method::GET,
            "post" => Method::POST,
            "put" => Method::PUT,
            "patch" => Method::PATCH,
            "delete" => Method::DELETE,
            "head" => Method::HEAD,
            "options" => Method::OPTIONS,
            _ => return None,
        };
        Some(Verb::Method(method))
    }

    pub(crate) fn is(&self, method: &Method) -> bool {
        matches!(self, Verb::Method(m) if m == method)
    }
}

impl From<Method> for Verb {
    fn from(m: Method) -> Self {
        Verb::Method(m)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Method(m) => write!(f, "{}", m),
            Verb::All => write!(f, "ALL"),
        }
    }
}

/// Value of a parameter key (`:userId`).
#[derive(Clone)]
pub enum ParamSpec {
    /// A parameter handler
    Handler(Arc<dyn ParamHandler>),
    /// A controller method returning [`Handler::Param`]
    Action(String),
}

impl From<&str> for ParamSpec {
    fn from(action: &str) -> Self {
        ParamSpec::Action(action.to_string())
    }
}

impl From<Arc<dyn ParamHandler>> for ParamSpec {
    fn from(handler: Arc<dyn ParamHandler>) -> Self {
        ParamSpec::Handler(handler)
    }
}

/// What a route leaf renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// A controller method (`"Controller@method"`)
    Action(String),
    /// A view rendered by the application's view engine
    View(String),
}

/// A route leaf with its own policy, surrounding middleware and options.
///
/// # Examples
///
/// ```
/// use blueprint::{check, RouteDescriptor};
/// use serde_json::json;
///
/// let leaf = RouteDescriptor::action("UserController@update")
///     .policy(check("user.owner"))
///     .options(json!({"partial": true}));
/// ```
#[derive(Clone)]
pub struct RouteDescriptor {
    pub(crate) target: RouteTarget,
    pub(crate) policy: Option<PolicySpec>,
    pub(crate) before: Vec<Arc<dyn Middleware>>,
    pub(crate) after: Vec<Arc<dyn Middleware>>,
    pub(crate) options: Value,
}

impl RouteDescriptor {
    fn new(target: RouteTarget) -> Self {
        Self {
            target,
            policy: None,
            before: Vec::new(),
            after: Vec::new(),
            options: Value::Null,
        }
    }

    /// A leaf handled by a controller method.
    pub fn action(action: impl Into<String>) -> Self {
        Self::new(RouteTarget::Action(action.into()))
    }

    /// A leaf that renders a view.
    pub fn view(view: impl Into<String>) -> Self {
        Self::new(RouteTarget::View(view.into()))
    }

    /// Policy checked after validation, right before the action executes.
    pub fn policy(mut self, policy: impl Into<PolicySpec>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Middleware run before the compiled action.
    pub fn before(mut self, mw: Arc<dyn Middleware>) -> Self {
        self.before.push(mw);
        self
    }

    /// Middleware run after the action produced its response.
    pub fn after(mut self, mw: Arc<dyn Middleware>) -> Self {
        self.after.push(mw);
        self
    }

    /// Options handed to the controller method.
    pub fn options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    /// What the leaf renders.
    pub fn target(&self) -> &RouteTarget {
        &self.target
    }
}

/// Value of a verb key.
#[derive(Clone)]
pub enum RouteSpec {
    /// A controller method (`"Controller@method"`)
    Action(String),
    /// A handler supplied directly
    Handler(Handler),
    /// A leaf with policy, middleware and options
    Descriptor(RouteDescriptor),
}

impl From<&str> for RouteSpec {
    fn from(action: &str) -> Self {
        RouteSpec::Action(action.to_string())
    }
}

impl From<String> for RouteSpec {
    fn from(action: String) -> Self {
        RouteSpec::Action(action)
    }
}

impl From<Handler> for RouteSpec {
    fn from(handler: Handler) -> Self {
        RouteSpec::Handler(handler)
    }
}

impl From<Arc<dyn Middleware>> for RouteSpec {
    fn from(mw: Arc<dyn Middleware>) -> Self {
        RouteSpec::Handler(Handler::Middleware(vec![mw]))
    }
}

impl From<RouteDescriptor> for RouteSpec {
    fn from(descriptor: RouteDescriptor) -> Self {
        RouteSpec::Descriptor(descriptor)
    }
}

/// Per-action settings of a resource.
#[derive(Clone, Default)]
pub struct ActionOverrides {
    pub(crate) policy: Option<PolicySpec>,
    pub(crate) options: Option<Value>,
    pub(crate) before: Vec<Arc<dyn Middleware>>,
    pub(crate) after: Vec<Arc<dyn Middleware>>,
}

impl ActionOverrides {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the conventional resource policy of this action.
    pub fn policy(mut self, policy: impl Into<PolicySpec>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Options merged over the resource's options.
    pub fn options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Middleware run before the action.
    pub fn before(mut self, mw: Arc<dyn Middleware>) -> Self {
        self.before.push(mw);
        self
    }

    /// Middleware run after the action.
    pub fn after(mut self, mw: Arc<dyn Middleware>) -> Self {
        self.after.push(mw);
        self
    }
}

/// The `resource` shorthand: CRUD routes generated from a resource controller.
///
/// # Examples
///
/// ```
/// use blueprint::{check, ActionOverrides, ResourceSpec};
///
/// let users = ResourceSpec::new("UserController")
///     .deny(["delete"])
///     .action("create", ActionOverrides::new().policy(check("user.canCreate")));
/// ```
#[derive(Clone)]
pub struct ResourceSpec {
    pub(crate) controller: String,
    pub(crate) allow: Option<Vec<String>>,
    pub(crate) deny: Option<Vec<String>>,
    pub(crate) policy: Option<PolicySpec>,
    pub(crate) options: Value,
    pub(crate) actions: Vec<(String, ActionOverrides)>,
}

impl ResourceSpec {
    /// A resource backed by the registered controller `controller`.
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            allow: None,
            deny: None,
            policy: None,
            options: Value::Null,
            actions: Vec::new(),
        }
    }

    /// Generates only the listed actions.
    pub fn allow<S: Into<String>>(mut self, actions: impl IntoIterator<Item = S>) -> Self {
        self.allow = Some(actions.into_iter().map(Into::into).collect());
        self
    }

    /// Generates every action except the listed ones.
    pub fn deny<S: Into<String>>(mut self, actions: impl IntoIterator<Item = S>) -> Self {
        self.deny = Some(actions.into_iter().map(Into::into).collect());
        self
    }

    /// Policy applied to every generated route.
    pub fn policy(mut self, policy: impl Into<PolicySpec>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Options handed to every action's controller method.
    pub fn options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    /// Settings for one action.
    pub fn action(mut self, name: &str, overrides: ActionOverrides) -> Self {
        self.actions.push((name.to_string(), overrides));
        self
    }

    /// Registry path of the backing controller.
    pub fn controller(&self) -> &str {
        &self.controller
    }
}

#[derive(Clone)]
pub(crate) enum SpecEntry {
    Path(String, RouterSpec),
    Mount(String, Vec<Arc<dyn Middleware>>),
    Param(String, ParamSpec),
    Verb(Verb, RouteSpec),
    Use(Vec<Arc<dyn Middleware>>),
    Policy(PolicySpec),
    Resource(ResourceSpec),
}

impl SpecEntry {
    fn key(&self) -> String {
        match self {
            SpecEntry::Path(p, _) | SpecEntry::Mount(p, _) => p.clone(),
            SpecEntry::Param(name, _) => format!(":{}", name),
            SpecEntry::Verb(v, _) => v.to_string().to_lowercase(),
            SpecEntry::Use(_) => "use".to_string(),
            SpecEntry::Policy(_) => "policy".to_string(),
            SpecEntry::Resource(_) => "resource".to_string(),
        }
    }
}

/// A declarative router specification.
///
/// Entries keep their declaration order. Built fluently or parsed from
/// JSON with [`RouterSpec::from_json`].
///
/// # Examples
///
/// ```
/// use blueprint::{check, ResourceSpec, RouterSpec};
///
/// let spec = RouterSpec::new()
///     .policy(check("?authenticated"))
///     .get("HomeController@index")
///     .path("/users", RouterSpec::new().resource(ResourceSpec::new("UserController")));
/// ```
#[derive(Clone, Default)]
pub struct RouterSpec {
    entries: Vec<SpecEntry>,
}

impl RouterSpec {
    /// An empty specification.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, entry: SpecEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub(crate) fn entries(&self) -> &[SpecEntry] {
        &self.entries
    }

    /// Nests `spec` below `path`.
    pub fn path(self, path: &str, spec: RouterSpec) -> Self {
        self.push(SpecEntry::Path(path.to_string(), spec))
    }

    /// Mounts plain middleware at `path` (matches `path` and everything below).
    pub fn mount(self, path: &str, middleware: Vec<Arc<dyn Middleware>>) -> Self {
        self.push(SpecEntry::Mount(path.to_string(), middleware))
    }

    /// Declares a parameter handler. The leading `:` is optional.
    pub fn param(self, name: &str, handler: impl Into<ParamSpec>) -> Self {
        let name = name.trim_start_matches(':').to_string();
        self.push(SpecEntry::Param(name, handler.into()))
    }

    /// Declares a route for `verb`.
    pub fn verb(self, verb: impl Into<Verb>, route: impl Into<RouteSpec>) -> Self {
        self.push(SpecEntry::Verb(verb.into(), route.into()))
    }

    /// `get` route.
    pub fn get(self, route: impl Into<RouteSpec>) -> Self {
        self.verb(Method::GET, route)
    }

    /// `post` route.
    pub fn post(self, route: impl Into<RouteSpec>) -> Self {
        self.verb(Method::POST, route)
    }

    /// `put` route.
    pub fn put(self, route: impl Into<RouteSpec>) -> Self {
        self.verb(Method::PUT, route)
    }

    /// `patch` route.
    pub fn patch(self, route: impl Into<RouteSpec>) -> Self {
        self.verb(Method::PATCH, route)
    }

    /// `delete` route.
    pub fn delete(self, route: impl Into<RouteSpec>) -> Self {
        self.verb(Method::DELETE, route)
    }

    /// `head` route; compiled before any `get` at the same level.
    pub fn head(self, route: impl Into<RouteSpec>) -> Self {
        self.verb(Method::HEAD, route)
    }

    /// `options` route.
    pub fn options(self, route: impl Into<RouteSpec>) -> Self {
        self.verb(Method::OPTIONS, route)
    }

    /// Route answering every method.
    pub fn all(self, route: impl Into<RouteSpec>) -> Self {
        self.verb(Verb::All, route)
    }

    /// Middleware applied to everything at and below this level.
    pub fn use_middleware(self, mw: Arc<dyn Middleware>) -> Self {
        self.push(SpecEntry::Use(vec![mw]))
    }

    /// Policy applied to everything at and below this level, before `use`.
    pub fn policy(self, policy: impl Into<PolicySpec>) -> Self {
        self.push(SpecEntry::Policy(policy.into()))
    }

    /// CRUD routes generated from a resource controller.
    pub fn resource(self, resource: ResourceSpec) -> Self {
        self.push(SpecEntry::Resource(resource))
    }

    /// Returns true if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses the JSON form of a specification.
    ///
    /// ```json
    /// {
    ///   "policy": "?authenticated",
    ///   "/users": {
    ///     "resource": {"controller": "UserController", "deny": ["delete"]},
    ///     "/:userId/avatar": {"get": {"action": "AvatarController@show", "policy": "user.owner"}}
    ///   },
    ///   "/about": {"get": {"view": "about"}}
    /// }
    /// ```
    ///
    /// Policies are check strings, lists (all must pass) or objects with a
    /// single `all`, `any`, `anyOrdered`, `negate` or `check` key.
    /// Middleware (`use`, `before`, `after`) cannot be expressed in JSON.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidSpec` naming the offending key.
    pub fn from_json(value: &Value) -> Result<Self, BuildError> {
        parse_spec("/", value)
    }
}

impl fmt::Debug for RouterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.entries.iter().map(SpecEntry::key).collect();
        f.debug_struct("RouterSpec").field("keys", &keys).finish()
    }
}

fn object<'v>(at: &str, value: &'v Value) -> Result<&'v Map<String, Value>, BuildError> {
    value
        .as_object()
        .ok_or_else(|| BuildError::invalid_spec(at, "expected an object"))
}

fn string<'v>(at: &str, value: &'v Value) -> Result<&'v str, BuildError> {
    value
        .as_str()
        .ok_or_else(|| BuildError::invalid_spec(at, "expected a string"))
}

fn string_list(at: &str, value: &Value) -> Result<Vec<String>, BuildError> {
    value
        .as_array()
        .ok_or_else(|| BuildError::invalid_spec(at, "expected a list of strings"))?
        .iter()
        .map(|v| string(at, v).map(str::to_string))
        .collect()
}

fn parse_spec(at: &str, value: &Value) -> Result<RouterSpec, BuildError> {
    let mut spec = RouterSpec::new();

    for (key, value) in object(at, value)? {
        let here = format!("{} {}", at, key);
        spec = if key.starts_with('/') {
            spec.path(key, parse_spec(&super::path::join(at, key), value)?)
        } else if let Some(name) = key.strip_prefix(':') {
            let action = match value {
                Value::String(s) => s.as_str(),
                other => string(&here, object(&here, other)?.get("action").unwrap_or(&Value::Null))?,
            };
            spec.param(name, action)
        } else {
            match key.as_str() {
                "policy" => spec.policy(parse_policy(&here, value)?),
                "resource" => spec.resource(parse_resource(&here, value)?),
                "use" => {
                    return Err(BuildError::invalid_spec(
                        here,
                        "middleware cannot be declared in JSON",
                    ))
                }
                verb => {
                    let verb = Verb::parse(verb)
                        .ok_or_else(|| BuildError::invalid_spec(&here, "unknown key"))?;
                    spec.verb(verb, parse_route(&here, value)?)
                }
            }
        };
    }
    Ok(spec)
}

fn parse_route(at: &str, value: &Value) -> Result<RouteSpec, BuildError> {
    if let Value::String(action) = value {
        return Ok(RouteSpec::Action(action.clone()));
    }

    let decl = object(at, value)?;
    let mut descriptor = match (decl.get("action"), decl.get("view")) {
        (Some(action), None) => RouteDescriptor::action(string(at, action)?),
        (None, Some(view)) => RouteDescriptor::view(string(at, view)?),
        (Some(_), Some(_)) => {
            return Err(BuildError::invalid_spec(at, "declare either action or view, not both"))
        }
        (None, None) => return Err(BuildError::invalid_spec(at, "expected action or view")),
    };

    for (key, value) in decl {
        match key.as_str() {
            "action" | "view" => {}
            "policy" => descriptor = descriptor.policy(parse_policy(at, value)?),
            "options" => descriptor = descriptor.options(value.clone()),
            "before" | "after" => {
                return Err(BuildError::invalid_spec(
                    at,
                    "middleware cannot be declared in JSON",
                ))
            }
            other => return Err(BuildError::invalid_spec(at, format!("unknown route key {}", other))),
        }
    }
    Ok(RouteSpec::Descriptor(descriptor))
}

pub(crate) fn parse_policy(at: &str, value: &Value) -> Result<PolicySpec, BuildError> {
    let list = |v: &Value| -> Result<Vec<PolicySpec>, BuildError> {
        v.as_array()
            .ok_or_else(|| BuildError::invalid_spec(at, "expected a list of policies"))?
            .iter()
            .map(|p| parse_policy(at, p))
            .collect()
    };

    match value {
        Value::String(s) => Ok(PolicySpec::Check(Check::from_str(s)?)),
        Value::Array(_) => Ok(all(list(value)?)),
        Value::Object(obj) if obj.len() == 1 || obj.contains_key("check") => {
            if let Some(name) = obj.get("check") {
                let mut check = Check::from_str(string(at, name)?)?;
                if let Some(params) = obj.get("params") {
                    let params = params
                        .as_array()
                        .ok_or_else(|| BuildError::invalid_spec(at, "params must be a list"))?;
                    check = check.with_params(params.iter().cloned());
                }
                return Ok(PolicySpec::Check(check));
            }
            let (key, inner) = obj
                .iter()
                .next()
                .ok_or_else(|| BuildError::invalid_spec(at, "empty policy"))?;
            match key.as_str() {
                "all" => Ok(all(list(inner)?)),
                "any" => Ok(any(list(inner)?)),
                "anyOrdered" => Ok(any_ordered(list(inner)?)),
                "negate" => Ok(negate(parse_policy(at, inner)?)),
                other => Err(BuildError::invalid_spec(at, format!("unknown policy combinator {}", other))),
            }
        }
        _ => Err(BuildError::invalid_spec(at, "expected a check string, list or combinator")),
    }
}

fn parse_resource(at: &str, value: &Value) -> Result<ResourceSpec, BuildError> {
    let decl = object(at, value)?;
    let controller = decl
        .get("controller")
        .ok_or_else(|| BuildError::invalid_spec(at, "resource requires a controller"))?;
    let mut resource = ResourceSpec::new(string(at, controller)?);

    for (key, value) in decl {
        match key.as_str() {
            "controller" => {}
            "allow" => resource.allow = Some(string_list(at, value)?),
            "deny" => resource.deny = Some(string_list(at, value)?),
            "policy" => resource.policy = Some(parse_policy(at, value)?),
            "options" => resource.options = value.clone(),
            "actions" => {
                for (name, overrides) in object(at, value)? {
                    let mut parsed = ActionOverrides::new();
                    for (k, v) in object(at, overrides)? {
                        match k.as_str() {
                            "policy" => parsed = parsed.policy(parse_policy(at, v)?),
                            "options" => parsed = parsed.options(v.clone()),
                            other => {
                                return Err(BuildError::invalid_spec(
                                    at,
                                    format!("unknown action override {}", other),
                                ))
                            }
                        }
                    }
                    resource.actions.push((name.clone(), parsed));
                }
            }
            other => return Err(BuildError::invalid_spec(at, format!("unknown resource key {}", other))),
        }
    }
    Ok(resource)
}
