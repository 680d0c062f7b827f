use std::collections::HashMap;
use std::sync::Arc;

use http::Method as HttpMethod;

use super::{Controller, Handler, Method, MethodCall};
use crate::action::{bind, Action, NotFound};
use crate::error::BuildError;
use crate::messaging::Messenger;
use crate::registry;

/// Placeholder for the resource id in [`ActionRoute`] paths.
pub(crate) const RESOURCE_ID_PLACEHOLDER: &str = ":rcId";

/// Where one resource action is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRoute {
    verb: HttpMethod,
    path: Option<String>,
    method: String,
}

impl ActionRoute {
    /// Mounts `method` at the collection root with `verb`.
    pub fn new(verb: HttpMethod, method: impl Into<String>) -> Self {
        Self {
            verb,
            path: None,
            method: method.into(),
        }
    }

    /// Mounts the action under a sub-path. `/:rcId` stands for the
    /// resource id parameter.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// HTTP verb.
    pub fn verb(&self) -> &HttpMethod {
        &self.verb
    }

    /// Sub-path below the resource root, if any.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Controller method producing the handler.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the sub-path with the placeholder replaced by `:{id}`.
    pub(crate) fn resolved_path(&self, id: &str) -> Option<String> {
        self.path
            .as_deref()
            .map(|p| p.replace(RESOURCE_ID_PLACEHOLDER, &format!(":{}", id)))
    }

    /// True if the path addresses a single entity (`/:rcId...`).
    pub(crate) fn is_single(&self) -> bool {
        self.path.as_deref().map_or(false, |p| {
            p.trim_start_matches('/').starts_with(RESOURCE_ID_PLACEHOLDER)
        })
    }
}

/// The action vocabulary of a resource controller.
///
/// Ordered; extending a table overrides entries with the same name in
/// place and appends new ones.
///
/// # Examples
///
/// ```
/// use blueprint::{ActionRoute, ActionTable};
/// use http::Method;
///
/// let table = ActionTable::base()
///     .with_action("search", ActionRoute::new(Method::GET, "search").at("/search"));
///
/// assert_eq!(table.names().count(), 7);
/// assert_eq!(table.get("getOne").and_then(|r| r.path()), Some("/:rcId"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionTable {
    entries: Vec<(String, ActionRoute)>,
}

impl ActionTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The six CRUD actions every resource controller starts with.
    pub fn base() -> Self {
        Self::new()
            .with_action("create", ActionRoute::new(HttpMethod::POST, "create"))
            .with_action("getAll", ActionRoute::new(HttpMethod::GET, "getAll"))
            .with_action("getOne", ActionRoute::new(HttpMethod::GET, "getOne").at("/:rcId"))
            .with_action("update", ActionRoute::new(HttpMethod::PUT, "update").at("/:rcId"))
            .with_action("delete", ActionRoute::new(HttpMethod::DELETE, "delete").at("/:rcId"))
            .with_action("count", ActionRoute::new(HttpMethod::GET, "count").at("/count"))
    }

    /// Adds or replaces one action.
    pub fn with_action(mut self, name: &str, route: ActionRoute) -> Self {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = route,
            None => self.entries.push((name.to_string(), route)),
        }
        self
    }

    /// Merges `other` into this table.
    pub fn extend(self, other: ActionTable) -> Self {
        other
            .entries
            .into_iter()
            .fold(self, |table, (name, route)| table.with_action(&name, route))
    }

    /// Looks up an action.
    pub fn get(&self, name: &str) -> Option<&ActionRoute> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    /// Action names in table order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ActionRoute)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), r))
    }

    /// Returns true if `name` is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// `"user-profile"` → `"userProfile"`, `"UserProfile"` → `"userProfile"`,
/// `"USER"` → `"user"`.
pub fn camel_case(name: &str) -> String {
    words(name)
        .iter()
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i == 0 {
                return lower;
            }
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect()
}

/// Splits on separators and case boundaries (`"XMLHttp"` → `XML`, `Http`).
fn words(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some(&prev) = i.checked_sub(1).and_then(|p| chars.get(p)) {
            let next_lower = chars.get(i + 1).map_or(false, |n| n.is_lowercase());
            let boundary = c.is_uppercase()
                && (prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_lower));
            if boundary && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// A controller exposing a CRUD vocabulary.
///
/// Only the operations given a method are implemented; every other action
/// in the table answers 404 `not_found`.
///
/// # Examples
///
/// ```
/// use blueprint::{action_fn, Controller, ResourceController, Response};
/// use serde_json::json;
///
/// let users = ResourceController::new("user")
///     .with_namespace("admin")
///     .action("getAll", action_fn(|_req| Ok(Response::ok(json!([])))));
///
/// assert_eq!(users.id(), "userId");
/// assert_eq!(users.policy_path("getAll"), "admin.user.getAll");
/// ```
pub struct ResourceController {
    name: String,
    id: String,
    namespace: Option<String>,
    actions: ActionTable,
    methods: HashMap<String, Method>,
    messenger: Messenger,
}

impl ResourceController {
    /// Creates a resource named `name` with the base action table.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: format!("{}Id", camel_case(&name)),
            name,
            namespace: None,
            actions: ActionTable::base(),
            methods: HashMap::new(),
            messenger: Messenger::new(),
        }
    }

    /// Overrides the id parameter name.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Places the resource's policies under `namespace`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Adds or overrides actions.
    pub fn with_actions(mut self, actions: ActionTable) -> Self {
        self.actions = self.actions.extend(actions);
        self
    }

    /// Implements a method.
    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&MethodCall) -> Result<Handler, BuildError> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Implements a method with a fixed action.
    pub fn action(self, name: &str, action: impl Action + 'static) -> Self {
        let action: Arc<dyn Action> = Arc::new(action);
        self.method(name, move |call| Ok(Handler::Action(bind(action.clone(), call.messenger()))))
    }

    /// Resource name.
    pub fn resource_name(&self) -> &str {
        &self.name
    }

    /// Id parameter name.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Policy namespace.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The action vocabulary.
    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }

    /// Registry path of the conventional policy for `action`
    /// (`{namespace.}{name}.{action}`).
    pub fn policy_path(&self, action: &str) -> String {
        let local = format!("{}.{}", self.name, action);
        match &self.namespace {
            Some(ns) => registry::join(ns, &local),
            None => local,
        }
    }
}

impl Controller for ResourceController {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, call: &MethodCall) -> Option<Result<Handler, BuildError>> {
        if let Some(m) = self.methods.get(call.method()) {
            return Some(m(call));
        }
        let declared = self.actions.iter().any(|(_, route)| route.method() == call.method());
        declared.then(|| Ok(Handler::action(NotFound)))
    }

    fn as_resource(&self) -> Option<&ResourceController> {
        Some(self)
    }

    fn messenger(&self) -> Option<&Messenger> {
        Some(&self.messenger)
    }
}
