//! Controllers: named collections of methods that produce route handlers.
//!
//! Router specifications refer to controller methods by action string
//! (`"UserController@create"`). While the router is being built, each
//! action string is resolved against the application's
//! [`ControllerRegistry`] and the method is invoked once with a
//! [`MethodCall`] describing where it is being mounted. What the method
//! returns, a [`Handler`], becomes part of the compiled route.

mod resource;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::action::{bind, Action};
use crate::error::{BuildError, HttpError};
use crate::messaging::Messenger;
use crate::middleware::{Flow, Middleware};
use crate::registry::Registry;
use crate::request::Request;

pub use resource::{camel_case, ActionRoute, ActionTable, ResourceController};

/// Method invoked when an action string names no method (`"HealthController"`).
pub const DEFAULT_METHOD: &str = "__invoke";

/// What a controller method produces for the router.
///
/// Which variants are acceptable depends on where the action string is
/// mounted: verbs accept `Middleware` and `Action`, parameter keys accept
/// `Param`. Anything else fails the build.
#[derive(Clone)]
pub enum Handler {
    /// Plain middleware, run in order
    Middleware(Vec<Arc<dyn Middleware>>),
    /// An action, compiled with its validation and policy steps
    Action(Arc<dyn Action>),
    /// A route parameter handler
    Param(Arc<dyn ParamHandler>),
}

impl Handler {
    /// Wraps an action.
    pub fn action(action: impl Action + 'static) -> Self {
        Handler::Action(Arc::new(action))
    }

    /// Wraps a single middleware.
    pub fn middleware(mw: Arc<dyn Middleware>) -> Self {
        Handler::Middleware(vec![mw])
    }

    /// Wraps a parameter handler.
    pub fn param(handler: impl ParamHandler + 'static) -> Self {
        Handler::Param(Arc::new(handler))
    }

    /// Short description used in build errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Handler::Middleware(_) => "middleware",
            Handler::Action(_) => "action",
            Handler::Param(_) => "param handler",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Middleware(mw) => write!(f, "Middleware({})", mw.len()),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Runs when a route parameter is present in the matched path.
///
/// Each parameter handler runs at most once per request, before the first
/// matching layer's chain. It typically loads the entity named by the
/// parameter into the request's locals, or rejects the request.
#[async_trait]
pub trait ParamHandler: Send + Sync {
    /// Handles the parameter `value`.
    async fn handle(&self, req: &mut Request, value: &str) -> Result<Flow, HttpError>;
}

struct FnParamHandler<F> {
    f: F,
}

#[async_trait]
impl<F> ParamHandler for FnParamHandler<F>
where
    F: Fn(&mut Request, &str) -> Result<Flow, HttpError> + Send + Sync,
{
    async fn handle(&self, req: &mut Request, value: &str) -> Result<Flow, HttpError> {
        (self.f)(req, value)
    }
}

/// Wraps a closure as a parameter handler.
///
/// # Examples
///
/// ```
/// use blueprint::{param_fn, Flow, HttpError, Request};
/// use serde_json::json;
///
/// let load_user = param_fn(|req: &mut Request, id: &str| {
///     if id.parse::<u64>().is_err() {
///         return Err(HttpError::not_found("No such user"));
///     }
///     req.set_local("user", json!({"id": id}));
///     Ok(Flow::Next)
/// });
/// ```
pub fn param_fn<F>(f: F) -> Arc<dyn ParamHandler>
where
    F: Fn(&mut Request, &str) -> Result<Flow, HttpError> + Send + Sync + 'static,
{
    Arc::new(FnParamHandler { f })
}

/// The binding of a controller method to the route it is mounted on.
///
/// Exists only while the router is being built.
#[derive(Debug, Clone)]
pub struct MethodCall {
    controller: String,
    method: String,
    path: String,
    options: Value,
    messenger: Option<Messenger>,
}

impl MethodCall {
    pub(crate) fn new(controller: &str, method: &str, path: &str, options: Value) -> Self {
        Self {
            controller: controller.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            options,
            messenger: None,
        }
    }

    pub(crate) fn with_messenger(mut self, messenger: Option<&Messenger>) -> Self {
        self.messenger = messenger.cloned();
        self
    }

    /// Registry path of the controller.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// Invoked method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Full route path the handler is mounted at.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Options declared on the route (`Null` when none).
    pub fn options(&self) -> &Value {
        &self.options
    }

    /// Messenger of the invoked controller, for actions that publish events.
    pub fn messenger(&self) -> Option<&Messenger> {
        self.messenger.as_ref()
    }
}

/// A controller method: builds a handler for one mount point.
pub type Method = Arc<dyn Fn(&MethodCall) -> Result<Handler, BuildError> + Send + Sync>;

/// A named source of route handlers.
pub trait Controller: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Invokes `call.method()`.
    ///
    /// Returns `None` if the controller has no such method.
    fn invoke(&self, call: &MethodCall) -> Option<Result<Handler, BuildError>>;

    /// Resource metadata, when the controller can back a `resource` entry.
    fn as_resource(&self) -> Option<&ResourceController> {
        None
    }

    /// Messenger shared by the controller's actions.
    fn messenger(&self) -> Option<&Messenger> {
        None
    }
}

/// A controller defined by a table of methods.
///
/// # Examples
///
/// ```
/// use blueprint::{action_fn, BasicController, Handler, Response};
/// use serde_json::json;
///
/// let health = BasicController::new("HealthController")
///     .action("__invoke", action_fn(|_req| Ok(Response::ok(json!({"status": "ok"})))));
/// ```
pub struct BasicController {
    name: String,
    methods: HashMap<String, Method>,
    messenger: Messenger,
}

impl BasicController {
    /// Creates a controller without methods.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
            messenger: Messenger::new(),
        }
    }

    /// Adds a method that builds its handler from the mount point.
    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&MethodCall) -> Result<Handler, BuildError> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Adds a method that returns the same action wherever it is mounted.
    pub fn action(self, name: &str, action: impl Action + 'static) -> Self {
        let action: Arc<dyn Action> = Arc::new(action);
        self.method(name, move |call| Ok(Handler::Action(bind(action.clone(), call.messenger()))))
    }

    /// Adds a method that returns a fixed handler.
    pub fn handler(self, name: &str, handler: Handler) -> Self {
        self.method(name, move |_call| Ok(handler.clone()))
    }
}

impl Controller for BasicController {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, call: &MethodCall) -> Option<Result<Handler, BuildError>> {
        self.methods.get(call.method()).map(|m| m(call))
    }

    fn messenger(&self) -> Option<&Messenger> {
        Some(&self.messenger)
    }
}

/// Controllers registered by dotted path (`UserController`, `admin.UserController`).
pub type ControllerRegistry = Registry<Arc<dyn Controller>>;

impl ControllerRegistry {
    /// Registers `controller` under its own name.
    pub fn register(&mut self, controller: impl Controller + 'static) -> &mut Self {
        let name = controller.name().to_string();
        self.insert(name, Arc::new(controller))
    }

    /// Registers `controller` at `path`. Resource controllers are usually
    /// registered this way (`UserController` backing the `user` resource).
    pub fn register_as(&mut self, path: &str, controller: impl Controller + 'static) -> &mut Self {
        self.insert(path, Arc::new(controller))
    }
}

/// Splits `"Controller@method"`; the method defaults to [`DEFAULT_METHOD`].
pub(crate) fn parse_action_string(action: &str) -> (&str, &str) {
    match action.split_once('@') {
        Some((controller, method)) if !method.is_empty() => (controller, method),
        Some((controller, _)) => (controller, DEFAULT_METHOD),
        None => (action, DEFAULT_METHOD),
    }
}

/// Resolves an action string to the handler its method produces.
pub(crate) fn resolve_action(
    controllers: &ControllerRegistry,
    action: &str,
    path: &str,
    options: Value,
) -> Result<Handler, BuildError> {
    let (controller_name, method) = parse_action_string(action);
    let controller = controllers
        .get(controller_name)
        .ok_or_else(|| BuildError::ControllerNotFound(controller_name.to_string()))?;

    let call = MethodCall::new(controller_name, method, path, options)
        .with_messenger(controller.messenger());

    let handler = controller.invoke(&call).ok_or_else(|| BuildError::MethodNotFound {
        controller: controller_name.to_string(),
        method: method.to_string(),
    })??;

    tracing::debug!(action, path, handler = handler.kind(), "resolved controller method");
    Ok(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::NotFound;
    use crate::middleware::middleware_fn;

    fn registry() -> ControllerRegistry {
        let mut registry = ControllerRegistry::new();
        registry.register(
            BasicController::new("UserController")
                .action("show", NotFound)
                .action(DEFAULT_METHOD, NotFound)
                .method("echoPath", |call| {
                    let path = call.path().to_string();
                    Ok(Handler::middleware(middleware_fn(move |req: &mut Request| {
                        req.set_local("mounted", Value::String(path.clone()));
                        Ok(Flow::Next)
                    })))
                })
                .method("broken", |call| {
                    Err(BuildError::invalid_spec(call.path(), "cannot mount here"))
                }),
        );
        registry
    }

    #[test]
    fn parses_action_strings() {
        assert_eq!(parse_action_string("UserController@show"), ("UserController", "show"));
        assert_eq!(parse_action_string("UserController"), ("UserController", DEFAULT_METHOD));
        assert_eq!(parse_action_string("UserController@"), ("UserController", DEFAULT_METHOD));
        assert_eq!(
            parse_action_string("admin.UserController@show"),
            ("admin.UserController", "show")
        );
    }

    #[test]
    fn resolves_method_and_default() {
        let registry = registry();
        let handler = resolve_action(&registry, "UserController@show", "/users/:id", Value::Null).unwrap();
        assert_eq!(handler.kind(), "action");

        let handler = resolve_action(&registry, "UserController", "/users", Value::Null).unwrap();
        assert_eq!(handler.kind(), "action");
    }

    #[test]
    fn missing_controller_is_named() {
        let err = resolve_action(&registry(), "PostController@show", "/", Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "PostController not found");
    }

    #[test]
    fn missing_method_is_named() {
        let err = resolve_action(&registry(), "UserController@destroy", "/", Value::Null).unwrap_err();
        assert!(matches!(err, BuildError::MethodNotFound { method, .. } if method == "destroy"));
    }

    #[test]
    fn method_errors_propagate() {
        let err = resolve_action(&registry(), "UserController@broken", "/x", Value::Null).unwrap_err();
        assert!(err.to_string().contains("cannot mount here"));
    }

    #[tokio::test]
    async fn methods_see_their_mount_point() {
        let handler = resolve_action(&registry(), "UserController@echoPath", "/users", Value::Null).unwrap();
        let Handler::Middleware(chain) = handler else {
            panic!("expected middleware");
        };
        let mut req = Request::get("/users");
        chain[0].handle(&mut req).await.unwrap();
        assert_eq!(req.local("mounted"), Some(&Value::String("/users".to_string())));
    }

    #[test]
    fn calls_carry_the_controller_messenger() {
        let controller = BasicController::new("C");
        let call = MethodCall::new("C", "m", "/", Value::Null).with_messenger(controller.messenger());
        assert!(call.messenger().is_some());
    }

    #[test]
    fn returned_actions_publish_on_the_controller_messenger() {
        let controller = BasicController::new("EventController").action("create", NotFound);
        let events = controller.messenger().cloned().unwrap();
        events.on("created", |_| {});

        let mut registry = ControllerRegistry::new();
        registry.register(controller);
        let Handler::Action(action) = resolve_action(&registry, "EventController@create", "/", Value::Null).unwrap()
        else {
            panic!("expected an action");
        };
        assert_eq!(action.emit("created", &Value::Null), 1);
    }
}
