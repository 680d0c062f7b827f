//! Declarative router specifications compiled into guarded request pipelines.
//!
//! An application describes its routes as a [`RouterSpec`]: nested paths,
//! verbs mapped to controller actions, parameter handlers, policies and
//! CRUD resources. A [`RouterBuilder`] resolves every name in the
//! specification against the [`Application`]'s registries and compiles
//! each route into a fixed middleware chain:
//!
//! 1. mounted policies and `use` middleware of every enclosing level
//! 2. the route's `before` middleware
//! 3. the action's schema and `validate` checks, then the validation result
//! 4. the route policy
//! 5. the action itself
//! 6. the route's `after` middleware
//!
//! Misconfiguration (an unknown controller, an unregistered mandatory
//! policy, a resource allowing and denying actions) is a [`BuildError`]
//! raised before the router serves anything. Request failures are
//! [`HttpError`]s rendered as JSON error documents.
//!
//! # Core Types
//!
//! - [`Policy`]: an async check producing a [`PolicyDecision`]
//! - [`PolicySpec`]: an unresolved policy expression ([`check`], [`all`], [`any`], [`any_ordered`], [`negate`])
//! - [`Action`]: a route endpoint with optional validation schema
//! - [`Controller`] and [`ResourceController`]: named sources of handlers
//! - [`Middleware`]: one step of a compiled chain
//!
//! # Examples
//!
//! ```
//! use blueprint::{
//!     action_fn, body, check, Application, FnPolicy, Request, ResourceController, ResourceSpec,
//!     Response, RouterSpec,
//! };
//! use serde_json::json;
//!
//! let mut app = Application::new();
//! app.policies_mut()
//!     .register_policy("authenticated", FnPolicy::new(|req: &Request| req.principal().is_some()));
//! app.controllers_mut().register_as(
//!     "UserController",
//!     ResourceController::new("user").action(
//!         "create",
//!         action_fn(|req| Ok(Response::created(req.body().clone())))
//!             .with_validate(vec![body("email").is_email()]),
//!     ),
//! );
//!
//! let spec = RouterSpec::new().path(
//!     "/users",
//!     RouterSpec::new()
//!         .policy(check("authenticated"))
//!         .resource(ResourceSpec::new("UserController").allow(["create"])),
//! );
//! let router = app.build_router(spec).unwrap();
//! assert_eq!(router.routes().len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod app;
mod config;
mod controller;
mod error;
mod messaging;
mod middleware;
mod policy;
mod registry;
mod request;
mod router;
mod sanitizer;
mod validation;
mod view;

pub use action::{action_fn, Action, FnAction, NotFound, Sanitize, Validate};
pub use app::Application;
pub use config::{Config, PolicyConfig, RouterConfig, ValidationConfig};
pub use controller::{
    camel_case, param_fn, ActionRoute, ActionTable, BasicController, Controller, ControllerRegistry,
    Handler, MethodCall, ParamHandler, ResourceController, DEFAULT_METHOD,
};
pub use error::{
    BuildError, HttpError, Violation, DEFAULT_POLICY_FAILURE_CODE, DEFAULT_POLICY_FAILURE_MESSAGE,
    VALIDATION_FAILED_CODE,
};
pub use messaging::{Listener, Messenger};
pub use middleware::{middleware_fn, Flow, FnMiddleware, Middleware};
pub use policy::{
    all, any, any_ordered, check, negate, All, Any, AnyOrdered, Check, FnPolicy, Negate, Policy,
    PolicyDecision, PolicyFactory, PolicyRegistry, PolicySpec,
};
pub use registry::{Registry, Scope};
pub use request::{Location, Principal, Request, Response};
pub use router::{
    ActionOverrides, CompiledRouter, ParamSpec, ResourceSpec, RouteDescriptor, RouteInfo, RouteSpec,
    RouteTarget, Router, RouterBuilder, RouterSpec, Verb,
};
pub use sanitizer::{SanitizationError, SanitizationErrorKind, SanitizeSchema, Sanitizer};
pub use validation::{
    body, field, header, param, query, FieldCheck, FieldError, HandleValidationResult, Rule, Schema,
    ValidateFn,
};
pub use view::ViewEngine;
