//! Router specifications and their compilation.
//!
//! A [`RouterSpec`] declares paths, verbs, parameter handlers, policies and
//! resources. The [`RouterBuilder`] resolves every name in it against an
//! [`Application`] and produces a [`CompiledRouter`] that dispatches
//! requests.
//!
//! Within one level of a specification, compilation order is fixed:
//! `policy` entries, then `use` middleware, then `head` routes, then `get`
//! routes, then everything else in declaration order. Dispatch walks the
//! compiled layers in that same order.

mod builder;
mod compiled;
mod path;
mod resource;
mod spec;

use serde_json::Value;

use crate::app::Application;
use crate::error::BuildError;

pub use builder::RouterBuilder;
pub use compiled::{CompiledRouter, RouteInfo};
pub use spec::{
    ActionOverrides, ParamSpec, ResourceSpec, RouteDescriptor, RouteSpec, RouteTarget, RouterSpec, Verb,
};

/// A reusable router: a specification that can be mounted under any path.
///
/// # Examples
///
/// ```
/// use blueprint::{Application, Router, RouterBuilder};
/// use serde_json::json;
///
/// let api = Router::from_json(&json!({"/health": {"policy": "?ops.open"}})).unwrap();
/// let app = Application::new();
/// let router = RouterBuilder::new(&app).add_router("/api", &api).build().unwrap();
/// assert!(router.routes().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Router {
    spec: RouterSpec,
}

impl Router {
    /// Wraps a specification.
    pub fn new(spec: RouterSpec) -> Self {
        Self { spec }
    }

    /// Parses a JSON specification.
    ///
    /// # Errors
    ///
    /// See [`RouterSpec::from_json`].
    pub fn from_json(value: &Value) -> Result<Self, BuildError> {
        Ok(Self::new(RouterSpec::from_json(value)?))
    }

    /// The wrapped specification.
    pub fn spec(&self) -> &RouterSpec {
        &self.spec
    }

    /// Compiles the router on its own, mounted at the root.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn build(&self, app: &Application) -> Result<CompiledRouter, BuildError> {
        RouterBuilder::new(app).add_router("/", self).build()
    }
}
