//! The application: registries and configuration the router is built from.

use std::sync::Arc;

use crate::config::Config;
use crate::controller::ControllerRegistry;
use crate::error::BuildError;
use crate::policy::PolicyRegistry;
use crate::router::{CompiledRouter, RouterBuilder, RouterSpec};
use crate::view::ViewEngine;

/// Everything a router specification is resolved against.
///
/// Fill the registries while loading the application, then build routers.
/// The builder only ever borrows the application immutably.
///
/// # Examples
///
/// ```
/// use blueprint::{action_fn, Application, BasicController, Response, RouterSpec};
/// use serde_json::json;
///
/// let mut app = Application::new();
/// app.controllers_mut().register(
///     BasicController::new("HealthController")
///         .action("__invoke", action_fn(|_req| Ok(Response::ok(json!({"ok": true}))))),
/// );
///
/// let router = app.build_router(RouterSpec::new().get("HealthController")).unwrap();
/// assert_eq!(router.routes().len(), 1);
/// ```
#[derive(Default)]
pub struct Application {
    config: Config,
    policies: PolicyRegistry,
    controllers: ControllerRegistry,
    views: Option<Arc<dyn ViewEngine>>,
}

impl Application {
    /// Creates an application with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an application with `config`.
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Sets the view engine used by `view` routes.
    pub fn with_view_engine(mut self, engine: impl ViewEngine + 'static) -> Self {
        self.views = Some(Arc::new(engine));
        self
    }

    /// Configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registered policies.
    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// Registered policies, for loading.
    pub fn policies_mut(&mut self) -> &mut PolicyRegistry {
        &mut self.policies
    }

    /// Registered controllers.
    pub fn controllers(&self) -> &ControllerRegistry {
        &self.controllers
    }

    /// Registered controllers, for loading.
    pub fn controllers_mut(&mut self) -> &mut ControllerRegistry {
        &mut self.controllers
    }

    /// The view engine, if one is configured.
    pub fn view_engine(&self) -> Option<&Arc<dyn ViewEngine>> {
        self.views.as_ref()
    }

    /// Builds a router from a single specification.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found in `spec`.
    pub fn build_router(&self, spec: RouterSpec) -> Result<CompiledRouter, BuildError> {
        RouterBuilder::new(self).add_specification(spec).build()
    }
}
