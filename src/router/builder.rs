use std::sync::Arc;

use http::Method;
use serde_json::Value;
use tracing::{debug, info};

use super::compiled::{CompiledRouter, Layer, LayerKind, ParamBinding};
use super::path::{join, PathPattern};
use super::resource;
use super::spec::{ParamSpec, ResourceSpec, RouteDescriptor, RouteSpec, RouteTarget, RouterSpec, SpecEntry, Verb};
use super::Router;
use crate::action;
use crate::app::Application;
use crate::controller::{resolve_action, Handler};
use crate::error::BuildError;
use crate::middleware::Middleware;
use crate::policy::{Policy, PolicyMiddleware, PolicySpec};
use crate::view::RenderView;

/// Compiles router specifications against an [`Application`].
///
/// Specifications are compiled in the order they were added. Every
/// controller, policy and view they name is resolved during
/// [`build`](RouterBuilder::build); the first problem found aborts the
/// build, so a misconfigured route never serves a request.
///
/// # Examples
///
/// ```
/// use blueprint::{action_fn, Application, BasicController, Response, RouterBuilder, RouterSpec};
/// use serde_json::json;
///
/// let mut app = Application::new();
/// app.controllers_mut().register(
///     BasicController::new("PingController").action("ping", action_fn(|_req| Ok(Response::ok(json!("pong"))))),
/// );
///
/// let router = RouterBuilder::new(&app)
///     .add_specification(RouterSpec::new().path("/ping", RouterSpec::new().get("PingController@ping")))
///     .build()
///     .unwrap();
/// assert_eq!(router.routes()[0].path, "/ping");
/// ```
pub struct RouterBuilder<'a> {
    app: &'a Application,
    specs: Vec<(String, RouterSpec)>,
}

impl<'a> RouterBuilder<'a> {
    /// Starts a builder resolving names against `app`.
    pub fn new(app: &'a Application) -> Self {
        Self {
            app,
            specs: Vec::new(),
        }
    }

    /// Adds a specification mounted at the root.
    pub fn add_specification(mut self, spec: RouterSpec) -> Self {
        self.specs.push(("/".to_string(), spec));
        self
    }

    /// Adds a router's specification mounted at `path`.
    pub fn add_router(mut self, path: &str, router: &Router) -> Self {
        self.specs.push((path.to_string(), router.spec().clone()));
        self
    }

    /// Compiles everything added so far.
    ///
    /// # Errors
    ///
    /// Returns the first [`BuildError`] encountered.
    #[tracing::instrument(skip_all, fields(specs = self.specs.len()))]
    pub fn build(self) -> Result<CompiledRouter, BuildError> {
        let mut compiler = Compiler {
            app: self.app,
            layers: Vec::new(),
            params: Vec::new(),
        };
        for (path, spec) in &self.specs {
            compiler.level(&join("/", path), spec)?;
        }

        let routes = compiler
            .layers
            .iter()
            .filter(|l| matches!(l.kind, LayerKind::Route(_)))
            .count();
        info!(routes, layers = compiler.layers.len(), "router built");

        Ok(CompiledRouter::new(
            compiler.layers,
            compiler.params,
            self.app.config().router.head_from_get,
        ))
    }
}

struct Compiler<'a> {
    app: &'a Application,
    layers: Vec<Layer>,
    params: Vec<ParamBinding>,
}

impl Compiler<'_> {
    fn pattern(&self, path: &str) -> PathPattern {
        PathPattern::parse(path, self.app.config().router.case_sensitive)
    }

    fn mount(&mut self, path: &str, chain: Vec<Arc<dyn Middleware>>) {
        if chain.is_empty() {
            return;
        }
        let pattern = self.pattern(path);
        self.layers.push(Layer {
            kind: LayerKind::Use,
            pattern,
            chain,
        });
    }

    fn resolve_policy(&self, spec: &PolicySpec) -> Result<Option<Arc<dyn Policy>>, BuildError> {
        spec.resolve(self.app.policies())
    }

    fn policy_step(&self, policy: Arc<dyn Policy>) -> Arc<dyn Middleware> {
        Arc::new(PolicyMiddleware::new(policy, self.app.config().policy.status_code()))
    }

    /// Compiles one level of a specification mounted at `path`.
    fn level(&mut self, path: &str, spec: &RouterSpec) -> Result<(), BuildError> {
        let entries = spec.entries();

        for entry in entries {
            if let SpecEntry::Policy(policy) = entry {
                if let Some(policy) = self.resolve_policy(policy)? {
                    let step = self.policy_step(policy);
                    self.mount(path, vec![step]);
                }
            }
        }

        for entry in entries {
            if let SpecEntry::Use(middleware) = entry {
                self.mount(path, middleware.clone());
            }
        }

        for method in [Method::HEAD, Method::GET] {
            for entry in entries {
                match entry {
                    SpecEntry::Verb(verb, route) if verb.is(&method) => self.route(path, verb, route)?,
                    _ => {}
                }
            }
        }

        for entry in entries {
            match entry {
                SpecEntry::Path(key, nested) => self.level(&join(path, key), nested)?,
                SpecEntry::Mount(key, middleware) => self.mount(&join(path, key), middleware.clone()),
                SpecEntry::Param(name, param) => self.param(path, name, param)?,
                SpecEntry::Resource(resource) => self.resource(path, resource)?,
                SpecEntry::Verb(verb, route) if !verb.is(&Method::HEAD) && !verb.is(&Method::GET) => {
                    self.route(path, verb, route)?
                }
                SpecEntry::Verb(..) | SpecEntry::Policy(_) | SpecEntry::Use(_) => {}
            }
        }
        Ok(())
    }

    fn route(&mut self, path: &str, verb: &Verb, route: &RouteSpec) -> Result<(), BuildError> {
        let chain = match route {
            RouteSpec::Action(action) => {
                let handler = resolve_action(self.app.controllers(), action, path, Value::Null)?;
                self.handler_chain(action, handler, None, &[], &[])?
            }
            RouteSpec::Handler(handler) => self.handler_chain(path, handler.clone(), None, &[], &[])?,
            RouteSpec::Descriptor(descriptor) => self.descriptor_chain(path, descriptor)?,
        };

        debug!(method = %verb, path, steps = chain.len(), "route compiled");
        let pattern = self.pattern(path);
        self.layers.push(Layer {
            kind: LayerKind::Route(verb.clone()),
            pattern,
            chain,
        });
        Ok(())
    }

    fn descriptor_chain(
        &self,
        path: &str,
        descriptor: &RouteDescriptor,
    ) -> Result<Vec<Arc<dyn Middleware>>, BuildError> {
        let policy = match &descriptor.policy {
            Some(spec) => self.resolve_policy(spec)?,
            None => None,
        };

        match &descriptor.target {
            RouteTarget::Action(action) => {
                let handler =
                    resolve_action(self.app.controllers(), action, path, descriptor.options.clone())?;
                self.handler_chain(action, handler, policy, &descriptor.before, &descriptor.after)
            }
            RouteTarget::View(view) => {
                let engine = self
                    .app
                    .view_engine()
                    .ok_or_else(|| BuildError::MissingViewEngine(path.to_string()))?;

                let mut chain = descriptor.before.clone();
                chain.extend(policy.map(|p| self.policy_step(p)));
                chain.push(Arc::new(RenderView::new(
                    engine.clone(),
                    view,
                    descriptor.options.clone(),
                )));
                chain.extend(descriptor.after.iter().cloned());
                Ok(chain)
            }
        }
    }

    /// `before`, then the handler's own steps, then `after`.
    fn handler_chain(
        &self,
        target: &str,
        handler: Handler,
        policy: Option<Arc<dyn Policy>>,
        before: &[Arc<dyn Middleware>],
        after: &[Arc<dyn Middleware>],
    ) -> Result<Vec<Arc<dyn Middleware>>, BuildError> {
        let mut chain = before.to_vec();
        match handler {
            Handler::Action(action) => {
                chain.extend(action::compile(action, policy, self.app.config(), target)?);
            }
            Handler::Middleware(middleware) => {
                chain.extend(policy.map(|p| self.policy_step(p)));
                chain.extend(middleware);
            }
            other @ Handler::Param(_) => {
                return Err(BuildError::InvalidHandler {
                    target: target.to_string(),
                    found: other.kind(),
                })
            }
        }
        chain.extend(after.iter().cloned());
        Ok(chain)
    }

    fn param(&mut self, path: &str, name: &str, param: &ParamSpec) -> Result<(), BuildError> {
        let handler = match param {
            ParamSpec::Handler(handler) => handler.clone(),
            ParamSpec::Action(action) => {
                let mounted = join(path, &format!(":{}", name));
                match resolve_action(self.app.controllers(), action, &mounted, Value::Null)? {
                    Handler::Param(handler) => handler,
                    other => {
                        return Err(BuildError::InvalidHandler {
                            target: action.clone(),
                            found: other.kind(),
                        })
                    }
                }
            }
        };

        debug!(path, param = name, "param handler registered");
        let scope = self.pattern(path);
        self.params.push(ParamBinding {
            scope,
            name: name.to_string(),
            handler,
        });
        Ok(())
    }

    fn resource(&mut self, path: &str, spec: &ResourceSpec) -> Result<(), BuildError> {
        let app = self.app;
        let controller = app
            .controllers()
            .get(&spec.controller)
            .ok_or_else(|| BuildError::ControllerNotFound(spec.controller.clone()))?;
        let rc = controller
            .as_resource()
            .ok_or_else(|| BuildError::NotAResource(spec.controller.clone()))?;

        let expanded = resource::expand(spec, rc, app.config().policy.auto_resource_policies)?;
        self.level(path, &expanded)
    }
}
