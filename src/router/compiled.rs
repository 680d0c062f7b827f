use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use http::Method;
use tracing::{debug, error};

use super::path::PathPattern;
use super::spec::Verb;
use crate::controller::ParamHandler;
use crate::error::HttpError;
use crate::middleware::{run_chain, Flow, Middleware};
use crate::request::{Request, Response};

pub(crate) enum LayerKind {
    /// Matches any method at the pattern or below it
    Use,
    /// Matches the verb at exactly the pattern
    Route(Verb),
}

pub(crate) struct Layer {
    pub(crate) kind: LayerKind,
    pub(crate) pattern: PathPattern,
    pub(crate) chain: Vec<Arc<dyn Middleware>>,
}

pub(crate) struct ParamBinding {
    pub(crate) scope: PathPattern,
    pub(crate) name: String,
    pub(crate) handler: Arc<dyn ParamHandler>,
}

/// A compiled route, for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    /// Verb (`GET`, ..., or `ALL`)
    pub method: String,
    /// Full path pattern
    pub path: String,
    /// Names of the middleware steps, in order
    pub steps: Vec<String>,
}

/// The product of a [`RouterBuilder`](crate::RouterBuilder): an ordered
/// list of layers, each a path pattern with its middleware chain.
///
/// Dispatch walks the layers in order. Mounted middleware matches its path
/// and everything below it; routes match their verb and exact path. The
/// first layer to respond ends the request. A route whose chain completes
/// sends the response its action produced, after the `after` middleware
/// had a chance to modify it.
pub struct CompiledRouter {
    layers: Vec<Layer>,
    params: Vec<ParamBinding>,
    head_from_get: bool,
}

impl CompiledRouter {
    pub(crate) fn new(layers: Vec<Layer>, params: Vec<ParamBinding>, head_from_get: bool) -> Self {
        Self {
            layers,
            params,
            head_from_get,
        }
    }

    /// Dispatches a request. Never fails: errors are rendered as JSON
    /// error documents with their status.
    #[tracing::instrument(
        skip_all,
        fields(method = %req.method(), path = %req.path(), request_id = %req.request_id())
    )]
    pub async fn handle(&self, mut req: Request) -> Response {
        let is_head = req.method() == Method::HEAD;

        let response = match self.dispatch(&mut req).await {
            Ok(response) => response,
            Err(err) => {
                if err.status().is_server_error() {
                    error!(status = err.status().as_u16(), code = err.code(), "request failed");
                } else {
                    debug!(status = err.status().as_u16(), code = err.code(), "request rejected");
                }
                err.into_response()
            }
        };

        if is_head {
            response.without_body()
        } else {
            response
        }
    }

    async fn dispatch(&self, req: &mut Request) -> Result<Response, HttpError> {
        let path = req.path().to_string();
        let mut handled: HashSet<usize> = HashSet::new();

        for layer in &self.layers {
            let matched = match &layer.kind {
                LayerKind::Use => layer.pattern.match_prefix(&path),
                LayerKind::Route(verb) if self.verb_matches(verb, req.method()) => {
                    layer.pattern.match_exact(&path)
                }
                LayerKind::Route(_) => None,
            };
            let Some(params) = matched else { continue };
            req.set_params(params);

            if let Flow::Respond(response) = self.run_params(req, &path, &mut handled).await? {
                return Ok(response);
            }

            match run_chain(&layer.chain, req).await? {
                Flow::Respond(response) => return Ok(response),
                Flow::Next => {
                    if let Some(response) = req.take_response() {
                        return Ok(response);
                    }
                }
            }
        }

        Err(HttpError::not_found(format!("Cannot {} {}", req.method(), path)))
    }

    /// Runs each in-scope parameter handler once per request.
    async fn run_params(
        &self,
        req: &mut Request,
        path: &str,
        handled: &mut HashSet<usize>,
    ) -> Result<Flow, HttpError> {
        for (i, binding) in self.params.iter().enumerate() {
            if handled.contains(&i) || binding.scope.match_prefix(path).is_none() {
                continue;
            }
            let Some(value) = req.param(&binding.name).map(str::to_string) else {
                continue;
            };
            handled.insert(i);

            if let Flow::Respond(response) = binding.handler.handle(req, &value).await? {
                return Ok(Flow::Respond(response));
            }
        }
        Ok(Flow::Next)
    }

    fn verb_matches(&self, verb: &Verb, method: &Method) -> bool {
        match verb {
            Verb::All => true,
            Verb::Method(m) => {
                m == method || (self.head_from_get && method == Method::HEAD && m == Method::GET)
            }
        }
    }

    /// The compiled routes in dispatch order (mounted middleware excluded).
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.layers
            .iter()
            .filter_map(|layer| match &layer.kind {
                LayerKind::Route(verb) => Some(RouteInfo {
                    method: verb.to_string(),
                    path: layer.pattern.to_string(),
                    steps: layer.chain.iter().map(|mw| mw.name().to_string()).collect(),
                }),
                LayerKind::Use => None,
            })
            .collect()
    }
}

impl fmt::Debug for CompiledRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRouter")
            .field("layers", &self.layers.len())
            .field("params", &self.params.len())
            .field("head_from_get", &self.head_from_get)
            .finish()
    }
}
