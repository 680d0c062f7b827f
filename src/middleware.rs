//! The middleware contract every compiled route is made of.
//!
//! A route compiles to an ordered chain of [`Middleware`]. Each one either
//! passes the request on ([`Flow::Next`]), answers it
//! ([`Flow::Respond`]) or fails it with an [`HttpError`]. There is no
//! continuation callback: the chain runner drives the sequence, so a
//! middleware cannot "forget" to continue or continue twice.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HttpError;
use crate::request::{Request, Response};

/// Outcome of a middleware that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Continue with the next middleware
    Next,
    /// Stop and send this response
    Respond(Response),
}

/// A single step of a compiled request chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handles the request.
    async fn handle(&self, req: &mut Request) -> Result<Flow, HttpError>;

    /// Name used in build logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Adapter turning a synchronous closure into a [`Middleware`].
pub struct FnMiddleware<F> {
    f: F,
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Request) -> Result<Flow, HttpError> + Send + Sync,
{
    async fn handle(&self, req: &mut Request) -> Result<Flow, HttpError> {
        (self.f)(req)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

/// Wraps a closure as shared middleware.
///
/// # Examples
///
/// ```
/// use blueprint::{middleware_fn, Flow, Request};
/// use serde_json::json;
///
/// let stamp = middleware_fn(|req: &mut Request| {
///     req.set_local("stamped", json!(true));
///     Ok(Flow::Next)
/// });
/// assert_eq!(stamp.name(), "fn");
/// ```
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&mut Request) -> Result<Flow, HttpError> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware { f })
}

/// Runs a chain in order until a middleware responds or fails.
///
/// Returns `Flow::Next` when every middleware passed the request on.
pub(crate) async fn run_chain(
    chain: &[Arc<dyn Middleware>],
    req: &mut Request,
) -> Result<Flow, HttpError> {
    for mw in chain {
        if let Flow::Respond(resp) = mw.handle(req).await? {
            return Ok(Flow::Respond(resp));
        }
    }
    Ok(Flow::Next)
}
