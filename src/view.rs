//! View rendering for route leaves declared with `view` instead of `action`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::HttpError;
use crate::middleware::{Flow, Middleware};
use crate::request::{Request, Response};

/// Renders named templates to HTML.
///
/// The router only needs this seam; template loading and syntax belong to
/// the implementation.
pub trait ViewEngine: Send + Sync {
    /// Renders `view` with `context`.
    ///
    /// # Errors
    ///
    /// Returns an error (typically 500) if the view cannot be rendered.
    fn render(&self, view: &str, context: &Value) -> Result<String, HttpError>;
}

/// Renders a fixed view with the request's locals and params as context.
pub(crate) struct RenderView {
    engine: Arc<dyn ViewEngine>,
    view: String,
    options: Value,
}

impl RenderView {
    pub(crate) fn new(engine: Arc<dyn ViewEngine>, view: &str, options: Value) -> Self {
        Self {
            engine,
            view: view.to_string(),
            options,
        }
    }
}

#[async_trait]
impl Middleware for RenderView {
    async fn handle(&self, req: &mut Request) -> Result<Flow, HttpError> {
        let mut context: Map<String, Value> = req.locals().clone();
        let params: Map<String, Value> = req
            .params()
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        context.insert("params".to_string(), Value::Object(params));
        if !self.options.is_null() {
            context.insert("options".to_string(), self.options.clone());
        }

        let html = self.engine.render(&self.view, &Value::Object(context))?;
        req.set_response(Response::html(html));
        Ok(Flow::Next)
    }

    fn name(&self) -> &str {
        "render_view"
    }
}
