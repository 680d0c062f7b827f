//! Request and response values flowing through compiled middleware chains.
//!
//! These types are deliberately independent of any HTTP server. A hosting
//! integration builds a [`Request`] from its own request type, hands it to
//! [`CompiledRouter::handle`](crate::CompiledRouter::handle) and writes the
//! returned [`Response`] back out.

use std::collections::HashMap;
use std::fmt;

use http::header::{HeaderName, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::messaging::Messenger;
use crate::validation::FieldError;

/// An authenticated user or service principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// Unique identifier for this principal
    pub id: String,
    /// Display name
    pub name: String,
    /// Roles granted to the principal
    pub roles: Vec<String>,
}

impl Principal {
    /// Creates a principal without roles.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roles: Vec::new(),
        }
    }

    /// Adds a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Returns true if the principal holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Part of the request a field is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// Route parameters (`/users/:userId`)
    Params,
    /// Query string
    Query,
    /// JSON body
    Body,
    /// Request headers
    Headers,
}

impl Location {
    /// Search order used when a field does not name its location.
    pub const ALL: [Location; 4] = [
        Location::Params,
        Location::Query,
        Location::Body,
        Location::Headers,
    ];

    /// Parses the names used in declarative schemas (`"body"`, `"params"`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "params" => Some(Location::Params),
            "query" => Some(Location::Query),
            "body" => Some(Location::Body),
            "headers" => Some(Location::Headers),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Params => write!(f, "params"),
            Location::Query => write!(f, "query"),
            Location::Body => write!(f, "body"),
            Location::Headers => write!(f, "headers"),
        }
    }
}

/// An incoming request.
///
/// Route parameters are filled in by the compiled router while dispatching;
/// validators record their findings in the request so that a later
/// middleware can decide whether to reject it.
///
/// # Examples
///
/// ```
/// use blueprint::Request;
/// use serde_json::json;
///
/// let req = Request::post("/users?notify=true")
///     .with_request_id("req-1")
///     .with_json(json!({"email": "alice@example.com"}));
///
/// assert_eq!(req.path(), "/users");
/// assert_eq!(req.query("notify"), Some("true"));
/// assert_eq!(req.body()["email"], "alice@example.com");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    request_id: String,
    method: Method,
    path: String,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Value,
    principal: Option<Principal>,
    locals: Map<String, Value>,
    validation_errors: Vec<FieldError>,
    response: Option<Response>,
    messenger: Option<Messenger>,
}

impl Request {
    /// Creates a request for `method` and `target` (path plus optional query string).
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, HashMap::new()),
        };
        let path = if path.is_empty() { "/" } else { path };

        Self {
            request_id: String::new(),
            method,
            path: path.to_string(),
            params: HashMap::new(),
            query,
            headers: HeaderMap::new(),
            body: Value::Null,
            principal: None,
            locals: Map::new(),
            validation_errors: Vec::new(),
            response: None,
            messenger: None,
        }
    }

    /// `GET target`
    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    /// `POST target`
    pub fn post(target: &str) -> Self {
        Self::new(Method::POST, target)
    }

    /// `PUT target`
    pub fn put(target: &str) -> Self {
        Self::new(Method::PUT, target)
    }

    /// `DELETE target`
    pub fn delete(target: &str) -> Self {
        Self::new(Method::DELETE, target)
    }

    /// `HEAD target`
    pub fn head(target: &str) -> Self {
        Self::new(Method::HEAD, target)
    }

    /// Sets the request identifier used in logs.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Sets the JSON body.
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Adds a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Sets the authenticated principal.
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Returns the request identifier.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns a route parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns all route parameters of the layer currently executing.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// Returns a query string value.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the JSON body (`Null` when none was sent).
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Returns the JSON body for modification.
    pub fn body_mut(&mut self) -> &mut Value {
        &mut self.body
    }

    /// Returns the authenticated principal, if any.
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Sets (or clears) the authenticated principal.
    pub fn set_principal(&mut self, principal: Option<Principal>) {
        self.principal = principal;
    }

    /// Returns a value stored by an earlier middleware.
    pub fn local(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }

    /// Stores a value for later middleware in the same request.
    pub fn set_local(&mut self, key: impl Into<String>, value: Value) {
        self.locals.insert(key.into(), value);
    }

    /// Returns every stored local.
    pub fn locals(&self) -> &Map<String, Value> {
        &self.locals
    }

    /// Reads a field from one part of the request.
    ///
    /// Body fields accept dotted paths (`address.city`).
    pub fn field(&self, location: Location, name: &str) -> Option<Value> {
        match location {
            Location::Params => self.params.get(name).cloned().map(Value::String),
            Location::Query => self.query.get(name).cloned().map(Value::String),
            Location::Headers => self.header(name).map(|v| Value::String(v.to_string())),
            Location::Body => {
                let mut current = &self.body;
                for segment in name.split('.') {
                    current = current.as_object()?.get(segment)?;
                }
                Some(current.clone())
            }
        }
    }

    /// Writes a field back into one part of the request.
    ///
    /// Non-body locations only hold strings; other JSON values are stored in
    /// their serialized form.
    pub fn set_field(&mut self, location: Location, name: &str, value: Value) {
        let as_string = |v: &Value| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        match location {
            Location::Params => {
                self.params.insert(name.to_string(), as_string(&value));
            }
            Location::Query => {
                self.query.insert(name.to_string(), as_string(&value));
            }
            Location::Headers => {
                if let (Ok(n), Ok(v)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(&as_string(&value)),
                ) {
                    self.headers.insert(n, v);
                }
            }
            Location::Body => {
                if !self.body.is_object() {
                    self.body = Value::Object(Map::new());
                }
                let mut current = &mut self.body;
                let mut segments = name.split('.').peekable();
                while let Some(segment) = segments.next() {
                    let Some(obj) = current.as_object_mut() else {
                        return;
                    };
                    if segments.peek().is_none() {
                        obj.insert(segment.to_string(), value);
                        return;
                    }
                    current = obj
                        .entry(segment.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                }
            }
        }
    }

    /// Records a validation failure; checked later by the validation-result step.
    pub fn add_validation_error(&mut self, error: FieldError) {
        self.validation_errors.push(error);
    }

    /// Returns the validation failures recorded so far.
    pub fn validation_errors(&self) -> &[FieldError] {
        &self.validation_errors
    }

    /// The response produced by the route's action, once it has executed.
    ///
    /// `after` middleware use this to inspect or amend what will be sent.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// The pending response, for modification.
    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.response.as_mut()
    }

    pub(crate) fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    pub(crate) fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Publishes on the messenger of the controller whose action is
    /// executing. Returns the number of listeners reached, zero when the
    /// action has no controller messenger.
    pub fn emit(&self, topic: &str, payload: &Value) -> usize {
        self.messenger.as_ref().map_or(0, |m| m.emit(topic, payload))
    }

    pub(crate) fn set_messenger(&mut self, messenger: Option<Messenger>) {
        self.messenger = messenger;
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// A response produced by an action or middleware.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl Response {
    /// Creates a response with a status and JSON body.
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// 200 with a JSON body.
    pub fn ok(body: Value) -> Self {
        Self::new(StatusCode::OK, body)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
    }

    /// 201 with a JSON body.
    pub fn created(body: Value) -> Self {
        Self::new(StatusCode::CREATED, body)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
    }

    /// 204 without a body.
    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT, Value::Null)
    }

    /// 200 with an HTML document.
    pub fn html(document: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, Value::String(document.into())).with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )
    }

    /// Sets a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a header on a response being amended in place.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Returns the status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the body.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Drops the body, keeping status and headers (HEAD responses).
    pub(crate) fn without_body(mut self) -> Self {
        self.body = Value::Null;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_splits_path_and_query() {
        let req = Request::get("/users?sort=name&limit=10");
        assert_eq!(req.path(), "/users");
        assert_eq!(req.query("sort"), Some("name"));
        assert_eq!(req.query("limit"), Some("10"));
    }

    #[test]
    fn empty_target_is_root() {
        let req = Request::get("");
        assert_eq!(req.path(), "/");
    }

    #[test]
    fn query_plus_decodes_to_space() {
        let req = Request::get("/search?q=rust+router");
        assert_eq!(req.query("q"), Some("rust router"));
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let req = Request::get("/signup?email=ada%40example.com&name=Ada%20Lovelace");
        assert_eq!(req.query("email"), Some("ada@example.com"));
        assert_eq!(req.query("name"), Some("Ada Lovelace"));
    }

    #[test]
    fn body_field_supports_dotted_paths() {
        let req = Request::post("/").with_json(json!({"address": {"city": "Oslo"}}));
        assert_eq!(req.field(Location::Body, "address.city"), Some(json!("Oslo")));
        assert_eq!(req.field(Location::Body, "address.zip"), None);
    }

    #[test]
    fn set_field_creates_nested_objects() {
        let mut req = Request::post("/");
        req.set_field(Location::Body, "profile.age", json!(42));
        assert_eq!(req.body(), &json!({"profile": {"age": 42}}));
    }

    #[test]
    fn set_field_stringifies_non_body_values() {
        let mut req = Request::get("/?page=1");
        req.set_field(Location::Query, "page", json!(2));
        assert_eq!(req.query("page"), Some("2"));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::get("/").with_header("X-Api-Key", "k1");
        assert_eq!(req.header("x-api-key"), Some("k1"));
        assert_eq!(req.field(Location::Headers, "x-api-key"), Some(json!("k1")));
    }

    #[test]
    fn principal_roles() {
        let p = Principal::new("u1", "Alice").with_role("admin");
        assert!(p.has_role("admin"));
        assert!(!p.has_role("auditor"));
    }

    #[test]
    fn locals_round_trip() {
        let mut req = Request::get("/");
        req.set_local("user", json!({"id": 1}));
        assert_eq!(req.local("user"), Some(&json!({"id": 1})));
    }

    #[test]
    fn location_parse() {
        assert_eq!(Location::parse("body"), Some(Location::Body));
        assert_eq!(Location::parse("cookies"), None);
        assert_eq!(Location::Params.to_string(), "params");
    }
}
