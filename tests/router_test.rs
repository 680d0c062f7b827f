//! End-to-end tests: specifications built against an application and
//! exercised through the compiled router.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use blueprint::{
    action_fn, body, check, middleware_fn, param_fn, ActionOverrides, Application, BasicController,
    BuildError, Controller, Flow, HttpError, Policy, PolicyDecision, Principal, Request, ResourceController,
    ResourceSpec, Response, RouteDescriptor, Router, RouterBuilder, RouterSpec,
};
use http::StatusCode;
use serde_json::{json, Value};

/// Grants iff its stored parameter is `true`.
struct Identity {
    grant: bool,
}

#[async_trait]
impl Policy for Identity {
    fn failure_code(&self) -> &str {
        "identity_failed"
    }

    fn failure_message(&self) -> &str {
        "Identity check failed"
    }

    async fn run_check(&self, _req: &Request) -> Result<PolicyDecision, HttpError> {
        Ok(self.grant.into())
    }
}

fn crud_controller(namespace: Option<&str>) -> ResourceController {
    let echo = |method: &'static str| {
        action_fn(move |req: &mut Request| {
            Ok(Response::ok(match req.param("userId") {
                Some(id) => json!({"method": method, "id": id}),
                None => json!({"method": method}),
            }))
        })
    };

    let users = ResourceController::new("user")
        .action("create", echo("create"))
        .action("getAll", echo("getAll"))
        .action("getOne", echo("getOne"))
        .action("update", echo("update"))
        .action("delete", echo("delete"))
        .action("count", action_fn(|_req| Ok(Response::ok(json!({"count": 2})))));

    match namespace {
        Some(ns) => users.with_namespace(ns),
        None => users,
    }
}

fn app() -> Application {
    let mut app = Application::new();
    app.controllers_mut().register_as("UserController", crud_controller(None));
    app.policies_mut().register_factory("identity", |params: &[Value]| {
        let grant = params.first().and_then(Value::as_bool).unwrap_or(false);
        Ok(Arc::new(Identity { grant }) as Arc<dyn Policy>)
    });
    app
}

fn users(resource: ResourceSpec) -> RouterSpec {
    RouterSpec::new().path("/users", RouterSpec::new().resource(resource))
}

/// Routes log output through the test harness; `RUST_LOG` narrows it.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn status_of(router: &blueprint::CompiledRouter, req: Request) -> StatusCode {
    router.handle(req).await.status()
}

#[tokio::test]
async fn crud_scenario() {
    let spec = RouterSpec::from_json(&json!({
        "/users": {"resource": {"controller": "UserController"}}
    }))
    .unwrap();
    let router = app().build_router(spec).unwrap();

    let resp = router.handle(Request::post("/users")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.body(), &json!({"method": "create"}));

    let resp = router.handle(Request::get("/users/1")).await;
    assert_eq!(resp.body(), &json!({"method": "getOne", "id": "1"}));

    let resp = router.handle(Request::put("/users/1")).await;
    assert_eq!(resp.body(), &json!({"method": "update", "id": "1"}));

    let resp = router.handle(Request::delete("/users/1")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.body(), &json!({"method": "delete", "id": "1"}));

    let resp = router.handle(Request::get("/users/count")).await;
    assert_eq!(resp.body(), &json!({"count": 2}));
}

#[tokio::test]
async fn allow_list_hides_other_actions() {
    let router = app()
        .build_router(users(ResourceSpec::new("UserController").allow(["getOne"])))
        .unwrap();

    assert_eq!(status_of(&router, Request::get("/users/1")).await, StatusCode::OK);
    assert_eq!(status_of(&router, Request::post("/users")).await, StatusCode::NOT_FOUND);
    assert_eq!(status_of(&router, Request::get("/users")).await, StatusCode::NOT_FOUND);
    assert_eq!(status_of(&router, Request::put("/users/1")).await, StatusCode::NOT_FOUND);
    assert_eq!(status_of(&router, Request::delete("/users/1")).await, StatusCode::NOT_FOUND);

    let resp = router.handle(Request::get("/users/count")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_ne!(resp.body()["method"], "getOne");
}

#[tokio::test]
async fn deny_list_removes_only_denied_actions() {
    let router = app()
        .build_router(users(ResourceSpec::new("UserController").deny(["delete"])))
        .unwrap();

    assert_eq!(status_of(&router, Request::post("/users")).await, StatusCode::OK);
    assert_eq!(status_of(&router, Request::get("/users")).await, StatusCode::OK);
    assert_eq!(status_of(&router, Request::get("/users/1")).await, StatusCode::OK);
    assert_eq!(status_of(&router, Request::put("/users/1")).await, StatusCode::OK);

    let resp = router.handle(Request::delete("/users/1")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.body()["errors"][0]["code"], "not_found");
}

#[test]
fn allow_and_deny_together_fail_the_build() {
    let spec = users(ResourceSpec::new("UserController").allow(["getOne"]).deny(["delete"]));
    let err = app().build_router(spec).unwrap_err();
    assert!(matches!(err, BuildError::AllowAndDeny(_)));
}

#[tokio::test]
async fn namespaced_resource_applies_optional_policy() {
    let mut open = Application::new();
    open.controllers_mut()
        .register_as("UserController", crud_controller(Some("test")));
    let router = open
        .build_router(users(ResourceSpec::new("UserController")))
        .unwrap();
    assert_eq!(status_of(&router, Request::post("/users")).await, StatusCode::OK);

    let create = router.routes().into_iter().find(|r| r.method == "POST").unwrap();
    assert!(!create.steps.iter().any(|s| s == "policy"));

    let mut guarded = Application::new();
    guarded
        .controllers_mut()
        .register_as("UserController", crud_controller(Some("test")));
    guarded.policies_mut().register_factory("test.user.create", |_params: &[Value]| {
        Ok(Arc::new(Identity { grant: false }) as Arc<dyn Policy>)
    });
    let router = guarded
        .build_router(users(ResourceSpec::new("UserController")))
        .unwrap();

    let resp = router.handle(Request::post("/users")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.body()["errors"][0]["code"], "identity_failed");
    assert_eq!(status_of(&router, Request::get("/users")).await, StatusCode::OK);
}

#[test]
fn missing_mandatory_policy_names_the_policy() {
    let spec = RouterSpec::new()
        .path("/admin", RouterSpec::new().policy(check("missing")).get("UserController@getAll"));
    let err = app().build_router(spec).unwrap_err();
    assert_eq!(err.to_string(), "policy missing not found");
}

#[tokio::test]
async fn validation_failure_stops_before_execute() {
    let executed = Arc::new(AtomicBool::new(false));
    let flag = executed.clone();

    let mut app = app();
    app.controllers_mut().register(
        BasicController::new("SignupController").action(
            "create",
            action_fn(move |_req| {
                flag.store(true, Ordering::SeqCst);
                Ok(Response::created(json!({"ok": true})))
            })
            .with_validate(vec![body("email").is_email().with_message("A valid email is required")]),
        ),
    );
    let router = app
        .build_router(RouterSpec::new().path("/signup", RouterSpec::new().post("SignupController@create")))
        .unwrap();

    let resp = router
        .handle(Request::post("/signup").with_json(json!({"email": "not-an-email"})))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let error = &resp.body()["errors"][0];
    assert_eq!(error["code"], "validation_failed");
    assert_eq!(error["details"][0]["field"], "email");
    assert_eq!(error["details"][0]["message"], "A valid email is required");
    assert!(!executed.load(Ordering::SeqCst));

    let resp = router
        .handle(Request::post("/signup").with_json(json!({"email": "ada@example.com"})))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(executed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn policy_failure_surfaces_policy_code_and_message() {
    let executed = Arc::new(AtomicBool::new(false));
    let flag = executed.clone();

    let mut app = app();
    app.controllers_mut().register(BasicController::new("SecretController").action(
        "show",
        action_fn(move |_req| {
            flag.store(true, Ordering::SeqCst);
            Ok(Response::ok(json!("secret")))
        }),
    ));
    let spec = RouterSpec::new().path(
        "/secret",
        RouterSpec::new()
            .get(RouteDescriptor::action("SecretController@show").policy(check("identity").param(false))),
    );
    let router = app.build_router(spec).unwrap();

    let resp = router.handle(Request::get("/secret")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        resp.body(),
        &json!({"errors": [{"code": "identity_failed", "message": "Identity check failed"}]})
    );
    assert!(!executed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn override_policy_and_after_middleware() {
    let resource = ResourceSpec::new("UserController").action(
        "getOne",
        ActionOverrides::new()
            .policy(check("identity").param(true))
            .after(middleware_fn(|req: &mut Request| {
                if let Some(resp) = req.response_mut() {
                    resp.set_header(
                        http::header::CACHE_CONTROL,
                        http::HeaderValue::from_static("private"),
                    );
                }
                Ok(Flow::Next)
            })),
    );
    let router = app().build_router(users(resource)).unwrap();

    let resp = router.handle(Request::get("/users/3")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["cache-control"], "private");
}

#[tokio::test]
async fn param_handler_loads_entity_for_nested_routes() {
    let spec = RouterSpec::new().path(
        "/users",
        RouterSpec::new()
            .param(
                "userId",
                param_fn(|req: &mut Request, id: &str| {
                    if id == "0" {
                        return Err(HttpError::not_found("No such user"));
                    }
                    req.set_local("user", json!({"id": id}));
                    Ok(Flow::Next)
                }),
            )
            .path(
                "/:userId/profile",
                RouterSpec::new().get(middleware_fn(|req: &mut Request| {
                    let user = req.local("user").cloned().unwrap_or_default();
                    Ok(Flow::Respond(Response::ok(user)))
                })),
            ),
    );
    let router = app().build_router(spec).unwrap();

    let resp = router.handle(Request::get("/users/8/profile")).await;
    assert_eq!(resp.body(), &json!({"id": "8"}));

    let resp = router.handle(Request::get("/users/0/profile")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.body()["errors"][0]["message"], "No such user");
}

#[tokio::test]
async fn mounted_policy_guards_every_route_below() {
    let mut app = app();
    app.policies_mut().register_policy(
        "authenticated",
        blueprint::FnPolicy::new(|req: &Request| req.principal().is_some())
            .with_failure("unauthenticated", "Sign in first"),
    );
    let api = Router::from_json(&json!({
        "policy": "authenticated",
        "/users": {"resource": {"controller": "UserController", "allow": ["getAll"]}}
    }))
    .unwrap();
    let router = RouterBuilder::new(&app).add_router("/api", &api).build().unwrap();

    let resp = router.handle(Request::get("/api/users")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.body()["errors"][0]["code"], "unauthenticated");

    let req = Request::get("/api/users").with_principal(Principal::new("u-1", "Ada"));
    assert_eq!(status_of(&router, req).await, StatusCode::OK);
}

#[tokio::test]
async fn head_requests_answer_from_get_without_body() {
    let router = app()
        .build_router(users(ResourceSpec::new("UserController")))
        .unwrap();

    let resp = router.handle(Request::head("/users/5")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.body(), &Value::Null);
}

#[tokio::test]
async fn panicking_action_becomes_internal_error() {
    init_tracing();
    let mut app = app();
    app.controllers_mut().register(
        BasicController::new("BrokenController")
            .action("__invoke", action_fn(|_req| -> Result<Response, HttpError> { panic!("boom") })),
    );
    let router = app
        .build_router(RouterSpec::new().path("/broken", RouterSpec::new().get("BrokenController")))
        .unwrap();

    let resp = router.handle(Request::get("/broken")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.body()["errors"][0]["message"], "The action failed unexpectedly");
}

#[tokio::test]
async fn executed_action_publishes_to_controller_listeners() {
    let signups = BasicController::new("SignupController").action(
        "__invoke",
        action_fn(|req| {
            req.emit("user.signed_up", req.body());
            Ok(Response::created(req.body().clone()))
        }),
    );
    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = received.clone();
    signups
        .messenger()
        .unwrap()
        .on("user.signed_up", move |payload| sink.lock().unwrap().push(payload.clone()));

    let mut app = app();
    app.controllers_mut().register(signups);
    let router = app
        .build_router(RouterSpec::new().path("/signup", RouterSpec::new().post("SignupController")))
        .unwrap();

    let resp = router
        .handle(Request::post("/signup").with_json(json!({"email": "ada@example.com"})))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(*received.lock().unwrap(), vec![json!({"email": "ada@example.com"})]);
}
