//! Expansion of the `resource` shorthand into ordinary route entries.

use serde_json::Value;

use super::spec::{ResourceSpec, RouteDescriptor, RouterSpec, Verb};
use crate::action::NotFound;
use crate::controller::{ActionRoute, Handler, ResourceController};
use crate::error::BuildError;
use crate::policy::{check, PolicySpec};

/// Expands `resource` into the routes its controller's action table declares.
///
/// Collection routes come first, then static sub-paths (`/count`), then
/// routes addressing one entity (`/:userId`), so static segments are never
/// shadowed by the id parameter. Static sub-paths of actions left out by
/// `allow` or `deny` are kept as 404 routes for the same reason.
pub(crate) fn expand(
    resource: &ResourceSpec,
    controller: &ResourceController,
    auto_policies: bool,
) -> Result<RouterSpec, BuildError> {
    if resource.allow.is_some() && resource.deny.is_some() {
        return Err(BuildError::AllowAndDeny(resource.controller.clone()));
    }

    let table = controller.actions();
    let named = resource
        .allow
        .iter()
        .chain(resource.deny.iter())
        .flatten()
        .chain(resource.actions.iter().map(|(name, _)| name));
    for name in named {
        if !table.contains(name) {
            return Err(BuildError::UnknownResourceAction {
                resource: resource.controller.clone(),
                action: name.clone(),
            });
        }
    }

    let included = |name: &str| match (&resource.allow, &resource.deny) {
        (Some(allow), _) => allow.iter().any(|a| a == name),
        (_, Some(deny)) => !deny.iter().any(|d| d == name),
        _ => true,
    };
    let routes: Vec<(&str, &ActionRoute)> = table.iter().filter(|(name, _)| included(*name)).collect();

    let mut spec = RouterSpec::new();
    if let Some(policy) = &resource.policy {
        spec = spec.policy(policy.clone());
    }

    let root = routes.iter().filter(|(_, r)| is_root(r));
    let fixed = routes.iter().filter(|(_, r)| !is_root(r) && !r.is_single());
    let single: Vec<_> = routes.iter().filter(|(_, r)| r.is_single()).collect();

    for (name, route) in root.chain(fixed) {
        spec = mount(spec, resource, controller, name, route, auto_policies);
    }

    // Static sub-paths of excluded actions still answer 404 instead of
    // reaching the id parameter (`/count` must not become `getOne`).
    let mut reserved: Vec<String> = Vec::new();
    if !single.is_empty() {
        let excluded = table
            .iter()
            .filter(|(name, r)| !included(*name) && !is_root(r) && !r.is_single());
        for (_, route) in excluded {
            if let Some(path) = route.resolved_path(controller.id()) {
                if !reserved.contains(&path) {
                    reserved.push(path);
                }
            }
        }
    }
    for path in &reserved {
        spec = spec.path(path, RouterSpec::new().all(Handler::action(NotFound)));
    }

    for (name, route) in single {
        spec = mount(spec, resource, controller, name, route, auto_policies);
    }

    tracing::debug!(
        controller = %resource.controller,
        resource = controller.resource_name(),
        actions = routes.len(),
        reserved = reserved.len(),
        "resource expanded"
    );
    Ok(spec)
}

fn mount(
    spec: RouterSpec,
    resource: &ResourceSpec,
    controller: &ResourceController,
    name: &str,
    route: &ActionRoute,
    auto_policies: bool,
) -> RouterSpec {
    let leaf = descriptor(resource, controller, name, route, auto_policies);
    let verb = Verb::Method(route.verb().clone());
    match route.resolved_path(controller.id()) {
        Some(path) if !is_root(route) => spec.path(&path, RouterSpec::new().verb(verb, leaf)),
        _ => spec.verb(verb, leaf),
    }
}

fn is_root(route: &ActionRoute) -> bool {
    route.path().map_or(true, |p| p.trim_matches('/').is_empty())
}

fn descriptor(
    resource: &ResourceSpec,
    controller: &ResourceController,
    name: &str,
    route: &ActionRoute,
    auto_policies: bool,
) -> RouteDescriptor {
    let overrides = resource
        .actions
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, o)| o.clone())
        .unwrap_or_default();

    let mut leaf = RouteDescriptor::action(format!("{}@{}", resource.controller, route.method()))
        .options(merge_options(&resource.options, overrides.options.as_ref()));

    let policy: Option<PolicySpec> = match overrides.policy {
        Some(policy) => Some(policy),
        None if auto_policies => Some(check(&controller.policy_path(name)).optional().into()),
        None => None,
    };
    if let Some(policy) = policy {
        leaf = leaf.policy(policy);
    }

    leaf.before = overrides.before;
    leaf.after = overrides.after;
    leaf
}

/// Shallow merge of two option objects; `action` keys win.
fn merge_options(resource: &Value, action: Option<&Value>) -> Value {
    match (resource, action) {
        (Value::Object(base), Some(Value::Object(over))) => {
            let mut merged = base.clone();
            merged.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::Object(merged)
        }
        (_, Some(over)) => over.clone(),
        (base, None) => base.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ActionTable;
    use crate::router::spec::{ActionOverrides, RouteSpec, RouteTarget, SpecEntry};
    use http::Method;
    use serde_json::json;

    /// Flattens an expansion into `(verb, path, action, policy)` rows.
    fn rows(spec: &RouterSpec) -> Vec<(String, String, String, String)> {
        let mut out = Vec::new();
        for entry in spec.entries() {
            match entry {
                SpecEntry::Verb(verb, route) => out.push(row(verb, "/", route)),
                SpecEntry::Path(path, nested) => {
                    for inner in nested.entries() {
                        if let SpecEntry::Verb(verb, route) = inner {
                            out.push(row(verb, path, route));
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn row(verb: &Verb, path: &str, route: &RouteSpec) -> (String, String, String, String) {
        let d = match route {
            RouteSpec::Descriptor(d) => d,
            RouteSpec::Handler(_) => return (verb.to_string(), path.to_string(), "404".to_string(), String::new()),
            RouteSpec::Action(a) => panic!("unexpected action string {}", a),
        };
        let RouteTarget::Action(action) = d.target() else {
            panic!("expected an action");
        };
        let policy = d.policy.as_ref().map(|p| format!("{:?}", p)).unwrap_or_default();
        (verb.to_string(), path.to_string(), action.clone(), policy)
    }

    fn users() -> ResourceController {
        ResourceController::new("user")
    }

    #[test]
    fn emits_collection_static_then_single() {
        let spec = expand(&ResourceSpec::new("UserController"), &users(), true).unwrap();
        let order: Vec<(String, String)> = rows(&spec).into_iter().map(|r| (r.0, r.1)).collect();
        assert_eq!(
            order,
            vec![
                ("POST".to_string(), "/".to_string()),
                ("GET".to_string(), "/".to_string()),
                ("GET".to_string(), "/count".to_string()),
                ("GET".to_string(), "/:userId".to_string()),
                ("PUT".to_string(), "/:userId".to_string()),
                ("DELETE".to_string(), "/:userId".to_string()),
            ]
        );
    }

    #[test]
    fn auto_policies_follow_namespace() {
        let rc = users().with_namespace("test");
        let spec = expand(&ResourceSpec::new("UserController"), &rc, true).unwrap();
        let create = &rows(&spec)[0];
        assert_eq!(create.2, "UserController@create");
        assert_eq!(create.3, "Check(?test.user.create)");
    }

    #[test]
    fn auto_policies_can_be_disabled() {
        let spec = expand(&ResourceSpec::new("UserController"), &users(), false).unwrap();
        assert!(rows(&spec).iter().all(|r| r.3.is_empty()));
    }

    #[test]
    fn override_policy_replaces_auto_policy() {
        let resource = ResourceSpec::new("UserController")
            .action("getOne", ActionOverrides::new().policy(check("user.owner")));
        let spec = expand(&resource, &users(), true).unwrap();
        let get_one = rows(&spec).into_iter().find(|r| r.2.ends_with("@getOne")).unwrap();
        assert_eq!(get_one.3, "Check(user.owner)");
    }

    #[test]
    fn allow_and_deny_filter() {
        let allowed = expand(&ResourceSpec::new("UserController").allow(["getOne"]), &users(), true).unwrap();
        let routes: Vec<(String, String, String)> =
            rows(&allowed).into_iter().map(|r| (r.0, r.1, r.2)).collect();
        assert_eq!(
            routes,
            vec![
                ("ALL".to_string(), "/count".to_string(), "404".to_string()),
                ("GET".to_string(), "/:userId".to_string(), "UserController@getOne".to_string()),
            ]
        );

        let denied = expand(&ResourceSpec::new("UserController").deny(["delete"]), &users(), true).unwrap();
        let rows = rows(&denied);
        assert_eq!(rows.len(), 5);
        assert!(!rows.iter().any(|r| r.0 == "DELETE"));
    }

    #[test]
    fn excluded_static_paths_are_reserved_only_before_id_routes() {
        let denied = expand(&ResourceSpec::new("UserController").deny(["count"]), &users(), true).unwrap();
        let entries = rows(&denied);
        let reserved = entries.iter().position(|r| r.2 == "404").unwrap();
        let first_single = entries.iter().position(|r| r.1 == "/:userId").unwrap();
        assert_eq!(entries[reserved].1, "/count");
        assert!(reserved < first_single);

        let collection_only =
            expand(&ResourceSpec::new("UserController").allow(["create"]), &users(), true).unwrap();
        assert!(!rows(&collection_only).iter().any(|r| r.2 == "404"));
    }

    #[test]
    fn allow_with_deny_is_rejected() {
        let resource = ResourceSpec::new("UserController").allow(["getOne"]).deny(["delete"]);
        let err = expand(&resource, &users(), true).unwrap_err();
        assert!(matches!(err, BuildError::AllowAndDeny(c) if c == "UserController"));
    }

    #[test]
    fn unknown_actions_are_rejected() {
        let err = expand(&ResourceSpec::new("UserController").allow(["publish"]), &users(), true).unwrap_err();
        assert!(matches!(err, BuildError::UnknownResourceAction { action, .. } if action == "publish"));

        let resource = ResourceSpec::new("UserController").action("archive", ActionOverrides::new());
        assert!(expand(&resource, &users(), true).is_err());
    }

    #[test]
    fn custom_actions_use_the_id_parameter() {
        let rc = users().with_actions(
            ActionTable::new().with_action("archive", ActionRoute::new(Method::POST, "archive").at("/:rcId/archive")),
        );
        let spec = expand(&ResourceSpec::new("UserController"), &rc, true).unwrap();
        let archive = rows(&spec).into_iter().last().unwrap();
        assert_eq!((archive.1.as_str(), archive.2.as_str()), ("/:userId/archive", "UserController@archive"));
    }

    #[test]
    fn resource_policy_is_a_level_policy() {
        let spec = expand(&ResourceSpec::new("UserController").policy(check("authenticated")), &users(), true).unwrap();
        assert!(matches!(spec.entries()[0], SpecEntry::Policy(_)));
    }

    #[test]
    fn options_merge_with_action_winning() {
        let merged = merge_options(&json!({"a": 1, "b": 1}), Some(&json!({"b": 2})));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
        assert_eq!(merge_options(&Value::Null, None), Value::Null);
    }
}
