use super::*;
use crate::layout::Layout;
use crate::lifecycle::testing::{BindOn, ScriptedController};
use crate::reconcile::{Engine, ReconcileActor};
use crate::store::SqliteStore;
use serde_json::json;
use tempfile::TempDir;

fn context(dir: &TempDir, ctrl: Arc<ScriptedController>) -> Arc<AgentContext> {
    let layout = Layout::rooted(dir.path());
    let store = Arc::new(SqliteStore::open(&layout.site_db()));
    let engine = Engine::new(layout.clone(), store.clone(), ctrl.clone());
    Arc::new(AgentContext {
        reconcile: ReconcileActor::spawn(engine),
        mysql_socket: dir.path().join("mysqld.sock"),
        layout,
        store,
        controller: ctrl,
    })
}

fn idle_controller() -> Arc<ScriptedController> {
    Arc::new(ScriptedController::new(false, BindOn::Never, vec![]))
}

fn echo(_ctx: Arc<AgentContext>, params: Value) -> HandlerFuture {
    Box::pin(async move { Ok::<_, AgentError>(json!({ "echo": params })) })
}

fn refuse(_ctx: Arc<AgentContext>, _params: Value) -> HandlerFuture {
    Box::pin(async { Err::<Value, _>(AgentError::Validation("nope".into())) })
}

fn request(method: &str, params: Value) -> Request {
    Request {
        id: "req-1".into(),
        method: method.into(),
        params,
    }
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn unknown_method_is_an_error_response() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(context(&dir, idle_controller()));

    let resp = dispatcher.handle(request("site.explode", json!({}))).await;
    assert_eq!(resp.id, "req-1");
    assert!(resp.result.is_none());
    assert_eq!(resp.error.as_deref(), Some("unknown method: site.explode"));
}

#[tokio::test]
async fn registered_handler_receives_params() {
    let dir = TempDir::new().unwrap();
    let mut dispatcher = Dispatcher::empty(context(&dir, idle_controller()));
    dispatcher.register("test.echo", echo);
    dispatcher.register("test.refuse", refuse);

    let resp = dispatcher.handle(request("test.echo", json!({ "a": 1 }))).await;
    assert_eq!(resp.result, Some(json!({ "echo": { "a": 1 } })));
    assert!(resp.error.is_none());

    let resp = dispatcher.handle(request("test.refuse", json!({}))).await;
    assert_eq!(resp.error.as_deref(), Some("nope"));
}

#[tokio::test]
async fn every_agent_method_is_registered() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(context(&dir, idle_controller()));
    let methods = dispatcher.methods();

    assert_eq!(methods.len(), 33);
    for name in [
        "caddy.reload",
        "cron.sync",
        "database.create",
        "site.createDirectory",
        "ssh.removeKey",
        "system.firewallDeleteRule",
        "system.installPhpVersion",
        "system.update",
        "user.updateLimits",
    ] {
        assert!(methods.contains(&name), "{} missing", name);
    }
}

// ============================================================================
// Handlers through the table
// ============================================================================

#[tokio::test]
async fn malformed_params_are_rejected_before_work() {
    let dir = TempDir::new().unwrap();
    let ctrl = idle_controller();
    let dispatcher = Dispatcher::new(context(&dir, ctrl.clone()));

    let resp = dispatcher
        .handle(request("system.setSshConfig", json!({ "port": "twenty-two" })))
        .await;
    let err = resp.error.unwrap();
    assert!(err.starts_with("invalid params"), "{}", err);
    assert!(ctrl.calls().is_empty());
}

#[tokio::test]
async fn caddy_reload_runs_a_pass_on_an_empty_host() {
    let dir = TempDir::new().unwrap();
    let ctrl = idle_controller();
    let ctx = context(&dir, ctrl.clone());
    let dispatcher = Dispatcher::new(ctx.clone());

    let resp = dispatcher.handle(request("caddy.reload", json!({}))).await;
    assert!(resp.error.is_none(), "{:?}", resp.error);
    let result = resp.result.unwrap();
    assert_eq!(result["status"], "ok");
    assert_eq!(result["action"], "started");
    assert_eq!(result["sites"], 0);

    assert!(ctx.layout.caddyfile().is_file());
    assert_eq!(ctrl.calls(), vec!["start-proxy"]);
}

#[tokio::test]
async fn caddy_config_round_trips_through_settings() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(context(&dir, idle_controller()));

    let current = dispatcher.call("system.getCaddyConfig", json!({})).await.unwrap();
    assert!(current["profile"].is_string());

    let mut updated = current.clone();
    updated["access_logs"] = json!(true);
    dispatcher.call("system.setCaddyConfig", updated).await.unwrap();

    let after = dispatcher.call("system.getCaddyConfig", json!({})).await.unwrap();
    assert_eq!(after["access_logs"], true);
}

#[tokio::test]
async fn services_list_proxy_and_platform_units() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(context(&dir, idle_controller()));

    let result = dispatcher.call("system.services", json!({})).await.unwrap();
    let names: Vec<&str> = result
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["fastcp-caddy", "mysql", "ssh", "fastcp", "fastcp-agent"]);
    assert!(result[0]["enabled"].as_bool().unwrap());
    assert_eq!(result[0]["status"], "running");
}
