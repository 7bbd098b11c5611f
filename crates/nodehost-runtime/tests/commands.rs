use std::sync::Arc;

use nodehost_core::NodePath;
use nodehost_core::layout::controller_path;
use nodehost_process::ProcessRegistry;
use nodehost_test::{
    MockFetcher, MockNode, TestHost, mock_loader, test_installed, test_manifest,
};
use serde_json::{Value, json};

async fn started_host() -> (TestHost, MockNode) {
    let host = TestHost::new(MockFetcher::new()).await;
    host.manager
        .registry()
        .register(test_installed("weather", test_manifest("weather")))
        .await
        .unwrap();
    let node = MockNode::new();
    host.loaders
        .register(Arc::new(mock_loader([("weather", node.clone())])))
        .unwrap();
    host.controller.start().await.unwrap();
    (host, node)
}

fn error_code(reply: &Value) -> &str {
    assert_eq!(reply["status"], "error", "expected an error reply: {reply}");
    reply["error"]["code"].as_str().unwrap()
}

#[tokio::test]
async fn load_status_and_unload_by_command() {
    let (host, node) = started_host().await;

    let reply = host
        .controller
        .handle_command(&json!({ "command": "load_node", "package_id": "weather" }))
        .await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["package_id"], "weather");
    assert!(reply["instance_id"].is_string());
    assert_eq!(node.initialize_calls(), 1);

    let reply = host
        .controller
        .handle_command(&json!({ "command": "node_status", "package_id": "weather" }))
        .await;
    assert_eq!(reply["nodes"][0]["state"], "running");
    assert_eq!(reply["nodes"][0]["path"], "/flows/weather/weather");

    let reply = host
        .controller
        .handle_command(&json!({ "command": "list_nodes" }))
        .await;
    assert_eq!(reply["nodes"].as_array().unwrap().len(), 1);
    assert!(
        reply["flags"]
            .as_array()
            .unwrap()
            .contains(&Value::from("READY"))
    );

    let reply = host
        .controller
        .handle_command(&json!({ "command": "unload_node", "package_id": "weather" }))
        .await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["unloaded"][0]["clean"], true);
    assert_eq!(node.shutdown_calls(), 1);
}

#[tokio::test]
async fn malformed_commands_get_error_replies() {
    let (host, _node) = started_host().await;
    let controller = &host.controller;

    let reply = controller.handle_command(&json!({ "command": "reboot" })).await;
    assert_eq!(error_code(&reply), "validation");
    assert!(
        reply["error"]["message"]
            .as_str()
            .unwrap()
            .contains("reboot")
    );

    let reply = controller.handle_command(&json!({ "package_id": "weather" })).await;
    assert_eq!(error_code(&reply), "validation");

    let reply = controller.handle_command(&json!({ "command": "load_node" })).await;
    assert_eq!(error_code(&reply), "validation");

    let reply = controller
        .handle_command(&json!({ "command": "load_node", "package_id": "missing" }))
        .await;
    assert_eq!(error_code(&reply), "not_found");

    let reply = controller
        .handle_command(&json!({ "command": "unload_node", "package_id": "weather" }))
        .await;
    assert_eq!(error_code(&reply), "not_found");
}

#[tokio::test]
async fn second_load_by_command_conflicts() {
    let (host, _node) = started_host().await;
    let load = json!({ "command": "load_node", "package_id": "weather" });

    assert_eq!(host.controller.handle_command(&load).await["status"], "ok");
    let reply = host.controller.handle_command(&load).await;
    assert_eq!(error_code(&reply), "conflict");
}

#[tokio::test]
async fn controller_answers_at_its_path() {
    let (host, _node) = started_host().await;
    let reply = host
        .processes
        .request(
            &NodePath::root(),
            &controller_path(),
            json!({ "command": "list_nodes" }),
        )
        .await
        .unwrap();
    assert_eq!(reply["status"], "ok");
    assert!(reply["nodes"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_unloads_and_withdraws_the_controller() {
    let (host, node) = started_host().await;
    host.controller
        .handle_command(&json!({ "command": "load_node", "package_id": "weather" }))
        .await;

    let outcomes = host.controller.shutdown().await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].clean);
    assert_eq!(node.shutdown_calls(), 1);
    assert!(host.controller.instances().is_empty());
    assert!(!host.processes.contains(&controller_path()));

    let reply = host
        .controller
        .handle_command(&json!({ "command": "load_node", "package_id": "weather" }))
        .await;
    assert_eq!(error_code(&reply), "conflict");
}
