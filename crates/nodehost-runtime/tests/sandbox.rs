use std::sync::Arc;

use nodehost_capabilities::{
    CapabilityManifest, NodeSecurityPolicy, Operation, PathCapability, PathPattern,
};
use nodehost_core::layout::controller_path;
use nodehost_core::{NodePath, PackageId, ProcessId};
use nodehost_packages::ProcessConfig;
use nodehost_process::ProcessRegistry;
use nodehost_test::{
    MockFetcher, MockNode, TEST_REPOSITORY, TestHost, install_request, install_request_with,
    mock_loader, package_entry, package_list,
};
use serde_json::json;

fn p(s: &str) -> NodePath {
    NodePath::parse(s).unwrap()
}

/// `caller` may message `echo` and the controller; `echo` has only the
/// default grants.
async fn two_nodes() -> (TestHost, MockNode, MockNode) {
    let fetcher = MockFetcher::new().with_document(
        TEST_REPOSITORY,
        package_list(
            "Main",
            vec![package_entry("caller", "1.0.0"), package_entry("echo", "1.0.0")],
        ),
    );
    let host = TestHost::new(fetcher).await;
    host.manager.update_repositories().await;

    let repos = host.manager.repositories();
    let echo = repos
        .find_available(&PackageId::lookup("echo").unwrap())
        .await
        .unwrap();
    host.manager.install(install_request(echo)).await.unwrap();

    let caller = repos
        .find_available(&PackageId::lookup("caller").unwrap())
        .await
        .unwrap();
    let config = ProcessConfig::standalone(&caller.id);
    let grants = CapabilityManifest::new()
        .with(PathCapability::new(
            PathPattern::exact(&p("/flows/echo/echo")),
            Operation::Message,
            "asks echo for replies",
        ))
        .with(PathCapability::new(
            PathPattern::exact(&controller_path()),
            Operation::Message,
            "queries node status",
        ));
    host.manager
        .install(install_request_with(caller, config, grants))
        .await
        .unwrap();

    let caller_node = MockNode::new();
    let echo_node = MockNode::new();
    host.loaders
        .register(Arc::new(mock_loader([
            ("caller", caller_node.clone()),
            ("echo", echo_node.clone()),
        ])))
        .unwrap();
    host.controller.start().await.unwrap();
    for id in ["echo", "caller"] {
        host.controller
            .load_node(&PackageId::lookup(id).unwrap())
            .await
            .unwrap();
    }
    (host, caller_node, echo_node)
}

#[tokio::test]
async fn granted_sibling_receives_messages() {
    let (_host, caller, echo) = two_nodes().await;
    let process = caller.process_interface().unwrap();
    let own = p("/flows/caller/caller");

    let reply = process
        .request(&own, &p("/flows/echo/echo"), json!({ "ping": 1 }))
        .await
        .unwrap();
    assert_eq!(reply, json!({ "echo": { "ping": 1 } }));

    let received = echo.messages();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, own);
}

#[tokio::test]
async fn ungranted_sibling_is_refused_and_reported() {
    let (host, caller, echo) = two_nodes().await;
    let mut violations = host.events.subscribe_type("security_violation");
    let process = echo.process_interface().unwrap();
    let own = p("/flows/echo/echo");

    let err = process
        .request(&own, &p("/flows/caller/caller"), json!({}))
        .await
        .unwrap_err();
    assert!(err.is_security_violation());
    assert!(caller.messages().is_empty());
    assert_eq!(violations.drain().len(), 1);

    let err = process
        .kill_process(&own, &p("/flows/caller/caller"))
        .await
        .unwrap_err();
    assert!(err.is_security_violation());
    assert!(host.processes.contains(&p("/flows/caller/caller")));
}

#[tokio::test]
async fn caller_outside_subtree_is_refused() {
    let (_host, caller, _echo) = two_nodes().await;
    let process = caller.process_interface().unwrap();

    let err = process
        .request(&p("/flows/echo/echo"), &p("/flows/echo/echo"), json!({}))
        .await
        .unwrap_err();
    assert!(err.is_security_violation());
}

#[tokio::test]
async fn topology_queries_stay_inside_the_subtree() {
    let (_host, caller, _echo) = two_nodes().await;
    let process = caller.process_interface().unwrap();
    let own = p("/flows/caller/caller");

    let visible = process.all_paths(&own).await.unwrap();
    assert_eq!(visible, vec![own.clone()]);
    assert!(
        process
            .children(&own, &p("/flows"))
            .await
            .unwrap_err()
            .is_security_violation()
    );
}

#[tokio::test]
async fn granted_node_can_query_the_controller() {
    let (_host, caller, echo) = two_nodes().await;
    let reply = caller
        .process_interface()
        .unwrap()
        .request(
            &p("/flows/caller/caller"),
            &controller_path(),
            json!({ "command": "list_nodes" }),
        )
        .await
        .unwrap();
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["nodes"].as_array().unwrap().len(), 2);

    let err = echo
        .process_interface()
        .unwrap()
        .request(
            &p("/flows/echo/echo"),
            &controller_path(),
            json!({ "command": "list_nodes" }),
        )
        .await
        .unwrap_err();
    assert!(err.is_security_violation());
}

#[tokio::test]
async fn child_interface_only_narrows() {
    let (_host, caller, _echo) = two_nodes().await;
    let parent = caller.process_interface().unwrap();
    let own = p("/flows/caller/caller");
    let worker = own.join("worker").unwrap();

    let mut tighter =
        NodeSecurityPolicy::new(PackageId::lookup("caller").unwrap(), ProcessId::new("caller").unwrap());
    tighter.approve();
    let child = parent
        .create_child_interface(worker.clone(), Arc::new(tighter))
        .unwrap();

    assert_eq!(child.subtree(), &worker);
    assert!(child.can_access(&worker.join("job").unwrap(), Operation::Kill));
    assert!(parent.can_access(&p("/flows/echo/echo"), Operation::Message));
    assert!(!child.can_access(&p("/flows/echo/echo"), Operation::Message));
    assert!(!child.can_access(&own, Operation::Message));

    let err = child
        .request(&worker, &p("/flows/echo/echo"), json!({}))
        .await
        .unwrap_err();
    assert!(err.is_security_violation());

    let mut loose =
        NodeSecurityPolicy::new(PackageId::lookup("caller").unwrap(), ProcessId::new("caller").unwrap());
    loose.approve();
    assert!(
        parent
            .create_child_interface(p("/flows/echo/echo"), Arc::new(loose))
            .unwrap_err()
            .is_security_violation()
    );
}
