use cluster_client::testing::MemoryCluster;
use cluster_client::{ClusterConfig, ClusterSession, NodeAddress, NodeError, SlotRange, slot_for};
use demo_server::{AppState, create_router};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn addr(port: u16) -> NodeAddress {
    NodeAddress::new("127.0.0.1", port)
}

fn two_node_cluster() -> MemoryCluster {
    MemoryCluster::new(&[
        (SlotRange::new(0, 8191).unwrap(), addr(7000)),
        (SlotRange::new(8192, 16383).unwrap(), addr(7001)),
    ])
}

/// Helper to spawn a test server over an in-memory cluster
async fn spawn_test_server(cluster: &MemoryCluster, open: bool) -> (String, Arc<ClusterSession>) {
    let session = Arc::new(ClusterSession::new(
        ClusterConfig::new(addr(7000)),
        cluster.connector(),
    ));
    if open {
        session.open().await.unwrap();
    }

    let app = create_router(AppState {
        session: Arc::clone(&session),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{}", addr);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    (url, session)
}

#[tokio::test]
async fn test_health_check() {
    let cluster = two_node_cluster();
    let (base_url, _session) = spawn_test_server(&cluster, true).await;

    let res = Client::new()
        .get(format!("{}/health", base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "demo-server");
}

#[tokio::test]
async fn test_set_returns_ok() {
    let cluster = two_node_cluster();
    let (base_url, session) = spawn_test_server(&cluster, true).await;

    let res = Client::new()
        .get(format!("{}/test", base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "OK");

    let owner = cluster.owner_of(slot_for(b"hoge"));
    assert_eq!(cluster.value_on(&owner, b"hoge"), Some(b"hoge".to_vec()));

    session.close().await;
}

#[tokio::test]
async fn test_set_follows_moved_slots() {
    let cluster = two_node_cluster();
    let (base_url, session) = spawn_test_server(&cluster, true).await;
    let client = Client::new();

    let slot = slot_for(b"hoge");
    cluster.move_slots(SlotRange::new(slot, slot).unwrap(), &addr(7002));

    let res = client
        .get(format!("{}/test", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "OK");
    assert_eq!(cluster.value_on(&addr(7002), b"hoge"), Some(b"hoge".to_vec()));

    session.close().await;
}

#[tokio::test]
async fn test_set_unavailable_after_close() {
    let cluster = two_node_cluster();
    let (base_url, session) = spawn_test_server(&cluster, true).await;
    session.close().await;

    let res = Client::new()
        .get(format!("{}/test", base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 503);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["code"], 503);
    assert!(body["error"].as_str().unwrap().contains("closed"));
}

#[tokio::test]
async fn test_set_unreachable_node() {
    let cluster = two_node_cluster();
    let (base_url, session) = spawn_test_server(&cluster, true).await;

    let owner = cluster.owner_of(slot_for(b"hoge"));
    cluster.set_reachable(&owner, false);

    let res = Client::new()
        .get(format!("{}/test", base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 503);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["code"], 503);

    session.close().await;
}

#[tokio::test]
async fn test_set_store_error_is_bad_gateway() {
    let cluster = two_node_cluster();
    let (base_url, session) = spawn_test_server(&cluster, true).await;

    let owner = cluster.owner_of(slot_for(b"hoge"));
    cluster.push_reply(&owner, Err(NodeError::Server("OOM command not allowed".into())));

    let res = Client::new()
        .get(format!("{}/test", base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 502);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["code"], 502);
    assert!(body["error"].as_str().unwrap().contains("OOM"));

    session.close().await;
}

#[tokio::test]
async fn test_cluster_topology() {
    let cluster = two_node_cluster();
    let (base_url, session) = spawn_test_server(&cluster, true).await;

    let res = Client::new()
        .get(format!("{}/cluster/topology", base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["session"], "ready");
    assert_eq!(body["refresh_mode"], "on-demand");
    assert_eq!(body["refresh"]["attempts"], 0);
    assert_eq!(body["topology"]["version"], 1);

    let nodes = body["topology"]["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    let total: u64 = nodes
        .iter()
        .map(|node| node["slot_count"].as_u64().unwrap())
        .sum();
    assert_eq!(total, 16384);

    session.close().await;
}

#[tokio::test]
async fn test_cluster_topology_before_open() {
    let cluster = two_node_cluster();
    let (base_url, _session) = spawn_test_server(&cluster, false).await;
    let client = Client::new();

    let res = client
        .get(format!("{}/cluster/topology", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);

    let res = client
        .get(format!("{}/test", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["code"], 503);
}
