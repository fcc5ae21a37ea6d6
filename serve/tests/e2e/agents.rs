use caphub::Hub;
use serde_json::Value;

use crate::common::{agent_body, spawn_server};

#[tokio::test(flavor = "multi_thread")]
async fn register_get_and_conflict() {
    let (base, _hub) = spawn_server(Hub::builder()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/api/cap/agents"))
        .json(&agent_body("billing"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["agent_id"], "billing");
    assert_eq!(body["data"]["lifecycle_state"], "ready");

    let res = client
        .get(format!("{base}/api/cap/agents/billing"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["version"], "1.0.0");

    // same id + version conflicts
    let res = client
        .post(format!("{base}/api/cap/agents"))
        .json(&agent_body("billing"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "CAP_AGENT_CONFLICT");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_agent_is_404_with_code() {
    let (base, _hub) = spawn_server(Hub::builder()).await;
    let client = reqwest::Client::new();
    let res = client
        .get(format!("{base}/api/cap/agents/ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CAP_AGENT_NOT_FOUND");
    assert_eq!(body["error"]["details"]["agent_id"], "ghost");
}

#[tokio::test(flavor = "multi_thread")]
async fn list_filters_and_health() {
    let (base, _hub) = spawn_server(Hub::builder()).await;
    let client = reqwest::Client::new();
    for id in ["alpha", "beta"] {
        client
            .post(format!("{base}/api/cap/agents"))
            .json(&agent_body(id))
            .send()
            .await
            .unwrap();
    }

    let body: Value = client
        .get(format!("{base}/api/cap/agents?system=e2e&limit=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let body: Value = client
        .get(format!("{base}/api/cap/agents?system=other"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["data"].as_array().unwrap().is_empty());

    let res = client
        .get(format!("{base}/api/cap/agents/alpha/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["active_runs"], 0);

    // body-encoded discovery
    let body: Value = client
        .post(format!("{base}/api/cap/agents/discover"))
        .json(&serde_json::json!({ "type": "llm" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn update_and_delete() {
    let (base, _hub) = spawn_server(Hub::builder()).await;
    let client = reqwest::Client::new();
    client
        .post(format!("{base}/api/cap/agents"))
        .json(&agent_body("mutable"))
        .send()
        .await
        .unwrap();

    let body: Value = client
        .put(format!("{base}/api/cap/agents/mutable"))
        .json(&serde_json::json!({ "status": "maintenance", "routing_weight": 7 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["status"], "maintenance");
    assert_eq!(body["data"]["routing_weight"], 7);

    let res = client
        .delete(format!("{base}/api/cap/agents/mutable"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let res = client
        .get(format!("{base}/api/cap/agents/mutable"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}
