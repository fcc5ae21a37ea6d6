use caphub::Hub;
use serde_json::{json, Value};

use crate::common::{agent_body, spawn_server};

#[tokio::test(flavor = "multi_thread")]
async fn thread_lifecycle_over_http() {
    let (base, _hub) = spawn_server(Hub::builder()).await;
    let client = reqwest::Client::new();
    client
        .post(format!("{base}/api/cap/agents"))
        .json(&agent_body("support"))
        .send()
        .await
        .unwrap();

    // create with metadata + one seed message
    let res = client
        .post(format!("{base}/api/cap/threads"))
        .json(&json!({
            "agent_id": "support",
            "metadata": { "user_id": "u-1", "session_id": "s-1" },
            "initial_messages": [{ "role": "system", "content": "be brief" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
    let body: Value = res.json().await.unwrap();
    let thread_id = body["data"]["thread_id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["metadata"]["user_id"], "u-1");

    // append + list in order
    let res = client
        .post(format!("{base}/api/cap/threads/{thread_id}/messages"))
        .json(&json!({ "role": "user", "content": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);

    let body: Value = client
        .get(format!("{base}/api/cap/threads/{thread_id}/messages"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = body["data"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["seq"], 1);
    assert_eq!(messages[1]["content"], "hello");

    // close with summary; further appends are rejected
    let body: Value = client
        .post(format!("{base}/api/cap/threads/{thread_id}/close"))
        .json(&json!({ "summary": "greeting", "resolution": "done" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["status"], "closed");

    let res = client
        .post(format!("{base}/api/cap/threads/{thread_id}/messages"))
        .json(&json!({ "role": "user", "content": "too late" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CAP_THREAD_CLOSED");
}

#[tokio::test(flavor = "multi_thread")]
async fn thread_for_unknown_agent_is_rejected() {
    let (base, _hub) = spawn_server(Hub::builder()).await;
    let client = reqwest::Client::new();
    let res = client
        .post(format!("{base}/api/cap/threads"))
        .json(&json!({ "agent_id": "ghost" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}
