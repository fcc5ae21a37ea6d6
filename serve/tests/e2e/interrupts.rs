use std::time::Duration;

use caphub::Hub;
use serde_json::{json, Value};

use crate::common::{spawn_server, wait_run_terminal};

fn approval_agent(id: &str) -> Value {
    json!({
        "agent_id": id,
        "version": "1.0.0",
        "system": "e2e",
        "type": "llm",
        "extensions": { "requires_approval": true }
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupt_list_resolve_resumes_run() {
    let (base, _hub) = spawn_server(Hub::builder()).await;
    let client = reqwest::Client::new();
    client
        .post(format!("{base}/api/cap/agents"))
        .json(&approval_agent("careful"))
        .send()
        .await
        .unwrap();

    let body: Value = client
        .post(format!("{base}/api/cap/runs"))
        .json(&json!({ "agent_id": "careful", "payload": { "question": "risky?" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let run_id = body["data"]["run_id"].as_str().unwrap().to_string();

    // wait for the pending interrupt to appear
    let interrupt_id = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let body: Value = client
                .get(format!("{base}/api/cap/interrupts?run_id={run_id}"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if let Some(first) = body["data"].as_array().and_then(|a| a.first()) {
                return first["interrupt_id"].as_str().unwrap().to_string();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let body: Value = client
        .get(format!("{base}/api/cap/interrupts/{interrupt_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["type"], "approval_required");
    assert_eq!(body["data"]["run_id"], run_id);

    let res = client
        .post(format!("{base}/api/cap/interrupts/{interrupt_id}/resolve"))
        .json(&json!({ "response": "approve" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["status"], "resolved");

    let run = wait_run_terminal(&client, &base, &run_id).await;
    assert_eq!(run["status"], "completed");

    // a second resolution conflicts
    let res = client
        .post(format!("{base}/api/cap/interrupts/{interrupt_id}/resolve"))
        .json(&json!({ "response": "deny" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CAP_INTERRUPT_CONFLICT");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_interrupt_is_404() {
    let (base, _hub) = spawn_server(Hub::builder()).await;
    let client = reqwest::Client::new();
    let res = client
        .get(format!("{base}/api/cap/interrupts/int-none"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CAP_INTERRUPT_NOT_FOUND");
}
