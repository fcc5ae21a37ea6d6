//! Shared e2e plumbing: spawn a hub + server on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use caphub::{Hub, HubBuilder};
use serde_json::{json, Value};

/// Starts the hub and serves it on 127.0.0.1:0. Returns the base URL.
pub async fn spawn_server(builder: HubBuilder) -> (String, Arc<Hub>) {
    let hub = Arc::new(builder.build().unwrap());
    hub.start().await.unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving_hub = hub.clone();
    tokio::spawn(async move {
        let _ = serve::run_serve_on_listener(listener, serving_hub).await;
    });
    (format!("http://{addr}"), hub)
}

pub fn agent_body(id: &str) -> Value {
    json!({
        "agent_id": id,
        "version": "1.0.0",
        "system": "e2e",
        "type": "llm"
    })
}

/// Polls `GET /api/cap/runs/{id}` until the run is terminal.
pub async fn wait_run_terminal(client: &reqwest::Client, base: &str, run_id: &str) -> Value {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let body: Value = client
            .get(format!("{base}/api/cap/runs/{run_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let status = body["data"]["status"].as_str().unwrap_or("").to_string();
        if matches!(status.as_str(), "completed" | "failed" | "cancelled" | "timeout") {
            return body["data"].clone();
        }
        assert!(
            std::time::Instant::now() < deadline,
            "run {run_id} never reached a terminal status (last: {status})"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
