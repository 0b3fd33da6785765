mod common;

use anyhow::Context as _;
use serde_json::json;
use std::time::Duration;

use common::{get_stream, post_mcp, session_id, start_server};
use mcp_test_support::SseMessages;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn initialize_push_and_resume_over_standalone_stream() -> anyhow::Result<()> {
    let server = start_server("transport:\n  responseMode: stream\n", &[]).await?;
    let client = reqwest::Client::new();

    let init = post_mcp(
        &client,
        &server,
        None,
        &json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": { "protocolVersion": "2025-03-26", "capabilities": {} }
        }),
    )
    .await?;
    anyhow::ensure!(init.status() == 200, "initialize returned {}", init.status());
    let content_type = init
        .headers()
        .get("content-type")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    anyhow::ensure!(content_type.starts_with("text/event-stream"));
    let sid = session_id(&init)?;

    let mut init_stream = SseMessages::new(init);
    let init_msg = init_stream.expect_message(WAIT).await?;
    anyhow::ensure!(init_msg.message["id"] == json!(0));
    anyhow::ensure!(init_msg.message["result"]["protocolVersion"] == json!("2025-03-26"));
    anyhow::ensure!(
        init_stream.next(WAIT).await?.is_none(),
        "request stream should close after its last response"
    );

    let initialized = post_mcp(
        &client,
        &server,
        Some(&sid),
        &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await?;
    anyhow::ensure!(initialized.status() == 202);

    let mut standalone = SseMessages::new(get_stream(&client, &server, &sid, None).await?);

    let notify = post_mcp(
        &client,
        &server,
        Some(&sid),
        &json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "notify",
            "params": { "method": "notifications/progress", "params": { "n": 1 } }
        }),
    )
    .await?;
    let reply = SseMessages::new(notify).expect_message(WAIT).await?;
    anyhow::ensure!(reply.message["result"]["delivered"] == json!("written"));

    let pushed = standalone.expect_message(WAIT).await?;
    anyhow::ensure!(pushed.message["method"] == json!("notifications/progress"));
    let first_push_id = pushed.id.context("pushed event has no id")?;
    drop(standalone);

    let notify = post_mcp(
        &client,
        &server,
        Some(&sid),
        &json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "notify",
            "params": { "method": "notifications/progress", "params": { "n": 2 } }
        }),
    )
    .await?;
    SseMessages::new(notify).expect_message(WAIT).await?;

    let mut resumed = SseMessages::new(
        get_stream(&client, &server, &sid, Some(&first_push_id)).await?,
    );
    let missed = resumed.expect_message(WAIT).await?;
    anyhow::ensure!(
        missed.message["params"]["n"] == json!(2),
        "expected the missed push, got {}",
        missed.message
    );
    Ok(())
}

#[tokio::test]
async fn delete_terminates_the_session() -> anyhow::Result<()> {
    let server = start_server("{}\n", &[]).await?;
    let client = reqwest::Client::new();

    let resp = post_mcp(
        &client,
        &server,
        None,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
    )
    .await?;
    let sid = session_id(&resp)?;
    let pong = SseMessages::new(resp).expect_message(WAIT).await?;
    anyhow::ensure!(pong.message["result"] == json!("pong"));

    let deleted = client
        .delete(server.url("/mcp"))
        .header(common::SESSION_HEADER, &sid)
        .send()
        .await
        .context("DELETE /mcp")?;
    anyhow::ensure!(deleted.status() == 200);

    let after = post_mcp(
        &client,
        &server,
        Some(&sid),
        &json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}),
    )
    .await?;
    anyhow::ensure!(after.status() == 404, "expected 404, got {}", after.status());
    Ok(())
}

#[tokio::test]
async fn delete_is_forbidden_when_disabled() -> anyhow::Result<()> {
    let server = start_server(
        "transport:\n  session:\n    allowClientTermination: false\n",
        &[],
    )
    .await?;
    let client = reqwest::Client::new();

    let resp = post_mcp(
        &client,
        &server,
        None,
        &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await?;
    let sid = session_id(&resp)?;

    let deleted = client
        .delete(server.url("/mcp"))
        .header(common::SESSION_HEADER, &sid)
        .send()
        .await
        .context("DELETE /mcp")?;
    anyhow::ensure!(deleted.status() == 403);

    let still = post_mcp(
        &client,
        &server,
        Some(&sid),
        &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
    )
    .await?;
    anyhow::ensure!(still.status() == 200);
    Ok(())
}

#[tokio::test]
async fn preflight_is_answered_with_cors_headers() -> anyhow::Result<()> {
    let server = start_server("{}\n", &[]).await?;
    let resp = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, server.url("/mcp"))
        .send()
        .await
        .context("OPTIONS /mcp")?;
    anyhow::ensure!(resp.status() == 204);
    let allow_headers = resp
        .headers()
        .get("access-control-allow-headers")
        .and_then(|h| h.to_str().ok())
        .context("missing allow-headers")?;
    anyhow::ensure!(allow_headers.contains("Last-Event-ID"));
    Ok(())
}
