//! Helpers for integration tests that run the server binary as a child process.

use anyhow::Context as _;
use futures::StreamExt as _;
use futures::stream::BoxStream;
use std::net::TcpListener;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Pick an unused TCP port on localhost.
///
/// Note: this does not reserve the port; it's still possible for another process to bind it
/// before you do.
///
/// # Errors
///
/// Returns an error if binding an ephemeral localhost port fails.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Poll an HTTP URL until it returns a success status.
///
/// # Errors
///
/// Returns an error if the timeout elapses first.
pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > timeout_dur {
            anyhow::bail!("timed out waiting for {url}");
        }

        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
}

/// A server binary listening on a random localhost port. Killed on drop.
pub struct ServerProcess {
    pub base_url: String,
    _child: KillOnDrop,
}

impl ServerProcess {
    /// Spawn `bin --bind 127.0.0.1:<port> <args..>` and wait until `/health` answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or never becomes healthy.
    pub async fn start(bin: &str, args: &[&str]) -> anyhow::Result<Self> {
        let port = pick_unused_port()?;
        let child = Command::new(bin)
            .arg("--bind")
            .arg(format!("127.0.0.1:{port}"))
            .args(args)
            .spawn()
            .with_context(|| format!("spawn {bin}"))?;
        let child = KillOnDrop(child);

        let base_url = format!("http://127.0.0.1:{port}");
        wait_http_ok(&format!("{base_url}/health"), Duration::from_secs(20)).await?;
        Ok(Self {
            base_url,
            _child: child,
        })
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// One decoded SSE event carrying a JSON-RPC message.
#[derive(Debug, Clone)]
pub struct SseMessage {
    pub id: Option<String>,
    pub message: serde_json::Value,
}

/// JSON messages from a `text/event-stream` response, skipping keep-alive comments.
pub struct SseMessages {
    inner: BoxStream<'static, anyhow::Result<sse_stream::Sse>>,
}

impl SseMessages {
    #[must_use]
    pub fn new(resp: reqwest::Response) -> Self {
        let inner = sse_stream::SseStream::from_byte_stream(resp.bytes_stream())
            .map(|evt| evt.map_err(|e| anyhow::anyhow!("read SSE event: {e}")))
            .boxed();
        Self { inner }
    }

    /// Next message, or `None` once the server closed the stream.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, transport failure or non-JSON data.
    pub async fn next(&mut self, timeout_dur: Duration) -> anyhow::Result<Option<SseMessage>> {
        loop {
            let evt = tokio::time::timeout(timeout_dur, self.inner.next())
                .await
                .context("timed out waiting for SSE event")?;
            let Some(evt) = evt else {
                return Ok(None);
            };
            let evt = evt?;
            let payload = evt.data.unwrap_or_default();
            if payload.trim().is_empty() {
                continue;
            }
            let message = serde_json::from_str(&payload).context("parse SSE data as JSON")?;
            return Ok(Some(SseMessage {
                id: evt.id,
                message,
            }));
        }
    }

    /// Like [`SseMessages::next`] but fails if the stream ended.
    ///
    /// # Errors
    ///
    /// Returns an error if no message arrives.
    pub async fn expect_message(&mut self, timeout_dur: Duration) -> anyhow::Result<SseMessage> {
        self.next(timeout_dur)
            .await?
            .context("event-stream ended without a JSON message")
    }
}
