//! Anomaly push channel: transport and listener.
//!
//! The transport keeps a long-lived HTTP stream open against the anomaly
//! channel and cuts it into messages, one per line (`data:` lines of an
//! event stream are accepted too). The listener decodes each message into
//! an [`AnomalyBatch`] and hands it to the alert manager before reading the
//! next one, so alerts are raised in arrival order. A message that does not
//! decode is logged and dropped; it never ends the subscription.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::AlertHandle;

// ---

const MESSAGE_QUEUE_DEPTH: usize = 256;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const LOGGED_PAYLOAD_CHARS: usize = 200;
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// A push-channel notification: how many new anomalies were detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnomalyBatch {
    pub count: usize,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload carries no anomaly count")]
    MissingCount,
}

/// Decode one channel message.
///
/// The channel publishes the newly anomalous readings as a JSON array, so
/// the count is the array length. An object with a non-negative whole
/// number `count` is accepted as well, and either form may arrive wrapped in a
/// JSON string.
pub fn decode_anomaly_batch(
    payload: &str,
    received_at: DateTime<Utc>,
) -> Result<AnomalyBatch, DecodeError> {
    // ---
    let value = match serde_json::from_str::<Value>(payload)? {
        Value::String(inner) => serde_json::from_str::<Value>(&inner)?,
        other => other,
    };

    let count = match &value {
        Value::Array(items) => items.len(),
        Value::Object(fields) => fields
            .get("count")
            .and_then(count_of)
            .ok_or(DecodeError::MissingCount)?,
        _ => return Err(DecodeError::MissingCount),
    };

    Ok(AnomalyBatch { count, received_at })
}

/// A non-negative whole number, whether sent as `3` or `3.0`.
fn count_of(value: &Value) -> Option<usize> {
    // ---
    if let Some(count) = value.as_u64() {
        return usize::try_from(count).ok();
    }
    let count = value.as_f64()?;
    if count.is_finite() && count >= 0.0 && count.fract() == 0.0 && count <= u32::MAX as f64 {
        Some(count as usize)
    } else {
        None
    }
}

/// Decode every message from `messages` and raise an alert for each.
///
/// Runs until the alert manager's lifetime ends or the transport closes.
pub async fn listen(mut messages: mpsc::Receiver<String>, alerts: AlertHandle) {
    // ---
    let lifetime = alerts.lifetime();

    loop {
        let payload = tokio::select! {
            _ = lifetime.cancelled() => break,
            message = messages.recv() => match message {
                Some(payload) => payload,
                None => break,
            },
        };

        match decode_anomaly_batch(&payload, Utc::now()) {
            Ok(batch) => {
                debug!(count = batch.count, "Anomaly batch received");
                if let Err(e) = alerts.raise(batch).await {
                    warn!("Anomaly listener stopping: {}", e);
                    break;
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    payload = %truncated(&payload),
                    "Dropping undecodable anomaly message"
                );
            }
        }
    }

    info!("Anomaly listener stopped");
}

/// Connect `channel` to the alert manager behind `alerts`.
///
/// Both the transport and the listener stop when the manager's lifetime
/// token is cancelled.
pub fn subscribe(channel: HttpPushChannel, alerts: AlertHandle) -> JoinHandle<()> {
    // ---
    let (tx, rx) = mpsc::channel(MESSAGE_QUEUE_DEPTH);
    tokio::spawn(channel.run(tx, alerts.lifetime()));
    tokio::spawn(listen(rx, alerts))
}

fn truncated(payload: &str) -> String {
    payload.chars().take(LOGGED_PAYLOAD_CHARS).collect()
}

// ---

/// Long-lived HTTP subscription to the anomaly channel.
#[derive(Debug, Clone)]
pub struct HttpPushChannel {
    client: reqwest::Client,
    url: String,
    max_backoff: Duration,
}

impl HttpPushChannel {
    // ---
    pub fn new(url: &str, connect_timeout: Duration, max_backoff: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .context("failed to build push channel client")?;

        Ok(Self {
            client,
            url: url.to_string(),
            max_backoff: max_backoff.max(INITIAL_BACKOFF),
        })
    }

    /// Forward messages into `sink`, reconnecting with exponential backoff
    /// until `lifetime` is cancelled or the listener goes away.
    pub async fn run(self, sink: mpsc::Sender<String>, lifetime: CancellationToken) {
        // ---
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let outcome = tokio::select! {
                _ = lifetime.cancelled() => break,
                outcome = self.stream_once(&sink, &mut backoff) => outcome,
            };

            match outcome {
                Ok(()) => warn!("Anomaly channel closed by server"),
                Err(e) => warn!("Anomaly channel error: {:#}", e),
            }
            if sink.is_closed() {
                break;
            }

            warn!("Reconnecting to anomaly channel in {:?}", backoff);
            tokio::select! {
                _ = lifetime.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.max_backoff);
        }

        info!("Anomaly channel transport stopped");
    }

    async fn stream_once(&self, sink: &mpsc::Sender<String>, backoff: &mut Duration) -> Result<()> {
        // ---
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("connect to {} failed", self.url))?
            .error_for_status()
            .with_context(|| format!("{} refused the subscription", self.url))?;

        info!("Subscribed to anomaly channel at {}", self.url);
        *backoff = INITIAL_BACKOFF;

        let mut body = std::pin::pin!(response.bytes_stream());
        let mut lines = LineBuffer::default();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("anomaly stream interrupted")?;

            for message in lines.push(&chunk) {
                if sink.send(message).await.is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Cuts the byte stream into lines, holding at most one partial line.
///
/// A line longer than `MAX_LINE_BYTES` is dropped in full: whatever was
/// buffered is discarded and the rest of it is skipped up to its newline.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
    skipping: bool,
}

impl LineBuffer {
    // ---
    /// Feed one chunk and return the messages of every line it completes.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut messages = Vec::new();
        let mut rest = chunk;

        while let Some(end) = rest.iter().position(|b| *b == b'\n') {
            let (line, tail) = rest.split_at(end + 1);
            rest = tail;

            if self.skipping {
                self.skipping = false;
                continue;
            }
            if self.pending.len() + line.len() > MAX_LINE_BYTES {
                warn!(
                    bytes = self.pending.len() + line.len(),
                    "Dropping oversized anomaly message"
                );
                self.pending.clear();
                continue;
            }

            self.pending.extend_from_slice(line);
            let line = String::from_utf8_lossy(&self.pending);
            if let Some(message) = message_from_line(&line) {
                messages.push(message.to_string());
            }
            self.pending.clear();
        }

        if !self.skipping {
            if self.pending.len() + rest.len() > MAX_LINE_BYTES {
                warn!(
                    limit = MAX_LINE_BYTES,
                    "Anomaly message exceeds line limit, skipping to next line"
                );
                self.pending.clear();
                self.skipping = true;
            } else {
                self.pending.extend_from_slice(rest);
            }
        }
        messages
    }
}

fn message_from_line(line: &str) -> Option<&str> {
    // ---
    let line = line.trim_end_matches(['\n', '\r']);

    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(data) = line.strip_prefix("data:") {
        let data = data.trim();
        return (!data.is_empty()).then_some(data);
    }
    // Other event-stream fields carry no payload.
    if ["event:", "id:", "retry:"].iter().any(|f| line.starts_with(f)) {
        return None;
    }
    Some(line.trim())
}
