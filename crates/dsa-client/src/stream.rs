//! Task stream subscriber.
//!
//! Holds a long-lived `GET` on the backend's task event stream, decodes
//! frames into [`TaskEvent`]s and forwards them over an mpsc channel. Lost
//! connections are retried silently with capped exponential backoff; only
//! exhausting the retry budget is reported as [`StreamMessage::GaveUp`].

use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use dsa_protocol::{DashboardError, TaskEvent, DEFAULT_BASE_URL, TASK_STREAM_PATH};

use crate::sse::{decode_task_event, SseDecoder};

/// Messages delivered to the stream consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// The stream (re)connected.
    Connected,
    /// A task lifecycle event.
    Task(TaskEvent),
    /// The connection dropped; a reconnect is scheduled.
    Disconnected { reason: String, attempt: u32 },
    /// The retry budget is exhausted and the subscriber stopped.
    GaveUp { attempts: u32 },
}

/// Configuration for [`TaskStream`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Full URL of the event stream endpoint.
    pub url: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failed attempts tolerated before giving up. 0 = never.
    pub max_retries: u32,
}

impl StreamConfig {
    pub fn for_base_url(base_url: &str) -> Self {
        Self {
            url: format!("{}{}", base_url.trim_end_matches('/'), TASK_STREAM_PATH),
            ..Default::default()
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: format!("{DEFAULT_BASE_URL}{TASK_STREAM_PATH}"),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(15),
            max_retries: 0,
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based): doubles from
/// `initial`, capped at `max`.
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    initial.saturating_mul(1u32 << exponent).min(max)
}

/// How a single connection ended.
enum ConnectionEnd {
    /// Nobody is listening any more.
    ReceiverClosed,
    /// The connection failed or dropped.
    Lost { reason: String, was_connected: bool },
}

/// Reconnecting subscriber for the task event stream.
pub struct TaskStream {
    client: reqwest::Client,
    config: StreamConfig,
}

impl TaskStream {
    pub fn new(config: StreamConfig) -> Result<Self, DashboardError> {
        // No overall timeout: the response body is expected to stay open.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DashboardError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Run the subscriber on a background task.
    pub fn spawn(self, tx: mpsc::Sender<StreamMessage>) -> JoinHandle<()> {
        tokio::spawn(self.run(tx))
    }

    /// Subscribe until the receiver is dropped or retries are exhausted.
    pub async fn run(self, tx: mpsc::Sender<StreamMessage>) {
        let mut attempt: u32 = 0;

        loop {
            match self.connect_once(&tx).await {
                ConnectionEnd::ReceiverClosed => {
                    tracing::debug!("Task stream receiver dropped, stopping subscriber");
                    return;
                }
                ConnectionEnd::Lost { reason, was_connected } => {
                    if was_connected {
                        attempt = 0;
                    }
                    attempt += 1;
                    tracing::warn!(attempt, reason = %reason, "Task stream connection lost, reconnecting");

                    if self.config.max_retries > 0 && attempt > self.config.max_retries {
                        tracing::error!(attempts = attempt, "Task stream retries exhausted");
                        let _ = tx.send(StreamMessage::GaveUp { attempts: attempt }).await;
                        return;
                    }
                    if tx
                        .send(StreamMessage::Disconnected { reason, attempt })
                        .await
                        .is_err()
                    {
                        return;
                    }

                    let delay = self.jittered_delay(attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = backoff_delay(attempt, self.config.initial_backoff, self.config.max_backoff);
        let spread = (base.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..=spread);
        base + Duration::from_millis(jitter)
    }

    async fn connect_once(&self, tx: &mpsc::Sender<StreamMessage>) -> ConnectionEnd {
        let lost = |reason: String, was_connected: bool| ConnectionEnd::Lost { reason, was_connected };

        let response = match self
            .client
            .get(&self.config.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return lost(e.to_string(), false),
        };

        let status = response.status();
        if !status.is_success() {
            return lost(format!("stream endpoint returned {status}"), false);
        }

        tracing::info!(url = %self.config.url, "Task stream connected");
        if tx.send(StreamMessage::Connected).await.is_err() {
            return ConnectionEnd::ReceiverClosed;
        }

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => return lost(e.to_string(), true),
            };

            for frame in decoder.push(&chunk) {
                match decode_task_event(&frame) {
                    Ok(Some(event)) => {
                        tracing::debug!(task_id = %event.task_id(), kind = %event.kind, "Task event received");
                        if tx.send(StreamMessage::Task(event)).await.is_err() {
                            return ConnectionEnd::ReceiverClosed;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, event = %frame.event, "Dropping undecodable task event");
                    }
                }
            }
        }

        lost("stream closed by server".to_string(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let initial = Duration::from_millis(500);
        let max = Duration::from_secs(15);
        assert_eq!(backoff_delay(1, initial, max), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, initial, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(4, initial, max), Duration::from_secs(4));
        assert_eq!(backoff_delay(10, initial, max), max);
        assert_eq!(backoff_delay(u32::MAX, initial, max), max);
    }

    #[test]
    fn stream_url_from_base() {
        let cfg = StreamConfig::for_base_url("http://example.test:9000/");
        assert_eq!(cfg.url, "http://example.test:9000/api/v1/analysis/tasks/stream");
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        // Port 9 (discard) is closed on loopback, so every attempt is refused.
        let config = StreamConfig {
            url: "http://127.0.0.1:9/api/v1/analysis/tasks/stream".to_string(),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            max_retries: 2,
        };
        let (tx, mut rx) = mpsc::channel(16);
        TaskStream::new(config).unwrap().spawn(tx);

        let mut disconnects = 0;
        let gave_up = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(msg) = rx.recv().await {
                match msg {
                    StreamMessage::Disconnected { .. } => disconnects += 1,
                    StreamMessage::GaveUp { attempts } => return Some(attempts),
                    _ => {}
                }
            }
            None
        })
        .await
        .expect("subscriber should give up in time");

        assert_eq!(gave_up, Some(3));
        assert_eq!(disconnects, 2);
    }
}
