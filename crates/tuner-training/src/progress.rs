use crate::error::{TrainingError, TrainingResult};
use crate::job::JobId;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One opaque progress report from the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Json(Value),
    Text(String),
}

impl ProgressEvent {
    /// Interpret a line of trainer output. JSON lines keep their structure.
    #[must_use]
    pub fn from_line(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str(trimmed) {
                return Self::Json(value);
            }
        }
        Self::Text(line.trim_end().to_string())
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(value) => value.fmt(f),
            Self::Text(text) => text.fmt(f),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, job_id: &JobId, event: &ProgressEvent);
}

/// Relays every event to the structured log.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, job_id: &JobId, event: &ProgressEvent) {
        tracing::info!(job_id = %job_id, event = %event, "training progress");
    }
}

/// Ordered, finite stream of progress events from a running trainer.
///
/// The stream ends when the trainer finishes. An `Err` item means training
/// failed. The attached token lets a caller ask the producer to stop.
pub struct ProgressStream {
    rx: mpsc::Receiver<TrainingResult<ProgressEvent>>,
    cancel: CancellationToken,
}

/// Producer half of a [`ProgressStream`].
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<TrainingResult<ProgressEvent>>,
    cancel: CancellationToken,
}

impl ProgressStream {
    #[must_use]
    pub fn channel(buffer: usize) -> (ProgressSender, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        (ProgressSender { tx, cancel: cancel.clone() }, Self { rx, cancel })
    }

    /// A stream that replays a fixed list of items and then ends.
    #[must_use]
    pub fn from_items(items: Vec<TrainingResult<ProgressEvent>>) -> Self {
        let (sender, stream) = Self::channel(items.len());
        for item in items {
            // Capacity covers every item.
            let _ = sender.tx.try_send(item);
        }
        stream
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for ProgressStream {
    type Item = TrainingResult<ProgressEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl ProgressSender {
    /// Deliver an item. Returns `false` once the consumer is gone.
    pub async fn send(&self, item: TrainingResult<ProgressEvent>) -> bool {
        self.tx.send(item).await.is_ok()
    }

    pub async fn event(&self, event: ProgressEvent) -> bool {
        self.send(Ok(event)).await
    }

    pub async fn fail(&self, error: TrainingError) -> bool {
        self.send(Err(error)).await
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
