//! Live sync of task changes to open pages.
//!
//! Every mutation publishes a [`TaskChanged`] on a broadcast channel; each
//! connected page holds an SSE stream relaying those events and re-fetches
//! the task it is showing.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskChanged {
    pub task_id: String,
}

#[derive(Clone)]
pub struct LiveHub {
    tx: broadcast::Sender<TaskChanged>,
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, task_id: &str) {
        // No subscribers is fine.
        let receivers = self
            .tx
            .send(TaskChanged {
                task_id: task_id.to_string(),
            })
            .unwrap_or(0);
        debug!("Task {} changed ({} listeners)", task_id, receivers);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskChanged> {
        self.tx.subscribe()
    }

    /// SSE stream of `task_changed` events.
    ///
    /// A listener that falls behind gets a single `resync` event and should
    /// refresh everything it shows.
    pub fn sse_stream(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let mut rx = self.subscribe();
        info!("New live sync client connected");

        let stream = async_stream::stream! {
            yield Ok(Event::default().event("connected").data("ok"));

            loop {
                match rx.recv().await {
                    Ok(change) => {
                        let data = serde_json::to_string(&change).unwrap_or_default();
                        yield Ok(Event::default().event("task_changed").data(data));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Live sync client lagged by {} events", skipped);
                        yield Ok(Event::default().event("resync").data("lagged"));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("heartbeat"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = LiveHub::new();
        let mut rx = hub.subscribe();
        hub.publish("T-1");
        assert_eq!(
            rx.recv().await.unwrap(),
            TaskChanged {
                task_id: "T-1".to_string()
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        LiveHub::new().publish("T-1");
    }
}
