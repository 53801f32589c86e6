//! Notification contract between a node and whatever presents its activity.
//!
//! Callbacks fire from arbitrary runtime worker threads. A consumer that
//! needs single-threaded delivery should use [`channel`] and drain the
//! receiver wherever it likes.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

pub trait NotificationSink: Send + Sync {
    fn on_message_received(&self, text: &str);

    /// Mesh topology only: a send completed and the peer answered.
    fn on_message_sent(&self, text: &str);

    fn on_status_update(&self, text: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum NodeEvent {
    Received(String),
    Sent(String),
    Status(String),
}

impl NodeEvent {
    pub fn text(&self) -> &str {
        match self {
            NodeEvent::Received(text) | NodeEvent::Sent(text) | NodeEvent::Status(text) => text,
        }
    }
}

/// Forwards every callback as a [`NodeEvent`] over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl ChannelSink {
    fn forward(&self, event: NodeEvent) {
        // A dropped receiver means nobody is listening anymore; the node keeps running.
        let _ = self.events.send(event);
    }
}

impl NotificationSink for ChannelSink {
    fn on_message_received(&self, text: &str) {
        self.forward(NodeEvent::Received(text.to_string()));
    }

    fn on_message_sent(&self, text: &str) {
        self.forward(NodeEvent::Sent(text.to_string()));
    }

    fn on_status_update(&self, text: &str) {
        self.forward(NodeEvent::Status(text.to_string()));
    }
}

pub fn channel() -> (ChannelSink, mpsc::UnboundedReceiver<NodeEvent>) {
    let (events, receiver) = mpsc::unbounded_channel();
    (ChannelSink { events }, receiver)
}

/// Sink that only logs, for embedders without a presentation layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn on_message_received(&self, text: &str) {
        info!(text, "message received");
    }

    fn on_message_sent(&self, text: &str) {
        info!(text, "message sent");
    }

    fn on_status_update(&self, text: &str) {
        info!(text, "status update");
    }
}
