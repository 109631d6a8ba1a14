use chrono::NaiveDateTime;
use std::fmt;
use tokio::sync::mpsc;

use super::mqtt_handler::ConnectionEvent;
use crate::payload::decode_payload;

const PREVIEW_CHARS: usize = 40;

/// A publish as it arrived from the broker, stamped on receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: NaiveDateTime,
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = self.text();
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();
        let ellipsis = if text.chars().count() > PREVIEW_CHARS {
            "..."
        } else {
            ""
        };
        write!(
            f,
            "{} - {}: {}{}",
            self.received_at, self.topic, preview, ellipsis
        )
    }
}

impl InboundMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::received(topic, payload, crate::model::now())
    }

    pub fn received(
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        received_at: NaiveDateTime,
    ) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at,
        }
    }

    /// Payload as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        decode_payload(&self.payload).into_owned()
    }
}

/// Items crossing from the network task to the pipeline consumer.
///
/// Connection events share the queue with messages so they are applied in
/// arrival order: everything queued before a `Disconnected` is processed first.
#[derive(Debug, Clone, PartialEq)]
pub enum Handoff {
    Message(InboundMessage),
    Connection(ConnectionEvent),
}

pub type HandoffSender = mpsc::Sender<Handoff>;
pub type HandoffReceiver = mpsc::Receiver<Handoff>;

pub fn handoff_channel(capacity: usize) -> (HandoffSender, HandoffReceiver) {
    mpsc::channel(capacity)
}
