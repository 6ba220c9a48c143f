//! Inbound message handling.
//!
//! A publish arrives in two steps: first its topic, then its payload. The
//! [`InboundAssembler`] owns the buffers of the message being received and hands out a
//! complete [`InboundMessage`] once the payload is in. The [`MessageRouter`] then maps
//! the logical topic to a [`Command`] through a table built once at startup.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use super::level::{parse_level, LevelFrame};
use super::topics::{truncate_to_boundary, Topic};

/// A fully received publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
    pub received_at: DateTime<Local>,
}

/// Collects topic and payload of one inbound publish.
#[derive(Debug)]
pub struct InboundAssembler {
    pending_topic: Option<String>,
    max_topic_len: usize,
    max_payload_len: usize,
}

impl InboundAssembler {
    pub fn new(max_topic_len: usize, max_payload_len: usize) -> Self {
        Self {
            pending_topic: None,
            max_topic_len,
            max_payload_len,
        }
    }

    /// Starts a new message. A topic still waiting for its payload is dropped.
    pub fn begin(&mut self, mut topic: String) {
        if let Some(stale) = self.pending_topic.take() {
            warn!("Dropping message on {} that never received a payload", stale);
        }
        truncate_to_boundary(&mut topic, self.max_topic_len.saturating_sub(1));
        self.pending_topic = Some(topic);
    }

    /// Completes the pending message with its payload.
    pub fn complete(&mut self, data: &[u8]) -> Option<InboundMessage> {
        let Some(topic) = self.pending_topic.take() else {
            warn!("Payload of {} bytes arrived without a topic", data.len());
            return None;
        };

        let data = if data.len() > self.max_payload_len {
            warn!(
                "Payload on {} truncated from {} to {} bytes",
                topic,
                data.len(),
                self.max_payload_len
            );
            &data[..self.max_payload_len]
        } else {
            data
        };

        let message = InboundMessage {
            topic,
            payload: String::from_utf8_lossy(data).into_owned(),
            received_at: Local::now(),
        };
        debug!(
            "Topic: {}, Message: {} ({})",
            message.topic,
            message.payload,
            message.received_at.format("%H:%M:%S%.3f")
        );
        Some(message)
    }
}

/// Action requested by an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetLed(bool),
    Print(String),
    ReportUptime,
    RequestExit,
    ShowLevel(LevelFrame),
}

/// Dispatch table from logical topic to handler.
#[derive(Debug)]
pub struct MessageRouter {
    routes: HashMap<&'static str, Topic>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            routes: Topic::inbound_table(),
        }
    }

    /// Command for a message on `logical`, `None` for unknown topics and ignored payloads.
    pub fn route(&self, logical: &str, payload: &str) -> Option<Command> {
        let Some(topic) = self.routes.get(logical) else {
            debug!("No route for topic {}", logical);
            return None;
        };

        match topic {
            Topic::Led => led_command(payload).map(Command::SetLed),
            Topic::Print => Some(Command::Print(payload.to_string())),
            Topic::Ping => Some(Command::ReportUptime),
            Topic::Exit => Some(Command::RequestExit),
            Topic::Level(room) => Some(Command::ShowLevel(LevelFrame::new(
                *room,
                parse_level(payload),
            ))),
            Topic::Online | Topic::LedState | Topic::Uptime => None,
        }
    }
}

/// `on`/`1` and `off`/`0`, case-insensitive. Anything else is ignored.
fn led_command(payload: &str) -> Option<bool> {
    if payload.eq_ignore_ascii_case("on") || payload == "1" {
        Some(true)
    } else if payload.eq_ignore_ascii_case("off") || payload == "0" {
        Some(false)
    } else {
        debug!("Ignoring led payload {:?}", payload);
        None
    }
}
