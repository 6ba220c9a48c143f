//! Topic namespace of the panel.
//!
//! Logical topics are the application-level names (`/led`, `/luminosidade/sala`, ...).
//! When unique-topic mode is on every wire topic is prefixed with `/<client-id>` so
//! several panels can share one broker.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Longest wire topic the device handles, terminator included.
pub const TOPIC_LEN: usize = 100;

pub const LED: &str = "/led";
pub const PRINT: &str = "/print";
pub const PING: &str = "/ping";
pub const EXIT: &str = "/exit";
pub const LED_STATE: &str = "/led/state";
pub const UPTIME: &str = "/uptime";
pub const ONLINE: &str = "/online";

/// Rooms whose luminosity level is shown on the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Sala,
    Quarto1,
    Quarto2,
    Cozinha,
    Banheiro,
}

impl Room {
    pub const ALL: [Room; 5] = [
        Room::Sala,
        Room::Quarto1,
        Room::Quarto2,
        Room::Cozinha,
        Room::Banheiro,
    ];

    pub fn topic(self) -> &'static str {
        match self {
            Room::Sala => "/luminosidade/sala",
            Room::Quarto1 => "/luminosidade/quarto1",
            Room::Quarto2 => "/luminosidade/quarto2",
            Room::Cozinha => "/luminosidade/cozinha",
            Room::Banheiro => "/luminosidade/banheiro",
        }
    }

    /// Label written on the display.
    pub fn label(self) -> &'static str {
        match self {
            Room::Sala => "Sala",
            Room::Quarto1 => "Quarto 1",
            Room::Quarto2 => "Quarto 2",
            Room::Cozinha => "Cozinha",
            Room::Banheiro => "Banheiro",
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The fixed topic set of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Led,
    Print,
    Ping,
    Exit,
    Level(Room),
    Online,
    LedState,
    Uptime,
}

impl Topic {
    /// Topics subscribed on connect and unsubscribed on exit, in request order.
    pub const SUBSCRIBED: [Topic; 9] = [
        Topic::Led,
        Topic::Print,
        Topic::Ping,
        Topic::Exit,
        Topic::Level(Room::Sala),
        Topic::Level(Room::Quarto1),
        Topic::Level(Room::Quarto2),
        Topic::Level(Room::Cozinha),
        Topic::Level(Room::Banheiro),
    ];

    pub fn logical(self) -> &'static str {
        match self {
            Topic::Led => LED,
            Topic::Print => PRINT,
            Topic::Ping => PING,
            Topic::Exit => EXIT,
            Topic::Level(room) => room.topic(),
            Topic::Online => ONLINE,
            Topic::LedState => LED_STATE,
            Topic::Uptime => UPTIME,
        }
    }

    /// Lookup table from logical name to topic for the inbound side.
    pub fn inbound_table() -> HashMap<&'static str, Topic> {
        Topic::SUBSCRIBED
            .iter()
            .map(|topic| (topic.logical(), *topic))
            .collect()
    }
}

/// Maps logical topic names to wire topics and back.
#[derive(Debug, Clone)]
pub struct TopicNamespace {
    client_id: String,
    unique: bool,
}

impl TopicNamespace {
    pub fn new(client_id: impl Into<String>, unique: bool) -> Self {
        Self {
            client_id: client_id.into(),
            unique,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Wire topic for a logical name.
    ///
    /// Identity when unique-topic mode is off. In prefixed mode the result is cut to
    /// `TOPIC_LEN - 1` bytes if the client id and the name do not fit.
    pub fn resolve<'a>(&self, logical: &'a str) -> Cow<'a, str> {
        if !self.unique {
            return Cow::Borrowed(logical);
        }

        let mut full = format!("/{}{}", self.client_id, logical);
        truncate_to_boundary(&mut full, TOPIC_LEN - 1);
        Cow::Owned(full)
    }

    pub fn resolve_topic(&self, topic: Topic) -> Cow<'static, str> {
        self.resolve(topic.logical())
    }

    /// Logical name of a wire topic, `None` if the device prefix is missing.
    pub fn strip<'a>(&self, wire: &'a str) -> Option<&'a str> {
        if !self.unique {
            return Some(wire);
        }

        wire.strip_prefix('/')?
            .strip_prefix(self.client_id.as_str())
    }
}

/// Cuts `text` to at most `max` bytes without splitting a character.
pub fn truncate_to_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TOPICS: [Topic; 12] = [
        Topic::Led,
        Topic::Print,
        Topic::Ping,
        Topic::Exit,
        Topic::Level(Room::Sala),
        Topic::Level(Room::Quarto1),
        Topic::Level(Room::Quarto2),
        Topic::Level(Room::Cozinha),
        Topic::Level(Room::Banheiro),
        Topic::Online,
        Topic::LedState,
        Topic::Uptime,
    ];

    #[test]
    fn plain_mode_is_identity() {
        let namespace = TopicNamespace::new("picoe661", false);
        let wire = namespace.resolve("/led");
        assert!(matches!(wire, Cow::Borrowed("/led")));
        assert_eq!(namespace.strip("/led"), Some("/led"));
    }

    #[test]
    fn unique_mode_prefixes_client_id() {
        let namespace = TopicNamespace::new("picoe661", true);
        assert_eq!(namespace.resolve("/online"), "/picoe661/online");
        assert_eq!(
            namespace.resolve_topic(Topic::Level(Room::Cozinha)),
            "/picoe661/luminosidade/cozinha"
        );
    }

    #[test]
    fn strip_undoes_resolve_for_every_topic() {
        for unique in [false, true] {
            let namespace = TopicNamespace::new("picoe661", unique);
            for topic in ALL_TOPICS {
                let wire = namespace.resolve_topic(topic);
                assert_eq!(namespace.strip(&wire), Some(topic.logical()));
            }
        }
    }

    #[test]
    fn foreign_prefix_is_not_stripped() {
        let namespace = TopicNamespace::new("picoe661", true);
        assert_eq!(namespace.strip("/pico0000/led"), None);
        assert_eq!(namespace.strip("/led"), None);
    }

    #[test]
    fn overlong_topic_is_truncated() {
        let namespace = TopicNamespace::new("x".repeat(120), true);
        let wire = namespace.resolve("/led");
        assert_eq!(wire.len(), TOPIC_LEN - 1);
        assert!(wire.starts_with("/xxx"));
    }

    #[test]
    fn truncation_keeps_char_boundaries() {
        let mut text = String::from("aéé");
        truncate_to_boundary(&mut text, 2);
        assert_eq!(text, "a");
    }

    #[test]
    fn inbound_table_covers_subscribed_set() {
        let table = Topic::inbound_table();
        assert_eq!(table.len(), Topic::SUBSCRIBED.len());
        assert_eq!(table.get("/luminosidade/banheiro"), Some(&Topic::Level(Room::Banheiro)));
        assert_eq!(table.get("/online"), None);
    }
}
