//! # MQTT Session
//!
//! Connects the panel to its broker, subscribes to the fixed topic set and turns inbound
//! messages into LED, log and display actions.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── topics.rs         - Logical topic names and the optional client-id prefix
//! ├── level.rs          - Level parsing, buckets and matrix icons
//! ├── router.rs         - Two-phase inbound assembly and topic dispatch
//! ├── subscriptions.rs  - Subscribe/unsubscribe accounting and deferred disconnect
//! ├── session.rs        - Connection lifecycle as a pure event/effect state machine
//! ├── transport.rs      - rumqttc options, TLS material and event translation
//! ├── driver.rs         - Poll loop executing the session's effects
//! └── error.rs          - Error types
//! ```
//!
//! ## Data Flow
//!
//! The driver polls rumqttc, [`transport::translate`] turns each outcome into
//! [`session::SessionEvent`]s and [`session::Session::handle`] answers with
//! [`session::Effect`]s. The driver executes those against the broker link and the
//! device sinks. Request failures come back into the session as events.

pub mod driver;
pub mod error;
pub mod level;
pub mod router;
pub mod session;
pub mod subscriptions;
pub mod topics;
pub mod transport;
