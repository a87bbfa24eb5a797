#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Channels {
    /// Bind address of the command (reply) socket.
    pub command_addr: String,

    /// Bind address of the event (publish) socket.
    pub event_addr: String,

    /// Receive/send deadline applied to both sockets.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub io_deadline: Duration,

    /// How many times a completion event is published before giving up.
    pub publish_attempts: u32,
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            command_addr: "0.0.0.0:65501".into(),
            event_addr: "0.0.0.0:65502".into(),
            io_deadline: Duration::from_secs(3),
            publish_attempts: 3,
        }
    }
}
