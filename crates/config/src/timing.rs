#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Timing {
    /// Pause between spawning the target and opening the control channel,
    /// giving the target time to settle.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub startup_grace: Duration,

    /// Interval between heartbeat dots while waiting for the terminator.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub heartbeat: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(3),
            heartbeat: Duration::from_secs(5),
        }
    }
}
