//! JSON events sent by virtual users.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An outgoing event, serialized with its kind in the `event` field:
///
/// ```text
/// {"event":"hello","message":"from wsload"}
/// {"event":"ping","timestamp":1700000000000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    /// Sent once right after the connection opens.
    Hello { message: String },
    /// Sent every ping interval while the connection is open.
    Ping { timestamp: u64 },
}

impl Event {
    pub fn hello(message: impl Into<String>) -> Self {
        Event::Hello {
            message: message.into(),
        }
    }

    /// A ping stamped with the current wall-clock time.
    pub fn ping_now() -> Self {
        Event::Ping {
            timestamp: epoch_millis(),
        }
    }

    /// Encode as a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Encode(e.to_string()))
    }
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
