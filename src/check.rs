//! Named checks and their pass/fail tallies.
//!
//! A failing check is counted and reported; it never aborts an iteration or
//! changes the exit status.

use serde::Serialize;

/// Passes once per iteration when the upgrade returned 101.
pub const CONNECTION_CHECK: &str = "websocket connection successful";

/// Evaluated once per received text message.
pub const ACK_CHECK: &str = "message contains expected string";

/// `true` if `text` contains `marker`.
#[inline]
#[must_use]
pub fn contains_marker(text: &str, marker: &str) -> bool {
    text.contains(marker)
}

/// Pass and fail counts of one check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckTally {
    pub passes: u64,
    pub fails: u64,
}

impl CheckTally {
    pub fn record(&mut self, passed: bool) {
        if passed {
            self.passes += 1;
        } else {
            self.fails += 1;
        }
    }

    /// Add counts from another tally.
    pub fn merge(&mut self, passes: u64, fails: u64) {
        self.passes += passes;
        self.fails += fails;
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    /// Fraction of passes in `[0, 1]`; `None` if the check never ran.
    #[must_use]
    pub fn pass_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.passes as f64 / total as f64),
        }
    }
}
