//! Per-iteration outcomes and the run-wide summary.
//!
//! Virtual users produce one [`IterationOutcome`] per finished iteration and
//! send it to the aggregator, which owns the only [`RunSummary`].

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

use crate::check::{ACK_CHECK, CONNECTION_CHECK, CheckTally};
use crate::error::{Error, Result};

/// Result of one connect / hold / close cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IterationOutcome {
    /// Virtual user that ran the iteration.
    pub vu: u32,
    /// The upgrade completed with status 101.
    pub connected: bool,
    /// HTTP status of the upgrade response, if one was received.
    pub status: Option<u16>,
    /// At least one text message contained the acknowledgment marker.
    pub acknowledged_message_seen: bool,
    /// First unexpected error, if any ended the session.
    pub error: Option<String>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub acks_passed: u64,
    pub acks_failed: u64,
    /// Time from connect attempt to socket closed.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl IterationOutcome {
    /// Outcome of an iteration that never got a socket.
    #[must_use]
    pub fn failed(vu: u32, error: &Error, duration: Duration) -> Self {
        let status = match error {
            Error::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        };
        Self {
            vu,
            status,
            error: Some(error.to_string()),
            duration,
            ..Self::default()
        }
    }
}

/// Aggregate over every recorded outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_iterations: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    /// Iterations in which at least one acknowledged message arrived.
    pub acknowledged_count: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Tallies by check name.
    pub checks: BTreeMap<String, CheckTally>,
    /// Number of iterations that recorded an error.
    pub error_count: u64,
    /// The first errors in arrival order, capped.
    pub errors: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// The run was stopped before its deadline.
    pub interrupted: bool,
    #[serde(skip)]
    max_recorded_errors: usize,
}

impl RunSummary {
    /// Empty summary keeping at most `max_recorded_errors` error messages.
    #[must_use]
    pub fn new(max_recorded_errors: usize) -> Self {
        let checks = [CONNECTION_CHECK, ACK_CHECK]
            .into_iter()
            .map(|name| (name.to_string(), CheckTally::default()))
            .collect();
        Self {
            total_iterations: 0,
            successful_connections: 0,
            failed_connections: 0,
            acknowledged_count: 0,
            messages_sent: 0,
            messages_received: 0,
            checks,
            error_count: 0,
            errors: Vec::new(),
            elapsed: Duration::ZERO,
            interrupted: false,
            max_recorded_errors,
        }
    }

    /// Merge one outcome.
    pub fn record(&mut self, outcome: &IterationOutcome) {
        self.total_iterations += 1;
        if outcome.connected {
            self.successful_connections += 1;
        } else {
            self.failed_connections += 1;
        }
        if outcome.acknowledged_message_seen {
            self.acknowledged_count += 1;
        }
        self.messages_sent += outcome.messages_sent;
        self.messages_received += outcome.messages_received;

        self.tally_mut(CONNECTION_CHECK)
            .record(outcome.connected && outcome.status == Some(101));
        self.tally_mut(ACK_CHECK)
            .merge(outcome.acks_passed, outcome.acks_failed);

        if let Some(error) = &outcome.error {
            self.error_count += 1;
            if self.errors.len() < self.max_recorded_errors {
                self.errors.push(error.clone());
            }
        }
    }

    fn tally_mut(&mut self, name: &str) -> &mut CheckTally {
        self.checks.entry(name.to_string()).or_default()
    }

    /// Tally of a named check.
    #[must_use]
    pub fn check(&self, name: &str) -> CheckTally {
        self.checks.get(name).copied().unwrap_or_default()
    }

    /// Serialize as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Human-readable report.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let rule = "═".repeat(62);
        let _ = writeln!(out, "╔{rule}╗");
        let _ = writeln!(out, "║{:^62}║", "WSLOAD SUMMARY");
        let _ = writeln!(out, "╠{rule}╣");
        row(&mut out, "Elapsed", &format!("{:.3}s", self.elapsed.as_secs_f64()));
        if self.interrupted {
            row(&mut out, "Status", "interrupted");
        }
        let _ = writeln!(out, "╠{rule}╣");
        section(&mut out, "ITERATIONS");
        row(&mut out, "  Total", &self.total_iterations.to_string());
        row(&mut out, "  Connected", &self.successful_connections.to_string());
        row(&mut out, "  Failed", &self.failed_connections.to_string());
        row(&mut out, "  Acknowledged", &self.acknowledged_count.to_string());
        let _ = writeln!(out, "╠{rule}╣");
        section(&mut out, "MESSAGES");
        row(&mut out, "  Sent", &self.messages_sent.to_string());
        row(&mut out, "  Received", &self.messages_received.to_string());
        let _ = writeln!(out, "╠{rule}╣");
        section(&mut out, "CHECKS");
        for (name, tally) in &self.checks {
            let mark = if tally.fails == 0 { '✓' } else { '✗' };
            let rate = tally
                .pass_rate()
                .map_or_else(|| "-".to_string(), |r| format!("{:.1}%", r * 100.0));
            let _ = writeln!(out, "║  {mark} {name:<58}║");
            row(
                &mut out,
                "      ",
                &format!("{rate}  ✓ {}  ✗ {}", tally.passes, tally.fails),
            );
        }
        let _ = writeln!(out, "╠{rule}╣");
        row(&mut out, "Errors", &self.error_count.to_string());
        for error in &self.errors {
            let line: String = error.chars().take(56).collect();
            let _ = writeln!(out, "║    {line:<58}║");
        }
        if self.error_count > self.errors.len() as u64 {
            let more = format!("... {} more", self.error_count - self.errors.len() as u64);
            let _ = writeln!(out, "║    {more:<58}║");
        }
        let _ = writeln!(out, "╚{rule}╝");
        out
    }
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "║  {title:<60}║");
}

fn row(out: &mut String, label: &str, value: &str) {
    let _ = writeln!(out, "║  {label:<20}{value:>38}  ║");
}
