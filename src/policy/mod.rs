//! Flow-control policies.
//!
//! A policy decides *when* a frame is sent and *how many samples* it holds.
//! The policy is fixed per deployment; nothing on the wire says which one is
//! active, so the bundled page is told out of band.
//!
//! ## Policies
//!
//! | Policy     | Trigger           | Frame length                          |
//! |------------|-------------------|---------------------------------------|
//! | `demand`   | control signal    | parsed count x group width            |
//! | `interval` | pacing clock tick | `default_groups` x group width        |
//! | `adaptive` | any client signal | latest valid request, else last value |
//!
//! ## Malformed signals
//!
//! - `demand`: terminal. The session closes without sending a frame.
//! - `adaptive`: the signal still triggers a frame at the last honored
//!   length. Requests above `max_groups` are clamped.
//! - `interval`: signal content is never inspected.
//!
//! The client half of the adaptive policy lives in [`adaptive`].

pub mod adaptive;

pub use adaptive::AdaptiveRequester;

use crate::config::SessionConfig;
use crate::protocol::{self, SignalError};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Which flow-control policy a deployment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// One frame per client request, length taken from the request.
    #[default]
    Demand,
    /// Fixed-size frames on a fixed timer, client input ignored.
    Interval,
    /// One frame per client signal; the client shrinks its own requests.
    Adaptive,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Demand => "demand",
            PolicyKind::Interval => "interval",
            PolicyKind::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session flow-control state.
#[derive(Debug, Clone)]
pub struct FlowPolicy {
    kind: PolicyKind,
    group_width: usize,
    max_groups: usize,
    interval: Duration,
    /// Group count of the most recent frame (or the configured default).
    groups: usize,
}

impl FlowPolicy {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            kind: config.policy,
            group_width: config.group_width,
            max_groups: config.max_groups,
            interval: config.interval,
            groups: config.default_groups,
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    /// Current group count.
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Pacing period, for timer-driven policies only.
    pub fn pacing(&self) -> Option<Duration> {
        match self.kind {
            PolicyKind::Interval => Some(self.interval),
            PolicyKind::Demand | PolicyKind::Adaptive => None,
        }
    }

    /// Resolve the frame length (in samples) for an inbound control signal.
    ///
    /// `Ok(None)` means the signal does not trigger a frame.
    pub fn on_signal(&mut self, signal: &[u8]) -> Result<Option<usize>, SignalError> {
        match self.kind {
            PolicyKind::Interval => Ok(None),
            PolicyKind::Demand => {
                self.groups = protocol::parse_request(signal, self.max_groups)?;
                Ok(Some(self.frame_len()))
            }
            PolicyKind::Adaptive => {
                match protocol::parse_request(signal, self.max_groups) {
                    Ok(groups) => self.groups = groups,
                    Err(SignalError::TooLarge { requested, max }) => {
                        debug!(requested, max, "Clamping adaptive request");
                        self.groups = max;
                    }
                    Err(e) => {
                        debug!(error = %e, groups = self.groups, "Reusing last request");
                    }
                }
                Ok(Some(self.frame_len()))
            }
        }
    }

    /// Frame length (in samples) for a pacing clock tick.
    pub fn on_tick(&self) -> usize {
        self.frame_len()
    }

    fn frame_len(&self) -> usize {
        self.groups.saturating_mul(self.group_width)
    }
}
