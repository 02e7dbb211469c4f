//! Client half of the adaptive policy.
//!
//! The client counts rendered frames over a trailing window. Once per
//! window it compares the rate against a threshold and, if the rate is too
//! low, halves the group count it asks for. The request never grows back.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rendering-rate tracker that shrinks the requested group count.
#[derive(Debug, Clone)]
pub struct AdaptiveRequester {
    groups: usize,
    threshold_fps: f64,
    window: Duration,
    frames: VecDeque<Instant>,
    window_start: Instant,
}

impl AdaptiveRequester {
    pub fn new(groups: usize, threshold_fps: f64, window: Duration, now: Instant) -> Self {
        Self {
            groups,
            threshold_fps,
            window,
            frames: VecDeque::new(),
            window_start: now,
        }
    }

    /// Group count of the next request.
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// The next request rendered as a control signal.
    pub fn signal(&self) -> String {
        crate::protocol::format_request(self.groups)
    }

    /// Note that a frame finished rendering at `at`.
    pub fn record_frame(&mut self, at: Instant) {
        self.frames.push_back(at);
        self.evict(at);
    }

    /// Frames per second over the trailing window ending at `now`.
    pub fn rate(&mut self, now: Instant) -> f64 {
        self.evict(now);
        self.frames.len() as f64 / self.window.as_secs_f64()
    }

    /// Re-evaluate the request, returning the group count to ask for next.
    ///
    /// The rate is only judged once a full window has elapsed since the last
    /// judgement, so a single slow frame cannot halve the request twice.
    pub fn next_request(&mut self, now: Instant) -> usize {
        if now.saturating_duration_since(self.window_start) >= self.window {
            let rate = self.rate(now);
            // Never halve 1 down to 0: an empty request yields empty frames
            // and the chart would stop updating for good
            if rate < self.threshold_fps && self.groups > 1 {
                self.groups /= 2;
                tracing::debug!(rate, groups = self.groups, "Halving request");
            }
            self.window_start = now;
        }
        self.groups
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.frames.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.frames.pop_front();
            } else {
                break;
            }
        }
    }
}
