//! Window arithmetic for quota counting.
//!
//! Windows are fixed, epoch-aligned intervals: the window holding timestamp
//! `t` is `floor(t / length)`. Two adjacent windows can together admit up to
//! twice the quota around their shared boundary. The sliding counter strategy
//! narrows that by blending the previous window into the current count.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::GuardError;

/// Index of the fixed window containing `timestamp_ms`.
pub fn window_key(timestamp_ms: u64, window_length_ms: u64) -> u64 {
    timestamp_ms / window_length_ms.max(1)
}

/// How counts in the current window are turned into an admission count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStrategy {
    #[default]
    Fixed,
    SlidingCounter,
}

impl WindowStrategy {
    /// How long a window counter must stay readable in the store.
    pub fn retention(&self, window_length_ms: u64) -> Duration {
        match self {
            WindowStrategy::Fixed => Duration::from_millis(window_length_ms),
            // The previous window is read for one more full window.
            WindowStrategy::SlidingCounter => Duration::from_millis(window_length_ms * 2),
        }
    }

    /// Effective hit count given the current and previous window counts.
    pub fn effective_count(&self, slot: &WindowSlot, now_ms: u64, current: u64, previous: u64) -> u64 {
        match self {
            WindowStrategy::Fixed => current,
            WindowStrategy::SlidingCounter => {
                let weight = 1.0 - slot.elapsed_fraction(now_ms);
                let carried = (previous as f64 * weight).ceil() as u64;
                current + carried
            }
        }
    }
}

impl FromStr for WindowStrategy {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" | "fixed_window" => Ok(WindowStrategy::Fixed),
            "sliding" | "sliding_counter" | "sliding_window" => Ok(WindowStrategy::SlidingCounter),
            other => Err(GuardError::Configuration(format!(
                "Unknown window strategy '{}'. Expected 'fixed' or 'sliding'",
                other
            ))),
        }
    }
}

impl fmt::Display for WindowStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowStrategy::Fixed => write!(f, "fixed"),
            WindowStrategy::SlidingCounter => write!(f, "sliding"),
        }
    }
}

/// A single epoch-aligned window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSlot {
    pub index: u64,
    pub length_ms: u64,
}

impl WindowSlot {
    pub fn at(now_ms: u64, length_ms: u64) -> Self {
        let length_ms = length_ms.max(1);
        Self {
            index: window_key(now_ms, length_ms),
            length_ms,
        }
    }

    pub fn start_ms(&self) -> u64 {
        self.index * self.length_ms
    }

    pub fn end_ms(&self) -> u64 {
        self.start_ms() + self.length_ms
    }

    /// Time until this window rolls over. Never zero for a `now_ms` inside
    /// the window.
    pub fn remaining(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.end_ms().saturating_sub(now_ms))
    }

    pub fn elapsed_fraction(&self, now_ms: u64) -> f64 {
        let elapsed = now_ms.saturating_sub(self.start_ms()).min(self.length_ms);
        elapsed as f64 / self.length_ms as f64
    }

    pub fn previous(&self) -> Option<Self> {
        self.index.checked_sub(1).map(|index| Self {
            index,
            length_ms: self.length_ms,
        })
    }
}
