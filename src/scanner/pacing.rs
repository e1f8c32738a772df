//! Probe pacing.
//!
//! The sender sleeps a fixed delay before every SYN. There is no feedback
//! from the network: the delay never adapts to loss or congestion. Presets
//! cover the common cases; an explicit packets-per-second rate overrides
//! them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Named pacing presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacingProfile {
    /// ~1000 probes/s. Replies may be lost on slow links.
    Aggressive,
    /// ~100 probes/s.
    #[default]
    Normal,
    /// ~20 probes/s.
    Polite,
    /// ~2 probes/s.
    Paranoid,
}

impl PacingProfile {
    /// Inter-probe delay in milliseconds.
    pub fn delay_ms(&self) -> u64 {
        match self {
            Self::Aggressive => 1,
            Self::Normal => 10,
            Self::Polite => 50,
            Self::Paranoid => 500,
        }
    }

    /// Pacing for this preset.
    pub fn pacing(&self) -> Pacing {
        Pacing::new(Duration::from_millis(self.delay_ms()))
    }
}

impl std::fmt::Display for PacingProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aggressive => write!(f, "aggressive"),
            Self::Normal => write!(f, "normal"),
            Self::Polite => write!(f, "polite"),
            Self::Paranoid => write!(f, "paranoid"),
        }
    }
}

/// Fixed inter-probe delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pacing {
    probe_delay: Duration,
}

impl Pacing {
    /// Pacing with an explicit delay before each probe.
    pub fn new(probe_delay: Duration) -> Self {
        Self { probe_delay }
    }

    /// No delay at all. Intended for tests and loopback setups.
    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Pacing that approximates `pps` probes per second.
    ///
    /// Returns `None` for a zero rate.
    pub fn from_rate(pps: u32) -> Option<Self> {
        if pps == 0 {
            return None;
        }
        Some(Self::new(Duration::from_nanos(1_000_000_000 / pps as u64)))
    }

    /// Delay applied before each probe.
    pub fn probe_delay(&self) -> Duration {
        self.probe_delay
    }

    /// Nominal rate in probes per second, `None` when unpaced.
    pub fn rate_pps(&self) -> Option<f64> {
        if self.probe_delay.is_zero() {
            return None;
        }
        Some(1.0 / self.probe_delay.as_secs_f64())
    }

    /// Block the calling thread for one inter-probe delay.
    pub fn wait(&self) {
        if !self.probe_delay.is_zero() {
            std::thread::sleep(self.probe_delay);
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        PacingProfile::default().pacing()
    }
}
