//! Adaptive scan scheduling.
//!
//! The scheduler trades detection latency against radio usage by choosing a
//! scan interval and window from the current [`ScanMode`]. A grace period in
//! the presence detector overrides the mode cadence with fast reconnect
//! attempts.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::clock::{Clock, Timestamp};
use crate::config::{PresenceConfig, SchedulerConfig};
use crate::presence::PresenceSnapshot;

/// Scanning confidence mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanMode {
    /// No recent detection: poll often, scan long.
    Searching,
    /// Confirmed present: poll rarely, scan briefly.
    Monitoring,
    /// A presence flip is being confirmed: poll often, scan briefly.
    Verifying,
}

impl ScanMode {
    /// Upper-case label used in heartbeats and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Searching => "SEARCHING",
            Self::Monitoring => "MONITORING",
            Self::Verifying => "VERIFYING",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to ask of the scanner next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCadence {
    /// Pause after the previous scan before scanning again.
    pub interval: Duration,
    /// Scan window to request.
    pub window: Duration,
}

/// Outcome tallies while in [`ScanMode::Verifying`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VerifyWindow {
    entered_at: Timestamp,
    detections: u32,
    misses: u32,
}

/// Mode-driven scan cadence with a grace-period override.
#[derive(Debug)]
pub struct AdaptiveScheduler<C> {
    config: SchedulerConfig,
    grace_interval: Duration,
    mode: ScanMode,
    verify: Option<VerifyWindow>,
    last_scan_end: Option<Timestamp>,
    clock: C,
}

impl<C: Clock> AdaptiveScheduler<C> {
    /// Start in [`ScanMode::Searching`] with a scan due immediately.
    pub fn new(config: &SchedulerConfig, presence: &PresenceConfig, clock: C) -> Self {
        Self {
            config: config.clone(),
            grace_interval: presence.grace_reconnect_interval(),
            mode: ScanMode::Searching,
            verify: None,
            last_scan_end: None,
            clock,
        }
    }

    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Cadence for the next scan. `in_grace` takes precedence over the mode.
    #[must_use]
    pub fn cadence(&self, in_grace: bool) -> ScanCadence {
        let c = &self.config;
        let (interval_ms, window_ms) = if in_grace {
            (duration_ms(self.grace_interval), c.grace_scan_ms)
        } else {
            match self.mode {
                ScanMode::Searching => (c.searching_interval_ms, c.searching_scan_ms),
                ScanMode::Monitoring => (c.monitoring_interval_ms, c.monitoring_scan_ms),
                ScanMode::Verifying => (c.verifying_interval_ms, c.verifying_scan_ms),
            }
        };
        ScanCadence {
            interval: Duration::from_millis(interval_ms),
            window: Duration::from_millis(window_ms),
        }
    }

    /// Time left before the next scan should start.
    #[must_use]
    pub fn time_until_next_scan(&self, in_grace: bool) -> Duration {
        let Some(last) = self.last_scan_end else {
            return Duration::ZERO;
        };
        let elapsed = self.clock.now().saturating_elapsed_since(last);
        self.cadence(in_grace).interval.saturating_sub(elapsed)
    }

    /// Whether the next scan should start now.
    #[must_use]
    pub fn is_due(&self, in_grace: bool) -> bool {
        self.time_until_next_scan(in_grace).is_zero()
    }

    /// Record a finished scan and advance the mode.
    ///
    /// `detected` is whether the scan produced a qualifying observation and
    /// `presence` is the detector state after consuming it. Returns the new
    /// mode when it changed.
    pub fn record(&mut self, detected: bool, presence: &PresenceSnapshot) -> Option<ScanMode> {
        let now = self.clock.now();
        self.last_scan_end = Some(now);
        let trigger = self.config.verify_trigger_count;

        let next = match self.mode {
            ScanMode::Searching if presence.consecutive_detections >= trigger => {
                Some(ScanMode::Verifying)
            }
            ScanMode::Monitoring if presence.consecutive_misses >= trigger => {
                Some(ScanMode::Verifying)
            }
            ScanMode::Verifying => self.tally(now, detected, presence.confirmed_present),
            _ => None,
        }?;

        self.enter(next, now);
        Some(next)
    }

    fn tally(&mut self, now: Timestamp, detected: bool, confirmed_present: bool) -> Option<ScanMode> {
        let window = self.verify.get_or_insert(VerifyWindow {
            entered_at: now,
            detections: 0,
            misses: 0,
        });
        if detected {
            window.detections += 1;
        } else {
            window.misses += 1;
        }

        let dwell = Duration::from_millis(self.config.verify_dwell_ms);
        if now.saturating_elapsed_since(window.entered_at) < dwell {
            return None;
        }

        let present = match window.detections.cmp(&window.misses) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => confirmed_present,
        };
        Some(if present {
            ScanMode::Monitoring
        } else {
            ScanMode::Searching
        })
    }

    fn enter(&mut self, mode: ScanMode, now: Timestamp) {
        let tallies = self.verify.take();
        info!(
            from = %self.mode,
            to = %mode,
            detections = tallies.map_or(0, |t| t.detections),
            misses = tallies.map_or(0, |t| t.misses),
            "Scan mode changed"
        );
        self.mode = mode;
        if mode == ScanMode::Verifying {
            self.verify = Some(VerifyWindow {
                entered_at: now,
                detections: 0,
                misses: 0,
            });
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
