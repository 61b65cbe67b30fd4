//! Presence detection with hysteresis and a grace period.
//!
//! The detector turns a noisy stream of per-scan observations into a stable
//! present/absent signal:
//!
//! ```text
//!            confirm_scans consecutive hits
//!   AWAY ────────────────────────────────────▶ PRESENT
//!    ▲                                          │  ▲
//!    │ grace expired                            │  │ any qualifying hit
//!    │ (time or attempts)   confirm_absence     │  │
//!    │                      consecutive misses  ▼  │
//!    └──────────────────────────────────── PRESENT_GRACE
//! ```
//!
//! `PRESENT_GRACE` is invisible to consumers: [`PresenceDetector::effective_presence`]
//! keeps reporting `true` until the grace period resolves. Only the two
//! externally visible flips produce a [`PresenceEvent`].

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::clock::{Clock, Timestamp};
use crate::config::{BluetoothConfig, PresenceConfig};
use crate::types::BeaconObservation;

/// Detector state, including the internal grace sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceState {
    /// Confirmed absent.
    Away,
    /// Confirmed present.
    Present,
    /// Still reported present; waiting to see whether the beacon returns.
    PresentGrace,
}

/// An externally visible presence flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceEvent {
    /// New confirmed presence.
    pub present: bool,
    /// When the flip was decided.
    pub at: Timestamp,
}

/// Why a grace period ended in absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraceExpiry {
    Elapsed,
    AttemptsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GraceWindow {
    started_at: Timestamp,
    attempts: u32,
}

/// Long-lived detector state. Owned and mutated only by [`PresenceDetector`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PresenceRecord {
    confirmed_present: bool,
    consecutive_detections: u32,
    consecutive_misses: u32,
    grace: Option<GraceWindow>,
}

/// Read-only view of the detector for diagnostics and the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    /// Debounced presence as reported to consumers.
    pub confirmed_present: bool,
    /// Consecutive qualifying observations.
    pub consecutive_detections: u32,
    /// Consecutive misses.
    pub consecutive_misses: u32,
    /// Whether a grace period is running.
    pub in_grace_period: bool,
    /// Scans attempted in the current grace period.
    pub grace_attempts: u32,
    /// Time left before the grace period expires by duration.
    #[serde(skip)]
    pub grace_remaining: Option<Duration>,
}

/// Detector tuning, resolved from the node configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Consecutive qualifying observations needed for `AWAY → PRESENT`.
    pub confirm_scans: u32,
    /// Consecutive misses needed for `PRESENT → PRESENT_GRACE`.
    pub confirm_absence_scans: u32,
    /// Maximum grace period length. Grace expires once this much time
    /// has elapsed, inclusive.
    pub grace_period: Duration,
    /// Missed scans allowed once grace has started. The count is
    /// inclusive: grace expires on the miss that reaches this value, so
    /// `3` means the third miss after the one that opened grace ends it.
    pub grace_max_attempts: u32,
    /// Observations weaker than this are misses. `None` accepts any RSSI.
    pub rssi_floor: Option<i16>,
}

impl DetectorConfig {
    /// Build from the presence and bluetooth config sections.
    #[must_use]
    pub const fn from_config(presence: &PresenceConfig, bluetooth: &BluetoothConfig) -> Self {
        Self {
            confirm_scans: presence.confirm_scans,
            confirm_absence_scans: presence.confirm_absence_scans,
            grace_period: presence.grace_period(),
            grace_max_attempts: presence.grace_reconnect_max_attempts,
            rssi_floor: bluetooth.rssi_floor(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from_config(&PresenceConfig::default(), &BluetoothConfig::default())
    }
}

/// Hysteresis/grace state machine over beacon observations.
#[derive(Debug)]
pub struct PresenceDetector<C> {
    config: DetectorConfig,
    record: PresenceRecord,
    clock: C,
}

impl<C: Clock> PresenceDetector<C> {
    /// Create a detector in the `AWAY` state.
    pub fn new(config: DetectorConfig, clock: C) -> Self {
        Self {
            config,
            record: PresenceRecord::default(),
            clock,
        }
    }

    /// Feed the result of one scan cycle.
    ///
    /// Returns an event only when the externally visible presence flips.
    pub fn observe(&mut self, observation: Option<&BeaconObservation>) -> Option<PresenceEvent> {
        let now = self.clock.now();
        if observation.is_some_and(|obs| self.is_qualifying(obs)) {
            self.on_detection(now)
        } else {
            if let Some(obs) = observation {
                debug!(
                    rssi = obs.rssi,
                    floor = ?self.config.rssi_floor,
                    "Beacon below RSSI threshold, counting as a miss"
                );
            }
            self.on_miss(now)
        }
    }

    /// Check grace-period expiry by time without counting a scan attempt.
    ///
    /// Lets a grace period resolve between scans.
    pub fn poll(&mut self) -> Option<PresenceEvent> {
        let now = self.clock.now();
        let grace = self.record.grace?;
        if now.saturating_elapsed_since(grace.started_at) >= self.config.grace_period {
            Some(self.expire_grace(now, GraceExpiry::Elapsed))
        } else {
            None
        }
    }

    /// Whether an observation counts as a detection.
    #[must_use]
    pub fn is_qualifying(&self, observation: &BeaconObservation) -> bool {
        self.config
            .rssi_floor
            .map_or(true, |floor| observation.rssi >= floor)
    }

    /// Debounced presence, with the grace period masked.
    #[must_use]
    pub const fn effective_presence(&self) -> bool {
        self.record.confirmed_present
    }

    /// Whether a grace period is currently running.
    #[must_use]
    pub const fn is_in_grace_period(&self) -> bool {
        self.record.grace.is_some()
    }

    /// Time left in the current grace period, if one is running.
    #[must_use]
    pub fn grace_remaining(&self) -> Option<Duration> {
        self.record.grace.map(|grace| {
            let elapsed = self.clock.now().saturating_elapsed_since(grace.started_at);
            self.config.grace_period.saturating_sub(elapsed)
        })
    }

    /// Current state including the internal grace sub-state.
    #[must_use]
    pub const fn state(&self) -> PresenceState {
        match (self.record.confirmed_present, self.record.grace.is_some()) {
            (false, _) => PresenceState::Away,
            (true, false) => PresenceState::Present,
            (true, true) => PresenceState::PresentGrace,
        }
    }

    /// Read-only view of the record.
    #[must_use]
    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            confirmed_present: self.record.confirmed_present,
            consecutive_detections: self.record.consecutive_detections,
            consecutive_misses: self.record.consecutive_misses,
            in_grace_period: self.record.grace.is_some(),
            grace_attempts: self.record.grace.map_or(0, |grace| grace.attempts),
            grace_remaining: self.grace_remaining(),
        }
    }

    /// Active tuning.
    #[must_use]
    pub const fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn on_detection(&mut self, now: Timestamp) -> Option<PresenceEvent> {
        let record = &mut self.record;
        record.consecutive_misses = 0;
        record.consecutive_detections = record.consecutive_detections.saturating_add(1);

        if let Some(grace) = record.grace.take() {
            info!(
                attempts = grace.attempts,
                elapsed_ms = now.saturating_elapsed_since(grace.started_at).as_millis(),
                "Beacon reacquired, grace period cancelled"
            );
            return None;
        }

        if !record.confirmed_present && record.consecutive_detections >= self.config.confirm_scans {
            record.confirmed_present = true;
            info!(
                detections = record.consecutive_detections,
                "Presence confirmed"
            );
            return Some(PresenceEvent { present: true, at: now });
        }

        None
    }

    fn on_miss(&mut self, now: Timestamp) -> Option<PresenceEvent> {
        {
            let record = &mut self.record;
            record.consecutive_detections = 0;
            record.consecutive_misses = record.consecutive_misses.saturating_add(1);

            if !record.confirmed_present {
                return None;
            }
        }

        let Some(mut grace) = self.record.grace else {
            if self.record.consecutive_misses >= self.config.confirm_absence_scans {
                self.record.grace = Some(GraceWindow {
                    started_at: now,
                    attempts: 0,
                });
                info!(
                    misses = self.record.consecutive_misses,
                    grace_ms = self.config.grace_period.as_millis(),
                    "Beacon lost, grace period started"
                );
            }
            return None;
        };

        grace.attempts = grace.attempts.saturating_add(1);
        self.record.grace = Some(grace);

        if now.saturating_elapsed_since(grace.started_at) >= self.config.grace_period {
            Some(self.expire_grace(now, GraceExpiry::Elapsed))
        } else if grace.attempts >= self.config.grace_max_attempts {
            Some(self.expire_grace(now, GraceExpiry::AttemptsExhausted))
        } else {
            debug!(attempts = grace.attempts, "Grace period reconnect attempt missed");
            None
        }
    }

    fn expire_grace(&mut self, now: Timestamp, reason: GraceExpiry) -> PresenceEvent {
        let grace = self.record.grace.take();
        self.record.confirmed_present = false;
        info!(
            ?reason,
            attempts = grace.map_or(0, |g| g.attempts),
            "Grace period expired, absence confirmed"
        );
        PresenceEvent { present: false, at: now }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const SCAN: Duration = Duration::from_secs(2);

    fn config() -> DetectorConfig {
        DetectorConfig {
            confirm_scans: 2,
            confirm_absence_scans: 3,
            grace_period: Duration::from_millis(60_000),
            grace_max_attempts: 100,
            rssi_floor: Some(-80),
        }
    }

    fn sighting(clock: &ManualClock, rssi: i16) -> BeaconObservation {
        BeaconObservation {
            address: "51:00:25:04:02:A2".to_string(),
            rssi,
            timestamp: clock.now(),
        }
    }

    fn present_detector(clock: &ManualClock) -> PresenceDetector<ManualClock> {
        let mut detector = PresenceDetector::new(config(), clock.clone());
        let obs = sighting(clock, -60);
        detector.observe(Some(&obs));
        assert!(detector.observe(Some(&obs)).is_some());
        detector
    }

    #[test]
    fn test_two_qualifying_scans_confirm_presence() {
        let clock = ManualClock::new();
        let mut detector = PresenceDetector::new(config(), clock.clone());

        assert!(detector.observe(Some(&sighting(&clock, -60))).is_none());
        assert!(!detector.effective_presence());

        clock.advance(SCAN);
        let event = detector.observe(Some(&sighting(&clock, -60))).unwrap();

        assert!(event.present);
        assert_eq!(event.at, Timestamp::from_millis(2_000));
        assert_eq!(detector.state(), PresenceState::Present);
    }

    #[test]
    fn test_miss_between_detections_restarts_debounce() {
        let clock = ManualClock::new();
        let mut detector = PresenceDetector::new(config(), clock.clone());

        detector.observe(Some(&sighting(&clock, -60)));
        detector.observe(None);
        assert!(detector.observe(Some(&sighting(&clock, -60))).is_none());
        assert!(!detector.effective_presence());
        assert!(detector.observe(Some(&sighting(&clock, -60))).is_some());
    }

    #[test]
    fn test_weak_signal_counts_as_miss() {
        let clock = ManualClock::new();
        let mut detector = PresenceDetector::new(config(), clock.clone());

        for _ in 0..5 {
            assert!(detector.observe(Some(&sighting(&clock, -95))).is_none());
        }
        assert!(!detector.effective_presence());
        assert_eq!(detector.snapshot().consecutive_misses, 5);
    }

    #[test]
    fn test_threshold_disabled_accepts_any_rssi() {
        let clock = ManualClock::new();
        let mut detector = PresenceDetector::new(
            DetectorConfig {
                rssi_floor: None,
                ..config()
            },
            clock.clone(),
        );

        detector.observe(Some(&sighting(&clock, -110)));
        assert!(detector.observe(Some(&sighting(&clock, -110))).is_some());
    }

    #[test]
    fn test_repeated_detections_emit_no_further_events() {
        let clock = ManualClock::new();
        let mut detector = present_detector(&clock);

        for _ in 0..10 {
            clock.advance(SCAN);
            assert!(detector.observe(Some(&sighting(&clock, -50))).is_none());
        }
        assert!(detector.effective_presence());
    }

    #[test]
    fn test_grace_starts_after_absence_confirmation() {
        let clock = ManualClock::new();
        let mut detector = present_detector(&clock);

        detector.observe(None);
        detector.observe(None);
        assert!(!detector.is_in_grace_period());

        detector.observe(None);
        assert!(detector.is_in_grace_period());
        assert!(detector.effective_presence());
        assert_eq!(detector.state(), PresenceState::PresentGrace);
    }

    #[test]
    fn test_detection_during_grace_cancels_silently() {
        let clock = ManualClock::new();
        let mut detector = present_detector(&clock);

        for _ in 0..3 {
            assert!(detector.observe(None).is_none());
        }
        assert!(detector.is_in_grace_period());

        clock.advance(Duration::from_secs(5));
        assert!(detector.observe(Some(&sighting(&clock, -70))).is_none());

        assert!(!detector.is_in_grace_period());
        assert!(detector.effective_presence());
        assert_eq!(detector.state(), PresenceState::Present);
    }

    #[test]
    fn test_grace_expires_after_duration() {
        let clock = ManualClock::new();
        let mut detector = present_detector(&clock);

        for _ in 0..3 {
            detector.observe(None);
        }
        let mut events = Vec::new();
        for _ in 0..13 {
            clock.advance(Duration::from_secs(5));
            if let Some(event) = detector.observe(None) {
                events.push(event);
            }
        }

        assert_eq!(events.len(), 1);
        assert!(!events[0].present);
        assert_eq!(events[0].at, Timestamp::from_millis(60_000));
        assert!(!detector.effective_presence());
        assert!(!detector.is_in_grace_period());
    }

    #[test]
    fn test_grace_expires_after_attempts() {
        let clock = ManualClock::new();
        let mut detector = PresenceDetector::new(
            DetectorConfig {
                grace_max_attempts: 3,
                ..config()
            },
            clock.clone(),
        );
        let obs = sighting(&clock, -60);
        detector.observe(Some(&obs));
        detector.observe(Some(&obs));

        for _ in 0..3 {
            detector.observe(None);
        }
        assert!(detector.observe(None).is_none());
        assert!(detector.observe(None).is_none());
        let event = detector.observe(None).unwrap();

        assert!(!event.present);
        assert_eq!(clock.now(), Timestamp::ZERO);
    }

    #[test]
    fn test_poll_expires_grace_without_scans() {
        let clock = ManualClock::new();
        let mut detector = present_detector(&clock);
        for _ in 0..3 {
            detector.observe(None);
        }

        clock.advance(Duration::from_millis(59_999));
        assert!(detector.poll().is_none());
        assert_eq!(
            detector.grace_remaining(),
            Some(Duration::from_millis(1))
        );

        clock.advance(Duration::from_millis(1));
        assert!(!detector.poll().unwrap().present);
        assert!(detector.poll().is_none());
        assert_eq!(detector.snapshot().grace_attempts, 0);
    }

    #[test]
    fn test_away_stays_away_without_grace() {
        let clock = ManualClock::new();
        let mut detector = PresenceDetector::new(config(), clock.clone());

        for _ in 0..20 {
            clock.advance(SCAN);
            assert!(detector.observe(None).is_none());
            assert!(!detector.is_in_grace_period());
        }
        assert!(detector.poll().is_none());
    }

    #[test]
    fn test_grace_masks_presence_for_whole_window() {
        let clock = ManualClock::new();
        let mut detector = present_detector(&clock);
        for _ in 0..3 {
            detector.observe(None);
        }

        while detector.is_in_grace_period() {
            assert!(detector.effective_presence());
            clock.advance(Duration::from_secs(1));
            detector.poll();
        }
        assert!(!detector.effective_presence());
    }

    /// Deterministic pseudo-random observation streams checked against the
    /// debounce, grace-bound and one-event-per-flip rules.
    #[test]
    fn test_invariants_hold_over_random_sequences() {
        let mut seed: u64 = 0x5DEE_CE66;
        let mut next = move || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            seed >> 33
        };

        for _ in 0..200 {
            let clock = ManualClock::new();
            let cfg = DetectorConfig {
                grace_max_attempts: 6,
                grace_period: Duration::from_secs(20),
                ..config()
            };
            let mut detector = PresenceDetector::new(cfg.clone(), clock.clone());
            let mut run_hits = 0u32;
            let mut run_misses = 0u32;
            let mut grace_started: Option<Timestamp> = None;
            let mut reported = false;

            for _ in 0..120 {
                clock.advance(Duration::from_millis(1_000 + (next() % 4_000)));
                let hit = next() % 3 != 0;
                let before = detector.effective_presence();
                let obs = sighting(&clock, if hit { -60 } else { -90 });
                let event = detector.observe(Some(&obs));

                if hit {
                    run_hits += 1;
                    run_misses = 0;
                } else {
                    run_misses += 1;
                    run_hits = 0;
                }

                if let Some(event) = event {
                    assert_ne!(event.present, before, "event must flip presence");
                    reported = event.present;
                    if event.present {
                        assert!(run_hits >= cfg.confirm_scans);
                    }
                }
                assert_eq!(detector.effective_presence(), reported);

                match (grace_started, detector.is_in_grace_period()) {
                    (None, true) => {
                        assert!(run_misses >= cfg.confirm_absence_scans);
                        grace_started = Some(clock.now());
                    }
                    (Some(start), true) => {
                        let bound = cfg.grace_period.max(Duration::from_secs(5) * 6);
                        assert!(clock.now().saturating_elapsed_since(start) <= bound);
                    }
                    (Some(_), false) => grace_started = None,
                    (None, false) => {}
                }
            }
        }
    }
}
