//! Per-device animation timing
//!
//! [`AnimationClock`] is a restartable stopwatch driven by caller supplied
//! timestamps. Each restart flips its direction so consecutive pulses ramp
//! up, then down, then up again. [`AnimationState`] bundles the clock with
//! the rainbow hue counter owned by one device slot.

use chrono::{DateTime, TimeDelta, Utc};

/// Hue counter range. The counter is tracked in degrees but only wraps after
/// 500 full turns so sub-degree steps accumulate without drift.
pub const HUE_COUNTER_LIMIT: f64 = 180_000.0;

/// Minimum gap between two rainbow samples
const RAINBOW_SAMPLE_INTERVAL: TimeDelta = TimeDelta::milliseconds(10);

/// Device lightbar timing unit in milliseconds
const PULSE_TICK_MS: i64 = 40;

/// Shape of one pulse ramp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseProfile {
    pub cycle_ms: i64,
    pub segments: i64,
}

/// Low battery pulse: 2s ramps in 50 steps
pub const FLASH_PULSE: PulseProfile = PulseProfile {
    cycle_ms: 2000,
    segments: 2000 / PULSE_TICK_MS,
};

/// Charging pulse: 4s ramps. Two segments are dropped so the last tick
/// before the cycle ends already reaches the end value.
pub const CHARGING_PULSE: PulseProfile = PulseProfile {
    cycle_ms: 4000,
    segments: 4000 / PULSE_TICK_MS - 2,
};

#[derive(Debug, Clone, Default)]
pub struct AnimationClock {
    started_at: Option<DateTime<Utc>>,
    ascending: bool,
}

impl AnimationClock {
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_ascending(&self) -> bool {
        self.ascending
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }

    /// Restarts from zero and flips the ramp direction
    pub fn restart(&mut self, now: DateTime<Utc>) {
        self.ascending = !self.ascending;
        self.started_at = Some(now);
    }

    /// Milliseconds since the last (re)start, 0 when stopped or if time went backwards
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        self.started_at
            .map(|start| now.signed_duration_since(start).num_milliseconds().max(0))
            .unwrap_or(0)
    }

    /// Current pulse ratio in percent for the given profile.
    ///
    /// Elapsed time is quantized to whole 40ms steps first, so the ratio
    /// moves in a staircase rather than a smooth line.
    pub fn pulse_ratio(&mut self, profile: &PulseProfile, now: DateTime<Utc>) -> f64 {
        if !self.is_running() {
            let was_ascending = self.ascending;
            self.restart(now);
            return if was_ascending { 100.0 } else { 0.0 };
        }

        let elapsed = self.elapsed_ms(now);
        if elapsed >= profile.cycle_ms {
            self.stop();
            return if self.ascending { 100.0 } else { 0.0 };
        }

        let steps = (elapsed / PULSE_TICK_MS).min(profile.segments);
        let progress = steps as f64 / profile.segments as f64;
        if self.ascending {
            100.0 * progress
        } else {
            -100.0 * progress + 100.0
        }
    }
}

/// Mutable animation state owned by one device slot
#[derive(Debug, Clone, Default)]
pub struct AnimationState {
    hue_counter: f64,
    pub fade: AnimationClock,
    last_sample: Option<DateTime<Utc>>,
}

impl AnimationState {
    pub fn hue_counter(&self) -> f64 {
        self.hue_counter
    }

    /// Hue in degrees derived from the counter
    pub fn hue(&self) -> f32 {
        (self.hue_counter % 360.0) as f32
    }

    /// Moves the counter by `delta` degrees, wrapping inside the counter range
    pub fn shift_hue(&mut self, delta: f64) {
        let next = (self.hue_counter + delta).rem_euclid(HUE_COUNTER_LIMIT);
        self.hue_counter = if next.is_finite() && next < HUE_COUNTER_LIMIT {
            next
        } else {
            0.0
        };
    }

    /// Advances the rainbow by the time since the previous sample.
    ///
    /// `period_secs` is the time for one full turn. Samples closer than 10ms
    /// together are skipped and the time carries over to the next one.
    /// The first call only records the sample time.
    pub fn advance_rainbow(&mut self, now: DateTime<Utc>, period_secs: f64, reverse: bool) {
        let Some(last) = self.last_sample else {
            self.last_sample = Some(now);
            return;
        };

        let since = now.signed_duration_since(last);
        if since < RAINBOW_SAMPLE_INTERVAL {
            return;
        }

        self.last_sample = Some(now);
        let step = 360.0 * (since.num_milliseconds() as f64 / 1000.0 / period_secs);
        if reverse {
            self.shift_hue(-step);
        } else {
            self.shift_hue(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        t0() + TimeDelta::milliseconds(ms)
    }

    fn assert_ratio(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "ratio {actual} != {expected}"
        );
    }

    #[test]
    fn first_pulse_starts_ascending_from_zero() {
        let mut clock = AnimationClock::default();
        assert_ratio(clock.pulse_ratio(&FLASH_PULSE, at(0)), 0.0);
        assert!(clock.is_running());
        assert!(clock.is_ascending());
    }

    #[test]
    fn start_keeps_a_running_clock() {
        let mut clock = AnimationClock::default();
        clock.start(at(100));
        clock.start(at(500));
        assert_eq!(clock.elapsed_ms(at(600)), 500);
        assert_eq!(clock.elapsed_ms(at(0)), 0);

        clock.stop();
        assert_eq!(clock.elapsed_ms(at(600)), 0);
    }

    #[test]
    fn flash_pulse_is_a_staircase() {
        let mut clock = AnimationClock::default();
        clock.pulse_ratio(&FLASH_PULSE, at(0));

        // 39ms is still step 0, 40ms is step 1 of 50
        assert_ratio(clock.pulse_ratio(&FLASH_PULSE, at(39)), 0.0);
        assert_ratio(clock.pulse_ratio(&FLASH_PULSE, at(40)), 2.0);
        assert_ratio(clock.pulse_ratio(&FLASH_PULSE, at(1000)), 50.0);
        assert_ratio(clock.pulse_ratio(&FLASH_PULSE, at(1999)), 98.0);
    }

    #[test]
    fn finished_cycle_stops_and_next_ramp_descends() {
        let mut clock = AnimationClock::default();
        clock.pulse_ratio(&FLASH_PULSE, at(0));
        assert_ratio(clock.pulse_ratio(&FLASH_PULSE, at(2000)), 100.0);
        assert!(!clock.is_running());

        assert_ratio(clock.pulse_ratio(&FLASH_PULSE, at(2010)), 100.0);
        assert!(!clock.is_ascending());
        assert_ratio(clock.pulse_ratio(&FLASH_PULSE, at(3010)), 50.0);
        assert_ratio(clock.pulse_ratio(&FLASH_PULSE, at(4010)), 0.0);
    }

    #[test]
    fn charging_pulse_clamps_to_segment_count() {
        let mut clock = AnimationClock::default();
        clock.pulse_ratio(&CHARGING_PULSE, at(0));
        assert_eq!(CHARGING_PULSE.segments, 98);
        assert_ratio(clock.pulse_ratio(&CHARGING_PULSE, at(3999)), 100.0);
        assert_ratio(clock.pulse_ratio(&CHARGING_PULSE, at(1960)), 50.0);
    }

    #[test]
    fn rainbow_samples_at_ten_ms_granularity() {
        let mut state = AnimationState::default();
        state.advance_rainbow(at(0), 1.0, false);
        assert_eq!(state.hue_counter(), 0.0);

        state.advance_rainbow(at(5), 1.0, false);
        assert_eq!(state.hue_counter(), 0.0);

        state.advance_rainbow(at(250), 1.0, false);
        assert!((state.hue_counter() - 90.0).abs() < 1e-9);
        assert!((state.hue() - 90.0).abs() < 1e-4);
    }

    #[test]
    fn reversed_rainbow_wraps_below_zero() {
        let mut state = AnimationState::default();
        state.advance_rainbow(at(0), 2.0, true);
        state.advance_rainbow(at(500), 2.0, true);
        assert!((state.hue_counter() - (HUE_COUNTER_LIMIT - 90.0)).abs() < 1e-6);
        assert!((state.hue() - 270.0).abs() < 1e-3);
    }

    #[test]
    fn hue_counter_stays_in_range() {
        let mut state = AnimationState::default();
        state.shift_hue(HUE_COUNTER_LIMIT + 10.0);
        assert!((state.hue_counter() - 10.0).abs() < 1e-9);
        state.shift_hue(-1e-20);
        assert!(state.hue_counter() < HUE_COUNTER_LIMIT);
    }
}
