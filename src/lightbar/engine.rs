//! Per-tick lightbar computation
//!
//! The engine walks an ordered pipeline for one device and returns the
//! color and flash pattern to push, or `None` when nothing should be written.
//!
//! # Pipeline
//!
//! ```text
//! forced? ──► forced color ─────────────────────────┐
//! shutdown? ──► black ──────────────────────────────┤
//! default light? ──► idle color by transport ───────┤
//! animated ──► base color ──► low battery ──► idle  │
//!                  fade ──► charging overlay ───────┤
//!                                                   ▼
//!                          distance blend ──► flash durations ──► fixup
//! ```
//!
//! A device whose routine is external gets no write at all unless it is
//! forced or the process is shutting down.
//!
//! Nothing in here fails. Out-of-range inputs end up clamped by the
//! arithmetic and an unknown device index just yields `None`.

use chrono::{DateTime, Utc};
use tracing::trace;

use super::clock::{AnimationState, CHARGING_PULSE, FLASH_PULSE};
use super::color::{hue_to_color, transition, Color};
use super::mode::{
    ChargingPattern, ConnectionType, DeviceTelemetry, FlashPattern, LightRoutine, LightbarMode,
    LightbarOutput,
};
use crate::slots::{DeviceSlot, DeviceSlotRegistry};

/// On/off flash durations indexed by battery tens. The last row is steady on
/// and covers full or charging devices.
const BATTERY_INDICATOR_DURATIONS: [(u8, u8); 11] = [
    (28, 252), // on 10% of the time at 0
    (28, 252),
    (56, 224),
    (84, 196),
    (112, 168),
    (140, 140),
    (168, 112),
    (196, 84),
    (224, 56),
    (252, 28), // on 90% of the time at 90
    (0, 0),
];

/// Hue step per tick of the rainbow charging pattern, in degrees
const CHARGING_RAINBOW_STEP: f64 = 0.167;

/// How far the distance profile's resting yellow leans toward red, in percent
const DISTANCE_RED_SHIFT: f64 = 39.6078;

const BLUETOOTH_IDLE_COLOR: Color = Color::new(32, 64, 64);

/// Lightbar engine shared by every device slot.
///
/// Holds the two process-wide switches; all per-device state lives in the
/// [`DeviceSlotRegistry`].
#[derive(Debug, Clone, Default)]
pub struct LightbarEngine {
    default_light: bool,
    shutting_down: bool,
}

impl LightbarEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces every animated device to its plain idle color
    pub fn set_default_light(&mut self, enabled: bool) {
        self.default_light = enabled;
    }

    /// Switches every device without a forced color to black
    pub fn begin_shutdown(&mut self) {
        self.shutting_down = true;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Computes the lightbar output of device `device` for this tick
    pub fn compute_output(
        &self,
        registry: &mut DeviceSlotRegistry,
        device: usize,
        telemetry: &DeviceTelemetry,
        mode: &LightbarMode,
        now: DateTime<Utc>,
    ) -> Option<LightbarOutput> {
        let slot = registry.get_mut(device)?;
        self.compute_for_slot(slot, telemetry, mode, now)
    }

    pub fn compute_for_slot(
        &self,
        slot: &mut DeviceSlot,
        telemetry: &DeviceTelemetry,
        mode: &LightbarMode,
        now: DateTime<Utc>,
    ) -> Option<LightbarOutput> {
        let animated = mode.routine == LightRoutine::Animated;

        let color = if slot.force_light {
            slot.forced_color
        } else if self.shutting_down {
            Color::BLACK
        } else if animated && self.default_light {
            idle_color(telemetry.connection)
        } else if animated {
            self.animated_color(slot, telemetry, mode, now)
        } else {
            trace!("Lightbar routine inactive, skipping write");
            return None;
        };

        let distance = mode.distance_profile || slot.temp_distance_profile;
        let color = if distance && !self.default_light {
            distance_blend(color, telemetry.rumble)
        } else {
            color
        };

        let mut output = self.flash_durations(color, slot, telemetry, mode, distance);
        apply_duration_fixup(&mut output, telemetry.current_flash_on);
        Some(output)
    }

    fn animated_color(
        &self,
        slot: &mut DeviceSlot,
        telemetry: &DeviceTelemetry,
        mode: &LightbarMode,
        now: DateTime<Utc>,
    ) -> Color {
        let battery = telemetry.battery_percent;
        let charging = telemetry.charging;

        let mut color = if mode.use_custom_led {
            mode.custom_color
        } else if mode.rainbow_period > 0.0 {
            rainbow_color(&mut slot.animation, telemetry, mode, now)
        } else if mode.battery_as_color {
            slot.player_slot()
                .and_then(player_slot_color)
                .unwrap_or(mode.main_color)
        } else {
            mode.main_color
        };

        if battery <= mode.flash_at && !charging {
            if mode.flash_color.is_set() {
                color = mode.flash_color;
            }

            if mode.flash_pattern == FlashPattern::Pulse {
                let ratio = slot.animation.fade.pulse_ratio(&FLASH_PULSE, now);
                color = transition(color, Color::BLACK, ratio);
            }
        }

        if mode.idle_disconnect_timeout > 0 && mode.battery_as_color && (!charging || battery >= 100)
        {
            let idle_ms = now
                .signed_duration_since(telemetry.last_active)
                .num_milliseconds() as f64;
            let timeout_ms = f64::from(mode.idle_disconnect_timeout) * 1000.0;
            color = idle_fade(color, 100.0 * (idle_ms / timeout_ms));
        }

        if charging && battery < 100 {
            match mode.charging_pattern {
                ChargingPattern::Pulse => {
                    let ratio = slot.animation.fade.pulse_ratio(&CHARGING_PULSE, now);
                    color = transition(color, Color::BLACK, ratio);
                }
                ChargingPattern::RainbowCycle => {
                    slot.animation.shift_hue(CHARGING_RAINBOW_STEP);
                    color = hue_to_color(slot.animation.hue(), 255);
                }
                ChargingPattern::SolidColor => color = mode.charging_color,
                ChargingPattern::None => {}
            }
        }

        color
    }

    fn flash_durations(
        &self,
        color: Color,
        slot: &DeviceSlot,
        telemetry: &DeviceTelemetry,
        mode: &LightbarMode,
        distance: bool,
    ) -> LightbarOutput {
        let mut output = LightbarOutput {
            color,
            flash_on: 0,
            flash_off: 0,
            explicitly_off: true,
        };

        if !color.is_set() {
            return output;
        }

        let battery = telemetry.battery_percent;
        if slot.force_light && slot.forced_flash > 0 {
            let duration = 25u8.saturating_sub(slot.forced_flash);
            output.flash_on = duration;
            output.flash_off = duration;
        } else if battery <= mode.flash_at
            && mode.flash_pattern == FlashPattern::None
            && !self.default_light
            && !telemetry.charging
        {
            let (on, off) = battery_indicator_durations(battery);
            output.flash_on = on;
            output.flash_off = off;
            output.explicitly_off = false;
        } else if distance && telemetry.rumble > 155 {
            let duration = (265 - u16::from(telemetry.rumble)) as u8;
            output.flash_on = duration;
            output.flash_off = duration;
        }

        output
    }
}

/// Color of an animated device while the default light is on
fn idle_color(connection: ConnectionType) -> Color {
    match connection {
        ConnectionType::Bluetooth => BLUETOOTH_IDLE_COLOR,
        ConnectionType::Usb | ConnectionType::Dongle => Color::BLACK,
    }
}

fn rainbow_color(
    animation: &mut AnimationState,
    telemetry: &DeviceTelemetry,
    mode: &LightbarMode,
    now: DateTime<Utc>,
) -> Color {
    animation.advance_rainbow(now, mode.rainbow_period, telemetry.charging);

    let max_sat = if mode.max_rainbow_saturation.is_nan() {
        1.0
    } else {
        mode.max_rainbow_saturation.clamp(0.0, 1.0)
    };
    let sat = if mode.battery_as_color {
        f64::from(telemetry.battery_percent) * 2.55 * max_sat
    } else {
        255.0 * max_sat
    };

    hue_to_color(animation.hue(), sat as u8)
}

/// Fixed palette for player slots 1 to 8
pub fn player_slot_color(slot: u8) -> Option<Color> {
    let color = match slot {
        1 => Color::new(255, 0, 0),
        2 => Color::new(0, 0, 255),
        3 => Color::new(0, 255, 0),
        4 => Color::new(255, 0, 255),
        5 => Color::new(255, 255, 0),
        6 => Color::new(255, 150, 0),
        7 => Color::new(0, 255, 255),
        8 => Color::new(150, 150, 150),
        _ => return None,
    };
    Some(color)
}

/// Fades `color` toward black by how far into the idle timeout the device is.
///
/// Nothing happens below 50%. Between 50% and 100% the fade follows an
/// ease-out quadratic, from 100% on the light is off.
pub fn idle_fade(color: Color, ratio: f64) -> Color {
    if (50.0..100.0).contains(&ratio) {
        let t = 0.02 * (ratio - 50.0);
        let fade = (-100.0 * t * (t - 2.0)) as u32;
        transition(color, Color::BLACK, f64::from(fade))
    } else if ratio >= 100.0 {
        transition(color, Color::BLACK, 100.0)
    } else {
        color
    }
}

/// Blends rumble strength into the color: neutral, then yellow, then red.
pub fn distance_blend(color: Color, rumble: u8) -> Color {
    let rumble_pct = f64::from(f32::from(rumble) / 2.55);
    let max = color.max_channel();
    let yellow = Color::new(max, max, 0);

    if rumble > 100 {
        transition(yellow, Color::RED, rumble_pct)
    } else {
        let shifted = transition(yellow, Color::RED, DISTANCE_RED_SHIFT);
        transition(color, shifted, f64::from(rumble))
    }
}

/// Hardware blink pattern for a low battery, by battery tens
pub fn battery_indicator_durations(battery_percent: u8) -> (u8, u8) {
    let level = usize::from(battery_percent / 10).min(BATTERY_INDICATOR_DURATIONS.len() - 1);
    BATTERY_INDICATOR_DURATIONS[level]
}

/// Some firmware ignores a literal 0 as "stop flashing" while a blink is
/// running, so 1/1 is sent instead.
fn apply_duration_fixup(output: &mut LightbarOutput, reported_on: u8) {
    if reported_on != output.flash_on && reported_on != 1 && output.flash_on == 0 {
        output.flash_on = 1;
        output.flash_off = 1;
    }
}
