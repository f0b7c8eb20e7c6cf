//! Lightbar configuration and per-tick device inputs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::color::Color;

/// Who drives the lightbar for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightRoutine {
    /// Colors are computed here every tick
    #[default]
    Animated,
    /// Something else owns the lightbar, nothing is written unless forced
    External,
}

/// Low battery flash behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashPattern {
    /// Hardware blink with a duty cycle taken from the battery level
    #[default]
    None,
    /// Software fade toward black
    Pulse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingPattern {
    #[default]
    None,
    Pulse,
    RainbowCycle,
    SolidColor,
}

/// Lightbar settings of one device profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightbarMode {
    pub routine: LightRoutine,

    pub use_custom_led: bool,
    pub custom_color: Color,

    pub main_color: Color,
    pub low_color: Color,
    pub flash_color: Color,
    pub charging_color: Color,

    /// Seconds per full rainbow turn, 0 disables the rainbow
    pub rainbow_period: f64,
    /// Saturation scale for the rainbow, 0.0..=1.0
    pub max_rainbow_saturation: f64,

    /// Battery percentage at or below which the low battery overlay kicks in
    pub flash_at: u8,
    pub flash_pattern: FlashPattern,
    pub charging_pattern: ChargingPattern,

    /// Color encodes battery level (or player slot) and fades out on idle
    pub battery_as_color: bool,
    /// Idle disconnect timeout in seconds, 0 disables the idle fade
    pub idle_disconnect_timeout: u32,

    /// Map rumble strength onto the lightbar as a proximity cue
    pub distance_profile: bool,
}

impl Default for LightbarMode {
    fn default() -> Self {
        Self {
            routine: LightRoutine::Animated,
            use_custom_led: false,
            custom_color: Color::BLACK,
            main_color: Color::new(0, 0, 255),
            low_color: Color::BLACK,
            flash_color: Color::BLACK,
            charging_color: Color::BLACK,
            rainbow_period: 0.0,
            max_rainbow_saturation: 1.0,
            flash_at: 0,
            flash_pattern: FlashPattern::None,
            charging_pattern: ChargingPattern::None,
            battery_as_color: false,
            idle_disconnect_timeout: 0,
            distance_profile: false,
        }
    }
}

/// How the physical controller is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[default]
    Usb,
    Bluetooth,
    Dongle,
}

/// Snapshot of the physical device read once per tick
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTelemetry {
    /// 0..=100
    pub battery_percent: u8,
    pub charging: bool,
    pub connection: ConnectionType,
    pub last_active: DateTime<Utc>,
    /// Heavy (left) motor strength
    pub rumble: u8,
    /// Flash-on duration the device currently runs with
    pub current_flash_on: u8,
}

impl DeviceTelemetry {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            battery_percent: 100,
            charging: false,
            connection: ConnectionType::Usb,
            last_active: now,
            rumble: 0,
            current_flash_on: 0,
        }
    }
}

/// Lightbar state to push to the device.
///
/// Flash durations are in device units of 40ms. Both zero means steady on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightbarOutput {
    pub color: Color,
    pub flash_on: u8,
    pub flash_off: u8,
    pub explicitly_off: bool,
}
