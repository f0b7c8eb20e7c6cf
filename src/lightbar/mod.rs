//! Lightbar subsystem
//!
//! 1. [`color`] - hue conversion and color blending
//! 2. [`clock`] - per-device pulse timing and rainbow hue counter
//! 3. [`mode`] - profile settings and per-tick device telemetry
//! 4. [`engine`] - the per-tick color and flash pipeline
//!
//! # Data flow
//!
//! ```text
//! DeviceTelemetry ──┐
//! LightbarMode ─────┼──► LightbarEngine ──► LightbarOutput
//! DeviceSlot ───────┘        (per tick)
//! ```

pub mod clock;
pub mod color;
pub mod engine;
pub mod mode;

pub use clock::{AnimationClock, AnimationState};
pub use color::{hue_to_color, transition, Color};
pub use engine::LightbarEngine;
pub use mode::{
    ChargingPattern, ConnectionType, DeviceTelemetry, FlashPattern, LightRoutine, LightbarMode,
    LightbarOutput,
};
