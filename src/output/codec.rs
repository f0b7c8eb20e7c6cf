//! DS4 controller state to Xbox 360 report encoding
//!
//! Buttons are OR'd into the X360 16-bit mask, triggers pass through and the
//! 8-bit sticks are stretched onto the signed 16-bit X360 range. An optional
//! [`AxisOverride`] lets the steering emulation replace one axis or drive
//! the triggers instead.

use serde::{Deserialize, Serialize};
use std::fmt;

const RECIP_INPUT_POS_RESOLUTION: f32 = 1.0 / 127.0;
const RECIP_INPUT_NEG_RESOLUTION: f32 = 1.0 / 128.0;
const OUTPUT_RESOLUTION: f32 = 32767.0 - (-32768.0);
const AXIS_CENTER: i32 = 0x80;

/// X360 wire button bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum X360Button {
    Up = 0x0001,
    Down = 0x0002,
    Left = 0x0004,
    Right = 0x0008,
    Start = 0x0010,
    Back = 0x0020,
    LeftThumb = 0x0040,
    RightThumb = 0x0080,
    LeftShoulder = 0x0100,
    RightShoulder = 0x0200,
    Guide = 0x0400,
    A = 0x1000,
    B = 0x2000,
    X = 0x4000,
    Y = 0x8000,
}

impl X360Button {
    pub const fn bit(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StickAxis {
    LeftX,
    LeftY,
    RightX,
    RightY,
}

impl StickAxis {
    pub const ALL: [StickAxis; 4] = [
        StickAxis::LeftX,
        StickAxis::LeftY,
        StickAxis::RightX,
        StickAxis::RightY,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Left,
    Right,
}

/// Normalized DS4 input state for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerState {
    pub cross: bool,
    pub circle: bool,
    pub square: bool,
    pub triangle: bool,
    pub l1: bool,
    pub r1: bool,
    pub l3: bool,
    pub r3: bool,
    pub share: bool,
    pub options: bool,
    pub ps: bool,
    pub dpad_up: bool,
    pub dpad_down: bool,
    pub dpad_left: bool,
    pub dpad_right: bool,

    /// Sticks, 128 is centered
    pub lx: u8,
    pub ly: u8,
    pub rx: u8,
    pub ry: u8,

    pub l2: u8,
    pub r2: u8,

    /// Output of the steering wheel emulation, consumed by [`AxisOverride`]
    pub steering_unit: i32,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            cross: false,
            circle: false,
            square: false,
            triangle: false,
            l1: false,
            r1: false,
            l3: false,
            r3: false,
            share: false,
            options: false,
            ps: false,
            dpad_up: false,
            dpad_down: false,
            dpad_left: false,
            dpad_right: false,
            lx: 128,
            ly: 128,
            rx: 128,
            ry: 128,
            l2: 0,
            r2: 0,
            steering_unit: 0,
        }
    }
}

/// One X360 input report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputReport {
    pub buttons: u16,
    pub left_thumb_x: i16,
    pub left_thumb_y: i16,
    pub right_thumb_x: i16,
    pub right_thumb_y: i16,
    pub left_trigger: u8,
    pub right_trigger: u8,
}

impl OutputReport {
    pub fn axis(&self, axis: StickAxis) -> i16 {
        match axis {
            StickAxis::LeftX => self.left_thumb_x,
            StickAxis::LeftY => self.left_thumb_y,
            StickAxis::RightX => self.right_thumb_x,
            StickAxis::RightY => self.right_thumb_y,
        }
    }

    pub fn set_axis(&mut self, axis: StickAxis, value: i16) {
        match axis {
            StickAxis::LeftX => self.left_thumb_x = value,
            StickAxis::LeftY => self.left_thumb_y = value,
            StickAxis::RightX => self.right_thumb_x = value,
            StickAxis::RightY => self.right_thumb_y = value,
        }
    }
}

/// Where the steering emulation output goes.
///
/// Parsed from config strings; anything unknown falls back to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AxisOverride {
    #[default]
    None,
    Axis(StickAxis),
    /// Positive values drive the left trigger, negative ones the right trigger
    TriggerSplit,
}

impl From<&str> for AxisOverride {
    fn from(selector: &str) -> Self {
        match selector.trim().to_ascii_lowercase().as_str() {
            "lx" => AxisOverride::Axis(StickAxis::LeftX),
            "ly" => AxisOverride::Axis(StickAxis::LeftY),
            "rx" => AxisOverride::Axis(StickAxis::RightX),
            "ry" => AxisOverride::Axis(StickAxis::RightY),
            "l2r2" => AxisOverride::TriggerSplit,
            _ => AxisOverride::None,
        }
    }
}

impl From<String> for AxisOverride {
    fn from(selector: String) -> Self {
        AxisOverride::from(selector.as_str())
    }
}

impl fmt::Display for AxisOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AxisOverride::None => "none",
            AxisOverride::Axis(StickAxis::LeftX) => "lx",
            AxisOverride::Axis(StickAxis::LeftY) => "ly",
            AxisOverride::Axis(StickAxis::RightX) => "rx",
            AxisOverride::Axis(StickAxis::RightY) => "ry",
            AxisOverride::TriggerSplit => "l2r2",
        };
        f.write_str(name)
    }
}

impl From<AxisOverride> for String {
    fn from(value: AxisOverride) -> Self {
        value.to_string()
    }
}

/// Encodes a controller snapshot into an X360 report
pub fn encode(state: &ControllerState, axis_override: AxisOverride) -> OutputReport {
    let mut report = OutputReport {
        buttons: pack_buttons(state),
        left_thumb_x: scale_axis(state.lx, false),
        left_thumb_y: scale_axis(state.ly, true),
        right_thumb_x: scale_axis(state.rx, false),
        right_thumb_y: scale_axis(state.ry, true),
        left_trigger: state.l2,
        right_trigger: state.r2,
    };

    match axis_override {
        AxisOverride::None => {}
        AxisOverride::Axis(axis) => {
            let unit = state
                .steering_unit
                .clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
            report.set_axis(axis, unit);
        }
        AxisOverride::TriggerSplit => {
            report.left_trigger = 0;
            report.right_trigger = 0;
            let magnitude = state.steering_unit.unsigned_abs().min(u32::from(u8::MAX)) as u8;
            if state.steering_unit >= 0 {
                report.left_trigger = magnitude;
            } else {
                report.right_trigger = magnitude;
            }
        }
    }

    report
}

pub fn pack_buttons(state: &ControllerState) -> u16 {
    let table = [
        (state.share, X360Button::Back),
        (state.l3, X360Button::LeftThumb),
        (state.r3, X360Button::RightThumb),
        (state.options, X360Button::Start),
        (state.dpad_up, X360Button::Up),
        (state.dpad_right, X360Button::Right),
        (state.dpad_down, X360Button::Down),
        (state.dpad_left, X360Button::Left),
        (state.l1, X360Button::LeftShoulder),
        (state.r1, X360Button::RightShoulder),
        (state.triangle, X360Button::Y),
        (state.circle, X360Button::B),
        (state.cross, X360Button::A),
        (state.square, X360Button::X),
        (state.ps, X360Button::Guide),
    ];

    table
        .iter()
        .filter(|(pressed, _)| *pressed)
        .fold(0u16, |mask, (_, button)| mask | button.bit())
}

/// Maps an 8-bit stick value onto the signed 16-bit X360 range.
///
/// The negative half has one more step than the positive half, so each
/// side gets its own reciprocal. Vertical axes are flipped because DS4 Y
/// grows downward.
pub fn scale_axis(raw: u8, flip: bool) -> i16 {
    let centered = i32::from(raw) - AXIS_CENTER;
    let recip = if centered >= 0 {
        RECIP_INPUT_POS_RESOLUTION
    } else {
        RECIP_INPUT_NEG_RESOLUTION
    };

    let mut unit = centered as f32 * recip;
    if flip {
        unit = -unit;
    }
    let normalized = (unit + 1.0) * 0.5;

    (normalized * OUTPUT_RESOLUTION + (-32768.0)).round() as i16
}
