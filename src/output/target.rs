//! Virtual bus capability
//!
//! The adapter never talks to a bus driver directly. A [`VirtualBus`] hands
//! out [`VirtualTarget`]s, and everything the adapter does to the emulated
//! pad goes through that trait. Tests and the demo binary use the in-process
//! [`LoopbackBus`](super::loopback::LoopbackBus).

use std::sync::Arc;

use super::codec::{StickAxis, Trigger};
use super::error::TargetError;

/// Rumble and LED command sent back by the host to the emulated pad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedbackEvent {
    pub large_motor: u8,
    pub small_motor: u8,
    pub led_number: u8,
}

pub type FeedbackCallback = Arc<dyn Fn(FeedbackEvent) + Send + Sync>;

/// Handle returned by [`VirtualTarget::subscribe_feedback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedbackToken(pub u64);

/// USB ids the emulated pad should present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetIds {
    pub vendor_id: u16,
    pub product_id: u16,
}

pub trait VirtualBus {
    /// Creates a new, not yet connected, Xbox 360 target
    fn create_x360(&self, ids: Option<TargetIds>) -> Result<Box<dyn VirtualTarget>, TargetError>;
}

/// One emulated Xbox 360 pad.
///
/// Report setters only stage values; nothing reaches the host until
/// [`submit_report`](VirtualTarget::submit_report).
pub trait VirtualTarget: Send {
    fn connect(&mut self) -> Result<(), TargetError>;

    fn disconnect(&mut self) -> Result<(), TargetError>;

    fn set_buttons(&mut self, buttons: u16);

    fn set_axis(&mut self, axis: StickAxis, value: i16);

    fn set_trigger(&mut self, trigger: Trigger, value: u8);

    /// Zeroes the staged report
    fn reset_report(&mut self);

    fn submit_report(&mut self) -> Result<(), TargetError>;

    /// XInput user index the host assigned to this pad
    fn user_index(&mut self) -> Result<i32, TargetError>;

    fn subscribe_feedback(&mut self, callback: FeedbackCallback) -> FeedbackToken;

    fn unsubscribe_feedback(&mut self, token: FeedbackToken);
}
