//! Output device adapter with a statum state machine for the target link
//!
//! Owns one emulated Xbox 360 pad and pushes encoded controller state to it.
//! The link lifecycle is typed with statum so a report can only be submitted
//! through a connected link; the adapter wraps it so callers get the
//! forgiving runtime behaviour a tick loop needs (submitting while
//! disconnected is a silent no-op, disconnect is idempotent).
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!                      │              │
//!                      └──────────────┴──► Disconnected (released)
//! ```
//!
//! A target that refuses to connect leaves the link Disconnected.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use statum::{machine, state};
use tracing::{debug, error, info, warn};

use super::codec::{encode, AxisOverride, ControllerState, OutputReport, StickAxis, Trigger};
use super::error::{AdapterError, TargetError};
use super::target::{FeedbackCallback, FeedbackToken, TargetIds, VirtualBus, VirtualTarget};

/// Settle time before the host has a user index ready for a fresh pad
const USER_INDEX_WAIT: Duration = Duration::from_millis(250);

/// Slot number while none is known
pub const SLOT_NUMBER_DEFAULT: i32 = -1;
const MAX_SLOT_NUMBER: i32 = 8;

pub const DEVICE_TYPE: &str = "X360";

/// Optional capabilities of the emulated pad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct X360Features {
    /// Query the XInput slot number after connecting
    pub slot_number: bool,
}

/// Per-slot target settings from the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetOptions {
    pub report_slot_number: bool,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            report_slot_number: true,
            vendor_id: None,
            product_id: None,
        }
    }
}

impl TargetOptions {
    pub fn features(&self) -> X360Features {
        X360Features {
            slot_number: self.report_slot_number,
        }
    }

    /// Custom ids, only when both halves are configured
    pub fn ids(&self) -> Option<TargetIds> {
        match (self.vendor_id, self.product_id) {
            (Some(vendor_id), Some(product_id)) => Some(TargetIds {
                vendor_id,
                product_id,
            }),
            _ => None,
        }
    }
}

/// Observable connection state of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// States of the target link using statum
#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Link to one virtual target with compile-time state safety via statum
#[machine]
pub struct TargetLink<S: LinkState> {
    target: Box<dyn VirtualTarget>,
    features: X360Features,
    slot_number: i32,
    feedbacks: HashMap<usize, FeedbackToken>,
}

impl<S: LinkState> TargetLink<S> {
    pub fn features(&self) -> X360Features {
        self.features
    }

    pub fn slot_number(&self) -> i32 {
        self.slot_number
    }

    /// Stores the slot number if it is a valid XInput slot
    pub fn set_slot_number(&mut self, slot: i32) {
        if (0..MAX_SLOT_NUMBER).contains(&slot) {
            self.slot_number = slot;
        }
    }

    pub fn register_feedback(&mut self, index: usize, callback: FeedbackCallback) {
        let token = self.target.subscribe_feedback(callback);
        if let Some(previous) = self.feedbacks.insert(index, token) {
            debug!("Replacing feedback handler for input {}", index);
            self.target.unsubscribe_feedback(previous);
        }
    }

    pub fn unregister_feedback(&mut self, index: usize) {
        if let Some(token) = self.feedbacks.remove(&index) {
            self.target.unsubscribe_feedback(token);
        }
    }

    pub fn unregister_all_feedback(&mut self) {
        for (_, token) in self.feedbacks.drain() {
            self.target.unsubscribe_feedback(token);
        }
    }

    pub fn feedback_count(&self) -> usize {
        self.feedbacks.len()
    }

    pub fn reset_report(&mut self) {
        self.target.reset_report();
    }
}

impl TargetLink<Disconnected> {
    pub fn create(target: Box<dyn VirtualTarget>, features: X360Features) -> Self {
        Self::new(target, features, SLOT_NUMBER_DEFAULT, HashMap::new())
    }

    /// Plugs the pad into the bus. On failure the link stays disconnected
    /// and is handed back with the error.
    pub fn begin_connect(mut self) -> Result<TargetLink<Connecting>, (Self, TargetError)> {
        match self.target.connect() {
            Ok(()) => Ok(self.transition()),
            Err(e) => Err((self, e)),
        }
    }
}

impl TargetLink<Connecting> {
    /// The host needs [`USER_INDEX_WAIT`] before the slot number can be read
    pub fn wants_slot_number(&self) -> bool {
        self.features.slot_number
    }

    /// Finishes connecting, reading the slot number if the feature is on.
    ///
    /// A failed query turns the feature off for the rest of the session.
    pub fn acquire_slot_number(mut self) -> TargetLink<Connected> {
        if self.features.slot_number {
            match self.target.user_index() {
                Ok(index) => {
                    self.set_slot_number(index);
                    debug!("Target reported user index {}", index);
                }
                Err(e) => {
                    warn!("Failed to read slot number, disabling feature: {}", e);
                    self.slot_number = SLOT_NUMBER_DEFAULT;
                    self.features.slot_number = false;
                }
            }
        }
        self.transition()
    }

    /// Backs out of a connect that never finished
    pub fn disconnect(mut self) -> TargetLink<Disconnected> {
        self.unregister_all_feedback();
        if let Err(e) = self.target.disconnect() {
            warn!("Target disconnect reported an error: {}", e);
        }
        self.transition()
    }
}

impl TargetLink<Connected> {
    pub fn submit(&mut self, report: &OutputReport) {
        self.target.set_buttons(report.buttons);
        for axis in StickAxis::ALL {
            self.target.set_axis(axis, report.axis(axis));
        }
        self.target.set_trigger(Trigger::Left, report.left_trigger);
        self.target.set_trigger(Trigger::Right, report.right_trigger);
        self.submit_staged();
    }

    pub fn submit_staged(&mut self) {
        if let Err(e) = self.target.submit_report() {
            warn!("Failed to submit report: {}", e);
        }
    }

    /// Repeated connect on a live link, the target decides what that means
    pub fn reconnect(&mut self) -> Result<(), TargetError> {
        self.target.connect()
    }

    pub fn disconnect(mut self) -> TargetLink<Disconnected> {
        self.unregister_all_feedback();
        if let Err(e) = self.target.disconnect() {
            warn!("Target disconnect reported an error: {}", e);
        }
        self.transition()
    }
}

enum Link {
    Idle(TargetLink<Disconnected>),
    /// Plugged in, still settling. Kept here across the wait so a dropped
    /// connect future leaves something `connect` or `disconnect` can finish.
    Connecting(TargetLink<Connecting>),
    Live(TargetLink<Connected>),
    Released,
}

/// Runtime wrapper around [`TargetLink`] used by the tick loop
pub struct OutputDeviceAdapter {
    link: Link,
}

impl OutputDeviceAdapter {
    /// Creates the target on `bus` without connecting it
    pub fn new(bus: &dyn VirtualBus, options: &TargetOptions) -> Result<Self, AdapterError> {
        let target = bus.create_x360(options.ids())?;
        Ok(Self::from_target(target, options.features()))
    }

    pub fn from_target(target: Box<dyn VirtualTarget>, features: X360Features) -> Self {
        Self {
            link: Link::Idle(TargetLink::create(target, features)),
        }
    }

    pub fn device_type(&self) -> &'static str {
        DEVICE_TYPE
    }

    pub fn status(&self) -> ConnectionStatus {
        match self.link {
            Link::Idle(_) | Link::Released => ConnectionStatus::Disconnected,
            Link::Connecting(_) => ConnectionStatus::Connecting,
            Link::Live(_) => ConnectionStatus::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Live(_))
    }

    pub fn slot_number(&self) -> i32 {
        match &self.link {
            Link::Idle(link) => link.slot_number(),
            Link::Connecting(link) => link.slot_number(),
            Link::Live(link) => link.slot_number(),
            Link::Released => SLOT_NUMBER_DEFAULT,
        }
    }

    pub fn set_slot_number(&mut self, slot: i32) {
        match &mut self.link {
            Link::Idle(link) => link.set_slot_number(slot),
            Link::Connecting(link) => link.set_slot_number(slot),
            Link::Live(link) => link.set_slot_number(slot),
            Link::Released => {}
        }
    }

    pub fn features(&self) -> X360Features {
        match &self.link {
            Link::Idle(link) => link.features(),
            Link::Connecting(link) => link.features(),
            Link::Live(link) => link.features(),
            Link::Released => X360Features::default(),
        }
    }

    /// Connects the target and, if enabled, waits for its slot number.
    ///
    /// A second call while connected is passed straight to the target. A call
    /// after an interrupted connect picks up at the settle wait.
    pub async fn connect(&mut self) -> Result<(), AdapterError> {
        match std::mem::replace(&mut self.link, Link::Released) {
            Link::Idle(idle) => {
                info!("Connecting {} target", DEVICE_TYPE);
                match idle.begin_connect() {
                    Ok(link) => self.link = Link::Connecting(link),
                    Err((link, e)) => {
                        error!("Failed to connect {} target: {}", DEVICE_TYPE, e);
                        self.link = Link::Idle(link);
                        return Err(e.into());
                    }
                }
            }
            Link::Connecting(link) => {
                debug!("Resuming interrupted {} connect", DEVICE_TYPE);
                self.link = Link::Connecting(link);
            }
            Link::Live(mut link) => {
                let result = link.reconnect();
                self.link = Link::Live(link);
                return result.map_err(AdapterError::from);
            }
            Link::Released => return Err(AdapterError::Released),
        }

        if matches!(&self.link, Link::Connecting(link) if link.wants_slot_number()) {
            tokio::time::sleep(USER_INDEX_WAIT).await;
        }

        self.link = match std::mem::replace(&mut self.link, Link::Released) {
            Link::Connecting(link) => {
                let connected = link.acquire_slot_number();
                info!(
                    "{} target connected (slot number {})",
                    DEVICE_TYPE,
                    connected.slot_number()
                );
                Link::Live(connected)
            }
            other => other,
        };
        Ok(())
    }

    /// Encodes and submits one frame. Ignored unless connected.
    pub fn submit_frame(&mut self, state: &ControllerState, axis_override: AxisOverride) {
        if let Link::Live(link) = &mut self.link {
            link.submit(&encode(state, axis_override));
        }
    }

    /// Submits an already encoded report. Ignored unless connected.
    pub fn submit_report(&mut self, report: &OutputReport) {
        if let Link::Live(link) = &mut self.link {
            link.submit(report);
        }
    }

    /// Drops all feedback handlers and releases the target. Safe to repeat.
    pub fn disconnect(&mut self) {
        match std::mem::replace(&mut self.link, Link::Released) {
            Link::Live(link) => {
                drop(link.disconnect());
                info!("{} target disconnected", DEVICE_TYPE);
            }
            Link::Connecting(link) => {
                drop(link.disconnect());
                info!("{} target disconnected before it finished connecting", DEVICE_TYPE);
            }
            Link::Idle(mut link) => {
                link.unregister_all_feedback();
                debug!("Released {} target that was never connected", DEVICE_TYPE);
            }
            Link::Released => {}
        }
    }

    pub fn register_feedback(&mut self, index: usize, callback: FeedbackCallback) {
        match &mut self.link {
            Link::Idle(link) => link.register_feedback(index, callback),
            Link::Connecting(link) => link.register_feedback(index, callback),
            Link::Live(link) => link.register_feedback(index, callback),
            Link::Released => {
                warn!("No target to register feedback handler {} on", index);
            }
        }
    }

    pub fn unregister_feedback(&mut self, index: usize) {
        match &mut self.link {
            Link::Idle(link) => link.unregister_feedback(index),
            Link::Connecting(link) => link.unregister_feedback(index),
            Link::Live(link) => link.unregister_feedback(index),
            Link::Released => {}
        }
    }

    pub fn unregister_all_feedback(&mut self) {
        match &mut self.link {
            Link::Idle(link) => link.unregister_all_feedback(),
            Link::Connecting(link) => link.unregister_all_feedback(),
            Link::Live(link) => link.unregister_all_feedback(),
            Link::Released => {}
        }
    }

    pub fn feedback_count(&self) -> usize {
        match &self.link {
            Link::Idle(link) => link.feedback_count(),
            Link::Connecting(link) => link.feedback_count(),
            Link::Live(link) => link.feedback_count(),
            Link::Released => 0,
        }
    }

    /// Zeroes the staged report and optionally sends it right away
    pub fn reset_state(&mut self, submit: bool) {
        match &mut self.link {
            Link::Idle(link) => link.reset_report(),
            Link::Connecting(link) => link.reset_report(),
            Link::Live(link) => {
                link.reset_report();
                if submit {
                    link.submit_staged();
                }
            }
            Link::Released => {}
        }
    }
}

impl Drop for OutputDeviceAdapter {
    fn drop(&mut self) {
        self.disconnect();
    }
}
