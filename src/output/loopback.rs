//! In-process virtual bus
//!
//! Keeps every submitted report in memory instead of talking to a driver.
//! Each created target comes with a [`LoopbackProbe`] that lets the caller
//! inspect what was sent, inject failures, and play host feedback back into
//! subscribed callbacks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use super::codec::{OutputReport, StickAxis, Trigger};
use super::error::TargetError;
use super::target::{
    FeedbackCallback, FeedbackEvent, FeedbackToken, TargetIds, VirtualBus, VirtualTarget,
};

const DEFAULT_IDS: TargetIds = TargetIds {
    vendor_id: 0x045e,
    product_id: 0x028e,
};

#[derive(Default)]
struct LoopbackState {
    ids: Option<TargetIds>,
    connected: bool,
    connect_calls: u32,
    disconnect_calls: u32,
    staged: OutputReport,
    submitted: Vec<OutputReport>,
    user_index: Option<i32>,
    fail_connect: bool,
    subscribers: HashMap<FeedbackToken, FeedbackCallback>,
    next_token: u64,
}

/// Inspection handle for one loopback target
#[derive(Clone, Default)]
pub struct LoopbackProbe {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackProbe {
    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ids(&self) -> TargetIds {
        self.lock().ids.unwrap_or(DEFAULT_IDS)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn connect_calls(&self) -> u32 {
        self.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.lock().disconnect_calls
    }

    pub fn submitted(&self) -> Vec<OutputReport> {
        self.lock().submitted.clone()
    }

    pub fn last_report(&self) -> Option<OutputReport> {
        self.lock().submitted.last().copied()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// `None` makes the user index query fail
    pub fn set_user_index(&self, index: Option<i32>) {
        self.lock().user_index = index;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    /// Delivers a host feedback event to every subscribed callback
    pub fn emit_feedback(&self, event: FeedbackEvent) {
        let callbacks: Vec<FeedbackCallback> = self.lock().subscribers.values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

pub struct LoopbackTarget {
    probe: LoopbackProbe,
}

impl VirtualTarget for LoopbackTarget {
    fn connect(&mut self) -> Result<(), TargetError> {
        let mut state = self.probe.lock();
        state.connect_calls += 1;
        if state.fail_connect {
            return Err(TargetError::ConnectionFailed(
                "loopback connect rejected".to_string(),
            ));
        }
        if state.connected {
            return Err(TargetError::ConnectionFailed(
                "loopback target already connected".to_string(),
            ));
        }
        state.connected = true;
        debug!("Loopback target connected");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TargetError> {
        let mut state = self.probe.lock();
        state.disconnect_calls += 1;
        if !state.connected {
            return Err(TargetError::NotConnected);
        }
        state.connected = false;
        debug!("Loopback target disconnected");
        Ok(())
    }

    fn set_buttons(&mut self, buttons: u16) {
        self.probe.lock().staged.buttons = buttons;
    }

    fn set_axis(&mut self, axis: StickAxis, value: i16) {
        self.probe.lock().staged.set_axis(axis, value);
    }

    fn set_trigger(&mut self, trigger: Trigger, value: u8) {
        let mut state = self.probe.lock();
        match trigger {
            Trigger::Left => state.staged.left_trigger = value,
            Trigger::Right => state.staged.right_trigger = value,
        }
    }

    fn reset_report(&mut self) {
        self.probe.lock().staged = OutputReport::default();
    }

    fn submit_report(&mut self) -> Result<(), TargetError> {
        let mut state = self.probe.lock();
        if !state.connected {
            return Err(TargetError::NotConnected);
        }
        let report = state.staged;
        trace!("Loopback report {:?}", report);
        state.submitted.push(report);
        Ok(())
    }

    fn user_index(&mut self) -> Result<i32, TargetError> {
        let state = self.probe.lock();
        if !state.connected {
            return Err(TargetError::NotConnected);
        }
        state.user_index.ok_or_else(|| {
            TargetError::UserIndexUnavailable("host did not assign an index".to_string())
        })
    }

    fn subscribe_feedback(&mut self, callback: FeedbackCallback) -> FeedbackToken {
        let mut state = self.probe.lock();
        let token = FeedbackToken(state.next_token);
        state.next_token += 1;
        state.subscribers.insert(token, callback);
        token
    }

    fn unsubscribe_feedback(&mut self, token: FeedbackToken) {
        self.probe.lock().subscribers.remove(&token);
    }
}

/// Virtual bus that assigns user indices 0, 1, 2, ... in creation order
#[derive(Default)]
pub struct LoopbackBus {
    probes: Mutex<Vec<LoopbackProbe>>,
    withhold_user_index: bool,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus whose targets never report a user index
    pub fn without_user_index() -> Self {
        Self {
            withhold_user_index: true,
            ..Self::default()
        }
    }

    fn lock_probes(&self) -> MutexGuard<'_, Vec<LoopbackProbe>> {
        self.probes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Probe of the `index`-th created target
    pub fn probe(&self, index: usize) -> Option<LoopbackProbe> {
        self.lock_probes().get(index).cloned()
    }

    pub fn target_count(&self) -> usize {
        self.lock_probes().len()
    }
}

impl VirtualBus for LoopbackBus {
    fn create_x360(&self, ids: Option<TargetIds>) -> Result<Box<dyn VirtualTarget>, TargetError> {
        let mut probes = self.lock_probes();
        let probe = LoopbackProbe::default();
        {
            let mut state = probe.lock();
            state.ids = ids;
            if !self.withhold_user_index {
                state.user_index = i32::try_from(probes.len()).ok();
            }
        }
        debug!("Created loopback X360 target #{}", probes.len());
        probes.push(probe.clone());
        Ok(Box::new(LoopbackTarget { probe }))
    }
}
