//! Fixed-size registry of per-device lightbar state
//!
//! Every physical controller occupies one of [`MAX_DEVICE_SLOTS`] slots. A
//! slot owns the animation state and the override knobs other components
//! may set (forced color, temporary distance profile, player slot number).
//! The registry is handed to the engine explicitly on every tick.

use tracing::debug;

use crate::lightbar::clock::AnimationState;
use crate::lightbar::color::Color;

pub const MAX_DEVICE_SLOTS: usize = 8;

/// Highest logical player slot a virtual target can report
pub const MAX_PLAYER_SLOT: u8 = 8;

#[derive(Debug, Clone, Default)]
pub struct DeviceSlot {
    pub animation: AnimationState,

    /// Use `forced_color` instead of the configured routine
    pub force_light: bool,
    pub forced_color: Color,
    /// Blink intensity while forced, 0 for steady
    pub forced_flash: u8,

    /// Distance profile enabled by a temporary profile switch
    pub temp_distance_profile: bool,

    player_slot: Option<u8>,
}

impl DeviceSlot {
    /// Logical player slot (1-based) assigned by the virtual target
    pub fn player_slot(&self) -> Option<u8> {
        self.player_slot
    }

    /// Records the player slot, values outside 1..=8 clear it
    pub fn set_player_slot(&mut self, slot: Option<u8>) {
        self.player_slot = slot.filter(|s| (1..=MAX_PLAYER_SLOT).contains(s));
    }

    pub fn force(&mut self, color: Color, flash: u8) {
        self.force_light = true;
        self.forced_color = color;
        self.forced_flash = flash;
    }

    pub fn release_force(&mut self) {
        self.force_light = false;
        self.forced_flash = 0;
    }
}

#[derive(Debug, Clone)]
pub struct DeviceSlotRegistry {
    slots: [DeviceSlot; MAX_DEVICE_SLOTS],
}

impl Default for DeviceSlotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSlotRegistry {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| DeviceSlot::default()),
        }
    }

    pub fn get(&self, index: usize) -> Option<&DeviceSlot> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DeviceSlot> {
        self.slots.get_mut(index)
    }

    /// Clears a slot when its device goes away
    pub fn reset(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            debug!("Resetting device slot {}", index);
            *slot = DeviceSlot::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_index_is_none() {
        let mut registry = DeviceSlotRegistry::new();
        assert!(registry.get(MAX_DEVICE_SLOTS).is_none());
        assert!(registry.get_mut(42).is_none());
        registry.reset(99);
        assert!(registry.get(MAX_DEVICE_SLOTS - 1).is_some());
    }

    #[test]
    fn player_slot_accepts_one_through_eight() {
        let mut registry = DeviceSlotRegistry::new();
        let slot = registry.get_mut(3).unwrap();

        slot.set_player_slot(Some(1));
        assert_eq!(slot.player_slot(), Some(1));
        slot.set_player_slot(Some(8));
        assert_eq!(slot.player_slot(), Some(8));
        slot.set_player_slot(Some(0));
        assert_eq!(slot.player_slot(), None);
        slot.set_player_slot(Some(9));
        assert_eq!(slot.player_slot(), None);
    }

    #[test]
    fn reset_clears_overrides() {
        let mut registry = DeviceSlotRegistry::new();
        registry.get_mut(0).unwrap().force(Color::RED, 4);
        registry.get_mut(0).unwrap().temp_distance_profile = true;

        registry.reset(0);
        let slot = registry.get(0).unwrap();
        assert!(!slot.force_light);
        assert!(!slot.temp_distance_profile);
        assert_eq!(slot.forced_flash, 0);
    }
}
