//! Lightbar engine and Xbox 360 output emulation for DualShock 4 style pads
//!
//! - [`lightbar`] computes the lightbar color and blink pattern per tick
//! - [`output`] turns controller state into X360 reports on a virtual bus
//! - [`driver`] runs both at a fixed rate for every configured slot

pub mod config;
pub mod driver;
pub mod lightbar;
pub mod output;
pub mod slots;
