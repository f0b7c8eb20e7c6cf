//! Output subsystem for the emulated Xbox 360 pad
//!
//! 1. [`codec`] - DS4 state to X360 report encoding
//! 2. [`target`] - injected virtual bus capability
//! 3. [`adapter`] - connection lifecycle, feedback registry, slot number
//! 4. [`loopback`] - in-process bus for tests and dry runs
//!
//! # Architecture
//!
//! ```text
//! ControllerState ──► encode ──► OutputReport ──► OutputDeviceAdapter ──► VirtualTarget
//!                                                        ▲                    │
//!                                                        └── FeedbackEvent ◄──┘
//! ```

pub mod adapter;
pub mod codec;
pub mod error;
pub mod loopback;
pub mod target;

pub use adapter::{ConnectionStatus, OutputDeviceAdapter, TargetOptions, X360Features};
pub use codec::{encode, AxisOverride, ControllerState, OutputReport, StickAxis, Trigger};
pub use error::{AdapterError, TargetError};
pub use loopback::{LoopbackBus, LoopbackProbe};
pub use target::{FeedbackCallback, FeedbackEvent, VirtualBus, VirtualTarget};
