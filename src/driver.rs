//! Fixed-rate tick loop
//!
//! Ties the pieces together: each tick, every enabled slot pulls its
//! telemetry and controller state from a [`TelemetrySource`], gets a
//! lightbar update from the [`LightbarEngine`] and pushes its controller
//! frame through its [`OutputDeviceAdapter`].
//!
//! # Architecture
//!
//! ```text
//!                     ┌──► LightbarEngine ──► LightbarSink
//! TelemetrySource ────┤
//!                     └──► OutputDeviceAdapter ──► VirtualTarget
//!                                   │
//!                host rumble ◄──────┘ (latched into telemetry)
//! ```
//!
//! Adapters connect concurrently in their own tokio tasks so the settle
//! delay of one pad does not hold up the others.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SlotConfig};
use crate::lightbar::{DeviceTelemetry, LightbarEngine, LightbarOutput};
use crate::output::{
    AdapterError, ControllerState, FeedbackEvent, OutputDeviceAdapter, VirtualBus,
};
use crate::slots::{DeviceSlotRegistry, MAX_DEVICE_SLOTS};

/// Inputs of one device for one tick
#[derive(Debug, Clone)]
pub struct SlotInput {
    pub telemetry: DeviceTelemetry,
    pub controller: ControllerState,
}

/// Where per-device telemetry and controller state come from
pub trait TelemetrySource: Send {
    /// Returns `None` when no device sits in `slot` right now
    fn poll(&mut self, slot: usize, now: DateTime<Utc>) -> Option<SlotInput>;
}

/// Receives computed lightbar states, e.g. to write them to the device
pub trait LightbarSink: Send {
    fn apply(&mut self, slot: usize, output: &LightbarOutput);
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Failed to set up output device for slot {slot}: {source}")]
    Adapter {
        slot: usize,
        #[source]
        source: AdapterError,
    },
}

struct ActiveSlot {
    config: SlotConfig,
    adapter: Option<OutputDeviceAdapter>,
    /// Large motor value last requested by the host
    rumble: Arc<AtomicU8>,
}

pub struct Driver<T, L> {
    engine: LightbarEngine,
    registry: DeviceSlotRegistry,
    slots: Vec<Option<ActiveSlot>>,
    source: T,
    sink: L,
    tick_interval: Duration,
}

impl<T: TelemetrySource, L: LightbarSink> Driver<T, L> {
    /// Creates one output device per enabled slot of `config`
    pub fn new(
        config: &Config,
        bus: &dyn VirtualBus,
        source: T,
        sink: L,
    ) -> Result<Self, DriverError> {
        let mut engine = LightbarEngine::new();
        engine.set_default_light(config.driver.default_light);

        let mut slots: Vec<Option<ActiveSlot>> = (0..MAX_DEVICE_SLOTS).map(|_| None).collect();
        for (index, slot_config) in config.slots.iter().enumerate().take(MAX_DEVICE_SLOTS) {
            if !slot_config.enabled {
                debug!("Slot {} disabled in config", index);
                continue;
            }

            let mut adapter = OutputDeviceAdapter::new(bus, &slot_config.target)
                .map_err(|source| DriverError::Adapter {
                    slot: index,
                    source,
                })?;

            let rumble = Arc::new(AtomicU8::new(0));
            let latch = rumble.clone();
            adapter.register_feedback(
                index,
                Arc::new(move |event: FeedbackEvent| {
                    latch.store(event.large_motor, Ordering::Relaxed);
                }),
            );

            slots[index] = Some(ActiveSlot {
                config: slot_config.clone(),
                adapter: Some(adapter),
                rumble,
            });
        }

        info!(
            "Driver ready with {} active slot(s), tick {}ms",
            slots.iter().flatten().count(),
            config.driver.tick_interval_ms
        );

        Ok(Self {
            engine,
            registry: DeviceSlotRegistry::new(),
            slots,
            source,
            sink,
            tick_interval: Duration::from_millis(config.driver.tick_interval_ms.max(1)),
        })
    }

    pub fn registry(&self) -> &DeviceSlotRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceSlotRegistry {
        &mut self.registry
    }

    pub fn adapter(&self, slot: usize) -> Option<&OutputDeviceAdapter> {
        self.slots.get(slot)?.as_ref()?.adapter.as_ref()
    }

    /// Connects every output device concurrently.
    ///
    /// Connect failures are logged and leave that slot disconnected; the
    /// rest keep working. A slot whose connect panics loses its output
    /// device for the session. Returns how many devices are connected.
    pub async fn connect_all(&mut self) -> usize {
        let mut tasks = JoinSet::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(mut adapter) = slot.as_mut().and_then(|s| s.adapter.take()) {
                // The inner task isolates a panicking target so its slot
                // index still comes back
                let connecting = tokio::spawn(async move {
                    let result = adapter.connect().await;
                    (adapter, result)
                });
                tasks.spawn(async move { (index, connecting.await) });
            }
        }

        let mut connected = 0;
        while let Some(joined) = tasks.join_next().await {
            let (index, adapter, result) = match joined {
                Ok((index, Ok((adapter, result)))) => (index, adapter, result),
                Ok((index, Err(e))) => {
                    error!(
                        "Connect task for slot {} failed, slot has no output device: {}",
                        index, e
                    );
                    continue;
                }
                Err(e) => {
                    error!("Connect task failed: {}", e);
                    continue;
                }
            };

            match result {
                Ok(()) => {
                    connected += 1;
                    self.publish_player_slot(index, &adapter);
                }
                Err(e) => warn!("Slot {} stays disconnected: {}", index, e),
            }

            if let Some(slot) = self.slots.get_mut(index).and_then(Option::as_mut) {
                slot.adapter = Some(adapter);
            }
        }

        info!("{} output device(s) connected", connected);
        connected
    }

    /// XInput slots are 0-based, the lightbar palette counts players from 1
    fn publish_player_slot(&mut self, index: usize, adapter: &OutputDeviceAdapter) {
        let player = u8::try_from(adapter.slot_number() + 1)
            .ok()
            .filter(|p| *p > 0);
        if let Some(slot) = self.registry.get_mut(index) {
            slot.set_player_slot(player);
            debug!("Slot {} player number {:?}", index, player);
        }
    }

    /// Runs one tick over every active slot
    pub fn tick(&mut self, now: DateTime<Utc>) {
        let Self {
            engine,
            registry,
            slots,
            source,
            sink,
            ..
        } = self;

        for (index, slot) in slots.iter_mut().enumerate() {
            let Some(active) = slot.as_mut() else {
                continue;
            };
            let Some(mut input) = source.poll(index, now) else {
                continue;
            };

            let host_rumble = active.rumble.load(Ordering::Relaxed);
            input.telemetry.rumble = input.telemetry.rumble.max(host_rumble);

            if let Some(output) = engine.compute_output(
                registry,
                index,
                &input.telemetry,
                &active.config.lightbar,
                now,
            ) {
                sink.apply(index, &output);
            }

            if let Some(adapter) = active.adapter.as_mut() {
                adapter.submit_frame(&input.controller, active.config.axis_override);
            }
        }
    }

    /// Main loop with graceful shutdown support
    ///
    /// Ticks at the configured rate until the shutdown signal fires, then
    /// sends one last frame with every lightbar off and disconnects.
    pub async fn run_until_shutdown(mut self, mut shutdown_rx: oneshot::Receiver<()>) -> Self {
        info!("Starting tick loop every {:?}", self.tick_interval);
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Shutdown signal received");
                    break;
                }

                _ = interval.tick() => {
                    self.tick(Utc::now());
                }
            }
        }

        self.shutdown(Utc::now());
        self
    }

    /// Blacks out every lightbar and releases all output devices. Repeated
    /// calls do nothing.
    pub fn shutdown(&mut self, now: DateTime<Utc>) {
        if self.engine.is_shutting_down() {
            return;
        }
        self.engine.begin_shutdown();
        self.tick(now);

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(adapter) = slot.as_mut().and_then(|s| s.adapter.as_mut()) {
                adapter.disconnect();
                debug!("Slot {} released", index);
            }
        }
        info!("Driver shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lightbar::Color;
    use crate::output::{
        ConnectionStatus, FeedbackCallback, LoopbackBus, StickAxis, TargetError, Trigger,
        VirtualTarget,
    };
    use crate::output::target::{FeedbackToken, TargetIds};
    use chrono::TimeZone;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    /// Target whose driver blows up on connect
    struct ExplodingTarget;

    impl VirtualTarget for ExplodingTarget {
        fn connect(&mut self) -> Result<(), TargetError> {
            panic!("bus driver crashed");
        }
        fn disconnect(&mut self) -> Result<(), TargetError> {
            Err(TargetError::NotConnected)
        }
        fn set_buttons(&mut self, _buttons: u16) {}
        fn set_axis(&mut self, _axis: StickAxis, _value: i16) {}
        fn set_trigger(&mut self, _trigger: Trigger, _value: u8) {}
        fn reset_report(&mut self) {}
        fn submit_report(&mut self) -> Result<(), TargetError> {
            Err(TargetError::NotConnected)
        }
        fn user_index(&mut self) -> Result<i32, TargetError> {
            Err(TargetError::NotConnected)
        }
        fn subscribe_feedback(&mut self, _callback: FeedbackCallback) -> FeedbackToken {
            FeedbackToken(0)
        }
        fn unsubscribe_feedback(&mut self, _token: FeedbackToken) {}
    }

    /// Hands out one exploding target first, loopback targets after that
    #[derive(Default)]
    struct FlakyBus {
        loopback: LoopbackBus,
        exploded: AtomicBool,
    }

    impl VirtualBus for FlakyBus {
        fn create_x360(
            &self,
            ids: Option<TargetIds>,
        ) -> Result<Box<dyn VirtualTarget>, TargetError> {
            if !self.exploded.swap(true, Ordering::SeqCst) {
                return Ok(Box::new(ExplodingTarget));
            }
            self.loopback.create_x360(ids)
        }
    }

    struct FixedSource {
        present: Vec<usize>,
        battery: u8,
    }

    impl TelemetrySource for FixedSource {
        fn poll(&mut self, slot: usize, now: DateTime<Utc>) -> Option<SlotInput> {
            if !self.present.contains(&slot) {
                return None;
            }
            Some(SlotInput {
                telemetry: DeviceTelemetry {
                    battery_percent: self.battery,
                    ..DeviceTelemetry::new(now)
                },
                controller: ControllerState {
                    cross: true,
                    ..ControllerState::default()
                },
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        outputs: Arc<Mutex<Vec<(usize, LightbarOutput)>>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<(usize, LightbarOutput)> {
            std::mem::take(&mut *self.outputs.lock().unwrap())
        }
    }

    impl LightbarSink for RecordingSink {
        fn apply(&mut self, slot: usize, output: &LightbarOutput) {
            self.outputs.lock().unwrap().push((slot, *output));
        }
    }

    fn two_slot_config() -> Config {
        let mut config = Config::default();
        let mut slot = SlotConfig::default();
        slot.lightbar.battery_as_color = true;
        config.slots = vec![slot.clone(), slot];
        config
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_publishes_player_slots() {
        let bus = LoopbackBus::new();
        let sink = RecordingSink::default();
        let source = FixedSource {
            present: vec![0, 1],
            battery: 80,
        };
        let mut driver = Driver::new(&two_slot_config(), &bus, source, sink.clone()).unwrap();

        assert_eq!(driver.connect_all().await, 2);
        assert_eq!(driver.registry().get(0).unwrap().player_slot(), Some(1));
        assert_eq!(driver.registry().get(1).unwrap().player_slot(), Some(2));

        driver.tick(t0());
        let outputs = sink.take();
        assert_eq!(outputs.len(), 2);
        let steady_red = LightbarOutput {
            color: Color::RED,
            explicitly_off: true,
            ..LightbarOutput::default()
        };
        assert_eq!(outputs[0], (0, steady_red));
        assert_eq!(outputs[1].1.color, Color::new(0, 0, 255));
        assert_eq!(bus.probe(0).unwrap().last_report().unwrap().buttons, 0x1000);
    }

    #[tokio::test]
    async fn missing_devices_and_disabled_slots_are_skipped() {
        let bus = LoopbackBus::new();
        let sink = RecordingSink::default();
        let mut config = two_slot_config();
        config.slots[1].enabled = false;
        let source = FixedSource {
            present: vec![1],
            battery: 80,
        };

        let mut driver = Driver::new(&config, &bus, source, sink.clone()).unwrap();
        assert_eq!(bus.target_count(), 1);
        assert!(driver.adapter(1).is_none());

        driver.tick(t0());
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn host_rumble_feeds_distance_profile() {
        let bus = LoopbackBus::new();
        let sink = RecordingSink::default();
        let mut config = Config::default();
        config.slots[0].target.report_slot_number = false;
        config.slots[0].lightbar.distance_profile = true;
        let source = FixedSource {
            present: vec![0],
            battery: 80,
        };

        let mut driver = Driver::new(&config, &bus, source, sink.clone()).unwrap();
        driver.connect_all().await;

        bus.probe(0).unwrap().emit_feedback(FeedbackEvent {
            large_motor: 255,
            ..FeedbackEvent::default()
        });
        driver.tick(t0());

        let outputs = sink.take();
        assert_eq!(outputs[0].1.color, Color::RED);
        assert_eq!((outputs[0].1.flash_on, outputs[0].1.flash_off), (10, 10));
    }

    #[tokio::test]
    async fn panicking_connect_only_costs_its_own_slot() {
        let bus = FlakyBus::default();
        let sink = RecordingSink::default();
        let mut config = two_slot_config();
        for slot in &mut config.slots {
            slot.target.report_slot_number = false;
        }
        let source = FixedSource {
            present: vec![0, 1],
            battery: 80,
        };

        let mut driver = Driver::new(&config, &bus, source, sink.clone()).unwrap();
        assert_eq!(driver.connect_all().await, 1);
        assert!(driver.adapter(0).is_none());
        assert!(driver.adapter(1).unwrap().is_connected());

        driver.tick(t0());
        assert_eq!(sink.take().len(), 2);
        assert_eq!(bus.loopback.probe(0).unwrap().submitted().len(), 1);
    }

    #[tokio::test]
    async fn forced_color_goes_out_on_next_tick() {
        let bus = LoopbackBus::new();
        let sink = RecordingSink::default();
        let source = FixedSource {
            present: vec![0],
            battery: 80,
        };
        let mut driver = Driver::new(&Config::default(), &bus, source, sink.clone()).unwrap();

        driver
            .registry_mut()
            .get_mut(0)
            .unwrap()
            .force(Color::new(0, 255, 0), 10);
        driver.tick(t0());

        let (_, output) = sink.take().pop().unwrap();
        assert_eq!(output.color, Color::new(0, 255, 0));
        assert_eq!((output.flash_on, output.flash_off), (15, 15));
    }

    #[tokio::test]
    async fn shutdown_runs_once() {
        let bus = LoopbackBus::new();
        let sink = RecordingSink::default();
        let source = FixedSource {
            present: vec![0],
            battery: 80,
        };
        let mut driver = Driver::new(&Config::default(), &bus, source, sink.clone()).unwrap();

        driver.shutdown(t0());
        driver.shutdown(t0());
        assert_eq!(sink.take().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_blacks_out_and_disconnects() {
        let bus = LoopbackBus::new();
        let sink = RecordingSink::default();
        let mut config = Config::default();
        config.slots[0].target.report_slot_number = false;
        let source = FixedSource {
            present: vec![0],
            battery: 80,
        };

        let mut driver = Driver::new(&config, &bus, source, sink.clone()).unwrap();
        driver.connect_all().await;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        shutdown_tx.send(()).unwrap();
        let driver = driver.run_until_shutdown(shutdown_rx).await;

        let last = sink.take().pop().unwrap();
        assert_eq!(last.1.color, Color::BLACK);
        assert_eq!(
            driver.adapter(0).unwrap().status(),
            ConnectionStatus::Disconnected
        );
        assert!(!bus.probe(0).unwrap().is_connected());
    }
}
