use std::collections::HashMap;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use padbridge::config::Config;
use padbridge::driver::{Driver, LightbarSink, SlotInput, TelemetrySource};
use padbridge::lightbar::{DeviceTelemetry, LightbarOutput};
use padbridge::output::{ControllerState, LoopbackBus};
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = Config::default_path();
    let config = Config::ensure_default_config(&config_path)
        .await
        .map_err(|e| eyre!("Failed to load {}: {}", config_path.display(), e))?;
    info!("Loaded config from {}", config_path.display());

    // No kernel bus driver is bundled, reports stay in process
    let bus = LoopbackBus::new();
    let source = SimulatedPads::new(Utc::now());
    let mut driver = Driver::new(&config, &bus, source, LogSink::default())?;
    driver.connect_all().await;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    driver.run_until_shutdown(shutdown_rx).await;
    info!("{} virtual target(s) released", bus.target_count());
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

/// Stand-in pads: the battery drains one percent every ten seconds and the
/// left stick sweeps back and forth
struct SimulatedPads {
    started_at: DateTime<Utc>,
}

impl SimulatedPads {
    fn new(now: DateTime<Utc>) -> Self {
        Self { started_at: now }
    }
}

impl TelemetrySource for SimulatedPads {
    fn poll(&mut self, _slot: usize, now: DateTime<Utc>) -> Option<SlotInput> {
        let elapsed = now.signed_duration_since(self.started_at);
        let drained = (elapsed.num_seconds() / 10).clamp(0, 100) as u8;
        let sweep = (elapsed.num_milliseconds() / 8).rem_euclid(510);
        let lx = if sweep < 255 { sweep } else { 510 - sweep } as u8;

        Some(SlotInput {
            telemetry: DeviceTelemetry {
                battery_percent: 100 - drained,
                last_active: self.started_at,
                ..DeviceTelemetry::new(now)
            },
            controller: ControllerState {
                lx,
                ..ControllerState::default()
            },
        })
    }
}

/// Logs each slot's lightbar whenever it changes
#[derive(Default)]
struct LogSink {
    last: HashMap<usize, LightbarOutput>,
}

impl LightbarSink for LogSink {
    fn apply(&mut self, slot: usize, output: &LightbarOutput) {
        if self.last.insert(slot, *output) == Some(*output) {
            return;
        }
        info!(
            "Slot {} lightbar {:?} flash {}/{}",
            slot, output.color, output.flash_on, output.flash_off
        );
    }
}
