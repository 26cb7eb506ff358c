// src/main.rs - standalone entry point wiring the AMS control core
use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use clap::Parser;
use tokio::signal;

use oams_core::config::{load_config, Config};
use oams_core::error::AmsError;
use oams_core::feeder::FeederDriver;
use oams_core::host::{Host, TimerHandle};
use oams_core::mcu::{McuCommand, McuEvent, McuLink};
use oams_core::Coordinator;

#[derive(Parser, Debug)]
#[command(name = "oams-host", about = "Automatic Material System control core")]
struct Args {
    /// Path to the AMS TOML configuration file.
    #[arg(default_value = "ams.toml")]
    config: String,

    /// Tick period in seconds (spec §5's W).
    #[arg(long, default_value_t = 0.25)]
    tick_period_s: f64,
}

/// Minimal host facade for running the core standalone. A real deployment
/// embeds the core inside the print host's own reactor and wires
/// `extruder_position`/`pause_print` to the live toolhead - this stand-in
/// uses a monotonic wall clock and logs everything else, since the host
/// integration itself is out of scope (spec §1).
struct StandaloneHost {
    start: Instant,
    next_timer: u64,
}

impl StandaloneHost {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            next_timer: 0,
        }
    }
}

impl Host for StandaloneHost {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn register_timer(&mut self, period_s: f64) -> TimerHandle {
        let id = self.next_timer;
        self.next_timer += 1;
        tracing::debug!(period_s, "timer registered (unused by standalone host)");
        TimerHandle(id)
    }

    fn extruder_position(&self, extruder: &str) -> f64 {
        tracing::trace!(extruder, "standalone host has no live extruder position; reporting 0.0");
        0.0
    }

    fn pause_print(&mut self, reason: &str) {
        tracing::warn!(reason, "pause requested");
    }

    fn respond(&mut self, message: &str) {
        tracing::info!(message, "command response");
    }

    fn register_gcode(&mut self, name: &str) {
        tracing::info!(name, "gcode command registered");
    }
}

/// Placeholder feeder MCU link until a real transport (serial/CAN) is
/// wired in; logs every command and reports no telemetry (spec §1 keeps
/// firmware/transport out of scope).
struct StubMcuLink {
    feeder: String,
}

#[async_trait]
impl McuLink for StubMcuLink {
    async fn send(&mut self, command: McuCommand) -> Result<(), AmsError> {
        tracing::debug!(feeder = %self.feeder, ?command, "sent (no transport wired)");
        Ok(())
    }

    async fn poll_events(&mut self) -> Vec<McuEvent> {
        Vec::new()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    tracing::info!("Starting oams-host control core");

    let args = Args::parse();
    tracing::info!(config_path = %args.config, "loading configuration");

    let config: Config = load_config(&args.config).map_err(|e| {
        tracing::error!(error = %e, "failed to load configuration");
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    let mut feeders = HashMap::new();
    for (name, feeder_cfg) in &config.feeder {
        let link = Box::new(StubMcuLink { feeder: name.clone() });
        feeders.insert(name.clone(), FeederDriver::new(name.clone(), feeder_cfg.clone(), link));
    }
    tracing::info!(feeder_count = feeders.len(), "feeders initialized");

    let host = Box::new(StandaloneHost::new());
    let mut coordinator = Coordinator::new(config, host, feeders, args.tick_period_s).map_err(|e| {
        tracing::error!(error = %e, "failed to build coordinator from configuration");
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    tracing::info!("control loop running; press Ctrl+C to shut down");
    tokio::select! {
        _ = coordinator.run_forever() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
