// src/main.rs
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use eeg_stream_engine::dsp::SyntheticSource;
use eeg_stream_engine::{spawn_driver, DriverCommand, DriverEvent, EngineConfig};
use log::info;

/// Seconds of synthetic streaming before the demo shuts down.
const SESSION_SECS: u64 = 5;
const SYNTHETIC_CHANNELS: usize = 8;

fn load_config() -> Result<EngineConfig> {
    match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("failed to load config from {path}")),
        None => Ok(EngineConfig::default()),
    }
}

// 入口函数
fn main() -> Result<()> {
    env_logger::init();
    let config = load_config()?;
    let samples_per_tick =
        ((config.sampling_rate as u64 * config.tick_ms).div_ceil(1000) as usize).max(1);
    let source = SyntheticSource::new(
        SYNTHETIC_CHANNELS,
        config.sampling_rate,
        samples_per_tick,
        0x5eed,
    );

    let (event_tx, event_rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let handle = spawn_driver(config, Box::new(source), None, event_tx, cmd_rx);
    cmd_tx
        .send(DriverCommand::StartStream)
        .context("driver thread exited early")?;

    let deadline = Instant::now() + Duration::from_secs(SESSION_SECS);
    let mut frames = 0usize;
    while Instant::now() < deadline {
        match event_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(DriverEvent::Frame(output)) => {
                frames += 1;
                if let Some(bands) = &output.band_power {
                    let summary: Vec<String> = bands
                        .bands
                        .iter()
                        .map(|(band, value)| format!("{}={value:.2}", band.label()))
                        .collect();
                    info!("band power: {} (axis {:.2})", summary.join(" "), bands.axis_ceiling);
                }
            }
            Ok(DriverEvent::Log(line)) => info!("{line}"),
            Ok(DriverEvent::Mode(mode)) => info!("mode: {mode:?}"),
            Ok(DriverEvent::Error(err)) => return Err(anyhow!(err)),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    cmd_tx.send(DriverCommand::StopStream).ok();
    cmd_tx.send(DriverCommand::Shutdown).ok();
    handle
        .join()
        .map_err(|_| anyhow!("driver thread panicked"))?;
    info!("{frames} frames in {SESSION_SECS} s");
    Ok(())
}
