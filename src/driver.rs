// src/driver.rs
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};
use ndarray::Array2;

use crate::config::EngineConfig;
use crate::dsp::{
    BoundsMode, ChunkPublisher, DisplayMode, EngineError, FilterSettings, StreamSource,
};
use crate::engine::{Engine, TickOutput};
use crate::types::{EngineMode, FileMetadata};

/// Commands drained per loop iteration before the next tick runs.
const MAX_COMMANDS_PER_TICK: usize = 10;

// 前端发给后台的命令
#[derive(Debug)]
pub enum DriverCommand {
    LoadRecording {
        data: Array2<f64>,
        metadata: FileMetadata,
    },
    SetSamplingRate(u32),
    SetWindowLength(f64),
    NavigateToWindow(usize),
    SetActiveChannels(Vec<usize>),
    ToggleChannel { channel: usize, enabled: bool },
    SetStreamChannelNames(Vec<String>),
    SetFilterSettings(FilterSettings),
    SetMagnitudeScale(f64),
    SetSmoothing { enabled: bool, window_ms: f64 },
    SetBoundsMode(BoundsMode),
    SetDisplayMode(DisplayMode),
    StartPlayback(f64),
    StopPlayback,
    StartStream,
    StopStream,
    Shutdown,
}

// 后台发给前端的消息
#[derive(Clone, Debug)]
pub enum DriverEvent {
    Log(String),
    /// Mode after a start/stop.
    Mode(EngineMode),
    Frame(Box<TickOutput>),
    Error(String),
}

/// File-mode refresh after navigation or a parameter change.
fn file_refresh(engine: &mut Engine) -> TickOutput {
    TickOutput {
        waveform: engine.window_frame(),
        spectrum: engine.file_spectrum(),
        band_power: engine.file_band_power(),
        ingested: 0,
    }
}

struct Driver {
    engine: Engine,
    source: Box<dyn StreamSource + Send>,
    events: Sender<DriverEvent>,
}

impl Driver {
    fn emit(&self, event: DriverEvent) -> bool {
        self.events.send(event).is_ok()
    }

    fn emit_frame(&self, output: TickOutput) -> bool {
        if output.is_idle() {
            return true;
        }
        self.emit(DriverEvent::Frame(Box::new(output)))
    }

    fn report(&self, result: Result<(), EngineError>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!("{err}");
                self.emit(DriverEvent::Error(err.to_string()))
            }
        }
    }

    fn refresh_file_view(&mut self) -> bool {
        if self.engine.mode() != EngineMode::File {
            return true;
        }
        let output = file_refresh(&mut self.engine);
        self.emit_frame(output)
    }

    /// Apply one command. `false` ends the loop.
    fn handle(&mut self, command: DriverCommand) -> bool {
        match command {
            DriverCommand::LoadRecording { data, metadata } => {
                let result = self.engine.load_recording(data, metadata);
                self.report(result) && self.refresh_file_view()
            }
            DriverCommand::SetSamplingRate(rate) => {
                let result = self.engine.set_sampling_rate(rate);
                self.report(result) && self.refresh_file_view()
            }
            DriverCommand::SetWindowLength(secs) => {
                self.engine.set_window_length(secs);
                self.refresh_file_view()
            }
            DriverCommand::NavigateToWindow(index) => {
                let result = self.engine.navigate_to_window(index).map(|_| ());
                self.report(result) && self.refresh_file_view()
            }
            DriverCommand::SetActiveChannels(channels) => {
                self.engine.set_active_channels(channels);
                self.refresh_file_view()
            }
            DriverCommand::ToggleChannel { channel, enabled } => {
                self.engine.toggle_channel(channel, enabled);
                self.refresh_file_view()
            }
            DriverCommand::SetStreamChannelNames(names) => {
                self.engine.set_stream_channel_names(names);
                true
            }
            DriverCommand::SetFilterSettings(settings) => {
                self.engine.set_filter_settings(settings);
                true
            }
            DriverCommand::SetMagnitudeScale(percent) => {
                self.engine.set_magnitude_scale(percent);
                true
            }
            DriverCommand::SetSmoothing { enabled, window_ms } => {
                self.engine.set_smoothing(enabled, window_ms);
                true
            }
            DriverCommand::SetBoundsMode(mode) => {
                self.engine.set_bounds_mode(mode);
                self.refresh_file_view()
            }
            DriverCommand::SetDisplayMode(mode) => {
                self.engine.set_display_mode(mode);
                self.refresh_file_view()
            }
            DriverCommand::StartPlayback(speed) => {
                let result = self.engine.start_playback(speed);
                self.report(result)
            }
            DriverCommand::StopPlayback => {
                self.engine.stop_playback();
                true
            }
            DriverCommand::StartStream => {
                let (channels, rate) = (self.source.channel_count(), self.source.sampling_rate());
                let result = self.engine.start_stream(channels, rate);
                let started = result.is_ok();
                self.report(result)
                    && (!started
                        || (self.emit(DriverEvent::Mode(EngineMode::Stream))
                            && self.emit(DriverEvent::Log("Stream started".to_owned()))))
            }
            DriverCommand::StopStream => {
                self.engine.stop_stream();
                self.emit(DriverEvent::Mode(EngineMode::File))
                    && self.emit(DriverEvent::Log("Stream stopped".to_owned()))
            }
            DriverCommand::Shutdown => false,
        }
    }

    fn run(mut self, commands: Receiver<DriverCommand>) {
        let period = Duration::from_millis(self.engine.config().tick_ms);
        let mut last_frame = Instant::now();
        loop {
            // 1. 处理命令
            for _ in 0..MAX_COMMANDS_PER_TICK {
                match commands.try_recv() {
                    Ok(command) => {
                        if !self.handle(command) {
                            return;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }

            // 2. 数据流循环
            let started = Instant::now();
            let elapsed = started.duration_since(last_frame).as_secs_f64();
            last_frame = started;
            let output = match self.engine.mode() {
                EngineMode::Stream => self.engine.tick(self.source.as_mut()),
                EngineMode::File if self.engine.is_playing() => self.engine.playback_step(elapsed),
                EngineMode::File => TickOutput::idle(),
            };
            if !self.emit_frame(output) {
                return;
            }
            thread::sleep(period.saturating_sub(started.elapsed()));
        }
    }
}

/// Run an [`Engine`] on its own thread, ticking every `config.tick_ms`.
///
/// The thread is the only owner of the engine: commands arrive over `commands`, results
/// leave over `events`. It exits on [`DriverCommand::Shutdown`] or when either channel
/// is closed.
pub fn spawn_driver(
    config: EngineConfig,
    source: Box<dyn StreamSource + Send>,
    publisher: Option<Box<dyn ChunkPublisher + Send>>,
    events: Sender<DriverEvent>,
    commands: Receiver<DriverCommand>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut engine = Engine::new(config);
        engine.set_publisher(publisher);
        events
            .send(DriverEvent::Log("Engine ready".to_owned()))
            .ok();
        info!("driver thread started");
        Driver {
            engine,
            source,
            events,
        }
        .run(commands);
        info!("driver thread stopped");
    })
}
