//! # Audio Module
//!
//! Real-time audio for the game using CPAL (Cross-Platform Audio Library).
//! A dedicated audio thread owns the microphone and speaker streams; the
//! round engine drives it through an [`AudioHandle`].
//!
//! ## Features
//! - Automatic device and format selection
//! - Microphone frames analysed into pitch samples
//! - Target note playback with a completion signal
//! - Listening suppression while a note is sounding
//!
//! Pitch samples and playback completions leave the audio thread as
//! [`EngineEvent`]s on a channel; the owner of the engine drains it.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::engine::{AudioIo, EngineEvent, PlaybackRequest};
use crate::error::AudioError;
use crate::pitch::PitchAnalyzer;
use crate::voice::{Instrument, Voice};

/// Audio buffer size for processing frames.
///
/// Larger buffers provide more frequency resolution but increase latency.
pub const BUFFER_SIZE: usize = 2048;

/// Preferred sample rate in Hz when the device states no preference.
const TARGET_SAMPLE_RATE: u32 = 44100;

/// Frames queued between the input callback and the analysis loop.
const FRAME_QUEUE: usize = 8;

enum AudioCommand {
    LoadInstrument(Instrument),
    Play(PlaybackRequest),
    StopAll,
    Shutdown,
}

/// The engine's view of the audio thread.
pub struct AudioHandle {
    commands: Sender<AudioCommand>,
    listening: Arc<AtomicBool>,
    has_output: bool,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioHandle {
    /// Whether target notes are actually sounding. Without an output stream
    /// the microphone still works and playback completes at once.
    pub fn has_output(&self) -> bool {
        self.has_output
    }
}

/// Starts the audio thread with the default input and output devices.
///
/// This function:
/// 1. Spawns the audio thread
/// 2. Opens the microphone and speaker streams on it
/// 3. Waits until capture runs, or reports why it could not
///
/// A missing or unusable speaker is not fatal: capture keeps running and
/// every playback completes immediately. Listening starts disabled.
///
/// # Arguments
/// * `events` - Channel receiving pitch samples and playback completions
///
/// # Returns
/// * `Ok(handle)` - Capture is running, see [`AudioHandle::has_output`]
/// * `Err(e)` - No usable input device or stream; nothing keeps running
pub fn start(events: Sender<EngineEvent>) -> Result<AudioHandle> {
    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<bool>>(1);
    let listening = Arc::new(AtomicBool::new(false));

    let thread_listening = listening.clone();
    let thread_handle = thread::Builder::new()
        .name("audio".into())
        .spawn(move || run_audio_thread(events, command_rx, thread_listening, ready_tx))
        .context("Could not spawn audio thread")?;

    match ready_rx.recv() {
        Ok(Ok(has_output)) => Ok(AudioHandle {
            commands: command_tx,
            listening,
            has_output,
            thread_handle: Some(thread_handle),
        }),
        Ok(Err(e)) => {
            let _ = thread_handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread_handle.join();
            Err(AudioError::Disconnected.into())
        }
    }
}

fn run_audio_thread(
    events: Sender<EngineEvent>,
    commands: Receiver<AudioCommand>,
    listening: Arc<AtomicBool>,
    ready: Sender<Result<bool>>,
) {
    info!("Starting audio thread...");
    let (raw_audio_tx, raw_audio_rx) = crossbeam_channel::bounded::<Vec<f32>>(FRAME_QUEUE);

    let (input, sample_rate) = match start_audio_capture(raw_audio_tx, listening.clone()) {
        Ok(tuple) => tuple,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let voice = Arc::new(Mutex::new(Voice::new(TARGET_SAMPLE_RATE)));
    let output = match start_playback(voice.clone(), events.clone()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("No audio output, target notes will not sound: {:#}", e);
            None
        }
    };
    let _ = ready.send(Ok(output.is_some()));
    let speaker = output.as_ref().map(|_| voice.as_ref());

    let mut analyzer = PitchAnalyzer::new(BUFFER_SIZE, sample_rate);
    loop {
        crossbeam_channel::select! {
            recv(raw_audio_rx) -> msg => match msg {
                Ok(frame) => {
                    let Some(sample) = analyzer.analyze(&frame) else { continue };
                    // Frames queued before listening was disabled are dropped here
                    if !listening.load(Ordering::Acquire) {
                        continue;
                    }
                    if events.send(EngineEvent::PitchSample(sample)).is_err() {
                        debug!("Engine event channel closed");
                        break;
                    }
                }
                Err(_) => {
                    warn!("Audio input channel closed");
                    break;
                }
            },
            recv(commands) -> msg => {
                let Ok(command) = msg else {
                    info!("Audio handle dropped");
                    break;
                };
                if handle_command(command, speaker, &events).is_break() {
                    break;
                }
            },
        }
    }

    if let Err(e) = input.pause() {
        warn!("Error pausing input stream: {}", e);
    }
    if let Some(output) = &output {
        if let Err(e) = output.pause() {
            warn!("Error pausing output stream: {}", e);
        }
    }
    drop(input);
    drop(output);
    info!("Audio thread finished");
}

/// Applies one command from the engine.
///
/// `voice` is `None` when there is no output stream. Playback then completes
/// at once so rounds keep advancing while the microphone still listens.
fn handle_command(
    command: AudioCommand,
    voice: Option<&Mutex<Voice>>,
    events: &Sender<EngineEvent>,
) -> ControlFlow<()> {
    match (command, voice) {
        (AudioCommand::LoadInstrument(instrument), Some(voice)) => {
            with_voice(voice, |v| v.set_instrument(instrument));
        }
        (AudioCommand::Play(request), Some(voice)) => {
            debug!("Playing {} for {:?}", request.note, request.duration);
            with_voice(voice, |v| v.start(&request));
        }
        (AudioCommand::Play(request), None) => {
            debug!("No output, completing playback {:?} at once", request.token);
            if events.send(EngineEvent::PlaybackFinished(request.token)).is_err() {
                debug!("Engine event channel closed");
                return ControlFlow::Break(());
            }
        }
        (AudioCommand::StopAll, Some(voice)) => with_voice(voice, Voice::stop),
        (AudioCommand::LoadInstrument(_) | AudioCommand::StopAll, None) => {}
        (AudioCommand::Shutdown, _) => {
            info!("Audio thread received shutdown signal");
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

fn with_voice(voice: &Mutex<Voice>, f: impl FnOnce(&mut Voice)) {
    match voice.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(_) => error!("Voice lock poisoned, ignoring command"),
    }
}

/// Starts audio capture from the default input device.
///
/// Multi-channel input is mixed down to mono. While `listening` is false
/// the callback throws captured audio away.
///
/// # Arguments
/// * `sender` - Channel sender for streaming audio frames to the analysis loop
/// * `listening` - Whether captured audio should be analysed at all
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Audio stream handle and sample rate
/// * `Err(e)` - Error if audio setup fails
fn start_audio_capture(
    sender: Sender<Vec<f32>>,
    listening: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoDevice("input"))?;

    info!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, TARGET_SAMPLE_RATE, 1)
        .ok_or(AudioError::UnsupportedConfig("input"))?;

    let rate = TARGET_SAMPLE_RATE.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
    let sample_rate = config.sample_rate().0;
    let channels = config.channels().max(1) as usize;
    let config: cpal::StreamConfig = config.into();

    info!("Selected input: {} Hz, {} channel(s)", sample_rate, channels);

    let err_fn = |err| error!("An error occurred on the input stream: {}", err);

    // Accumulates mono audio until a full frame is available.
    let mut audio_buffer = Vec::with_capacity(BUFFER_SIZE * 2);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if !listening.load(Ordering::Acquire) {
                audio_buffer.clear();
                return;
            }
            audio_buffer.extend(
                data.chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
            );

            while audio_buffer.len() >= BUFFER_SIZE {
                let frame_to_send = audio_buffer[..BUFFER_SIZE].to_vec();
                // Drop the frame if analysis is falling behind
                let _ = sender.try_send(frame_to_send);
                audio_buffer.drain(..BUFFER_SIZE);
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok((stream, sample_rate))
}

/// Starts the output stream that renders `voice`.
///
/// The callback sends `PlaybackFinished` as soon as the voice reports that
/// a note and its settle tail are done.
fn start_playback(voice: Arc<Mutex<Voice>>, events: Sender<EngineEvent>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoDevice("output"))?;

    info!("Using audio output device: {}", device.name()?);

    // The default config may not be f32, so only its rate is taken as a hint
    let preferred_rate = device
        .default_output_config()
        .map(|c| c.sample_rate().0)
        .unwrap_or(TARGET_SAMPLE_RATE);
    let configs = device.supported_output_configs()?.collect::<Vec<_>>();
    let supported = find_supported_config(configs, preferred_rate, 2)
        .ok_or(AudioError::UnsupportedConfig("output"))?;

    let rate = preferred_rate.clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
    let config: cpal::StreamConfig = supported.with_sample_rate(cpal::SampleRate(rate)).into();
    let channels = config.channels.max(1) as usize;

    info!("Selected output: {} Hz, {} channel(s)", rate, channels);

    if let Ok(mut v) = voice.lock() {
        *v = Voice::new(rate);
    }

    let err_fn = |err| error!("An error occurred on the output stream: {}", err);

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let finished = match voice.lock() {
                Ok(mut v) => v.render(data, channels),
                Err(_) => {
                    data.fill(0.0);
                    None
                }
            };
            if let Some(token) = finished {
                let _ = events.try_send(EngineEvent::PlaybackFinished(token));
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok(stream)
}

/// Finds the best supported f32 configuration for the target sample rate.
///
/// Configurations with `channels` channels are preferred; any other f32
/// layout is accepted (input is mixed down, output duplicated). Among
/// those, the one whose rate range is closest to `target_rate` wins.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
    channels: u16,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| (c.channels() != channels, rate_distance(c, target_rate)))
}

/// How far `target_rate` lies outside the config's supported rate range.
fn rate_distance(config: &SupportedStreamConfigRange, target_rate: u32) -> u32 {
    let min = config.min_sample_rate().0;
    let max = config.max_sample_rate().0;
    if target_rate < min {
        min - target_rate
    } else {
        target_rate.saturating_sub(max)
    }
}

impl AudioIo for AudioHandle {
    fn load_instrument(&mut self, instrument: &str) -> Result<(), AudioError> {
        let instrument = Instrument::from_name(instrument)?;
        self.commands
            .send(AudioCommand::LoadInstrument(instrument))
            .map_err(|_| AudioError::Disconnected)
    }

    fn schedule_playback(&mut self, request: PlaybackRequest) -> Result<(), AudioError> {
        self.commands
            .send(AudioCommand::Play(request))
            .map_err(|_| AudioError::Disconnected)
    }

    fn stop_all_notes(&mut self) {
        if self.commands.send(AudioCommand::StopAll).is_err() {
            warn!("Audio thread gone, cannot stop notes");
        }
    }

    fn set_listening(&mut self, enabled: bool) {
        self.listening.store(enabled, Ordering::Release);
    }
}

impl Drop for AudioHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(AudioCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Audio thread panicked");
            }
        }
    }
}

/// Stand-in used when no audio device could be opened.
///
/// Every playback completes at once, so rounds still advance and any
/// samples that do arrive are still classified.
pub struct SilentAudio {
    events: Sender<EngineEvent>,
}

impl SilentAudio {
    pub fn new(events: Sender<EngineEvent>) -> Self {
        Self { events }
    }
}

impl AudioIo for SilentAudio {
    fn load_instrument(&mut self, instrument: &str) -> Result<(), AudioError> {
        Instrument::from_name(instrument).map(|_| ())
    }

    fn schedule_playback(&mut self, request: PlaybackRequest) -> Result<(), AudioError> {
        self.events
            .send(EngineEvent::PlaybackFinished(request.token))
            .map_err(|_| AudioError::Disconnected)
    }

    fn stop_all_notes(&mut self) {}

    fn set_listening(&mut self, _enabled: bool) {}
}
