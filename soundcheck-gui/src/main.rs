//! # Sound Check - Ear Training GUI
//!
//! The main GUI application for Sound Check. A note is played, the player
//! sings or plays it back, and the game says whether the answer was right,
//! too high or too low.
//!
//! ## Architecture
//! - **Main Thread**: Iced GUI application owning the round engine
//! - **Audio Thread**: Microphone analysis and note playback
//! - **Communication**: Crossbeam channels carry engine events to the GUI
//!   thread and snapshots back out of the engine
//! - **Updates**: 60 FPS ticks drain both channels

mod ui;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::Receiver;
use iced::{Element, Subscription, Task, Theme};
use log::{LevelFilter, error, info};
use std::path::PathBuf;

use soundcheck_core::{
    AudioIo, EngineEvent, GameConfig, GameSnapshot, HistoryStore, JsonFileStore, MemoryStore,
    RoundEngine, audio::{self, SilentAudio},
};
use ui::game_display::create_game_view;

/// Command line options.
#[derive(Debug, Parser)]
#[command(name = "soundcheck", about = "Ear training: sing back the note you hear")]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Game configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where the attempts history is kept
    #[arg(long, default_value = "soundcheck_history.json")]
    history: PathBuf,

    /// Keep the attempts history for this session only
    #[arg(long)]
    no_history: bool,
}

/// Main entry point for the Sound Check application.
pub fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("Starting Sound Check...");
    let app = SoundCheckApp::new(&cli)?;

    iced::application("Sound Check", SoundCheckApp::update, SoundCheckApp::view)
        .subscription(SoundCheckApp::subscription)
        .theme(SoundCheckApp::theme)
        .run_with(move || (app, Task::none()))?;

    info!("Sound Check finished");
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // GUI and graphics crates stay at warn unless RUST_LOG says otherwise
    env_logger::Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter_module("soundcheck", level)
        .filter_module("soundcheck_core", level)
        .parse_default_env()
        .init();
}

/// Loads the config file if one was given, falling back to defaults.
fn load_config(path: Option<&PathBuf>) -> GameConfig {
    let Some(path) = path else {
        return GameConfig::default();
    };
    match GameConfig::load(path) {
        Ok(config) => {
            info!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            error!("Could not use config {}, using defaults: {}", path.display(), e);
            GameConfig::default()
        }
    }
}

/// Application message types for the Iced GUI framework.
#[derive(Debug, Clone)]
pub enum Message {
    /// Play the current target note again
    Replay,
    /// Reveal the too high / too low hint
    ShowHint,
    /// Timer tick for draining engine events
    Tick,
}

/// Whether sound could be started.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioStatus {
    Running,
    /// The microphone works but target notes cannot be heard
    InputOnly,
    Unavailable(String),
}

/// UI-specific data needed for rendering the interface.
#[derive(Debug, Clone)]
pub struct GameDisplayData {
    pub snapshot: GameSnapshot,
    pub hint_visible: bool,
    pub audio_status: AudioStatus,
}

type Engine = RoundEngine<Box<dyn AudioIo + Send>, Box<dyn HistoryStore + Send>>;

/// Main application state for Sound Check.
struct SoundCheckApp {
    engine: Engine,
    /// Samples and playback completions from the audio thread
    events: Receiver<EngineEvent>,
    /// Engine state changes
    snapshots: Receiver<GameSnapshot>,
    display_data: GameDisplayData,
}

impl SoundCheckApp {
    /// Builds the engine, starts audio and begins the first round.
    ///
    /// A missing audio device is reported in the view and the game runs
    /// without sound.
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_config(cli.config.as_ref());
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        let (audio_io, audio_status): (Box<dyn AudioIo + Send>, AudioStatus) =
            match audio::start(events_tx.clone()) {
                Ok(handle) => {
                    info!("Audio started");
                    let status = if handle.has_output() {
                        AudioStatus::Running
                    } else {
                        AudioStatus::InputOnly
                    };
                    (Box::new(handle), status)
                }
                Err(e) => {
                    error!("Could not start audio, continuing without sound: {:#}", e);
                    let status = AudioStatus::Unavailable(e.to_string());
                    (Box::new(SilentAudio::new(events_tx)), status)
                }
            };

        let store: Box<dyn HistoryStore + Send> = if cli.no_history {
            Box::new(MemoryStore::new())
        } else {
            Box::new(JsonFileStore::new(&cli.history))
        };

        let mut engine: Engine = RoundEngine::new(config, audio_io, store)?;
        let snapshots = engine.subscribe();
        let snapshot = engine.snapshot();
        engine.start_round();

        Ok(Self {
            engine,
            events: events_rx,
            snapshots,
            display_data: GameDisplayData {
                snapshot,
                hint_visible: false,
                audio_status,
            },
        })
    }

    fn update(&mut self, message: Message) {
        match message {
            Message::Replay => self.engine.replay(),
            Message::ShowHint => self.display_data.hint_visible = true,
            Message::Tick => {
                // Events are applied in arrival order on this thread only
                let events: Vec<EngineEvent> = self.events.try_iter().collect();
                for event in events {
                    self.engine.handle_event(event);
                }
                let snapshots: Vec<GameSnapshot> = self.snapshots.try_iter().collect();
                for snapshot in snapshots {
                    self.apply_snapshot(snapshot);
                }
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: GameSnapshot) {
        if snapshot.guess_name != self.display_data.snapshot.guess_name {
            self.display_data.hint_visible = false;
        }
        if snapshot.history != self.display_data.snapshot.history {
            info!("Round finished, recent attempts: {:?}", snapshot.history);
        }
        self.display_data.snapshot = snapshot;
    }

    fn view(&self) -> Element<'_, Message> {
        create_game_view(&self.display_data)
    }

    /// Fires every 16ms (60 FPS) to keep the game responsive.
    fn subscription(&self) -> Subscription<Message> {
        iced::time::every(std::time::Duration::from_millis(16)).map(|_| Message::Tick)
    }

    fn theme(&self) -> Theme {
        Theme::Dark
    }
}
