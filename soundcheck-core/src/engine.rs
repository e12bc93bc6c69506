//! # Round Engine Module
//!
//! The state machine behind the game. A round picks a random target note,
//! plays it, then listens to the player's pitch samples until one of them
//! lands on the target.
//!
//! ## Phases
//! - **Idle**: constructed, no round started yet
//! - **Playing**: the target note is sounding, incoming samples are ignored
//! - **Listening**: samples are classified and compared with the target
//!
//! All methods must be called from one owning thread. Samples and playback
//! completions produced on the audio thread are marshalled there as
//! [`EngineEvent`]s and fed through [`RoundEngine::handle_event`].

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::Duration;

use crate::PitchSample;
use crate::config::GameConfig;
use crate::error::{AudioError, ConfigError};
use crate::history::{AttemptsHistory, HistoryStore};
use crate::note::{Note, frequency_to_note};

/// Identifies one playback command. Issued in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaybackToken(pub u64);

/// Everything the audio collaborator needs to sound a target note.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    pub note: Note,
    pub instrument: String,
    /// How long the note sounds
    pub duration: Duration,
    /// Silence after the note before the playback counts as finished
    pub settle: Duration,
    /// Echoed back in [`EngineEvent::PlaybackFinished`]
    pub token: PlaybackToken,
}

/// The audio side of the game, as seen by the engine.
///
/// Playback is asynchronous: `schedule_playback` returns at once and the
/// implementation later delivers `EngineEvent::PlaybackFinished` with the
/// request's token.
pub trait AudioIo {
    /// Switches the voice used by subsequent playback.
    fn load_instrument(&mut self, instrument: &str) -> Result<(), AudioError>;

    fn schedule_playback(&mut self, request: PlaybackRequest) -> Result<(), AudioError>;

    /// Silences every sounding note without reporting a completion.
    fn stop_all_notes(&mut self);

    /// Enables or suppresses delivery of pitch samples.
    fn set_listening(&mut self, enabled: bool);
}

impl<T: AudioIo + ?Sized> AudioIo for Box<T> {
    fn load_instrument(&mut self, instrument: &str) -> Result<(), AudioError> {
        (**self).load_instrument(instrument)
    }

    fn schedule_playback(&mut self, request: PlaybackRequest) -> Result<(), AudioError> {
        (**self).schedule_playback(request)
    }

    fn stop_all_notes(&mut self) {
        (**self).stop_all_notes()
    }

    fn set_listening(&mut self, enabled: bool) {
        (**self).set_listening(enabled)
    }
}

/// Input to the engine from the audio thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    PitchSample(PitchSample),
    PlaybackFinished(PlaybackToken),
}

/// Hint shown after a wrong guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Feedback {
    #[default]
    None,
    TooHigh,
    TooLow,
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feedback::None => Ok(()),
            Feedback::TooHigh => write!(f, "Too high!"),
            Feedback::TooLow => write!(f, "Too low!"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Playing { token: PlaybackToken },
    Listening,
}

/// Per-round state. Reset whenever a new round starts.
#[derive(Debug, Clone, PartialEq)]
struct RoundState {
    target_note: Note,
    /// Most recent distinct guess; its name is what the player sees
    last_guess: Option<Note>,
    feedback: Feedback,
    /// Distinct wrong guesses this round
    mistake_count: u32,
}

impl RoundState {
    fn new(target_note: Note) -> Self {
        Self {
            target_note,
            last_guess: None,
            feedback: Feedback::None,
            mistake_count: 0,
        }
    }
}

/// What the presentation layer may see. Never includes the target note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSnapshot {
    pub phase: Phase,
    pub mistake_count: u32,
    pub feedback: Feedback,
    /// Name of the current guess, empty before the first guess of a round
    pub guess_name: String,
    /// Mistake counts of recent rounds, newest first
    pub history: Vec<u32>,
}

pub struct RoundEngine<A: AudioIo, S: HistoryStore> {
    config: GameConfig,
    audio: A,
    history: AttemptsHistory<S>,
    rng: StdRng,
    phase: Phase,
    round: RoundState,
    /// Instrument of the last successful load
    instrument: String,
    next_token: u64,
    subscribers: Vec<Sender<GameSnapshot>>,
}

impl<A: AudioIo, S: HistoryStore> RoundEngine<A, S> {
    /// Creates an idle engine and loads the attempts history from `store`.
    ///
    /// # Returns
    /// * `Err(e)` - The config fails validation
    pub fn new(config: GameConfig, audio: A, store: S) -> Result<Self, ConfigError> {
        Self::with_rng(config, audio, store, StdRng::from_os_rng())
    }

    /// Like [`RoundEngine::new`] with a caller-supplied random source.
    pub fn with_rng(
        config: GameConfig,
        audio: A,
        store: S,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let history = AttemptsHistory::load(store, config.history_capacity);
        let (lowest, _) = config.note_range();
        let instrument = config.instruments[0].clone();
        Ok(Self {
            config,
            audio,
            history,
            rng,
            phase: Phase::Idle,
            round: RoundState::new(lowest),
            instrument,
            next_token: 0,
            subscribers: Vec::new(),
        })
    }

    /// Begins a new round with a fresh random target note.
    ///
    /// Resets the mistake count, feedback and current guess, picks an
    /// instrument and starts playback. Samples are ignored until the
    /// playback reports completion.
    pub fn start_round(&mut self) {
        let (lowest, highest) = self.config.note_range();
        let number = self.rng.random_range(lowest.number()..=highest.number());
        self.round = RoundState::new(Note::new(number).unwrap_or(lowest));
        self.select_instrument();

        info!("Starting a new round");
        debug!("Target note is {}", self.round.target_note);
        self.play_target();
    }

    /// Plays the current target again without touching the round's score.
    pub fn replay(&mut self) {
        if self.phase == Phase::Idle {
            debug!("Replay requested before the first round, ignoring");
            return;
        }
        info!("Replaying the target note");
        self.play_target();
    }

    /// Resumes listening once the playback identified by `token` is over.
    ///
    /// Completions of superseded playbacks (a replay or a new round was
    /// started meanwhile) are dropped.
    pub fn on_playback_finished(&mut self, token: PlaybackToken) {
        match self.phase {
            Phase::Playing { token: current } if current == token => {
                debug!("Playback {:?} finished, listening", token);
                self.begin_listening();
                self.publish();
            }
            _ => debug!("Ignoring stale playback completion {:?}", token),
        }
    }

    /// Evaluates one pitch sample against the target note.
    ///
    /// Ignored unless listening, below the noise gate, unclassifiable, or
    /// naming the same note as the previous guess. A hit records the round
    /// in the history and starts the next one; a miss counts a mistake and
    /// sets the too high / too low hint.
    pub fn on_pitch_sample(&mut self, sample: PitchSample) {
        if self.phase != Phase::Listening {
            trace!("Not listening, dropping sample {:?}", sample);
            return;
        }
        if !(sample.amplitude > self.config.amplitude_threshold) {
            return;
        }
        let Some(guess) = frequency_to_note(sample.frequency) else {
            debug!("Unclassifiable frequency {}", sample.frequency);
            return;
        };
        if self.round.last_guess.map(Note::name) == Some(guess.name()) {
            return;
        }
        self.round.last_guess = Some(guess);

        if guess == self.round.target_note {
            let mistakes = self.round.mistake_count;
            info!("Correct: {} after {} mistakes", guess, mistakes);
            self.history.record(mistakes);
            self.start_round();
            return;
        }

        self.round.mistake_count += 1;
        self.round.feedback = if guess > self.round.target_note {
            Feedback::TooHigh
        } else {
            Feedback::TooLow
        };
        debug!("Guessed {}: {}", guess, self.round.feedback);
        self.publish();
    }

    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::PitchSample(sample) => self.on_pitch_sample(sample),
            EngineEvent::PlaybackFinished(token) => self.on_playback_finished(token),
        }
    }

    /// Returns a channel that receives the current snapshot immediately and
    /// a new one after every observable change.
    pub fn subscribe(&mut self) -> Receiver<GameSnapshot> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let _ = tx.send(self.snapshot());
        self.subscribers.push(tx);
        rx
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            phase: self.phase,
            mistake_count: self.round.mistake_count,
            feedback: self.round.feedback,
            guess_name: self.guess_name(),
            history: self.history.records().to_vec(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mistake_count(&self) -> u32 {
        self.round.mistake_count
    }

    pub fn feedback(&self) -> Feedback {
        self.round.feedback
    }

    pub fn guess_name(&self) -> String {
        self.round
            .last_guess
            .map(|note| note.to_string())
            .unwrap_or_default()
    }

    pub fn history(&self) -> &[u32] {
        self.history.records()
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    fn select_instrument(&mut self) {
        let index = self.rng.random_range(0..self.config.instruments.len());
        let choice = &self.config.instruments[index];
        match self.audio.load_instrument(choice) {
            Ok(()) => self.instrument = choice.clone(),
            Err(e) => warn!(
                "Could not load instrument {}, keeping {}: {}",
                choice, self.instrument, e
            ),
        }
    }

    fn play_target(&mut self) {
        self.audio.set_listening(false);
        self.audio.stop_all_notes();

        let token = PlaybackToken(self.next_token);
        self.next_token += 1;
        self.phase = Phase::Playing { token };

        let request = PlaybackRequest {
            note: self.round.target_note,
            instrument: self.instrument.clone(),
            duration: self.config.note_duration(),
            settle: self.config.settle_duration(),
            token,
        };
        if let Err(e) = self.audio.schedule_playback(request) {
            error!("Could not play the target note, listening anyway: {}", e);
            self.begin_listening();
        }
        self.publish();
    }

    fn begin_listening(&mut self) {
        self.phase = Phase::Listening;
        self.audio.set_listening(true);
    }

    fn publish(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryStore;

    #[derive(Debug, Default)]
    struct MockAudio {
        loads: Vec<String>,
        played: Vec<PlaybackRequest>,
        listening: Vec<bool>,
        stops: usize,
        fail_playback: bool,
    }

    impl AudioIo for MockAudio {
        fn load_instrument(&mut self, instrument: &str) -> Result<(), AudioError> {
            self.loads.push(instrument.to_string());
            if instrument == "Broken" {
                return Err(AudioError::UnknownInstrument(instrument.to_string()));
            }
            Ok(())
        }

        fn schedule_playback(&mut self, request: PlaybackRequest) -> Result<(), AudioError> {
            if self.fail_playback {
                return Err(AudioError::Disconnected);
            }
            self.played.push(request);
            Ok(())
        }

        fn stop_all_notes(&mut self) {
            self.stops += 1;
        }

        fn set_listening(&mut self, enabled: bool) {
            self.listening.push(enabled);
        }
    }

    type TestEngine = RoundEngine<MockAudio, MemoryStore>;

    fn engine_with(config: GameConfig) -> TestEngine {
        RoundEngine::with_rng(
            config,
            MockAudio::default(),
            MemoryStore::new(),
            StdRng::seed_from_u64(7),
        )
        .unwrap()
    }

    fn engine() -> TestEngine {
        engine_with(GameConfig::default())
    }

    fn sample(frequency: f32) -> PitchSample {
        PitchSample {
            frequency,
            amplitude: 0.5,
        }
    }

    fn note(number: u8) -> Note {
        Note::new(number).unwrap()
    }

    fn current_token(engine: &TestEngine) -> PlaybackToken {
        match engine.phase() {
            Phase::Playing { token } => token,
            other => panic!("expected Playing, got {:?}", other),
        }
    }

    fn finish_playback(engine: &mut TestEngine) {
        let token = current_token(engine);
        engine.on_playback_finished(token);
        assert_eq!(engine.phase(), Phase::Listening);
    }

    /// Starts a round on `target` and waits until the engine listens.
    fn listening_on(engine: &mut TestEngine, target: u8) {
        engine.start_round();
        engine.round.target_note = note(target);
        finish_playback(engine);
    }

    #[test]
    fn test_new_engine_is_idle() {
        let mut engine = engine();
        assert_eq!(engine.phase(), Phase::Idle);

        engine.on_pitch_sample(sample(261.63));
        engine.replay();
        assert_eq!(engine.phase(), Phase::Idle);
        assert!(engine.audio.played.is_empty());
        assert_eq!(engine.guess_name(), "");
    }

    #[test]
    fn test_start_round_schedules_playback() {
        let mut engine = engine();
        engine.start_round();

        let token = current_token(&engine);
        assert_eq!(engine.audio.played.len(), 1);
        let request = &engine.audio.played[0];
        assert_eq!(request.token, token);
        assert_eq!(request.note, engine.round.target_note);
        assert_eq!(request.instrument, "Piano");
        assert_eq!(request.duration, Duration::from_secs(2));
        assert_eq!(request.settle, Duration::from_secs(1));
        assert_eq!(engine.audio.listening, vec![false]);
        assert_eq!(engine.audio.loads, vec!["Piano"]);
    }

    #[test]
    fn test_targets_stay_in_range() {
        let mut engine = engine();
        for _ in 0..200 {
            engine.start_round();
            let target = engine.round.target_note.number();
            assert!((40..=76).contains(&target), "target {} out of range", target);
        }

        let config = GameConfig {
            lowest_note: 64,
            highest_note: 64,
            ..GameConfig::default()
        };
        let mut fixed = engine_with(config);
        fixed.start_round();
        assert_eq!(fixed.round.target_note, note(64));
    }

    #[test]
    fn test_samples_ignored_while_playing() {
        let mut engine = engine();
        engine.start_round();
        let target_hz = engine.round.target_note.frequency();
        let before = engine.snapshot();
        let round_before = engine.round.clone();

        for frequency in [target_hz, 100.0, 440.0, target_hz] {
            engine.on_pitch_sample(sample(frequency));
        }
        assert_eq!(engine.snapshot(), before);
        assert_eq!(engine.round, round_before);
        assert!(engine.history().is_empty());
    }

    #[test]
    fn test_stale_playback_completion_is_ignored() {
        let mut engine = engine();
        engine.start_round();
        let first = current_token(&engine);
        engine.replay();
        let second = current_token(&engine);
        assert!(second > first);

        engine.on_playback_finished(first);
        assert_eq!(engine.phase(), Phase::Playing { token: second });

        engine.on_playback_finished(second);
        assert_eq!(engine.phase(), Phase::Listening);
        assert_eq!(engine.audio.listening.last(), Some(&true));

        // A late duplicate does nothing once listening
        engine.on_playback_finished(second);
        assert_eq!(engine.phase(), Phase::Listening);
    }

    #[test]
    fn test_noise_gate() {
        let mut engine = engine();
        listening_on(&mut engine, 60);
        let before = engine.snapshot();

        for amplitude in [0.0, 0.1, 0.2, f32::NAN] {
            engine.on_pitch_sample(PitchSample {
                frequency: 440.0,
                amplitude,
            });
        }
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn test_invalid_frequencies_are_ignored() {
        let mut engine = engine();
        listening_on(&mut engine, 60);
        let before = engine.snapshot();

        for frequency in [0.0, -261.63, f32::NAN, f32::INFINITY] {
            engine.on_pitch_sample(sample(frequency));
        }
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn test_repeated_guess_is_suppressed() {
        let mut engine = engine();
        listening_on(&mut engine, 60);

        engine.on_pitch_sample(sample(220.0));
        let after_first = engine.snapshot();
        assert_eq!(after_first.mistake_count, 1);
        assert_eq!(after_first.guess_name, "A3");

        // 221 Hz is still A3
        engine.on_pitch_sample(sample(221.0));
        engine.on_pitch_sample(sample(220.0));
        assert_eq!(engine.snapshot(), after_first);

        engine.on_pitch_sample(sample(246.94));
        assert_eq!(engine.mistake_count(), 2);
        assert_eq!(engine.guess_name(), "B3");
    }

    #[test]
    fn test_end_to_end_scenario() {
        let mut engine = engine();
        listening_on(&mut engine, 60);

        engine.on_pitch_sample(sample(261.0));
        assert_eq!(engine.history(), &[0]);
        assert_eq!(engine.mistake_count(), 0);
        assert_eq!(engine.feedback(), Feedback::None);
        assert_eq!(engine.guess_name(), "");
        assert!(matches!(engine.phase(), Phase::Playing { .. }));

        engine.round.target_note = note(64);
        finish_playback(&mut engine);

        engine.on_pitch_sample(sample(220.0));
        assert_eq!(engine.feedback(), Feedback::TooLow);
        assert_eq!(engine.mistake_count(), 1);

        engine.on_pitch_sample(sample(349.0));
        assert_eq!(engine.feedback(), Feedback::TooHigh);
        assert_eq!(engine.mistake_count(), 2);

        engine.on_pitch_sample(sample(330.0));
        assert_eq!(engine.history(), &[2, 0]);
        assert_eq!(engine.mistake_count(), 0);
        assert_eq!(engine.feedback(), Feedback::None);
        assert_eq!(engine.store_contents(), vec![2, 0]);
    }

    #[test]
    fn test_success_starts_new_round() {
        let mut engine = engine();
        listening_on(&mut engine, 50);
        engine.on_pitch_sample(sample(440.0));
        let played_before = engine.audio.played.len();
        let token_before = engine.audio.played.last().unwrap().token;

        engine.on_pitch_sample(sample(note(50).frequency()));
        assert_eq!(engine.audio.played.len(), played_before + 1);
        let request = engine.audio.played.last().unwrap();
        assert!(request.token > token_before);
        assert_eq!(request.note, engine.round.target_note);
        assert_eq!(engine.round.last_guess, None);
        assert_eq!(engine.history(), &[1]);
    }

    #[test]
    fn test_replay_keeps_score() {
        let mut engine = engine();
        listening_on(&mut engine, 60);
        engine.on_pitch_sample(sample(440.0));
        let target = engine.round.target_note;

        engine.replay();
        assert!(matches!(engine.phase(), Phase::Playing { .. }));
        assert_eq!(engine.round.target_note, target);
        assert_eq!(engine.mistake_count(), 1);
        assert_eq!(engine.feedback(), Feedback::TooHigh);
        assert_eq!(engine.guess_name(), "A4");
        assert_eq!(engine.audio.played.last().unwrap().note, target);

        // Still deaf until the replay is over
        engine.on_pitch_sample(sample(target.frequency()));
        assert!(engine.history().is_empty());

        finish_playback(&mut engine);
        engine.on_pitch_sample(sample(target.frequency()));
        assert_eq!(engine.history(), &[1]);
    }

    #[test]
    fn test_failed_instrument_keeps_previous() {
        let config = GameConfig {
            instruments: vec!["Piano".into(), "Broken".into()],
            ..GameConfig::default()
        };
        let mut engine = engine_with(config);
        for _ in 0..30 {
            engine.start_round();
        }
        assert!(engine.audio.loads.iter().any(|name| name == "Broken"));
        assert_eq!(engine.audio.played.len(), 30);
        assert!(engine.audio.played.iter().all(|r| r.instrument == "Piano"));
    }

    #[test]
    fn test_failed_playback_still_listens() {
        let mut engine = engine();
        engine.audio.fail_playback = true;
        engine.start_round();
        assert_eq!(engine.phase(), Phase::Listening);

        let target = engine.round.target_note;
        engine.on_pitch_sample(sample(target.frequency()));
        assert_eq!(engine.history(), &[0]);
    }

    #[test]
    fn test_subscribers_receive_snapshots() {
        let mut engine = engine();
        let updates = engine.subscribe();
        assert_eq!(updates.try_recv().unwrap().phase, Phase::Idle);

        listening_on(&mut engine, 60);
        let latest = updates.try_iter().last().unwrap();
        assert_eq!(latest.phase, Phase::Listening);

        engine.on_pitch_sample(sample(220.0));
        let latest = updates.try_iter().last().unwrap();
        assert_eq!(latest.feedback, Feedback::TooLow);
        assert_eq!(latest.mistake_count, 1);
        assert_eq!(latest.guess_name, "A3");

        // Suppressed samples publish nothing
        engine.on_pitch_sample(sample(220.0));
        assert!(updates.try_recv().is_err());

        drop(updates);
        engine.on_pitch_sample(sample(440.0));
        assert!(engine.subscribers.is_empty());
    }

    #[test]
    fn test_history_loaded_from_store() {
        let mut engine = RoundEngine::with_rng(
            GameConfig::default(),
            MockAudio::default(),
            MemoryStore::with_attempts(vec![3, 1]),
            StdRng::seed_from_u64(1),
        )
        .unwrap();
        assert_eq!(engine.snapshot().history, vec![3, 1]);

        listening_on(&mut engine, 69);
        engine.on_pitch_sample(sample(440.0));
        assert_eq!(engine.history(), &[0, 3, 1]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = GameConfig {
            instruments: vec![],
            ..GameConfig::default()
        };
        let result = RoundEngine::with_rng(
            config,
            MockAudio::default(),
            MemoryStore::new(),
            StdRng::seed_from_u64(1),
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let endless_note = GameConfig {
            note_duration_secs: 1e30,
            ..GameConfig::default()
        };
        let result = RoundEngine::with_rng(
            endless_note,
            MockAudio::default(),
            MemoryStore::new(),
            StdRng::seed_from_u64(1),
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_event_dispatch() {
        let mut engine = engine();
        engine.start_round();
        engine.round.target_note = note(60);
        let token = current_token(&engine);

        engine.handle_event(EngineEvent::PlaybackFinished(token));
        assert_eq!(engine.phase(), Phase::Listening);

        engine.handle_event(EngineEvent::PitchSample(sample(330.0)));
        assert_eq!(engine.feedback(), Feedback::TooHigh);
    }

    impl TestEngine {
        fn store_contents(&self) -> Vec<u32> {
            self.history.store().load().unwrap()
        }
    }
}
