//! The engine: one worker thread that owns the sequencer and every
//! collaborator, fed by a single mailbox.
//!
//! Recognizers, cue players and operator commands all post into the same
//! channel, so transitions are applied strictly in arrival order and never
//! interleave. Capture ticks are driven by the mailbox timeout.

mod handle;

pub use handle::{EngineHandle, EngineSender};

use crate::capture::{
    format_elapsed, CaptureController, CaptureDevice, CaptureError, CapturePhase, CaptureSignal,
    DeviceConstraints, TakeSink,
};
use crate::cue_audio::{CueAudioController, CueDelivery, CueEvent, CuePlayer};
use crate::events::{EngineEvent, EventSink};
use crate::matcher::TranscriptMatcher;
use crate::script::ScriptIndex;
use crate::sequencer::{
    CueSequencer, Effect, SequencerError, SequencerOptions, SessionMode, SessionSnapshot,
};
use crate::settings::{EngineSettings, LiveSettings};
use crate::speech::{
    RecognizerDelivery, RecognizerEvent, SpeechOutcome, SpeechRecognizer, SpeechSessionManager,
    StreamId,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("engine is not running")]
    Disconnected,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Next,
    Previous,
    JumpTo(usize),
    TogglePause,
    Reset,
    UpdateSettings(LiveSettings),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureCommand {
    Record,
    TogglePause,
    Stop,
    Retake,
    SetCamera(bool),
    SetMicrophone(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureStatus {
    pub phase: CapturePhase,
    pub elapsed_seconds: u64,
    pub camera: bool,
    pub microphone: bool,
    pub device_acquired: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub session: SessionSnapshot,
    pub capture: Option<CaptureStatus>,
}

pub(crate) enum EngineMsg {
    Command(Command),
    Capture(CaptureCommand),
    Speech {
        stream: StreamId,
        event: RecognizerEvent,
    },
    Cue(CueEvent),
    Snapshot(mpsc::Sender<EngineSnapshot>),
    Shutdown(Option<mpsc::Sender<()>>),
}

/// Collaborators shared by both session kinds.
pub struct Collaborators {
    pub player: Box<dyn CuePlayer>,
    pub events: Arc<dyn EventSink>,
    /// Relative cue references resolve against this directory.
    pub cue_base_dir: Option<PathBuf>,
}

struct CaptureSession {
    controller: CaptureController,
    takes: Box<dyn TakeSink>,
    first_cue_delay: Duration,
}

struct Engine {
    sequencer: CueSequencer,
    speech: Option<SpeechSessionManager>,
    audio: CueAudioController,
    capture: Option<CaptureSession>,
    events: Arc<dyn EventSink>,
}

/// Spawns a rehearsal session: speech advances user lines, cues auto-play.
pub fn spawn_rehearsal(
    script: Arc<ScriptIndex>,
    settings: &EngineSettings,
    recognizer: Box<dyn SpeechRecognizer>,
    collaborators: Collaborators,
) -> Result<EngineHandle, EngineError> {
    let (tx, rx) = mpsc::channel();
    let sequencer = new_sequencer(script, settings, SequencerOptions::rehearsal())?;

    let speech_tx = tx.clone();
    let deliver: RecognizerDelivery = Arc::new(move |stream, event| {
        let _ = speech_tx.send(EngineMsg::Speech { stream, event });
    });
    let speech = SpeechSessionManager::new(recognizer, deliver);

    let engine = Engine::new(sequencer, Some(speech), None, collaborators, &tx);
    EngineHandle::spawn(engine, tx, rx)
}

/// Spawns a capture session. The device is opened immediately; a failure is
/// fatal only when `settings.capture_mandatory` is set.
pub fn spawn_capture(
    script: Arc<ScriptIndex>,
    settings: &EngineSettings,
    device: Box<dyn CaptureDevice>,
    takes: Box<dyn TakeSink>,
    collaborators: Collaborators,
) -> Result<EngineHandle, EngineError> {
    let (tx, rx) = mpsc::channel();
    let title = script.project_title().to_string();
    let sequencer = new_sequencer(script, settings, SequencerOptions::capture())?;

    let constraints = DeviceConstraints {
        camera: settings.camera_enabled,
        microphone: settings.microphone_enabled,
    };
    let (controller, warning) = CaptureController::new(
        device,
        constraints,
        settings.countdown_seconds,
        title,
        settings.capture_mandatory,
    )?;
    if let Some(e) = warning {
        collaborators.events.emit(EngineEvent::DeviceError {
            message: e.to_string(),
        });
    }

    let capture = CaptureSession {
        controller,
        takes,
        first_cue_delay: Duration::from_millis(settings.first_cue_delay_ms),
    };
    let engine = Engine::new(sequencer, None, Some(capture), collaborators, &tx);
    EngineHandle::spawn(engine, tx, rx)
}

fn new_sequencer(
    script: Arc<ScriptIndex>,
    settings: &EngineSettings,
    options: SequencerOptions,
) -> Result<CueSequencer, SequencerError> {
    let mut settings = settings.clone();
    settings.normalize();
    CueSequencer::new(
        script,
        TranscriptMatcher::new(settings.matcher.clone()),
        settings.live(),
        options,
    )
}

impl Engine {
    fn new(
        sequencer: CueSequencer,
        speech: Option<SpeechSessionManager>,
        capture: Option<CaptureSession>,
        collaborators: Collaborators,
        tx: &mpsc::Sender<EngineMsg>,
    ) -> Self {
        let cue_tx = tx.clone();
        let deliver: CueDelivery = Arc::new(move |event| {
            let _ = cue_tx.send(EngineMsg::Cue(event));
        });
        let mut audio =
            CueAudioController::new(collaborators.player, deliver, collaborators.cue_base_dir);
        audio.set_muted(sequencer.state().muted);

        Self {
            sequencer,
            speech,
            audio,
            capture,
            events: collaborators.events,
        }
    }

    /// Processes the mailbox until shutdown or until every sender is gone.
    fn run(mut self, rx: mpsc::Receiver<EngineMsg>) {
        info!("Engine started");
        let ack = loop {
            let msg = match self.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(timeout) {
                        Ok(msg) => msg,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            self.on_tick(Instant::now());
                            continue;
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => break None,
                    }
                }
                None => match rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break None,
                },
            };

            match msg {
                EngineMsg::Shutdown(ack) => break ack,
                msg => self.handle(msg),
            }
            // a busy mailbox must not hold back countdown and elapsed ticks
            let now = Instant::now();
            if self.next_deadline().is_some_and(|deadline| now >= deadline) {
                self.on_tick(now);
            }
        };

        self.teardown();
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.capture
            .as_ref()
            .and_then(|session| session.controller.next_tick())
    }

    fn handle(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::Command(command) => self.on_command(command),
            EngineMsg::Capture(command) => self.on_capture_command(command),
            EngineMsg::Speech { stream, event } => self.on_speech(stream, event),
            EngineMsg::Cue(event) => {
                self.audio.on_event(&event);
                let fx = match event {
                    CueEvent::Finished { playback } => self.sequencer.on_cue_finished(playback),
                    CueEvent::Failed { playback, error } => {
                        self.sequencer.on_cue_failed(playback, error)
                    }
                };
                self.apply(fx);
            }
            EngineMsg::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            EngineMsg::Shutdown(_) => {}
        }
    }

    fn on_command(&mut self, command: Command) {
        debug!("Command {:?}", command);
        let fx = match command {
            Command::Start => self.sequencer.start(),
            Command::Next => self.sequencer.next(),
            Command::Previous => self.sequencer.previous(),
            Command::JumpTo(index) => self.sequencer.jump_to(index),
            Command::TogglePause => self.sequencer.toggle_pause(),
            Command::Reset => self.sequencer.reset(),
            Command::UpdateSettings(live) => {
                let mut fx = self.sequencer.update_settings(live);
                if self.recording_active() {
                    fx.extend(self.sequencer.set_cue_playback(live.auto_play_cues));
                }
                fx
            }
        };
        self.apply(fx);
    }

    fn on_speech(&mut self, stream: StreamId, event: RecognizerEvent) {
        let Some(speech) = self.speech.as_mut() else {
            return;
        };
        match speech.handle(stream, event, self.sequencer.state()) {
            SpeechOutcome::Update(update) => {
                let fx = self.sequencer.on_speech(update);
                self.apply(fx);
            }
            SpeechOutcome::Report(e) => self.events.emit(EngineEvent::RecognitionError {
                message: e.to_string(),
            }),
            SpeechOutcome::RestartFailed(e) => {
                self.events.emit(EngineEvent::RecognitionError {
                    message: e.to_string(),
                });
                let fx = self.sequencer.listening_lost();
                self.apply(fx);
            }
            SpeechOutcome::Restarted | SpeechOutcome::Ignored => {}
        }
    }

    /// Executes effects in order. Follow-up effects produced while executing
    /// (a cue that cannot play, a recognizer that cannot start) run after the
    /// ones already queued.
    fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::StartListening | Effect::RestartListening => {
                    let started = match self.speech.as_mut() {
                        Some(speech) => speech.start(),
                        None => Ok(()),
                    };
                    if let Err(e) = started {
                        warn!("Failed to start speech recognition: {}", e);
                        self.events.emit(EngineEvent::RecognitionError {
                            message: e.to_string(),
                        });
                        queue.extend(self.sequencer.listening_lost());
                    }
                }
                Effect::StopListening => {
                    if let Some(speech) = self.speech.as_mut() {
                        speech.stop();
                    }
                }
                Effect::ClearTranscript => {
                    if let Some(speech) = self.speech.as_mut() {
                        speech.clear();
                    }
                }
                Effect::PlayCue {
                    playback,
                    line_id,
                    source,
                    delay,
                } => {
                    if let Err(e) = self.audio.play(playback, &source, delay) {
                        warn!("Cue audio for line {} unavailable: {}", line_id, e);
                        queue.extend(self.sequencer.on_cue_failed(playback, e.to_string()));
                    }
                }
                Effect::StopCue => self.audio.stop(),
                Effect::SetMuted(muted) => self.audio.set_muted(muted),
                Effect::Emit(event) => self.events.emit(event),
            }
        }
    }

    fn recording_active(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|session| session.controller.phase() == CapturePhase::Recording)
    }

    fn on_tick(&mut self, now: Instant) {
        if let Some(session) = self.capture.as_mut() {
            let signals = session.controller.on_tick(now);
            self.apply_capture(signals);
        }
    }

    fn on_capture_command(&mut self, command: CaptureCommand) {
        let Some(session) = self.capture.as_mut() else {
            warn!("{:?} ignored outside a capture session", command);
            return;
        };
        debug!("Capture command {:?}", command);
        let now = Instant::now();

        match command {
            CaptureCommand::Record => match session.controller.begin_countdown(now) {
                Ok(signals) => self.apply_capture(signals),
                Err(e) => self.device_error(e),
            },
            CaptureCommand::TogglePause => match session.controller.toggle_pause(now) {
                Ok(signals) => {
                    let paused = session.controller.phase() == CapturePhase::PausedRecording;
                    self.apply_capture(signals);
                    let mode = self.sequencer.state().mode;
                    let follow = if paused {
                        mode.is_active()
                    } else {
                        mode == SessionMode::Paused
                    };
                    if follow {
                        let fx = self.sequencer.toggle_pause();
                        self.apply(fx);
                    }
                }
                Err(e) => self.device_error(e),
            },
            CaptureCommand::Stop => {
                let stopped = session.controller.stop();
                let phase = session.controller.phase();
                let stored = match &stopped {
                    Ok((Some(take), _)) => Some(session.takes.store(take)),
                    _ => None,
                };

                match stopped {
                    Ok((take, signals)) => {
                        self.apply_capture(signals);
                        self.stop_sequencer(false);
                        match (take, stored) {
                            (Some(take), Some(Ok(location))) => {
                                self.events.emit(EngineEvent::TakeReady {
                                    elapsed_seconds: take.elapsed_seconds,
                                    mime_type: take.mime_type,
                                    byte_len: take.media.len(),
                                    location,
                                })
                            }
                            (Some(_), Some(Err(e))) => {
                                warn!("Failed to store take: {:#}", e);
                                self.events.emit(EngineEvent::TakeFailed {
                                    message: format!("{:#}", e),
                                });
                            }
                            _ => {}
                        }
                    }
                    Err(CaptureError::InvalidPhase(phase)) => {
                        self.device_error(CaptureError::InvalidPhase(phase))
                    }
                    Err(e) => {
                        self.events
                            .emit(EngineEvent::CapturePhaseChanged { phase });
                        self.stop_sequencer(false);
                        self.events.emit(EngineEvent::TakeFailed {
                            message: e.to_string(),
                        });
                    }
                }
            }
            CaptureCommand::Retake => match session.controller.retake() {
                Ok(signals) => {
                    self.apply_capture(signals);
                    self.stop_sequencer(true);
                }
                Err(e) => self.device_error(e),
            },
            CaptureCommand::SetCamera(camera) => {
                let constraints = DeviceConstraints {
                    camera,
                    ..session.controller.constraints()
                };
                if let Err(e) = session.controller.set_constraints(constraints) {
                    self.device_error(e);
                }
            }
            CaptureCommand::SetMicrophone(microphone) => {
                let constraints = DeviceConstraints {
                    microphone,
                    ..session.controller.constraints()
                };
                if let Err(e) = session.controller.set_constraints(constraints) {
                    self.device_error(e);
                }
            }
        }
    }

    /// Cues stay silent until the next recording starts.
    fn stop_sequencer(&mut self, rewind: bool) {
        let mut fx = self.sequencer.set_cue_playback(false);
        fx.extend(self.sequencer.stop(rewind));
        self.apply(fx);
    }

    fn apply_capture(&mut self, signals: Vec<CaptureSignal>) {
        for signal in signals {
            match signal {
                CaptureSignal::PhaseChanged(phase) => {
                    self.events.emit(EngineEvent::CapturePhaseChanged { phase })
                }
                CaptureSignal::CountdownTick(remaining) => {
                    self.events.emit(EngineEvent::CountdownTick { remaining })
                }
                CaptureSignal::RecordingStarted => {
                    let delay = self
                        .capture
                        .as_ref()
                        .map(|session| session.first_cue_delay)
                        .unwrap_or_default();
                    let auto_play_cues = self.sequencer.live_settings().auto_play_cues;

                    let mut fx = self.sequencer.set_cue_playback(auto_play_cues);
                    self.sequencer.set_next_cue_delay(delay);
                    fx.extend(self.sequencer.reset());
                    self.apply(fx);
                }
                CaptureSignal::RecordingTick(elapsed_seconds) => {
                    self.events.emit(EngineEvent::RecordingTick {
                        elapsed_seconds,
                        display: format_elapsed(elapsed_seconds),
                    })
                }
                CaptureSignal::RecordingFailed(message) => {
                    self.events.emit(EngineEvent::DeviceError { message })
                }
            }
        }
    }

    fn device_error(&self, error: CaptureError) {
        warn!("Capture: {}", error);
        self.events.emit(EngineEvent::DeviceError {
            message: error.to_string(),
        });
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            session: self.sequencer.snapshot(),
            capture: self.capture.as_ref().map(|session| {
                let constraints = session.controller.constraints();
                CaptureStatus {
                    phase: session.controller.phase(),
                    elapsed_seconds: session.controller.elapsed_seconds(),
                    camera: constraints.camera,
                    microphone: constraints.microphone,
                    device_acquired: session.controller.is_device_acquired(),
                }
            }),
        }
    }

    fn teardown(&mut self) {
        let fx = self.sequencer.stop(false);
        self.apply(fx);
        if let Some(speech) = self.speech.as_mut() {
            speech.stop();
        }
        self.audio.stop();
        if let Some(session) = self.capture.as_mut() {
            session.controller.dispose();
        }
        info!("Engine stopped");
    }
}

#[cfg(test)]
mod tests;
