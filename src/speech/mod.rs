//! Speech session management.
//!
//! A [`SpeechRecognizer`] delivers results for one stream at a time. Browsers
//! and native engines end their streams on silence, so the manager restarts
//! the stream whenever the session still wants to listen.

mod console;

pub use console::ConsoleRecognizer;

use crate::sequencer::{SessionMode, SessionState};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Consecutive restarts without a single result before giving up.
const MAX_RESTARTS_WITHOUT_RESULT: u32 = 5;

pub type StreamId = u64;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("no speech detected")]
    NoSpeechDetected,
    #[error("microphone access was denied")]
    NotAllowed,
    #[error("audio capture failed: {0}")]
    AudioCapture(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("speech recognition is not available")]
    Unsupported,
    #[error("{0}")]
    Other(String),
}

impl RecognitionError {
    /// Silence is normal during rehearsal.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, RecognitionError::NoSpeechDetected)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    Result { text: String, is_final: bool },
    Error(RecognitionError),
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechUpdate {
    pub text: String,
    pub is_final: bool,
    pub timestamp: Instant,
}

impl SpeechUpdate {
    pub fn new(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
            timestamp: Instant::now(),
        }
    }
}

pub type RecognizerDelivery = Arc<dyn Fn(StreamId, RecognizerEvent) + Send + Sync>;

/// Handed to a recognizer on `start`; tags everything it emits with the
/// stream it belongs to.
#[derive(Clone)]
pub struct RecognizerEvents {
    stream: StreamId,
    deliver: RecognizerDelivery,
}

impl RecognizerEvents {
    pub fn new(stream: StreamId, deliver: RecognizerDelivery) -> Self {
        Self { stream, deliver }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn emit(&self, event: RecognizerEvent) {
        (self.deliver)(self.stream, event)
    }
}

/// Streaming speech-to-text collaborator.
pub trait SpeechRecognizer: Send {
    fn start(&mut self, events: RecognizerEvents) -> Result<(), RecognitionError>;
    fn stop(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechOutcome {
    /// Forward to the sequencer.
    Update(SpeechUpdate),
    Restarted,
    /// The stream ended and could not be brought back; listening is lost.
    RestartFailed(RecognitionError),
    /// Non-fatal, surface to the operator.
    Report(RecognitionError),
    Ignored,
}

pub struct SpeechSessionManager {
    recognizer: Box<dyn SpeechRecognizer>,
    deliver: RecognizerDelivery,
    active_stream: Option<StreamId>,
    next_stream: StreamId,
    final_text: Option<String>,
    interim_text: String,
    restarts_without_result: u32,
}

impl SpeechSessionManager {
    pub fn new(recognizer: Box<dyn SpeechRecognizer>, deliver: RecognizerDelivery) -> Self {
        Self {
            recognizer,
            deliver,
            active_stream: None,
            next_stream: 1,
            final_text: None,
            interim_text: String::new(),
            restarts_without_result: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active_stream.is_some()
    }

    /// Opens a fresh stream, closing the current one first.
    pub fn start(&mut self) -> Result<(), RecognitionError> {
        if self.active_stream.is_some() {
            self.recognizer.stop();
        }
        self.restarts_without_result = 0;
        self.clear();
        self.open_stream()
    }

    fn open_stream(&mut self) -> Result<(), RecognitionError> {
        let stream = self.next_stream;
        self.next_stream += 1;

        match self
            .recognizer
            .start(RecognizerEvents::new(stream, self.deliver.clone()))
        {
            Ok(()) => {
                debug!("Recognizer stream {} started", stream);
                self.active_stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                self.active_stream = None;
                Err(e)
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.active_stream.take() {
            self.recognizer.stop();
            debug!("Recognizer stream {} stopped", stream);
        }
        self.clear();
    }

    /// Forgets interim and final text of the current cycle.
    pub fn clear(&mut self) {
        self.final_text = None;
        self.interim_text.clear();
    }

    pub fn current_text(&self) -> &str {
        if !self.interim_text.is_empty() {
            &self.interim_text
        } else {
            self.final_text.as_deref().unwrap_or("")
        }
    }

    pub fn handle(
        &mut self,
        stream: StreamId,
        event: RecognizerEvent,
        state: &SessionState,
    ) -> SpeechOutcome {
        if self.active_stream != Some(stream) {
            debug!("Dropping event from stale recognizer stream {}", stream);
            return SpeechOutcome::Ignored;
        }

        match event {
            RecognizerEvent::Result { text, is_final } => {
                self.restarts_without_result = 0;
                let text = text.trim().to_string();
                if is_final {
                    self.final_text = Some(text);
                    self.interim_text.clear();
                } else {
                    self.interim_text = text;
                }
                SpeechOutcome::Update(SpeechUpdate::new(self.current_text(), is_final))
            }
            RecognizerEvent::Error(e) if e.is_ignorable() => {
                debug!("Ignoring recognizer error: {}", e);
                SpeechOutcome::Ignored
            }
            RecognizerEvent::Error(e) => {
                warn!("Recognizer error: {}", e);
                SpeechOutcome::Report(e)
            }
            RecognizerEvent::Ended => {
                self.active_stream = None;
                if !state.listening || state.mode == SessionMode::Paused {
                    debug!("Recognizer stream {} ended", stream);
                    return SpeechOutcome::Ignored;
                }

                self.restarts_without_result += 1;
                if self.restarts_without_result > MAX_RESTARTS_WITHOUT_RESULT {
                    warn!("Recognizer keeps ending without results; giving up");
                    return SpeechOutcome::RestartFailed(RecognitionError::Other(
                        "recognizer keeps ending without results".to_string(),
                    ));
                }

                match self.open_stream() {
                    Ok(()) => {
                        info!("Recognizer stream restarted");
                        SpeechOutcome::Restarted
                    }
                    Err(e) => {
                        warn!("Failed to restart recognizer: {}", e);
                        SpeechOutcome::RestartFailed(e)
                    }
                }
            }
        }
    }
}

impl Drop for SpeechSessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}
