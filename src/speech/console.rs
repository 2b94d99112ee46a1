use super::{RecognitionError, RecognizerEvent, RecognizerEvents, SpeechRecognizer};
use std::sync::{Arc, Mutex};

/// Recognizer backed by typed text.
///
/// Clones share the same stream, so one clone can be handed to the engine
/// while another feeds it from stdin.
#[derive(Clone, Default)]
pub struct ConsoleRecognizer {
    stream: Arc<Mutex<Option<RecognizerEvents>>>,
}

impl ConsoleRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.stream.lock().unwrap().is_some()
    }

    /// Emits `text` word by word as interim results, then as a final result.
    /// Returns false when no stream is open.
    pub fn feed(&self, text: &str) -> bool {
        let Some(events) = self.stream.lock().unwrap().clone() else {
            return false;
        };

        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            events.emit(RecognizerEvent::Error(RecognitionError::NoSpeechDetected));
            return true;
        }

        for n in 1..words.len() {
            events.emit(RecognizerEvent::Result {
                text: words[..n].join(" "),
                is_final: false,
            });
        }
        events.emit(RecognizerEvent::Result {
            text: words.join(" "),
            is_final: true,
        });
        true
    }

    /// Simulates the engine closing the stream on silence.
    pub fn end_stream(&self) {
        if let Some(events) = self.stream.lock().unwrap().take() {
            events.emit(RecognizerEvent::Ended);
        }
    }
}

impl SpeechRecognizer for ConsoleRecognizer {
    fn start(&mut self, events: RecognizerEvents) -> Result<(), RecognitionError> {
        *self.stream.lock().unwrap() = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        self.stream.lock().unwrap().take();
    }
}
