//! Outbound signals of the engine.

use crate::capture::CapturePhase;
use crate::sequencer::SessionMode;
use serde::Serialize;
use std::sync::mpsc;

/// Events emitted to the UI layer and the take-persistence glue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    SessionStarted {
        line_count: usize,
    },
    /// The cursor landed on a line; `auto_scroll` tells the UI whether to
    /// follow it.
    LineActivated {
        cursor: usize,
        line_id: String,
        character: String,
        mode: SessionMode,
        auto_scroll: bool,
    },
    ModeChanged {
        cursor: usize,
        mode: SessionMode,
    },
    /// Debug surface: the latest recognized text.
    TranscriptPreview {
        text: String,
        is_final: bool,
    },
    ListeningChanged {
        listening: bool,
    },
    CueFinished {
        cursor: usize,
    },
    /// No playable audio for a cue line; it now waits for a manual advance.
    MissingAudio {
        cursor: usize,
        line_id: String,
        reason: Option<String>,
    },
    RecognitionError {
        message: String,
    },
    Completed {
        line_count: usize,
    },
    SessionReset,
    CapturePhaseChanged {
        phase: CapturePhase,
    },
    CountdownTick {
        remaining: u32,
    },
    RecordingTick {
        elapsed_seconds: u64,
        display: String,
    },
    DeviceError {
        message: String,
    },
    TakeReady {
        elapsed_seconds: u64,
        mime_type: String,
        byte_len: usize,
        location: Option<String>,
    },
    TakeFailed {
        message: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

impl EventSink for mpsc::Sender<EngineEvent> {
    fn emit(&self, event: EngineEvent) {
        let _ = self.send(event);
    }
}
