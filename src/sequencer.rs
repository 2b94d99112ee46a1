//! Cue sequencer: the single authority over the script cursor.
//!
//! Every input (speech, cue completion, operator command) goes through one
//! transition function that mutates [`SessionState`] and returns the
//! [`Effect`]s the engine must carry out. The sequencer itself performs no
//! I/O, which keeps every transition atomic with respect to its event.

use crate::events::EngineEvent;
use crate::matcher::TranscriptMatcher;
use crate::script::{Line, ScriptIndex};
use crate::settings::LiveSettings;
use crate::speech::SpeechUpdate;
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type PlaybackId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequencerError {
    #[error("script has no lines")]
    EmptyScript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Idle,
    AwaitingSpeech,
    PlayingCue,
    /// Valid but stalled; only a manual command moves on.
    AwaitingManual,
    Paused,
    Completed,
}

impl SessionMode {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionMode::AwaitingSpeech | SessionMode::PlayingCue | SessionMode::AwaitingManual
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionState {
    pub mode: SessionMode,
    pub cursor: usize,
    pub listening: bool,
    pub muted: bool,
    pub sensitivity: f64,
    pub transcript: String,
}

/// Point-in-time view for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub line_count: usize,
    pub current_line_id: Option<String>,
    pub auto_scroll: bool,
    pub auto_play: bool,
}

/// Work the engine performs on behalf of a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartListening,
    /// Replace the recognizer stream so the rest of a matched utterance is
    /// not heard against the following line.
    RestartListening,
    StopListening,
    ClearTranscript,
    PlayCue {
        playback: PlaybackId,
        line_id: String,
        source: String,
        delay: Duration,
    },
    StopCue,
    SetMuted(bool),
    Emit(EngineEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerOptions {
    /// Matching speech advances user lines.
    pub speech_advance: bool,
    /// Cue lines play their audio.
    pub cue_playback: bool,
}

impl SequencerOptions {
    pub fn rehearsal() -> Self {
        Self {
            speech_advance: true,
            cue_playback: true,
        }
    }

    /// Nothing plays until a recording is running.
    pub fn capture() -> Self {
        Self {
            speech_advance: false,
            cue_playback: false,
        }
    }
}

pub struct CueSequencer {
    script: Arc<ScriptIndex>,
    matcher: TranscriptMatcher,
    live: LiveSettings,
    options: SequencerOptions,
    state: SessionState,
    playback: Option<PlaybackId>,
    next_playback: PlaybackId,
    completion_signalled: bool,
    pending_cue_delay: Duration,
}

impl CueSequencer {
    pub fn new(
        script: Arc<ScriptIndex>,
        mut matcher: TranscriptMatcher,
        live: LiveSettings,
        options: SequencerOptions,
    ) -> Result<Self, SequencerError> {
        if script.is_empty() {
            return Err(SequencerError::EmptyScript);
        }
        matcher.index_script(&script, live.sensitivity);

        Ok(Self {
            script,
            matcher,
            live,
            options,
            state: SessionState {
                muted: live.muted,
                sensitivity: live.sensitivity,
                ..SessionState::default()
            },
            playback: None,
            next_playback: 1,
            completion_signalled: false,
            pending_cue_delay: Duration::ZERO,
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn script(&self) -> &Arc<ScriptIndex> {
        &self.script
    }

    pub fn live_settings(&self) -> LiveSettings {
        self.live
    }

    pub fn current_line(&self) -> Option<&Line> {
        self.script.get(self.state.cursor)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            line_count: self.script.len(),
            current_line_id: self.current_line().map(|l| l.id.clone()),
            auto_scroll: self.live.auto_scroll,
            auto_play: self.live.auto_play,
        }
    }

    pub fn start(&mut self) -> Vec<Effect> {
        if self.state.mode != SessionMode::Idle {
            debug!("start ignored in {:?}", self.state.mode);
            return Vec::new();
        }
        info!("Session started: {} lines", self.script.len());

        let mut fx = vec![Effect::Emit(EngineEvent::SessionStarted {
            line_count: self.script.len(),
        })];
        self.ensure_listening(&mut fx);
        self.enter_line(&mut fx);
        fx
    }

    pub fn on_speech(&mut self, update: SpeechUpdate) -> Vec<Effect> {
        if !self.state.mode.is_active() {
            debug!("Speech ignored in {:?}", self.state.mode);
            return Vec::new();
        }

        self.state.transcript = update.text.trim().to_lowercase();
        let mut fx = vec![Effect::Emit(EngineEvent::TranscriptPreview {
            text: self.state.transcript.clone(),
            is_final: update.is_final,
        })];

        if self.state.mode != SessionMode::AwaitingSpeech {
            return fx;
        }

        let cursor = self.state.cursor;
        let Some(line) = self.script.get(cursor) else {
            return fx;
        };
        if let Some(tier) =
            self.matcher
                .evaluate(&self.state.transcript, &line.text, self.live.sensitivity, cursor)
        {
            debug!("Line {} matched via {:?}", line.id, tier);
            self.move_to(cursor + 1, &mut fx);
            if self.state.listening {
                fx.push(Effect::RestartListening);
            }
        }
        fx
    }

    pub fn on_cue_finished(&mut self, playback: PlaybackId) -> Vec<Effect> {
        if !self.is_current_playback(playback) {
            debug!("Ignoring completion of superseded playback {}", playback);
            return Vec::new();
        }
        self.playback = None;

        let mut fx = vec![Effect::Emit(EngineEvent::CueFinished {
            cursor: self.state.cursor,
        })];
        if self.live.auto_play {
            self.move_to(self.state.cursor + 1, &mut fx);
        } else {
            self.set_mode(SessionMode::AwaitingManual, &mut fx);
        }
        fx
    }

    /// The player could not produce audio; treated like missing audio.
    pub fn on_cue_failed(&mut self, playback: PlaybackId, reason: String) -> Vec<Effect> {
        if !self.is_current_playback(playback) {
            debug!("Ignoring failure of superseded playback {}", playback);
            return Vec::new();
        }
        self.playback = None;

        let mut fx = Vec::new();
        if let Some(line) = self.current_line() {
            fx.push(Effect::Emit(EngineEvent::MissingAudio {
                cursor: self.state.cursor,
                line_id: line.id.clone(),
                reason: Some(reason),
            }));
        }
        self.set_mode(SessionMode::AwaitingManual, &mut fx);
        fx
    }

    fn is_current_playback(&self, playback: PlaybackId) -> bool {
        self.state.mode == SessionMode::PlayingCue && self.playback == Some(playback)
    }

    pub fn next(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        match self.state.mode {
            SessionMode::Completed => {}
            SessionMode::Idle | SessionMode::Paused => {
                let target = (self.state.cursor + 1).min(self.last_index());
                self.reposition(target, &mut fx);
            }
            _ => self.move_to(self.state.cursor + 1, &mut fx),
        }
        fx
    }

    pub fn previous(&mut self) -> Vec<Effect> {
        if self.state.cursor == 0 {
            return Vec::new();
        }
        self.navigate(self.state.cursor - 1)
    }

    pub fn jump_to(&mut self, index: usize) -> Vec<Effect> {
        self.navigate(index.min(self.last_index()))
    }

    fn navigate(&mut self, target: usize) -> Vec<Effect> {
        let mut fx = Vec::new();
        match self.state.mode {
            SessionMode::Completed => {}
            SessionMode::Idle | SessionMode::Paused => self.reposition(target, &mut fx),
            _ => self.move_to(target, &mut fx),
        }
        fx
    }

    pub fn toggle_pause(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        match self.state.mode {
            mode if mode.is_active() => {
                self.stop_listening(&mut fx);
                self.stop_cue(&mut fx);
                self.clear_transcript(&mut fx);
                self.set_mode(SessionMode::Paused, &mut fx);
            }
            SessionMode::Paused => {
                self.ensure_listening(&mut fx);
                self.enter_line(&mut fx);
            }
            mode => debug!("toggle_pause ignored in {:?}", mode),
        }
        fx
    }

    /// Back to line 0 from any state.
    pub fn reset(&mut self) -> Vec<Effect> {
        let mut fx = vec![Effect::Emit(EngineEvent::SessionReset)];
        self.completion_signalled = false;
        self.state.cursor = 0;
        self.ensure_listening(&mut fx);
        self.enter_line(&mut fx);
        fx
    }

    /// Returns to `Idle`, optionally rewinding to the first line.
    pub fn stop(&mut self, rewind: bool) -> Vec<Effect> {
        let mut fx = Vec::new();
        self.stop_cue(&mut fx);
        self.stop_listening(&mut fx);
        self.clear_transcript(&mut fx);
        if rewind {
            self.state.cursor = 0;
            self.completion_signalled = false;
        }
        self.state.cursor = self.state.cursor.min(self.last_index());
        self.set_mode(SessionMode::Idle, &mut fx);
        fx
    }

    pub fn update_settings(&mut self, live: LiveSettings) -> Vec<Effect> {
        let live = live.with_sensitivity(live.sensitivity);
        let mut fx = Vec::new();

        if live.sensitivity != self.live.sensitivity {
            self.matcher.set_sensitivity(live.sensitivity);
            self.state.sensitivity = live.sensitivity;
        }
        if live.muted != self.state.muted {
            self.state.muted = live.muted;
            fx.push(Effect::SetMuted(live.muted));
        }
        self.live = live;
        fx
    }

    /// Enables or disables cue audio. Disabling mid-cue stops it and waits
    /// for a manual advance.
    pub fn set_cue_playback(&mut self, enabled: bool) -> Vec<Effect> {
        self.options.cue_playback = enabled;
        let mut fx = Vec::new();
        if !enabled && self.state.mode == SessionMode::PlayingCue {
            self.stop_cue(&mut fx);
            self.set_mode(SessionMode::AwaitingManual, &mut fx);
        }
        fx
    }

    /// Delay applied to the next cue that starts playing, once.
    pub fn set_next_cue_delay(&mut self, delay: Duration) {
        self.pending_cue_delay = delay;
    }

    /// The recognizer is gone for good; reflect that in the state.
    pub fn listening_lost(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.state.listening {
            self.state.listening = false;
            fx.push(Effect::Emit(EngineEvent::ListeningChanged { listening: false }));
        }
        fx
    }

    fn last_index(&self) -> usize {
        self.script.len().saturating_sub(1)
    }

    /// The single cursor-mutation primitive for running sessions.
    fn move_to(&mut self, target: usize, fx: &mut Vec<Effect>) {
        if target >= self.script.len() {
            self.complete(fx);
        } else {
            self.state.cursor = target;
            self.enter_line(fx);
        }
    }

    /// Idle/Paused navigation: move the cursor, keep the mode.
    fn reposition(&mut self, target: usize, fx: &mut Vec<Effect>) {
        self.stop_cue(fx);
        self.clear_transcript(fx);
        self.state.cursor = target;
        self.emit_line_activated(fx);
    }

    fn enter_line(&mut self, fx: &mut Vec<Effect>) {
        self.stop_cue(fx);
        self.clear_transcript(fx);

        let Some(line) = self.script.get(self.state.cursor).cloned() else {
            self.complete(fx);
            return;
        };

        let mode = if line.is_user_line {
            if self.options.speech_advance {
                SessionMode::AwaitingSpeech
            } else {
                SessionMode::AwaitingManual
            }
        } else if !self.options.cue_playback {
            SessionMode::AwaitingManual
        } else {
            match line.cue_audio_ref.as_ref() {
                Some(source) => {
                    let playback = self.next_playback;
                    self.next_playback += 1;
                    self.playback = Some(playback);
                    fx.push(Effect::PlayCue {
                        playback,
                        line_id: line.id.clone(),
                        source: source.clone(),
                        delay: std::mem::take(&mut self.pending_cue_delay),
                    });
                    SessionMode::PlayingCue
                }
                None => {
                    fx.push(Effect::Emit(EngineEvent::MissingAudio {
                        cursor: self.state.cursor,
                        line_id: line.id.clone(),
                        reason: None,
                    }));
                    SessionMode::AwaitingManual
                }
            }
        };

        debug!("Line {} ({}) -> {:?}", self.state.cursor, line.id, mode);
        self.state.mode = mode;
        self.emit_line_activated(fx);
    }

    fn complete(&mut self, fx: &mut Vec<Effect>) {
        self.state.cursor = self.script.len();
        self.stop_cue(fx);
        self.stop_listening(fx);
        self.clear_transcript(fx);
        self.set_mode(SessionMode::Completed, fx);
        if !self.completion_signalled {
            self.completion_signalled = true;
            info!("Script completed");
            fx.push(Effect::Emit(EngineEvent::Completed {
                line_count: self.script.len(),
            }));
        }
    }

    fn emit_line_activated(&self, fx: &mut Vec<Effect>) {
        if let Some(line) = self.current_line() {
            fx.push(Effect::Emit(EngineEvent::LineActivated {
                cursor: self.state.cursor,
                line_id: line.id.clone(),
                character: line.character.clone(),
                mode: self.state.mode,
                auto_scroll: self.live.auto_scroll,
            }));
        }
    }

    fn set_mode(&mut self, mode: SessionMode, fx: &mut Vec<Effect>) {
        if self.state.mode != mode {
            debug!("Mode {:?} -> {:?}", self.state.mode, mode);
            self.state.mode = mode;
            fx.push(Effect::Emit(EngineEvent::ModeChanged {
                cursor: self.state.cursor,
                mode,
            }));
        }
    }

    fn ensure_listening(&mut self, fx: &mut Vec<Effect>) {
        if self.options.speech_advance && !self.state.listening {
            self.state.listening = true;
            fx.push(Effect::StartListening);
            fx.push(Effect::Emit(EngineEvent::ListeningChanged { listening: true }));
        }
    }

    fn stop_listening(&mut self, fx: &mut Vec<Effect>) {
        if self.state.listening {
            self.state.listening = false;
            fx.push(Effect::StopListening);
            fx.push(Effect::Emit(EngineEvent::ListeningChanged { listening: false }));
        }
    }

    fn stop_cue(&mut self, fx: &mut Vec<Effect>) {
        if self.playback.take().is_some() {
            fx.push(Effect::StopCue);
        }
    }

    fn clear_transcript(&mut self, fx: &mut Vec<Effect>) {
        self.state.transcript.clear();
        fx.push(Effect::ClearTranscript);
    }
}
