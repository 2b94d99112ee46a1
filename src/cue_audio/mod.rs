//! Cue audio playback.
//!
//! At most one cue plays at a time. Every play carries a [`PlaybackId`] so
//! the sequencer can tell a completion of the current cue from a late one.

mod player;

pub use player::{wav_duration, DryRunCuePlayer, RodioCuePlayer};

use crate::sequencer::PlaybackId;
use log::{debug, warn};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CueAudioError {
    #[error("unsupported cue audio reference '{0}'")]
    UnsupportedSource(String),
    #[error("cannot open cue audio: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot decode cue audio: {0}")]
    Decode(String),
    #[error("audio output unavailable: {0}")]
    Output(String),
}

/// A resolved cue audio reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CueSource {
    File(PathBuf),
}

impl CueSource {
    /// Accepts `file://` URIs and plain paths; relative paths resolve against
    /// `base_dir`. Remote references have to be fetched by the caller.
    pub fn parse(reference: &str, base_dir: Option<&Path>) -> Result<Self, CueAudioError> {
        let reference = reference.trim();
        let path = if let Some(rest) = reference.strip_prefix("file://") {
            PathBuf::from(rest)
        } else if reference.contains("://") || reference.starts_with("data:") {
            return Err(CueAudioError::UnsupportedSource(reference.to_string()));
        } else {
            PathBuf::from(reference)
        };

        let path = match base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        };
        Ok(CueSource::File(path))
    }

    pub fn path(&self) -> &Path {
        match self {
            CueSource::File(path) => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CueEvent {
    Finished { playback: PlaybackId },
    Failed { playback: PlaybackId, error: String },
}

pub type CueDelivery = Arc<dyn Fn(CueEvent) + Send + Sync>;

/// One-shot completion callback for a single play.
pub struct CueCompletion {
    playback: PlaybackId,
    deliver: CueDelivery,
}

impl CueCompletion {
    pub fn new(playback: PlaybackId, deliver: CueDelivery) -> Self {
        Self { playback, deliver }
    }

    pub fn playback(&self) -> PlaybackId {
        self.playback
    }

    pub fn finished(self) {
        (self.deliver)(CueEvent::Finished {
            playback: self.playback,
        })
    }

    pub fn failed(self, error: impl Display) {
        (self.deliver)(CueEvent::Failed {
            playback: self.playback,
            error: error.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CueRequest {
    pub playback: PlaybackId,
    pub source: CueSource,
    pub delay: Duration,
    pub muted: bool,
}

/// Audio output collaborator. `play` returns once playback is scheduled;
/// the outcome arrives through `done`. A stopped play never completes.
pub trait CuePlayer: Send {
    fn play(&mut self, request: CueRequest, done: CueCompletion) -> Result<(), CueAudioError>;
    fn stop(&mut self);
    fn set_muted(&mut self, muted: bool);
}

pub struct CueAudioController {
    player: Box<dyn CuePlayer>,
    deliver: CueDelivery,
    base_dir: Option<PathBuf>,
    current: Option<PlaybackId>,
    muted: bool,
}

impl CueAudioController {
    pub fn new(player: Box<dyn CuePlayer>, deliver: CueDelivery, base_dir: Option<PathBuf>) -> Self {
        Self {
            player,
            deliver,
            base_dir,
            current: None,
            muted: false,
        }
    }

    pub fn current(&self) -> Option<PlaybackId> {
        self.current
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Starts `reference`, stopping whatever is playing.
    pub fn play(
        &mut self,
        playback: PlaybackId,
        reference: &str,
        delay: Duration,
    ) -> Result<(), CueAudioError> {
        self.stop();

        let source = CueSource::parse(reference, self.base_dir.as_deref())?;
        debug!("Playing cue {} from {:?}", playback, source.path());
        let request = CueRequest {
            playback,
            source,
            delay,
            muted: self.muted,
        };
        self.player
            .play(request, CueCompletion::new(playback, self.deliver.clone()))?;
        self.current = Some(playback);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(playback) = self.current.take() {
            debug!("Stopping cue {}", playback);
            self.player.stop();
        }
    }

    /// Volume drops to zero; completion timing is unchanged.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.player.set_muted(muted);
    }

    pub fn on_event(&mut self, event: &CueEvent) {
        let playback = match event {
            CueEvent::Finished { playback } => *playback,
            CueEvent::Failed { playback, error } => {
                warn!("Cue {} failed: {}", playback, error);
                *playback
            }
        };
        if self.current == Some(playback) {
            self.current = None;
        }
    }
}

impl Drop for CueAudioController {
    fn drop(&mut self) {
        self.stop();
    }
}
