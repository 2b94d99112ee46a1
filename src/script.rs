//! Script index: the flattened, ordered sequence of lines a session runs over.
//!
//! The index is built once per session from the reader snapshot produced by
//! the script-management glue. `is_user_line` is always recomputed from the
//! selected performer here; the flags carried in the snapshot are ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script has no lines")]
    Empty,
    #[error("duplicate line id '{0}'")]
    DuplicateLineId(String),
    #[error("character '{0}' is not part of this project")]
    UnknownCharacter(String),
    #[error("failed to read reader snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse reader snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Emotion {
    pub label: String,
    #[serde(default)]
    pub intensity: f32,
}

/// A line as delivered by the glue layer, inside a scene.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SnapshotLine {
    pub id: String,
    pub character: String,
    #[serde(default)]
    pub text: String,
    pub line_number: u32,
    /// Stale by construction; recomputed from the performer.
    #[serde(default)]
    pub is_user_line: bool,
    #[serde(default)]
    pub emotion: Option<Emotion>,
    #[serde(default, alias = "cue_audio_ref")]
    pub audio_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SnapshotScene {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lines: Vec<SnapshotLine>,
}

/// Project snapshot consumed by the engine (the reader-data payload).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReaderSnapshot {
    pub project_id: String,
    pub project_title: String,
    #[serde(default)]
    pub user_character: Option<String>,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub scenes: Vec<SnapshotScene>,
}

impl ReaderSnapshot {
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScriptError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Line {
    pub id: String,
    pub scene_id: String,
    pub sequence_number: usize,
    pub character: String,
    pub text: String,
    pub is_user_line: bool,
    pub emotion: Option<Emotion>,
    pub cue_audio_ref: Option<String>,
}

/// Immutable, ordered view of the script for one session.
#[derive(Debug, Clone)]
pub struct ScriptIndex {
    project_title: String,
    performer: Option<String>,
    lines: Vec<Line>,
}

impl ScriptIndex {
    /// Flattens the snapshot for the given performer.
    ///
    /// `performer` falls back to the snapshot's `user_character`. A performer
    /// that is not listed in `characters` is rejected when the list is known.
    pub fn build(snapshot: &ReaderSnapshot, performer: Option<&str>) -> Result<Self, ScriptError> {
        let performer = performer
            .map(str::to_string)
            .or_else(|| snapshot.user_character.clone());

        if let Some(name) = performer.as_deref() {
            if !snapshot.characters.is_empty() && !snapshot.characters.iter().any(|c| c == name) {
                return Err(ScriptError::UnknownCharacter(name.to_string()));
            }
        }

        let mut seen = HashSet::new();
        let mut lines = Vec::new();

        for scene in &snapshot.scenes {
            let mut scene_lines: Vec<&SnapshotLine> = scene.lines.iter().collect();
            scene_lines.sort_by_key(|l| l.line_number);

            for raw in scene_lines {
                if !seen.insert(raw.id.clone()) {
                    return Err(ScriptError::DuplicateLineId(raw.id.clone()));
                }
                let is_user_line = performer.as_deref() == Some(raw.character.as_str());
                lines.push(Line {
                    id: raw.id.clone(),
                    scene_id: scene.id.clone(),
                    sequence_number: lines.len(),
                    character: raw.character.clone(),
                    text: raw.text.clone(),
                    is_user_line,
                    emotion: raw.emotion.clone(),
                    cue_audio_ref: raw.audio_url.clone().filter(|url| !url.trim().is_empty()),
                });
            }
        }

        Ok(Self {
            project_title: snapshot.project_title.clone(),
            performer,
            lines,
        })
    }

    /// Builds an index directly from lines, recomputing `is_user_line` and
    /// `sequence_number`. Mostly useful for embedding and tests.
    pub fn from_lines(
        project_title: impl Into<String>,
        performer: Option<&str>,
        lines: Vec<Line>,
    ) -> Result<Self, ScriptError> {
        let mut seen = HashSet::new();
        let mut lines = lines;
        lines.sort_by_key(|l| l.sequence_number);
        for (i, line) in lines.iter_mut().enumerate() {
            if !seen.insert(line.id.clone()) {
                return Err(ScriptError::DuplicateLineId(line.id.clone()));
            }
            line.sequence_number = i;
            line.is_user_line = performer == Some(line.character.as_str());
        }
        Ok(Self {
            project_title: project_title.into(),
            performer: performer.map(str::to_string),
            lines,
        })
    }

    /// A new index for a different performer. The old index is left untouched;
    /// a running session keeps using it.
    pub fn with_performer(&self, performer: &str) -> Self {
        let lines = self
            .lines
            .iter()
            .cloned()
            .map(|mut line| {
                line.is_user_line = line.character == performer;
                line
            })
            .collect();
        Self {
            project_title: self.project_title.clone(),
            performer: Some(performer.to_string()),
            lines,
        }
    }

    pub fn project_title(&self) -> &str {
        &self.project_title
    }

    pub fn performer(&self) -> Option<&str> {
        self.performer.as_deref()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Line> {
        self.lines.get(index)
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn user_line_count(&self) -> usize {
        self.lines.iter().filter(|l| l.is_user_line).count()
    }
}

#[cfg(test)]
pub(crate) fn test_line(id: &str, character: &str, text: &str, audio: Option<&str>) -> Line {
    Line {
        id: id.to_string(),
        scene_id: "s1".to_string(),
        sequence_number: 0,
        character: character.to_string(),
        text: text.to_string(),
        is_user_line: false,
        emotion: None,
        cue_audio_ref: audio.map(str::to_string),
    }
}
