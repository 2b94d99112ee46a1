use crate::matcher::MatcherTuning;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Operator slider range for match sensitivity.
pub const SENSITIVITY_MIN: f64 = 0.1;
pub const SENSITIVITY_MAX: f64 = 0.8;

pub const SETTINGS_FILE_NAME: &str = "cuepartner_settings.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Dissimilarity ceiling for the fuzzy tier (higher = looser).
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
    #[serde(default = "default_true")]
    pub auto_scroll: bool,
    /// Advance automatically when a cue finishes playing.
    #[serde(default = "default_true")]
    pub auto_play: bool,
    #[serde(default)]
    pub muted: bool,
    /// Capture only: play cue audio while the take is recording.
    #[serde(default = "default_true")]
    pub auto_play_cues: bool,
    #[serde(default)]
    pub show_debug: bool,
    #[serde(default = "default_true")]
    pub camera_enabled: bool,
    #[serde(default = "default_true")]
    pub microphone_enabled: bool,
    /// Fail capture session construction when no device can be opened.
    #[serde(default)]
    pub capture_mandatory: bool,
    #[serde(default = "default_first_cue_delay_ms")]
    pub first_cue_delay_ms: u64,
    #[serde(default = "default_countdown_seconds")]
    pub countdown_seconds: u32,
    #[serde(default)]
    pub selected_output_device: Option<String>,
    #[serde(default)]
    pub selected_microphone: Option<String>,
    #[serde(default)]
    pub matcher: MatcherTuning,
}

impl Default for EngineSettings {
    fn default() -> Self {
        get_default_settings()
    }
}

impl EngineSettings {
    pub fn normalize(&mut self) {
        if !self.sensitivity.is_finite() {
            self.sensitivity = default_sensitivity();
        }
        self.sensitivity = self.sensitivity.clamp(SENSITIVITY_MIN, SENSITIVITY_MAX);
        if self.countdown_seconds == 0 {
            self.countdown_seconds = default_countdown_seconds();
        }
    }

    pub fn live(&self) -> LiveSettings {
        LiveSettings::from_settings(self)
    }
}

/// The subset of settings the UI may change while a session is running.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LiveSettings {
    pub sensitivity: f64,
    pub auto_scroll: bool,
    pub auto_play: bool,
    pub muted: bool,
    pub auto_play_cues: bool,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self::from_settings(&get_default_settings())
    }
}

impl LiveSettings {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            sensitivity: settings.sensitivity,
            auto_scroll: settings.auto_scroll,
            auto_play: settings.auto_play,
            muted: settings.muted,
            auto_play_cues: settings.auto_play_cues,
        }
    }

    pub fn with_sensitivity(mut self, sensitivity: f64) -> Self {
        self.sensitivity = if sensitivity.is_finite() {
            sensitivity.clamp(SENSITIVITY_MIN, SENSITIVITY_MAX)
        } else {
            default_sensitivity()
        };
        self
    }
}

fn default_sensitivity() -> f64 {
    0.4
}

fn default_true() -> bool {
    true
}

fn default_first_cue_delay_ms() -> u64 {
    500
}

fn default_countdown_seconds() -> u32 {
    3
}

pub fn get_default_settings() -> EngineSettings {
    EngineSettings {
        sensitivity: default_sensitivity(),
        auto_scroll: true,
        auto_play: true,
        muted: false,
        auto_play_cues: true,
        show_debug: false,
        camera_enabled: true,
        microphone_enabled: true,
        capture_mandatory: false,
        first_cue_delay_ms: default_first_cue_delay_ms(),
        countdown_seconds: default_countdown_seconds(),
        selected_output_device: None,
        selected_microphone: None,
        matcher: MatcherTuning::default(),
    }
}

/// Loads settings from `path`, writing defaults when the file is missing or
/// cannot be parsed.
pub fn load_or_create_settings<P: AsRef<Path>>(path: P) -> anyhow::Result<EngineSettings> {
    let path = path.as_ref();

    let mut settings = match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<EngineSettings>(&raw) {
            Ok(settings) => {
                debug!("Found existing settings at {:?}", path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse settings at {:?}: {}", path, e);
                let defaults = get_default_settings();
                write_settings(path, &defaults)?;
                defaults
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let defaults = get_default_settings();
            write_settings(path, &defaults)?;
            defaults
        }
        Err(e) => return Err(e.into()),
    };

    settings.normalize();
    Ok(settings)
}

pub fn write_settings<P: AsRef<Path>>(path: P, settings: &EngineSettings) -> anyhow::Result<()> {
    let mut normalized = settings.clone();
    normalized.normalize();

    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path.as_ref(), serde_json::to_string_pretty(&normalized)?)?;
    Ok(())
}
