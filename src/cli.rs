use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "cuepartner",
    about = "CuePartner - cue-synchronized rehearsal and capture"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub mode: Mode,

    /// Settings file, created with defaults when missing
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Do not open an audio output; cues complete after their length
    #[arg(long, global = true)]
    pub no_audio: bool,

    /// Enable debug mode with verbose logging and transcript preview
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Mode {
    /// Rehearse a script; typed lines stand in for speech
    Rehearse(SessionArgs),
    /// Record a take while cues play
    Capture {
        #[command(flatten)]
        session: SessionArgs,

        /// Directory takes are written to
        #[arg(long, default_value = "takes")]
        out: PathBuf,
    },
}

impl Mode {
    pub fn session(&self) -> &SessionArgs {
        match self {
            Mode::Rehearse(session) => session,
            Mode::Capture { session, .. } => session,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Reader snapshot (JSON)
    #[arg(long)]
    pub script: PathBuf,

    /// Character the performer plays; defaults to the snapshot's selection
    #[arg(long)]
    pub performer: Option<String>,

    /// Match sensitivity between 0.1 (strict) and 0.8 (loose)
    #[arg(long)]
    pub sensitivity: Option<f64>,
}

/// One line typed at the session prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Speech(String),
    Start,
    Next,
    Previous,
    Pause,
    Reset,
    /// Zero-based line index.
    Jump(usize),
    Mute,
    AutoPlay,
    Sensitivity(f64),
    Status,
    Help,
    Quit,
    Record,
    Stop,
    Retake,
    Camera,
    Mic,
    Invalid(String),
}

pub const CONSOLE_HELP: &str = "\
Type your lines to speak them. Commands:
  :start :next :prev :pause :reset :jump N :mute :autoplay
  :sensitivity X :status :help :quit
  capture only: :record :stop :retake :camera :mic";

/// Parses a prompt line. Blank lines yield `None`.
pub fn parse_console_input(line: &str) -> Option<ConsoleInput> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix(':') else {
        return Some(ConsoleInput::Speech(line.to_string()));
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default().to_lowercase();
    let arg = parts.next();

    let input = match (name.as_str(), arg) {
        ("start", None) => ConsoleInput::Start,
        ("next" | "n", None) => ConsoleInput::Next,
        ("prev" | "previous" | "p", None) => ConsoleInput::Previous,
        ("pause", None) => ConsoleInput::Pause,
        ("reset", None) => ConsoleInput::Reset,
        ("jump", Some(n)) => match n.parse::<usize>() {
            Ok(n) if n >= 1 => ConsoleInput::Jump(n - 1),
            _ => ConsoleInput::Invalid(format!("line number expected, got '{}'", n)),
        },
        ("mute", None) => ConsoleInput::Mute,
        ("autoplay", None) => ConsoleInput::AutoPlay,
        ("sensitivity", Some(x)) => match x.parse::<f64>() {
            Ok(x) if x.is_finite() => ConsoleInput::Sensitivity(x),
            _ => ConsoleInput::Invalid(format!("number expected, got '{}'", x)),
        },
        ("status", None) => ConsoleInput::Status,
        ("help" | "h", None) => ConsoleInput::Help,
        ("quit" | "q" | "exit", None) => ConsoleInput::Quit,
        ("record", None) => ConsoleInput::Record,
        ("stop", None) => ConsoleInput::Stop,
        ("retake", None) => ConsoleInput::Retake,
        ("camera", None) => ConsoleInput::Camera,
        ("mic", None) => ConsoleInput::Mic,
        _ => ConsoleInput::Invalid(format!("unknown command '{}'", line)),
    };
    Some(input)
}
