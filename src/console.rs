//! Interactive terminal front end.

use crate::capture::{format_elapsed, CapturePhase, CpalMicrophone, FileTakeSink};
use crate::cli::{parse_console_input, CliArgs, ConsoleInput, Mode, CONSOLE_HELP};
use crate::cue_audio::{CuePlayer, DryRunCuePlayer, RodioCuePlayer};
use crate::engine::{
    self, CaptureCommand, Collaborators, EngineHandle, EngineSender, EngineSnapshot,
};
use crate::events::{EngineEvent, EventSink};
use crate::script::{ReaderSnapshot, ScriptIndex};
use crate::sequencer::SessionMode;
use crate::settings::{self, EngineSettings, SETTINGS_FILE_NAME};
use crate::speech::ConsoleRecognizer;
use anyhow::Context;
use log::{info, warn};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Dry-run length for cues that are not readable WAV files.
const DRY_RUN_CUE_LENGTH: Duration = Duration::from_secs(2);

/// Prints engine events for a person at a terminal.
struct ConsoleSink {
    script: Arc<ScriptIndex>,
    show_debug: bool,
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::LineActivated {
                cursor,
                mode,
                ..
            } => {
                let Some(line) = self.script.get(cursor) else {
                    return;
                };
                let marker = match mode {
                    SessionMode::AwaitingSpeech => "  <- your line",
                    SessionMode::PlayingCue => "  (playing)",
                    SessionMode::AwaitingManual if line.is_user_line => "  <- your line (:next)",
                    _ => "",
                };
                println!(
                    "[{}/{}] {}: {}{}",
                    cursor + 1,
                    self.script.len(),
                    line.character,
                    line.text,
                    marker
                );
            }
            EngineEvent::ModeChanged { mode, .. } => match mode {
                SessionMode::Paused => println!("  -- paused --"),
                SessionMode::Idle => println!("  -- stopped --"),
                _ => {}
            },
            EngineEvent::TranscriptPreview { text, is_final } => {
                if self.show_debug {
                    println!("  heard{}: {}", if is_final { "" } else { " (interim)" }, text);
                }
            }
            EngineEvent::MissingAudio { reason, .. } => match reason {
                Some(reason) => println!("  cue audio unavailable ({}); :next to continue", reason),
                None => println!("  no cue audio; :next to continue"),
            },
            EngineEvent::RecognitionError { message } => println!("  recognition error: {}", message),
            EngineEvent::Completed { .. } => println!("*** end of script (:reset to go again) ***"),
            EngineEvent::CapturePhaseChanged { phase } => match phase {
                CapturePhase::Recording => println!("  ● recording"),
                CapturePhase::PausedRecording => println!("  ❚❚ recording paused"),
                CapturePhase::Reviewing => println!("  ■ recording stopped"),
                CapturePhase::Idle | CapturePhase::Countdown { .. } => {}
            },
            EngineEvent::CountdownTick { remaining } => println!("  {}...", remaining),
            EngineEvent::RecordingTick {
                elapsed_seconds,
                display,
            } => {
                if self.show_debug || elapsed_seconds % 10 == 0 {
                    println!("  REC {}", display);
                }
            }
            EngineEvent::DeviceError { message } => println!("  device error: {}", message),
            EngineEvent::TakeReady {
                elapsed_seconds,
                location,
                ..
            } => println!(
                "  take saved to {} ({}); :retake to record again",
                location.as_deref().unwrap_or("<memory>"),
                format_elapsed(elapsed_seconds)
            ),
            EngineEvent::TakeFailed { message } => println!("  take could not be saved: {}", message),
            other => log::debug!("{:?}", other),
        }
    }
}

fn print_status(snapshot: &EngineSnapshot) {
    let state = &snapshot.session.state;
    println!(
        "  line {}/{}  mode {:?}  listening {}  muted {}  sensitivity {:.2}",
        (state.cursor + 1).min(snapshot.session.line_count),
        snapshot.session.line_count,
        state.mode,
        state.listening,
        state.muted,
        state.sensitivity
    );
    if let Some(capture) = &snapshot.capture {
        println!(
            "  capture {:?}  elapsed {}  camera {}  mic {}",
            capture.phase,
            format_elapsed(capture.elapsed_seconds),
            capture.camera,
            capture.microphone
        );
    }
}

/// Applies one prompt line. Returns false when the session should end.
fn dispatch(
    input: ConsoleInput,
    sender: &EngineSender,
    recognizer: &ConsoleRecognizer,
    settings: &mut EngineSettings,
    settings_path: &Path,
) -> anyhow::Result<bool> {
    let mut live_changed = false;

    match input {
        ConsoleInput::Speech(text) => {
            if !recognizer.feed(&text) {
                println!("  (not listening)");
            }
        }
        ConsoleInput::Start => sender.start()?,
        ConsoleInput::Next => sender.next()?,
        ConsoleInput::Previous => sender.previous()?,
        ConsoleInput::Pause => sender.toggle_pause()?,
        ConsoleInput::Reset => sender.reset()?,
        ConsoleInput::Jump(index) => sender.jump_to(index)?,
        ConsoleInput::Mute => {
            settings.muted = !settings.muted;
            println!("  muted: {}", settings.muted);
            live_changed = true;
        }
        ConsoleInput::AutoPlay => {
            settings.auto_play = !settings.auto_play;
            println!("  auto-play: {}", settings.auto_play);
            live_changed = true;
        }
        ConsoleInput::Sensitivity(value) => {
            settings.sensitivity = value;
            settings.normalize();
            println!("  sensitivity: {:.2}", settings.sensitivity);
            live_changed = true;
        }
        ConsoleInput::Status => print_status(&sender.snapshot()?),
        ConsoleInput::Help => println!("{}", CONSOLE_HELP),
        ConsoleInput::Quit => return Ok(false),
        ConsoleInput::Record => sender.capture(CaptureCommand::Record)?,
        ConsoleInput::Stop => sender.capture(CaptureCommand::Stop)?,
        ConsoleInput::Retake => sender.capture(CaptureCommand::Retake)?,
        ConsoleInput::Camera => {
            let camera = sender
                .snapshot()?
                .capture
                .map(|c| !c.camera)
                .unwrap_or(!settings.camera_enabled);
            settings.camera_enabled = camera;
            sender.capture(CaptureCommand::SetCamera(camera))?;
        }
        ConsoleInput::Mic => {
            let microphone = sender
                .snapshot()?
                .capture
                .map(|c| !c.microphone)
                .unwrap_or(!settings.microphone_enabled);
            settings.microphone_enabled = microphone;
            sender.capture(CaptureCommand::SetMicrophone(microphone))?;
        }
        ConsoleInput::Invalid(message) => println!("  {} (:help)", message),
    }

    if live_changed {
        sender.update_settings(settings.live())?;
        if let Err(e) = settings::write_settings(settings_path, settings) {
            warn!("Failed to persist settings: {:#}", e);
        }
    }
    Ok(true)
}

fn build_player(args: &CliArgs, settings: &EngineSettings) -> Box<dyn CuePlayer> {
    if args.no_audio {
        Box::new(DryRunCuePlayer::new(DRY_RUN_CUE_LENGTH))
    } else {
        Box::new(RodioCuePlayer::new(settings.selected_output_device.clone()))
    }
}

/// Runs one interactive session until `:quit`, end of input or a signal.
pub fn run(args: CliArgs) -> anyhow::Result<()> {
    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE_NAME));
    let mut settings = settings::load_or_create_settings(&settings_path)
        .with_context(|| format!("cannot load settings from {:?}", settings_path))?;

    let session = args.mode.session();
    if let Some(sensitivity) = session.sensitivity {
        settings.sensitivity = sensitivity;
        settings.normalize();
    }
    settings.show_debug |= args.debug;

    let snapshot = ReaderSnapshot::load(&session.script)
        .with_context(|| format!("cannot read script {:?}", session.script))?;
    let script = Arc::new(ScriptIndex::build(&snapshot, session.performer.as_deref())?);
    info!(
        "Loaded '{}': {} lines, {} for {}",
        script.project_title(),
        script.len(),
        script.user_line_count(),
        script.performer().unwrap_or("nobody")
    );

    let collaborators = Collaborators {
        player: build_player(&args, &settings),
        events: Arc::new(ConsoleSink {
            script: script.clone(),
            show_debug: settings.show_debug,
        }),
        cue_base_dir: session.script.parent().map(|p| p.to_path_buf()),
    };

    let recognizer = ConsoleRecognizer::new();
    let engine: EngineHandle = match &args.mode {
        Mode::Rehearse(_) => {
            let engine = engine::spawn_rehearsal(
                script,
                &settings,
                Box::new(recognizer.clone()),
                collaborators,
            )?;
            engine.sender().start()?;
            engine
        }
        Mode::Capture { out, .. } => {
            let engine = engine::spawn_capture(
                script,
                &settings,
                Box::new(CpalMicrophone::new(settings.selected_microphone.clone())),
                Box::new(FileTakeSink::new(out.clone())),
                collaborators,
            )?;
            println!("  :record to start the countdown");
            engine
        }
    };

    #[cfg(unix)]
    crate::signal_handle::setup_signal_handler(engine.sender().clone())?;

    println!("{}", CONSOLE_HELP);
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let Some(input) = parse_console_input(&line) else {
            continue;
        };
        if !dispatch(input, engine.sender(), &recognizer, &mut settings, &settings_path)? {
            break;
        }
    }

    engine.shutdown();
    Ok(())
}
