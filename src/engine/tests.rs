use super::*;
use crate::capture::device::mock::{DeviceLog, MockDevice};
use crate::capture::Take;
use crate::cue_audio::{CueAudioError, CueCompletion, CueRequest};
use crate::script::test_line;
use crate::speech::ConsoleRecognizer;
use std::sync::Mutex;

const WAIT: Duration = Duration::from_secs(5);

/// Finishes every cue as soon as it starts.
struct InstantPlayer;

impl CuePlayer for InstantPlayer {
    fn play(&mut self, _request: CueRequest, done: CueCompletion) -> Result<(), CueAudioError> {
        done.finished();
        Ok(())
    }

    fn stop(&mut self) {}

    fn set_muted(&mut self, _muted: bool) {}
}

/// Cannot produce any audio.
struct BrokenPlayer;

impl CuePlayer for BrokenPlayer {
    fn play(&mut self, _request: CueRequest, _done: CueCompletion) -> Result<(), CueAudioError> {
        Err(CueAudioError::Output("no output device".to_string()))
    }

    fn stop(&mut self) {}

    fn set_muted(&mut self, _muted: bool) {}
}

#[derive(Default)]
struct MemoryTakes(Arc<Mutex<Vec<Take>>>);

impl TakeSink for MemoryTakes {
    fn store(&mut self, take: &Take) -> anyhow::Result<Option<String>> {
        self.0.lock().unwrap().push(take.clone());
        Ok(Some("memory".to_string()))
    }
}

fn two_liner() -> Arc<ScriptIndex> {
    Arc::new(
        ScriptIndex::from_lines(
            "Play",
            Some("ANNA"),
            vec![
                test_line("1", "ANNA", "I love you", None),
                test_line("2", "BEN", "And I you", Some("ben.wav")),
            ],
        )
        .unwrap(),
    )
}

fn collaborators(player: Box<dyn CuePlayer>) -> (Collaborators, mpsc::Receiver<EngineEvent>) {
    let (tx, rx) = mpsc::channel();
    (
        Collaborators {
            player,
            events: Arc::new(tx),
            cue_base_dir: None,
        },
        rx,
    )
}

fn wait_for<F>(rx: &mpsc::Receiver<EngineEvent>, mut pred: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    loop {
        let event = rx.recv_timeout(WAIT).expect("expected event did not arrive");
        if pred(&event) {
            return event;
        }
    }
}

#[test]
fn rehearsal_runs_to_completion() {
    let recognizer = ConsoleRecognizer::new();
    let (collab, rx) = collaborators(Box::new(InstantPlayer));
    let engine = spawn_rehearsal(
        two_liner(),
        &EngineSettings::default(),
        Box::new(recognizer.clone()),
        collab,
    )
    .unwrap();

    engine.sender().start().unwrap();
    wait_for(&rx, |e| matches!(e, EngineEvent::ListeningChanged { listening: true }));
    assert!(recognizer.is_listening());

    assert!(recognizer.feed("I love you"));
    wait_for(&rx, |e| matches!(e, EngineEvent::Completed { line_count: 2 }));

    let snapshot = engine.sender().snapshot().unwrap();
    assert_eq!(snapshot.session.state.mode, SessionMode::Completed);
    assert_eq!(snapshot.session.state.cursor, 2);
    assert!(snapshot.capture.is_none());
    assert!(!recognizer.is_listening());
}

#[test]
fn one_utterance_advances_one_line() {
    let script = Arc::new(
        ScriptIndex::from_lines(
            "Play",
            Some("ANNA"),
            vec![
                test_line("1", "ANNA", "I love you", None),
                test_line("2", "ANNA", "I mean it truly", None),
                test_line("3", "ANNA", "I always will", None),
                test_line("4", "BEN", "And I you", Some("ben.wav")),
            ],
        )
        .unwrap(),
    );
    let recognizer = ConsoleRecognizer::new();
    let (collab, rx) = collaborators(Box::new(InstantPlayer));
    let engine = spawn_rehearsal(
        script,
        &EngineSettings::default(),
        Box::new(recognizer.clone()),
        collab,
    )
    .unwrap();
    engine.sender().start().unwrap();
    wait_for(&rx, |e| matches!(e, EngineEvent::LineActivated { cursor: 0, .. }));

    // interim "I", "I love", then final "I love you", all on one stream
    assert!(recognizer.feed("I love you"));
    let snapshot = engine.sender().snapshot().unwrap();
    assert_eq!(snapshot.session.state.cursor, 1);
    assert_eq!(snapshot.session.state.mode, SessionMode::AwaitingSpeech);
    assert!(recognizer.is_listening());

    assert!(recognizer.feed("I mean it truly"));
    let snapshot = engine.sender().snapshot().unwrap();
    assert_eq!(snapshot.session.state.cursor, 2);
}

#[test]
fn recognizer_restarts_after_stream_end() {
    let recognizer = ConsoleRecognizer::new();
    let (collab, rx) = collaborators(Box::new(InstantPlayer));
    let engine = spawn_rehearsal(
        two_liner(),
        &EngineSettings::default(),
        Box::new(recognizer.clone()),
        collab,
    )
    .unwrap();
    engine.sender().start().unwrap();
    wait_for(&rx, |e| matches!(e, EngineEvent::LineActivated { cursor: 0, .. }));

    recognizer.end_stream();
    // the snapshot is answered after the end-of-stream was handled
    engine.sender().snapshot().unwrap();
    assert!(recognizer.is_listening());
}

#[test]
fn unplayable_cue_waits_for_manual_advance() {
    let recognizer = ConsoleRecognizer::new();
    let (collab, rx) = collaborators(Box::new(BrokenPlayer));
    let engine = spawn_rehearsal(
        two_liner(),
        &EngineSettings::default(),
        Box::new(recognizer.clone()),
        collab,
    )
    .unwrap();

    engine.sender().start().unwrap();
    engine.sender().next().unwrap();
    let event = wait_for(&rx, |e| matches!(e, EngineEvent::MissingAudio { .. }));
    assert!(matches!(
        event,
        EngineEvent::MissingAudio { cursor: 1, reason: Some(_), .. }
    ));

    let snapshot = engine.sender().snapshot().unwrap();
    assert_eq!(snapshot.session.state.mode, SessionMode::AwaitingManual);
}

#[test]
fn empty_script_fails_before_spawning() {
    let script = Arc::new(ScriptIndex::from_lines("Empty", None, Vec::new()).unwrap());
    let (collab, _rx) = collaborators(Box::new(InstantPlayer));
    let result = spawn_rehearsal(
        script,
        &EngineSettings::default(),
        Box::new(ConsoleRecognizer::new()),
        collab,
    );
    assert!(matches!(
        result,
        Err(EngineError::Sequencer(SequencerError::EmptyScript))
    ));
}

#[test]
fn dropping_the_handle_tears_down() {
    let recognizer = ConsoleRecognizer::new();
    let (collab, _rx) = collaborators(Box::new(InstantPlayer));
    let engine = spawn_rehearsal(
        two_liner(),
        &EngineSettings::default(),
        Box::new(recognizer.clone()),
        collab,
    )
    .unwrap();
    let sender = engine.sender().clone();
    sender.start().unwrap();
    sender.snapshot().unwrap();
    assert!(recognizer.is_listening());

    drop(engine);
    assert!(!recognizer.is_listening());
    assert!(matches!(sender.snapshot(), Err(EngineError::Disconnected)));
}

#[test]
fn capture_records_a_take() {
    let log = Arc::new(Mutex::new(DeviceLog::default()));
    let takes = Arc::new(Mutex::new(Vec::new()));
    let (collab, rx) = collaborators(Box::new(InstantPlayer));
    let settings = EngineSettings {
        countdown_seconds: 1,
        first_cue_delay_ms: 0,
        ..EngineSettings::default()
    };
    let engine = spawn_capture(
        two_liner(),
        &settings,
        Box::new(MockDevice(log.clone())),
        Box::new(MemoryTakes(takes.clone())),
        collab,
    )
    .unwrap();

    engine.sender().capture(CaptureCommand::Record).unwrap();
    wait_for(&rx, |e| matches!(e, EngineEvent::CountdownTick { remaining: 1 }));
    wait_for(&rx, |e| {
        matches!(
            e,
            EngineEvent::CapturePhaseChanged {
                phase: CapturePhase::Recording
            }
        )
    });
    // user lines wait for a manual advance while recording
    wait_for(&rx, |e| {
        matches!(
            e,
            EngineEvent::LineActivated {
                cursor: 0,
                mode: SessionMode::AwaitingManual,
                ..
            }
        )
    });

    engine.sender().capture(CaptureCommand::Stop).unwrap();
    let ready = wait_for(&rx, |e| matches!(e, EngineEvent::TakeReady { .. }));
    assert!(matches!(
        ready,
        EngineEvent::TakeReady { ref mime_type, .. } if mime_type == "audio/wav"
    ));
    assert_eq!(takes.lock().unwrap().len(), 1);

    let snapshot = engine.sender().snapshot().unwrap();
    let capture = snapshot.capture.unwrap();
    assert_eq!(capture.phase, CapturePhase::Reviewing);
    assert_eq!(snapshot.session.state.mode, SessionMode::Idle);

    engine.sender().capture(CaptureCommand::Retake).unwrap();
    let snapshot = engine.sender().snapshot().unwrap();
    assert_eq!(snapshot.capture.unwrap().phase, CapturePhase::Idle);
    assert_eq!(snapshot.session.state.cursor, 0);

    engine.shutdown();
    assert_eq!(log.lock().unwrap().closed, 1);
}

#[test]
fn mandatory_capture_fails_without_device() {
    let log = Arc::new(Mutex::new(DeviceLog {
        fail_open: true,
        ..DeviceLog::default()
    }));
    let (collab, rx) = collaborators(Box::new(InstantPlayer));
    let settings = EngineSettings {
        capture_mandatory: true,
        ..EngineSettings::default()
    };
    let result = spawn_capture(
        two_liner(),
        &settings,
        Box::new(MockDevice(log.clone())),
        Box::new(MemoryTakes::default()),
        collab,
    );
    assert!(matches!(result, Err(EngineError::Capture(_))));

    let (collab, _) = collaborators(Box::new(InstantPlayer));
    drop(rx);
    let settings = EngineSettings::default();
    let (events_tx, events_rx) = mpsc::channel();
    let engine = spawn_capture(
        two_liner(),
        &settings,
        Box::new(MockDevice(log)),
        Box::new(MemoryTakes::default()),
        Collaborators {
            events: Arc::new(events_tx),
            ..collab
        },
    )
    .unwrap();
    assert!(matches!(
        events_rx.try_recv(),
        Ok(EngineEvent::DeviceError { .. })
    ));
    engine.shutdown();
}

#[test]
fn due_tick_runs_between_queued_messages() {
    let log = Arc::new(Mutex::new(DeviceLog::default()));
    let (collab, rx) = collaborators(Box::new(InstantPlayer));
    let settings = EngineSettings {
        countdown_seconds: 1,
        ..EngineSettings::default()
    };
    let sequencer = new_sequencer(two_liner(), &settings, SequencerOptions::capture()).unwrap();
    let (controller, warning) = CaptureController::new(
        Box::new(MockDevice(log)),
        DeviceConstraints {
            camera: false,
            microphone: true,
        },
        settings.countdown_seconds,
        "Play",
        true,
    )
    .unwrap();
    assert!(warning.is_none());
    let session = CaptureSession {
        controller,
        takes: Box::new(MemoryTakes::default()),
        first_cue_delay: Duration::ZERO,
    };

    let (tx, mailbox) = mpsc::channel();
    let mut engine = Engine::new(sequencer, None, Some(session), collab, &tx);
    engine.on_capture_command(CaptureCommand::Record);
    std::thread::sleep(Duration::from_millis(1100));

    // the mailbox is never empty, so the receive never times out
    let (reply, _) = mpsc::channel();
    tx.send(EngineMsg::Snapshot(reply)).unwrap();
    tx.send(EngineMsg::Shutdown(None)).unwrap();
    engine.run(mailbox);

    let started = rx.try_iter().any(|e| {
        matches!(
            e,
            EngineEvent::CapturePhaseChanged {
                phase: CapturePhase::Recording
            }
        )
    });
    assert!(started);
}
