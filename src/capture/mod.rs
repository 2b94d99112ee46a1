//! Capture mode: countdown, recording and take review around one exclusively
//! owned device stream.
//!
//! ```text
//!  Idle ──begin──▶ Countdown(n..1) ──▶ Recording ⇄ PausedRecording
//!   ▲                    │                  │            │
//!   │                  stop                stop ◀────────┘
//!   │                    ▼                  ▼
//!   └──────────────── Idle ◀──retake── Reviewing
//! ```

pub(crate) mod device;
mod take;

pub use device::{
    CaptureDevice, ChunkBuffer, CpalMicrophone, DeviceConstraints, DeviceHandle, DeviceStream,
    MediaFormat, RECORDER_TIMESLICE,
};
pub use take::{assemble_take, format_elapsed, FileTakeSink, Take, TakeSink};

use log::{debug, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera or microphone access was denied")]
    PermissionDenied,
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("camera and microphone are both disabled")]
    NothingToCapture,
    #[error("no capture device is open")]
    NotAcquired,
    #[error("recorder failed: {0}")]
    Recorder(String),
    #[error("cannot encode take: {0}")]
    Encoding(String),
    #[error("not allowed while {0:?}")]
    InvalidPhase(CapturePhase),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CapturePhase {
    Idle,
    Countdown { remaining: u32 },
    Recording,
    PausedRecording,
    Reviewing,
}

/// What a capture transition means for the rest of the engine.
#[derive(Debug, PartialEq)]
pub enum CaptureSignal {
    PhaseChanged(CapturePhase),
    CountdownTick(u32),
    /// The recorder is running; cues may play from line 0.
    RecordingStarted,
    RecordingTick(u64),
    /// Recording could not start; the controller is back in Idle.
    RecordingFailed(String),
}

pub struct CaptureController {
    phase: CapturePhase,
    device: DeviceHandle,
    chunks: ChunkBuffer,
    countdown_seconds: u32,
    elapsed_seconds: u64,
    next_tick: Option<Instant>,
    project_title: String,
}

impl CaptureController {
    /// Opens the device right away. A failure is returned as an error only
    /// when `mandatory`; otherwise it comes back as a warning.
    pub fn new(
        device: Box<dyn CaptureDevice>,
        constraints: DeviceConstraints,
        countdown_seconds: u32,
        project_title: impl Into<String>,
        mandatory: bool,
    ) -> Result<(Self, Option<CaptureError>), CaptureError> {
        let mut controller = Self {
            phase: CapturePhase::Idle,
            device: DeviceHandle::new(device, constraints),
            chunks: ChunkBuffer::default(),
            countdown_seconds: countdown_seconds.max(1),
            elapsed_seconds: 0,
            next_tick: None,
            project_title: project_title.into(),
        };

        let warning = match controller.device.acquire() {
            Ok(()) => None,
            Err(e) if mandatory => return Err(e),
            Err(e) => {
                warn!("Capture device unavailable: {}", e);
                Some(e)
            }
        };
        Ok((controller, warning))
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn constraints(&self) -> DeviceConstraints {
        self.device.constraints()
    }

    pub fn is_device_acquired(&self) -> bool {
        self.device.is_acquired()
    }

    /// When the next countdown or elapsed tick is due.
    pub fn next_tick(&self) -> Option<Instant> {
        self.next_tick
    }

    fn set_phase(&mut self, phase: CapturePhase, signals: &mut Vec<CaptureSignal>) {
        if self.phase != phase {
            debug!("Capture {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            signals.push(CaptureSignal::PhaseChanged(phase));
        }
    }

    fn return_to_idle(&mut self, signals: &mut Vec<CaptureSignal>) {
        self.next_tick = None;
        self.chunks.clear();
        self.device.release();
        self.set_phase(CapturePhase::Idle, signals);
    }

    pub fn begin_countdown(&mut self, now: Instant) -> Result<Vec<CaptureSignal>, CaptureError> {
        if self.phase != CapturePhase::Idle {
            return Err(CaptureError::InvalidPhase(self.phase));
        }
        self.device.acquire()?;

        self.elapsed_seconds = 0;
        self.chunks.clear();
        self.next_tick = Some(now + TICK);

        let mut signals = Vec::new();
        let remaining = self.countdown_seconds;
        self.set_phase(CapturePhase::Countdown { remaining }, &mut signals);
        signals.push(CaptureSignal::CountdownTick(remaining));
        Ok(signals)
    }

    /// Advances the countdown or the elapsed timer when a tick is due.
    pub fn on_tick(&mut self, now: Instant) -> Vec<CaptureSignal> {
        let mut signals = Vec::new();
        let Some(due) = self.next_tick else {
            return signals;
        };
        if now < due {
            return signals;
        }
        self.next_tick = Some(due + TICK);

        match self.phase {
            CapturePhase::Countdown { remaining } if remaining > 1 => {
                let remaining = remaining - 1;
                self.phase = CapturePhase::Countdown { remaining };
                signals.push(CaptureSignal::CountdownTick(remaining));
            }
            CapturePhase::Countdown { .. } => self.start_recording(now, &mut signals),
            CapturePhase::Recording => {
                self.elapsed_seconds += 1;
                signals.push(CaptureSignal::RecordingTick(self.elapsed_seconds));
            }
            _ => self.next_tick = None,
        }
        signals
    }

    fn start_recording(&mut self, now: Instant, signals: &mut Vec<CaptureSignal>) {
        let chunks = self.chunks.clone();
        let started = self
            .device
            .stream_mut()
            .and_then(|stream| stream.start_recorder(chunks));

        match started {
            Ok(()) => {
                info!("Recording started");
                self.next_tick = Some(now + TICK);
                self.set_phase(CapturePhase::Recording, signals);
                signals.push(CaptureSignal::RecordingStarted);
            }
            Err(e) => {
                warn!("Failed to start recorder: {}", e);
                signals.push(CaptureSignal::RecordingFailed(e.to_string()));
                self.return_to_idle(signals);
            }
        }
    }

    pub fn toggle_pause(&mut self, now: Instant) -> Result<Vec<CaptureSignal>, CaptureError> {
        let mut signals = Vec::new();
        match self.phase {
            CapturePhase::Recording => {
                self.device.stream_mut()?.pause_recorder()?;
                self.next_tick = None;
                self.set_phase(CapturePhase::PausedRecording, &mut signals);
            }
            CapturePhase::PausedRecording => {
                self.device.stream_mut()?.resume_recorder()?;
                self.next_tick = Some(now + TICK);
                self.set_phase(CapturePhase::Recording, &mut signals);
            }
            phase => return Err(CaptureError::InvalidPhase(phase)),
        }
        Ok(signals)
    }

    /// Ends the recording and assembles the take. Stopping during the
    /// countdown cancels it and yields no take.
    pub fn stop(&mut self) -> Result<(Option<Take>, Vec<CaptureSignal>), CaptureError> {
        let mut signals = Vec::new();
        match self.phase {
            CapturePhase::Countdown { .. } => {
                info!("Countdown cancelled");
                self.return_to_idle(&mut signals);
                Ok((None, signals))
            }
            CapturePhase::Recording | CapturePhase::PausedRecording => {
                self.next_tick = None;
                let stream = self.device.stream_mut()?;
                let flushed = stream.stop_recorder();
                let format = stream.format();
                if let Err(e) = flushed {
                    warn!("Recorder did not flush cleanly: {}", e);
                }

                let take = assemble_take(
                    self.chunks.take(),
                    &format,
                    &self.project_title,
                    self.elapsed_seconds,
                );
                self.set_phase(CapturePhase::Reviewing, &mut signals);
                let take = take?;
                info!(
                    "Take assembled: {} bytes, {}",
                    take.media.len(),
                    format_elapsed(take.elapsed_seconds)
                );
                Ok((Some(take), signals))
            }
            phase => Err(CaptureError::InvalidPhase(phase)),
        }
    }

    /// Discards the reviewed take and returns to Idle.
    pub fn retake(&mut self) -> Result<Vec<CaptureSignal>, CaptureError> {
        match self.phase {
            CapturePhase::Reviewing | CapturePhase::Idle => {
                let mut signals = Vec::new();
                self.elapsed_seconds = 0;
                self.return_to_idle(&mut signals);
                Ok(signals)
            }
            phase => Err(CaptureError::InvalidPhase(phase)),
        }
    }

    /// Re-acquires the stream with new constraints. Refused mid-recording.
    pub fn set_constraints(&mut self, constraints: DeviceConstraints) -> Result<(), CaptureError> {
        match self.phase {
            CapturePhase::Idle | CapturePhase::Reviewing => self.device.reconfigure(constraints),
            phase => Err(CaptureError::InvalidPhase(phase)),
        }
    }

    pub fn dispose(&mut self) {
        if matches!(
            self.phase,
            CapturePhase::Recording | CapturePhase::PausedRecording
        ) {
            if let Ok(stream) = self.device.stream_mut() {
                let _ = stream.stop_recorder();
            }
        }
        self.next_tick = None;
        self.device.release();
    }
}

#[cfg(test)]
mod tests {
    use super::device::mock::{DeviceLog, MockDevice};
    use super::*;
    use std::sync::{Arc, Mutex};

    const BOTH: DeviceConstraints = DeviceConstraints {
        camera: true,
        microphone: true,
    };

    fn controller() -> (CaptureController, Arc<Mutex<DeviceLog>>) {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        let (controller, warning) =
            CaptureController::new(Box::new(MockDevice(log.clone())), BOTH, 3, "Hamlet", false)
                .unwrap();
        assert!(warning.is_none());
        (controller, log)
    }

    /// Runs the countdown to completion, returning the instant recording began.
    fn record(c: &mut CaptureController, start: Instant) -> Instant {
        c.begin_countdown(start).unwrap();
        let mut now = start;
        for _ in 0..3 {
            now += TICK;
            c.on_tick(now);
        }
        assert_eq!(c.phase(), CapturePhase::Recording);
        now
    }

    #[test]
    fn countdown_ticks_then_records() {
        let (mut c, log) = controller();
        let start = Instant::now();
        let signals = c.begin_countdown(start).unwrap();
        assert_eq!(
            signals,
            vec![
                CaptureSignal::PhaseChanged(CapturePhase::Countdown { remaining: 3 }),
                CaptureSignal::CountdownTick(3)
            ]
        );

        // early ticks are ignored
        assert!(c.on_tick(start).is_empty());
        assert_eq!(c.on_tick(start + TICK), vec![CaptureSignal::CountdownTick(2)]);
        assert_eq!(c.on_tick(start + TICK * 2), vec![CaptureSignal::CountdownTick(1)]);
        let signals = c.on_tick(start + TICK * 3);
        assert!(signals.contains(&CaptureSignal::RecordingStarted));
        assert_eq!(log.lock().unwrap().recorder, vec!["start"]);
    }

    #[test]
    fn elapsed_counts_only_while_recording() {
        let (mut c, _) = controller();
        let mut now = record(&mut c, Instant::now());

        now += TICK;
        assert_eq!(c.on_tick(now), vec![CaptureSignal::RecordingTick(1)]);

        c.toggle_pause(now).unwrap();
        assert_eq!(c.phase(), CapturePhase::PausedRecording);
        assert!(c.next_tick().is_none());
        now += TICK * 10;
        assert!(c.on_tick(now).is_empty());
        assert_eq!(c.elapsed_seconds(), 1);

        c.toggle_pause(now).unwrap();
        now += TICK;
        assert_eq!(c.on_tick(now), vec![CaptureSignal::RecordingTick(2)]);
    }

    #[test]
    fn stop_assembles_take_and_retake_releases_device() {
        let (mut c, log) = controller();
        let now = record(&mut c, Instant::now());
        c.on_tick(now + TICK);

        let (take, signals) = c.stop().unwrap();
        let take = take.unwrap();
        assert_eq!(signals, vec![CaptureSignal::PhaseChanged(CapturePhase::Reviewing)]);
        assert_eq!(take.elapsed_seconds, 1);
        assert_eq!(take.mime_type, "audio/wav");
        assert_eq!(log.lock().unwrap().recorder, vec!["start", "stop"]);

        c.retake().unwrap();
        assert_eq!(c.phase(), CapturePhase::Idle);
        assert_eq!(c.elapsed_seconds(), 0);
        assert!(!c.is_device_acquired());
        assert_eq!(log.lock().unwrap().closed, 1);

        // the next countdown reopens the device
        c.begin_countdown(Instant::now()).unwrap();
        assert_eq!(log.lock().unwrap().opened.len(), 2);
    }

    #[test]
    fn stop_during_countdown_cancels() {
        let (mut c, log) = controller();
        c.begin_countdown(Instant::now()).unwrap();
        let (take, _) = c.stop().unwrap();
        assert!(take.is_none());
        assert_eq!(c.phase(), CapturePhase::Idle);
        assert!(log.lock().unwrap().recorder.is_empty());
    }

    #[test]
    fn invalid_transitions_are_refused() {
        let (mut c, _) = controller();
        assert!(matches!(c.stop(), Err(CaptureError::InvalidPhase(CapturePhase::Idle))));
        assert!(c.toggle_pause(Instant::now()).is_err());

        record(&mut c, Instant::now());
        assert!(c.begin_countdown(Instant::now()).is_err());
        assert!(c.retake().is_err());
        assert!(c.set_constraints(BOTH).is_err());
    }

    #[test]
    fn toggling_tracks_reacquires() {
        let (mut c, log) = controller();
        let mic_only = DeviceConstraints {
            camera: false,
            microphone: true,
        };
        c.set_constraints(mic_only).unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.opened, vec![BOTH, mic_only]);
        assert_eq!(log.closed, 1);
    }

    #[test]
    fn device_failure_is_fatal_only_when_mandatory() {
        let log = Arc::new(Mutex::new(DeviceLog {
            fail_open: true,
            ..DeviceLog::default()
        }));
        let result =
            CaptureController::new(Box::new(MockDevice(log.clone())), BOTH, 3, "Play", true);
        assert!(matches!(result, Err(CaptureError::PermissionDenied)));

        let (c, warning) =
            CaptureController::new(Box::new(MockDevice(log)), BOTH, 3, "Play", false).unwrap();
        assert!(matches!(warning, Some(CaptureError::PermissionDenied)));
        assert!(!c.is_device_acquired());
    }

    #[test]
    fn dispose_stops_recorder_and_tracks() {
        let (mut c, log) = controller();
        record(&mut c, Instant::now());
        c.dispose();
        let log = log.lock().unwrap();
        assert_eq!(log.recorder, vec!["start", "stop"]);
        assert_eq!(log.closed, 1);
    }
}
