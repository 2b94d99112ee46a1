//! Capture devices and the exclusive handle on their stream.

use super::CaptureError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The recorder flushes buffered media into the chunk buffer this often.
pub const RECORDER_TIMESLICE: Duration = Duration::from_millis(1000);

const STOP_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConstraints {
    pub camera: bool,
    pub microphone: bool,
}

impl DeviceConstraints {
    pub fn any(&self) -> bool {
        self.camera || self.microphone
    }
}

/// What the recorder emits into the chunk buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFormat {
    /// Little-endian interleaved 16-bit samples; wrapped into WAV on stop.
    Pcm16 { sample_rate: u32, channels: u16 },
    /// Already-encoded container chunks, concatenated as-is.
    Encoded { mime_type: String, extension: String },
}

/// Shared, append-only list of recorded chunks.
#[derive(Debug, Clone, Default)]
pub struct ChunkBuffer(Arc<Mutex<Vec<Vec<u8>>>>);

impl ChunkBuffer {
    pub fn push(&self, chunk: Vec<u8>) {
        if !chunk.is_empty() {
            self.0.lock().unwrap().push(chunk);
        }
    }

    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Camera/microphone provider.
pub trait CaptureDevice: Send {
    fn open(&mut self, constraints: DeviceConstraints) -> Result<Box<dyn DeviceStream>, CaptureError>;
}

/// Open tracks plus their recorder.
pub trait DeviceStream: Send {
    fn format(&self) -> MediaFormat;
    fn start_recorder(&mut self, chunks: ChunkBuffer) -> Result<(), CaptureError>;
    fn pause_recorder(&mut self) -> Result<(), CaptureError>;
    fn resume_recorder(&mut self) -> Result<(), CaptureError>;
    /// Returns after every buffered sample has reached the chunk buffer.
    fn stop_recorder(&mut self) -> Result<(), CaptureError>;
    fn stop_tracks(&mut self);
}

/// Sole owner of the open device stream. Dropping it stops all tracks.
pub struct DeviceHandle {
    device: Box<dyn CaptureDevice>,
    stream: Option<Box<dyn DeviceStream>>,
    constraints: DeviceConstraints,
}

impl DeviceHandle {
    pub fn new(device: Box<dyn CaptureDevice>, constraints: DeviceConstraints) -> Self {
        Self {
            device,
            stream: None,
            constraints,
        }
    }

    pub fn constraints(&self) -> DeviceConstraints {
        self.constraints
    }

    pub fn is_acquired(&self) -> bool {
        self.stream.is_some()
    }

    pub fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }
        if !self.constraints.any() {
            return Err(CaptureError::NothingToCapture);
        }
        let stream = self.device.open(self.constraints)?;
        info!("Capture device acquired ({:?})", self.constraints);
        self.stream = Some(stream);
        Ok(())
    }

    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
            info!("Capture device released");
        }
    }

    /// Tears the stream down and reopens it with new constraints.
    pub fn reconfigure(&mut self, constraints: DeviceConstraints) -> Result<(), CaptureError> {
        self.release();
        self.constraints = constraints;
        if constraints.any() {
            self.acquire()
        } else {
            debug!("All capture tracks disabled");
            Ok(())
        }
    }

    pub fn stream_mut(&mut self) -> Result<&mut Box<dyn DeviceStream>, CaptureError> {
        self.stream.as_mut().ok_or(CaptureError::NotAcquired)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

enum RecorderControl {
    Start(ChunkBuffer),
    Pause,
    Resume,
    Stop(mpsc::Sender<()>),
    Close,
}

/// Microphone input through cpal. Video is not available, so a camera
/// request degrades to audio-only.
pub struct CpalMicrophone {
    selected_device: Option<String>,
}

impl CpalMicrophone {
    pub fn new(selected_device: Option<String>) -> Self {
        Self { selected_device }
    }
}

impl CaptureDevice for CpalMicrophone {
    fn open(&mut self, constraints: DeviceConstraints) -> Result<Box<dyn DeviceStream>, CaptureError> {
        if !constraints.microphone {
            return Err(CaptureError::DeviceUnavailable(
                "camera capture is not supported on this host".to_string(),
            ));
        }
        if constraints.camera {
            warn!("Camera capture is not supported; recording audio only");
        }

        let (control_tx, control_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let selected_device = self.selected_device.clone();

        let worker = thread::spawn(move || {
            run_input_worker(selected_device, control_rx, ready_tx);
        });

        match ready_rx.recv() {
            Ok(Ok(format)) => Ok(Box::new(CpalStream {
                control: control_tx,
                worker: Some(worker),
                format,
            })),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(CaptureError::DeviceUnavailable(
                "audio input worker exited".to_string(),
            )),
        }
    }
}

fn resolve_input_device(selected: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    if let Some(name) = selected.filter(|name| *name != "Default") {
        let found = host
            .input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));
        match found {
            Some(device) => return Ok(device),
            None => warn!("Input device '{}' not found, using default device", name),
        }
    }
    host.default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable("no input audio device found".to_string()))
}

/// Downmixes interleaved audio to mono.
fn downmix_to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| ((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes())
        .collect()
}

/// Owns the cpal stream (which must stay on one thread) until `Close`.
fn run_input_worker(
    selected_device: Option<String>,
    control: mpsc::Receiver<RecorderControl>,
    ready: mpsc::Sender<Result<MediaFormat, CaptureError>>,
) {
    let device = match resolve_input_device(selected_device.as_deref()) {
        Ok(device) => device,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let config: cpal::StreamConfig = match device.default_input_config() {
        Ok(config) => config.into(),
        Err(e) => {
            let _ = ready.send(Err(CaptureError::DeviceUnavailable(e.to_string())));
            return;
        }
    };
    let channels = config.channels;
    let sample_rate = config.sample_rate.0;

    let pending: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let recording = Arc::new(AtomicBool::new(false));

    let stream = {
        let pending = pending.clone();
        let recording = recording.clone();
        device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if recording.load(Ordering::Relaxed) {
                    pending
                        .lock()
                        .unwrap()
                        .extend_from_slice(&downmix_to_mono(data, channels));
                }
            },
            |err| error!("Audio capture error: {err}"),
            None,
        )
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::DeviceUnavailable(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(CaptureError::DeviceUnavailable(e.to_string())));
        return;
    }

    info!(
        "Microphone open: {} ({}Hz, {}ch, recording mono)",
        device.name().unwrap_or_else(|_| "<unknown>".into()),
        sample_rate,
        channels
    );
    let _ = ready.send(Ok(MediaFormat::Pcm16 {
        sample_rate,
        channels: 1,
    }));

    let flush = |chunks: &Option<ChunkBuffer>| {
        let samples = std::mem::take(&mut *pending.lock().unwrap());
        if let Some(chunks) = chunks {
            chunks.push(pcm16_bytes(&samples));
        }
    };

    let mut chunks: Option<ChunkBuffer> = None;
    loop {
        match control.recv_timeout(RECORDER_TIMESLICE) {
            Ok(RecorderControl::Start(buffer)) => {
                pending.lock().unwrap().clear();
                chunks = Some(buffer);
                recording.store(true, Ordering::Relaxed);
            }
            Ok(RecorderControl::Pause) => {
                recording.store(false, Ordering::Relaxed);
                flush(&chunks);
            }
            Ok(RecorderControl::Resume) => {
                if chunks.is_some() {
                    recording.store(true, Ordering::Relaxed);
                }
            }
            Ok(RecorderControl::Stop(ack)) => {
                recording.store(false, Ordering::Relaxed);
                flush(&chunks);
                chunks = None;
                let _ = ack.send(());
            }
            Ok(RecorderControl::Close) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if recording.load(Ordering::Relaxed) {
                    flush(&chunks);
                }
            }
        }
    }

    recording.store(false, Ordering::Relaxed);
    drop(stream);
    debug!("Microphone closed");
}

struct CpalStream {
    control: mpsc::Sender<RecorderControl>,
    worker: Option<JoinHandle<()>>,
    format: MediaFormat,
}

impl CpalStream {
    fn send(&self, message: RecorderControl) -> Result<(), CaptureError> {
        self.control
            .send(message)
            .map_err(|_| CaptureError::Recorder("microphone worker is gone".to_string()))
    }
}

impl DeviceStream for CpalStream {
    fn format(&self) -> MediaFormat {
        self.format.clone()
    }

    fn start_recorder(&mut self, chunks: ChunkBuffer) -> Result<(), CaptureError> {
        self.send(RecorderControl::Start(chunks))
    }

    fn pause_recorder(&mut self) -> Result<(), CaptureError> {
        self.send(RecorderControl::Pause)
    }

    fn resume_recorder(&mut self) -> Result<(), CaptureError> {
        self.send(RecorderControl::Resume)
    }

    fn stop_recorder(&mut self) -> Result<(), CaptureError> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(RecorderControl::Stop(ack_tx))?;
        ack_rx
            .recv_timeout(STOP_FLUSH_TIMEOUT)
            .map_err(|_| CaptureError::Recorder("recorder did not flush in time".to_string()))
    }

    fn stop_tracks(&mut self) {
        let _ = self.control.send(RecorderControl::Close);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    #[derive(Debug, Default)]
    pub struct DeviceLog {
        pub opened: Vec<DeviceConstraints>,
        pub closed: usize,
        pub recorder: Vec<&'static str>,
        pub fail_open: bool,
    }

    /// Records its lifecycle and emits one fixed chunk per recorder stop.
    pub struct MockDevice(pub Arc<Mutex<DeviceLog>>);

    struct MockStream {
        log: Arc<Mutex<DeviceLog>>,
        chunks: Option<ChunkBuffer>,
    }

    impl CaptureDevice for MockDevice {
        fn open(&mut self, constraints: DeviceConstraints) -> Result<Box<dyn DeviceStream>, CaptureError> {
            let mut log = self.0.lock().unwrap();
            if log.fail_open {
                return Err(CaptureError::PermissionDenied);
            }
            log.opened.push(constraints);
            Ok(Box::new(MockStream {
                log: self.0.clone(),
                chunks: None,
            }))
        }
    }

    impl DeviceStream for MockStream {
        fn format(&self) -> MediaFormat {
            MediaFormat::Pcm16 {
                sample_rate: 8000,
                channels: 1,
            }
        }

        fn start_recorder(&mut self, chunks: ChunkBuffer) -> Result<(), CaptureError> {
            self.log.lock().unwrap().recorder.push("start");
            self.chunks = Some(chunks);
            Ok(())
        }

        fn pause_recorder(&mut self) -> Result<(), CaptureError> {
            self.log.lock().unwrap().recorder.push("pause");
            Ok(())
        }

        fn resume_recorder(&mut self) -> Result<(), CaptureError> {
            self.log.lock().unwrap().recorder.push("resume");
            Ok(())
        }

        fn stop_recorder(&mut self) -> Result<(), CaptureError> {
            self.log.lock().unwrap().recorder.push("stop");
            if let Some(chunks) = self.chunks.take() {
                chunks.push(vec![1, 0, 2, 0]);
                chunks.push(vec![3, 0]);
            }
            Ok(())
        }

        fn stop_tracks(&mut self) {
            self.log.lock().unwrap().closed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{DeviceLog, MockDevice};
    use super::*;

    const BOTH: DeviceConstraints = DeviceConstraints {
        camera: true,
        microphone: true,
    };

    #[test]
    fn handle_acquires_once_and_releases_on_drop() {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        {
            let mut handle = DeviceHandle::new(Box::new(MockDevice(log.clone())), BOTH);
            handle.acquire().unwrap();
            handle.acquire().unwrap();
            assert!(handle.is_acquired());
        }
        let log = log.lock().unwrap();
        assert_eq!(log.opened.len(), 1);
        assert_eq!(log.closed, 1);
    }

    #[test]
    fn reconfigure_reopens_with_new_constraints() {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        let mut handle = DeviceHandle::new(Box::new(MockDevice(log.clone())), BOTH);
        handle.acquire().unwrap();

        let audio_only = DeviceConstraints {
            camera: false,
            microphone: true,
        };
        handle.reconfigure(audio_only).unwrap();
        assert_eq!(log.lock().unwrap().opened, vec![BOTH, audio_only]);
        assert_eq!(log.lock().unwrap().closed, 1);

        handle
            .reconfigure(DeviceConstraints {
                camera: false,
                microphone: false,
            })
            .unwrap();
        assert!(!handle.is_acquired());
        assert!(matches!(handle.acquire(), Err(CaptureError::NothingToCapture)));
        assert!(matches!(handle.stream_mut(), Err(CaptureError::NotAcquired)));
    }

    #[test]
    fn pcm_conversion_and_downmix() {
        assert_eq!(downmix_to_mono(&[0.5, -0.5, 1.0, 0.0], 2), vec![0.0, 0.5]);
        let bytes = pcm16_bytes(&[1.0, -2.0]);
        assert_eq!(bytes.len(), 4);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -i16::MAX);
    }

    #[test]
    fn chunk_buffer_skips_empty_chunks() {
        let buffer = ChunkBuffer::default();
        buffer.push(Vec::new());
        buffer.push(vec![1]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.take(), vec![vec![1]]);
        assert!(buffer.is_empty());
    }
}
