use super::{CueAudioError, CueCompletion, CuePlayer, CueRequest};
use cpal::traits::{DeviceTrait, HostTrait};
use log::{debug, warn};
use rodio::{OutputStreamBuilder, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Granularity of cancellable waits.
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Sleeps for `total` unless `cancelled` is raised first. Returns true when
/// the full wait elapsed.
fn wait_unless_cancelled(total: Duration, cancelled: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(WAIT_SLICE.min(deadline - now));
    }
}

/// Length of a WAV file, or `None` when it is not a readable WAV.
pub fn wav_duration(path: &Path) -> Option<Duration> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    let duration_samples = reader.duration();
    let sample_rate = spec.sample_rate;

    if duration_samples == 0 || sample_rate == 0 {
        debug!(
            "Invalid WAV file {:?}: duration_samples={}, sample_rate={}",
            path, duration_samples, sample_rate
        );
        return None;
    }
    // `duration` counts frames, not interleaved samples
    Some(Duration::from_secs_f64(
        duration_samples as f64 / sample_rate as f64,
    ))
}

struct ActivePlay {
    cancelled: Arc<AtomicBool>,
    sink: Arc<Mutex<Option<Arc<Sink>>>>,
}

impl ActivePlay {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(sink) = self.sink.lock().unwrap().take() {
            sink.stop();
        }
    }
}

/// Plays cues on the system output with rodio, one thread per play.
pub struct RodioCuePlayer {
    selected_device: Option<String>,
    muted: Arc<AtomicBool>,
    active: Option<ActivePlay>,
}

impl RodioCuePlayer {
    pub fn new(selected_device: Option<String>) -> Self {
        Self {
            selected_device,
            muted: Arc::new(AtomicBool::new(false)),
            active: None,
        }
    }
}

fn output_stream_builder(selected_device: Option<&str>) -> Result<OutputStreamBuilder, CueAudioError> {
    let output_err = |e: &dyn std::fmt::Display| CueAudioError::Output(e.to_string());

    let Some(device_name) = selected_device.filter(|name| *name != "Default") else {
        debug!("Using default output device");
        return OutputStreamBuilder::from_default_device().map_err(|e| output_err(&e));
    };

    let host = cpal::default_host();
    let devices = host.output_devices().map_err(|e| output_err(&e))?;
    let found = devices.into_iter().find(|d| {
        d.name()
            .map(|name| name == device_name)
            .unwrap_or(false)
    });

    match found {
        Some(device) => OutputStreamBuilder::from_device(device).map_err(|e| output_err(&e)),
        None => {
            warn!("Output device '{}' not found, using default device", device_name);
            OutputStreamBuilder::from_default_device().map_err(|e| output_err(&e))
        }
    }
}

fn play_to_end(
    path: &Path,
    selected_device: Option<&str>,
    muted: &AtomicBool,
    cancelled: &AtomicBool,
    slot: &Mutex<Option<Arc<Sink>>>,
) -> Result<(), CueAudioError> {
    let stream_handle = output_stream_builder(selected_device)?
        .open_stream()
        .map_err(|e| CueAudioError::Output(e.to_string()))?;

    let file = File::open(path)?;
    let sink = rodio::play(stream_handle.mixer(), BufReader::new(file))
        .map_err(|e| CueAudioError::Decode(e.to_string()))?;
    let sink = Arc::new(sink);
    sink.set_volume(if muted.load(Ordering::SeqCst) { 0.0 } else { 1.0 });

    {
        let mut slot = slot.lock().unwrap();
        if cancelled.load(Ordering::SeqCst) {
            sink.stop();
            return Ok(());
        }
        *slot = Some(sink.clone());
    }

    sink.sleep_until_end();
    slot.lock().unwrap().take();
    Ok(())
}

impl CuePlayer for RodioCuePlayer {
    fn play(&mut self, request: CueRequest, done: CueCompletion) -> Result<(), CueAudioError> {
        self.stop();

        let path = request.source.path().to_path_buf();
        if !path.is_file() {
            return Err(CueAudioError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }

        self.muted.store(request.muted, Ordering::SeqCst);
        let active = ActivePlay {
            cancelled: Arc::new(AtomicBool::new(false)),
            sink: Arc::new(Mutex::new(None)),
        };
        let cancelled = active.cancelled.clone();
        let slot = active.sink.clone();
        let muted = self.muted.clone();
        let selected_device = self.selected_device.clone();
        self.active = Some(active);

        thread::spawn(move || {
            if !wait_unless_cancelled(request.delay, &cancelled) {
                return;
            }
            let result = play_to_end(&path, selected_device.as_deref(), &muted, &cancelled, &slot);
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            match result {
                Ok(()) => done.finished(),
                Err(e) => done.failed(e),
            }
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel();
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        if let Some(active) = &self.active {
            if let Some(sink) = active.sink.lock().unwrap().as_ref() {
                sink.set_volume(if muted { 0.0 } else { 1.0 });
            }
        }
    }
}

impl Drop for RodioCuePlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Produces no sound; completes after the cue's WAV length (or `fallback`
/// when the length is unknown). Used for headless runs.
pub struct DryRunCuePlayer {
    fallback: Duration,
    cancelled: Option<Arc<AtomicBool>>,
}

impl DryRunCuePlayer {
    pub fn new(fallback: Duration) -> Self {
        Self {
            fallback,
            cancelled: None,
        }
    }
}

impl CuePlayer for DryRunCuePlayer {
    fn play(&mut self, request: CueRequest, done: CueCompletion) -> Result<(), CueAudioError> {
        self.stop();

        let length = wav_duration(request.source.path()).unwrap_or(self.fallback);
        debug!(
            "Dry-run cue {} for {:?} after {:?}",
            request.playback, length, request.delay
        );
        let cancelled = Arc::new(AtomicBool::new(false));
        self.cancelled = Some(cancelled.clone());

        thread::spawn(move || {
            if wait_unless_cancelled(request.delay + length, &cancelled) {
                done.finished();
            }
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancelled) = self.cancelled.take() {
            cancelled.store(true, Ordering::SeqCst);
        }
    }

    fn set_muted(&mut self, _muted: bool) {}
}

impl Drop for DryRunCuePlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue_audio::{CueEvent, CueSource};
    use std::sync::mpsc;

    fn write_wav(path: &Path, seconds: f32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (8000.0 * seconds) as usize;
        for _ in 0..frames * 2 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn completion(playback: u64) -> (CueCompletion, mpsc::Receiver<CueEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        (
            CueCompletion::new(
                playback,
                Arc::new(move |e| {
                    let _ = tx.lock().unwrap().send(e);
                }),
            ),
            rx,
        )
    }

    fn request(playback: u64, path: &Path) -> CueRequest {
        CueRequest {
            playback,
            source: CueSource::File(path.to_path_buf()),
            delay: Duration::ZERO,
            muted: false,
        }
    }

    #[test]
    fn wav_duration_counts_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cue.wav");
        write_wav(&path, 0.5);
        let length = wav_duration(&path).unwrap();
        assert!((length.as_secs_f64() - 0.5).abs() < 0.01);
        assert!(wav_duration(&dir.path().join("missing.wav")).is_none());
    }

    #[test]
    fn dry_run_completes_after_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cue.wav");
        write_wav(&path, 0.1);

        let mut player = DryRunCuePlayer::new(Duration::from_secs(5));
        let (done, rx) = completion(3);
        player.play(request(3, &path), done).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            CueEvent::Finished { playback: 3 }
        );
    }

    #[test]
    fn dry_run_stop_suppresses_completion() {
        let mut player = DryRunCuePlayer::new(Duration::from_millis(200));
        let (done, rx) = completion(1);
        player
            .play(request(1, Path::new("/nonexistent/cue.wav")), done)
            .unwrap();
        player.stop();
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }

    #[test]
    fn rodio_player_rejects_missing_file() {
        let mut player = RodioCuePlayer::new(None);
        let (done, _rx) = completion(1);
        assert!(matches!(
            player.play(request(1, Path::new("/nonexistent/cue.wav")), done),
            Err(CueAudioError::Io(_))
        ));
    }
}
