use super::device::MediaFormat;
use super::CaptureError;
use anyhow::Context;
use chrono::{DateTime, Local};
use hound::{SampleFormat, WavSpec, WavWriter};
use log::info;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// One finished recording, concatenated into a single media object.
#[derive(Debug, Clone, PartialEq)]
pub struct Take {
    pub project_title: String,
    pub media: Vec<u8>,
    pub mime_type: String,
    pub extension: String,
    pub elapsed_seconds: u64,
    pub recorded_at: DateTime<Local>,
}

impl Take {
    /// `<title>_<YYYY-MM-DD>.<ext>`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.{}",
            sanitize_file_stem(&self.project_title),
            self.recorded_at.format("%Y-%m-%d"),
            self.extension
        )
    }
}

fn sanitize_file_stem(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if stem.is_empty() {
        "take".to_string()
    } else {
        stem
    }
}

/// `mm:ss`, minutes keep growing past an hour.
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Concatenates recorded chunks. PCM is wrapped in a WAV container.
pub fn assemble_take(
    chunks: Vec<Vec<u8>>,
    format: &MediaFormat,
    project_title: &str,
    elapsed_seconds: u64,
) -> Result<Take, CaptureError> {
    let raw = chunks.concat();

    let (media, mime_type, extension) = match format {
        MediaFormat::Pcm16 {
            sample_rate,
            channels,
        } => (
            encode_wav(&raw, *sample_rate, *channels)
                .map_err(|e| CaptureError::Encoding(e.to_string()))?,
            "audio/wav".to_string(),
            "wav".to_string(),
        ),
        MediaFormat::Encoded {
            mime_type,
            extension,
        } => (raw, mime_type.clone(), extension.clone()),
    };

    Ok(Take {
        project_title: project_title.to_string(),
        media,
        mime_type,
        extension,
        elapsed_seconds,
        recorded_at: Local::now(),
    })
}

fn encode_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for frame in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([frame[0], frame[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Where finished takes go.
pub trait TakeSink: Send {
    /// Persists the take and returns a human-readable location, if any.
    fn store(&mut self, take: &Take) -> anyhow::Result<Option<String>>;
}

/// Writes takes into a directory, never overwriting an existing file.
pub struct FileTakeSink {
    dir: PathBuf,
}

impl FileTakeSink {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn free_path(&self, file_name: &str) -> PathBuf {
        let candidate = self.dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        let path = Path::new(file_name);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("take");
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("bin");
        (2..)
            .map(|n| self.dir.join(format!("{stem}_{n}.{ext}")))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }
}

impl TakeSink for FileTakeSink {
    fn store(&mut self, take: &Take) -> anyhow::Result<Option<String>> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create output directory {:?}", self.dir))?;
        let path = self.free_path(&take.file_name());
        std::fs::write(&path, &take.media).with_context(|| format!("cannot write take {:?}", path))?;
        info!("Saved take to {:?} ({} bytes)", path, take.media.len());
        Ok(Some(path.display().to_string()))
    }
}
