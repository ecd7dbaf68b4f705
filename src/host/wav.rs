//! # WAV File Devices
//!
//! A host backend for machines without a browser audio stack:
//! - **WavCapture** reads a 16kHz mono WAV file and delivers it block by block
//!   at real-time pace, followed by silence (a microphone in a quiet room)
//! - **WavRecorder** renders scheduled buffers onto a 24kHz timeline at their
//!   absolute start times and writes the timeline to disk when closed
//!
//! ## Clock:
//! The recorder's playback clock starts when the sink is opened, the same way
//! an output audio context starts counting when it is created.
//!
//! ## Memory:
//! The timeline lives in memory until the sink closes (about 96 KB per second
//! at 24kHz), so it is capped at `max_recording`. Buffers past the cap still
//! play and complete on time; only their samples are left out of the file.

use crate::config::HostConfig;
use crate::host::{AudioHost, CaptureSource, HostError, PlaybackCompletions, PlaybackSink};
use crate::live::pcm;
use crate::live::scheduler::BufferId;
use std::collections::HashMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// File-backed host: one input file, one recording per session.
#[derive(Debug, Clone)]
pub struct WavHost {
    capture_file: PathBuf,
    recording_dir: PathBuf,
    max_recording: Duration,
}

impl WavHost {
    pub fn new(
        capture_file: impl Into<PathBuf>,
        recording_dir: impl Into<PathBuf>,
        max_recording: Duration,
    ) -> Self {
        Self {
            capture_file: capture_file.into(),
            recording_dir: recording_dir.into(),
            max_recording,
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(
            &config.capture_file,
            &config.recording_dir,
            Duration::from_secs(config.max_recording_secs),
        )
    }
}

impl AudioHost for WavHost {
    fn open_capture(
        &self,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn CaptureSource>, HostError> {
        Ok(Box::new(WavCapture::open(&self.capture_file, sample_rate, block_size)?))
    }

    fn open_playback(
        &self,
        label: &str,
        sample_rate: u32,
        completions: PlaybackCompletions,
    ) -> Result<Box<dyn PlaybackSink>, HostError> {
        let path = self.recording_dir.join(format!("{}.wav", label));
        Ok(Box::new(WavRecorder::open(
            path,
            sample_rate,
            completions,
            self.max_recording,
        )))
    }
}

/// Convert any supported WAV sample format to f32 in [-1.0, 1.0].
#[allow(unreachable_patterns)]
fn track_to_f32(track: wav::BitDepth) -> Result<Vec<f32>, HostError> {
    match track {
        wav::BitDepth::Eight(samples) => Ok(samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect()),
        wav::BitDepth::Sixteen(samples) => {
            Ok(samples.into_iter().map(pcm::i16_to_sample).collect())
        }
        wav::BitDepth::TwentyFour(samples) => Ok(samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect()),
        wav::BitDepth::ThirtyTwoFloat(samples) => Ok(samples),
        wav::BitDepth::Empty => Err(HostError::Format("WAV file has no samples".to_string())),
        _ => Err(HostError::Format("unsupported WAV sample format".to_string())),
    }
}

pub struct WavCapture {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    block_size: usize,
    task: Option<JoinHandle<()>>,
}

impl WavCapture {
    /// Open and fully read the capture file.
    ///
    /// ## Errors:
    /// - **PermissionDenied**: the file exists but cannot be read
    /// - **Unavailable**: the file does not exist
    /// - **Format**: not mono, or not at `sample_rate`
    pub fn open(path: &Path, sample_rate: u32, block_size: usize) -> Result<Self, HostError> {
        if block_size == 0 {
            return Err(HostError::Format("capture block size must be greater than 0".to_string()));
        }

        let mut file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => {
                HostError::PermissionDenied(format!("{}: {}", path.display(), e))
            }
            ErrorKind::NotFound => HostError::Unavailable(format!("{} not found", path.display())),
            _ => HostError::Io(e),
        })?;

        let (header, track) = wav::read(&mut file)?;
        if header.channel_count != 1 {
            return Err(HostError::Format(format!(
                "expected mono capture, got {} channels",
                header.channel_count
            )));
        }
        if header.sampling_rate != sample_rate {
            return Err(HostError::Format(format!(
                "expected {} Hz capture, got {} Hz",
                sample_rate, header.sampling_rate
            )));
        }

        let samples = track_to_f32(track)?;
        info!(
            path = %path.display(),
            samples = samples.len(),
            seconds = pcm::duration_secs(samples.len(), sample_rate),
            "Opened WAV capture source"
        );

        Ok(Self {
            samples: Arc::new(samples),
            sample_rate,
            block_size,
            task: None,
        })
    }

    pub fn total_samples(&self) -> usize {
        self.samples.len()
    }
}

impl CaptureSource for WavCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn start(&mut self, blocks: mpsc::Sender<Vec<f32>>) -> Result<(), HostError> {
        if self.task.is_some() {
            return Err(HostError::Unavailable("capture already started".to_string()));
        }

        debug!(
            samples = self.total_samples(),
            block_size = self.block_size,
            "Starting WAV capture"
        );
        let samples = self.samples.clone();
        let block_size = self.block_size;
        let period = Duration::from_secs_f64(pcm::duration_secs(block_size, self.sample_rate));

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut offset = 0;

            loop {
                ticker.tick().await;

                let mut block = vec![0.0f32; block_size];
                if offset < samples.len() {
                    let end = (offset + block_size).min(samples.len());
                    block[..end - offset].copy_from_slice(&samples[offset..end]);
                    offset = end;
                    if offset == samples.len() {
                        debug!("WAV capture reached end of file, continuing with silence");
                    }
                }

                if blocks.send(block).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WavCapture {
    fn drop(&mut self) {
        self.close();
    }
}

struct Voice {
    start_index: usize,
    samples: Vec<f32>,
    timer: JoinHandle<()>,
}

pub struct WavRecorder {
    path: PathBuf,
    sample_rate: u32,
    origin: Instant,
    timeline: Vec<f32>,
    max_samples: usize,
    truncated: bool,
    voices: HashMap<BufferId, Voice>,
    completions: PlaybackCompletions,
    closed: bool,
}

impl WavRecorder {
    pub fn open(
        path: PathBuf,
        sample_rate: u32,
        completions: PlaybackCompletions,
        max_recording: Duration,
    ) -> Self {
        let max_samples = (max_recording.as_secs_f64() * sample_rate as f64).round() as usize;
        Self {
            path,
            sample_rate,
            origin: Instant::now(),
            timeline: Vec::new(),
            max_samples,
            truncated: false,
            voices: HashMap::new(),
            completions,
            closed: false,
        }
    }

    fn index_at(&self, seconds: f64) -> usize {
        (seconds.max(0.0) * self.sample_rate as f64).round() as usize
    }

    fn save(&self) -> Result<(), HostError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, self.sample_rate, 16);
        let track =
            wav::BitDepth::Sixteen(self.timeline.iter().map(|&s| pcm::sample_to_i16(s)).collect());
        let mut file = File::create(&self.path)?;
        wav::write(header, &track, &mut file)?;
        Ok(())
    }
}

impl PlaybackSink for WavRecorder {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn play(
        &mut self,
        id: BufferId,
        mut samples: Vec<f32>,
        start_at: f64,
    ) -> Result<(), HostError> {
        if self.closed {
            return Err(HostError::Unavailable("playback sink is closed".to_string()));
        }

        self.voices.retain(|_, voice| !voice.timer.is_finished());

        let duration = pcm::duration_secs(samples.len(), self.sample_rate);

        let start_index = self.index_at(start_at);
        let end_index = (start_index + samples.len()).min(self.max_samples);
        if end_index < start_index + samples.len() && !self.truncated {
            self.truncated = true;
            warn!(
                path = %self.path.display(),
                max_samples = self.max_samples,
                "Recording limit reached, later playback is not written"
            );
        }
        samples.truncate(end_index.saturating_sub(start_index));

        if self.timeline.len() < end_index {
            self.timeline.resize(end_index, 0.0);
        }
        if !samples.is_empty() {
            let window = &mut self.timeline[start_index..end_index];
            for (slot, &sample) in window.iter_mut().zip(samples.iter()) {
                *slot += sample;
            }
        }

        let ends_at = self.origin + Duration::from_secs_f64(start_at.max(0.0) + duration);
        let completions = self.completions.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(ends_at).await;
            let _ = completions.send(id);
        });

        self.voices.insert(
            id,
            Voice {
                start_index,
                samples,
                timer,
            },
        );
        Ok(())
    }

    fn stop_buffer(&mut self, id: BufferId) -> Result<(), HostError> {
        let voice = self.voices.remove(&id).ok_or(HostError::NotPlaying(id))?;
        if voice.timer.is_finished() {
            return Err(HostError::NotPlaying(id));
        }
        voice.timer.abort();

        // Silence whatever part of the buffer has not been heard yet.
        let cut_index = self.index_at(self.current_time()).max(voice.start_index);
        let end_index = voice.start_index + voice.samples.len();
        for index in cut_index..end_index.min(self.timeline.len()) {
            self.timeline[index] -= voice.samples[index - voice.start_index];
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for (_, voice) in self.voices.drain() {
            voice.timer.abort();
        }

        if self.timeline.is_empty() {
            debug!("No playback recorded, skipping {}", self.path.display());
            return;
        }

        match self.save() {
            Ok(()) => info!(
                path = %self.path.display(),
                seconds = pcm::duration_secs(self.timeline.len(), self.sample_rate),
                "Saved playback recording"
            ),
            Err(e) => error!("Failed to save playback recording {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        self.close();
    }
}
