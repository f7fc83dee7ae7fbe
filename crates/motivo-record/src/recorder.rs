//! Mutually-exclusive trajectory/video recording state machine (§4.8 / C8).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::info;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{RecordingError, RecordingKind};

/// Auto-stop delay for an unattended combined video recording (§4.8).
pub const VIDEO_AUTO_STOP: Duration = Duration::from_secs(10 * 60);

/// One captured trajectory sample.
#[derive(Debug, Clone)]
pub struct TrajectorySample {
    /// Generalized positions at capture time.
    pub qpos: Vec<f64>,
    /// ISO-8601 timestamp.
    pub timestamp: String,
}

enum Active {
    Trajectory {
        samples: Vec<TrajectorySample>,
        started_at: Instant,
    },
    Video {
        samples: Vec<TrajectorySample>,
        frames: Vec<Vec<u8>>,
        started_at: Instant,
        deadline: Instant,
    },
}

/// Owns the single active recording, if any, and packs it into a ZIP archive on stop.
pub struct Recorder {
    state: Mutex<Option<Active>>,
    output_dir: PathBuf,
    video_fps: f64,
}

impl Recorder {
    /// Creates a recorder writing archives under `output_dir`. `video_fps` is
    /// the framerate the combined package's encoded video is muxed at (§4.8:
    /// F/4, a quarter of the simulation's tick rate).
    pub fn new(output_dir: impl Into<PathBuf>, video_fps: f64) -> Self {
        Self {
            state: Mutex::new(None),
            output_dir: output_dir.into(),
            video_fps,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Active>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts trajectory-only recording. Errors if a video recording is active.
    pub fn start_trajectory(&self) -> Result<(), RecordingError> {
        let mut guard = self.lock();
        match *guard {
            Some(Active::Video { .. }) => Err(RecordingError::AlreadyRecording(RecordingKind::Video)),
            Some(Active::Trajectory { .. }) => Err(RecordingError::AlreadyRecording(RecordingKind::Trajectory)),
            None => {
                *guard = Some(Active::Trajectory {
                    samples: Vec::new(),
                    started_at: Instant::now(),
                });
                info!("trajectory recording started");
                Ok(())
            }
        }
    }

    /// Starts combined video+trajectory recording. Errors if a trajectory
    /// recording is active. The caller is responsible for stopping the
    /// recording once [`Self::auto_stop_deadline`] elapses.
    pub fn start_video(&self) -> Result<(), RecordingError> {
        let mut guard = self.lock();
        match *guard {
            Some(Active::Trajectory { .. }) => Err(RecordingError::AlreadyRecording(RecordingKind::Trajectory)),
            Some(Active::Video { .. }) => Err(RecordingError::AlreadyRecording(RecordingKind::Video)),
            None => {
                let now = Instant::now();
                *guard = Some(Active::Video {
                    samples: Vec::new(),
                    frames: Vec::new(),
                    started_at: now,
                    deadline: now + VIDEO_AUTO_STOP,
                });
                info!("video recording started");
                Ok(())
            }
        }
    }

    /// Appends one trajectory sample, a no-op if no recording is active.
    pub fn push_sample(&self, sample: TrajectorySample) {
        match &mut *self.lock() {
            Some(Active::Trajectory { samples, .. }) | Some(Active::Video { samples, .. }) => {
                samples.push(sample);
            }
            None => {}
        }
    }

    /// Appends one encoded video frame; a no-op unless a video recording is active.
    pub fn push_frame(&self, jpeg_bytes: Vec<u8>) {
        if let Some(Active::Video { frames, .. }) = &mut *self.lock() {
            frames.push(jpeg_bytes);
        }
    }

    /// If a video recording is active and past its auto-stop deadline,
    /// returns `true`. The caller should then call [`Self::stop_video`].
    pub fn auto_stop_due(&self) -> bool {
        matches!(&*self.lock(), Some(Active::Video { deadline, .. }) if Instant::now() >= *deadline)
    }

    /// `true` while a video recording is active, so callers driving the
    /// per-tick frame feed can skip capturing/encoding when nothing needs it.
    pub fn is_video_active(&self) -> bool {
        matches!(&*self.lock(), Some(Active::Video { .. }))
    }

    /// Stops trajectory recording and packs a `trajectory.zip`. Errors if no
    /// trajectory recording is active.
    pub fn stop_trajectory(&self) -> Result<PathBuf, RecordingError> {
        let active = {
            let mut guard = self.lock();
            match guard.take() {
                Some(Active::Trajectory { samples, started_at }) => (samples, started_at),
                other => {
                    *guard = other;
                    return Err(RecordingError::NotRecording(RecordingKind::Trajectory));
                }
            }
        };
        let (samples, started_at) = active;
        let path = self.archive_path("trajectory");
        write_trajectory_zip(&path, &samples, None, None)?;
        info!(duration = ?started_at.elapsed(), samples = samples.len(), "trajectory recording stopped");
        Ok(path)
    }

    /// Stops video recording, muxes the captured frame sequence into an
    /// H.264/MP4 video at `video_fps`, and packs a combined archive
    /// (trajectory samples, per-frame JPEGs, and the encoded video). Errors
    /// if no video recording is active, or if the frame sequence is
    /// non-empty and `ffmpeg` is unavailable to encode it.
    pub fn stop_video(&self) -> Result<PathBuf, RecordingError> {
        let active = {
            let mut guard = self.lock();
            match guard.take() {
                Some(Active::Video {
                    samples,
                    frames,
                    started_at,
                    ..
                }) => (samples, frames, started_at),
                other => {
                    *guard = other;
                    return Err(RecordingError::NotRecording(RecordingKind::Video));
                }
            }
        };
        let (samples, frames, started_at) = active;
        let video = if frames.is_empty() {
            None
        } else {
            Some(encode_video(&frames, self.video_fps)?)
        };
        let path = self.archive_path("video");
        write_trajectory_zip(&path, &samples, Some(&frames), video.as_deref())?;
        info!(duration = ?started_at.elapsed(), frames = frames.len(), "video recording stopped");
        Ok(path)
    }

    fn archive_path(&self, prefix: &str) -> PathBuf {
        static SEQUENCE: AtomicU64 = AtomicU64::new(0);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.output_dir.join(format!("{prefix}-{millis}-{seq}.zip"))
    }
}

fn write_trajectory_zip(
    path: &Path,
    samples: &[TrajectorySample],
    frames: Option<&[Vec<u8>]>,
    video: Option<&[u8]>,
) -> Result<(), RecordingError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| RecordingError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = std::fs::File::create(path).map_err(|source| RecordingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("trajectory.jsonl", options)?;
    for sample in samples {
        let line = serde_json::json!({"qpos": sample.qpos, "timestamp": sample.timestamp});
        writeln!(zip, "{line}").map_err(|source| RecordingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }

    if let Some(frames) = frames {
        for (i, frame) in frames.iter().enumerate() {
            zip.start_file(format!("frames/{i:06}.jpg"), options)?;
            zip.write_all(frame).map_err(|source| RecordingError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    if let Some(video) = video {
        zip.start_file("video.mp4", options)?;
        zip.write_all(video).map_err(|source| RecordingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }

    zip.finish()?;
    Ok(())
}

/// Muxes a sequence of raw JPEG frames into an H.264/MP4 video via `ffmpeg`
/// at `fps`, returning the encoded file's bytes. `ffmpeg` is a hard
/// requirement for the combined package, not a best-effort extra: without
/// it, the package could not hold the encoded video §4.8 requires.
fn encode_video(frames: &[Vec<u8>], fps: f64) -> Result<Vec<u8>, RecordingError> {
    which("ffmpeg").ok_or_else(|| RecordingError::Encoding("ffmpeg not found on PATH".into()))?;

    let workdir = tempfile::tempdir().map_err(|source| RecordingError::Io {
        path: std::env::temp_dir(),
        source,
    })?;
    for (i, frame) in frames.iter().enumerate() {
        let frame_path = workdir.path().join(format!("frame-{i:06}.jpg"));
        std::fs::write(&frame_path, frame).map_err(|source| RecordingError::Io {
            path: frame_path,
            source,
        })?;
    }

    let output_path = workdir.path().join("video.mp4");
    let status = std::process::Command::new("ffmpeg")
        .arg("-y")
        .arg("-framerate")
        .arg(fps.to_string())
        .arg("-i")
        .arg(workdir.path().join("frame-%06d.jpg"))
        .arg("-c:v")
        .arg("libx264")
        .arg("-pix_fmt")
        .arg("yuv420p")
        .arg(&output_path)
        .status()
        .map_err(|err| RecordingError::Encoding(err.to_string()))?;
    if !status.success() {
        return Err(RecordingError::Encoding(format!("ffmpeg exited with {status}")));
    }

    std::fs::read(&output_path).map_err(|source| RecordingError::Io {
        path: output_path,
        source,
    })
}

fn which(tool: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_video_while_trajectory_active_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), 7.5);
        rec.start_trajectory().unwrap();
        let err = rec.start_video().unwrap_err();
        assert!(matches!(err, RecordingError::AlreadyRecording(RecordingKind::Trajectory)));
    }

    #[test]
    fn starting_trajectory_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), 7.5);
        rec.start_trajectory().unwrap();
        let err = rec.start_trajectory().unwrap_err();
        assert!(matches!(err, RecordingError::AlreadyRecording(RecordingKind::Trajectory)));
    }

    #[test]
    fn stop_without_start_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), 7.5);
        assert!(matches!(
            rec.stop_trajectory().unwrap_err(),
            RecordingError::NotRecording(RecordingKind::Trajectory)
        ));
    }

    #[test]
    fn trajectory_round_trip_produces_archive() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), 7.5);
        rec.start_trajectory().unwrap();
        rec.push_sample(TrajectorySample {
            qpos: vec![0.0, 1.0],
            timestamp: "2026-01-01T00:00:00Z".into(),
        });
        let path = rec.stop_trajectory().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn video_recording_with_no_frames_skips_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), 7.5);
        rec.start_video().unwrap();
        rec.push_sample(TrajectorySample {
            qpos: vec![0.0],
            timestamp: "2026-01-01T00:00:00Z".into(),
        });
        let path = rec.stop_video().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn video_recording_with_frames_encodes_or_reports_missing_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), 7.5);
        rec.start_video().unwrap();
        rec.push_frame(tiny_jpeg());
        rec.push_sample(TrajectorySample {
            qpos: vec![0.0],
            timestamp: "2026-01-01T00:00:00Z".into(),
        });
        match rec.stop_video() {
            Ok(path) => assert!(path.exists()),
            Err(RecordingError::Encoding(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    fn tiny_jpeg() -> Vec<u8> {
        // Minimal valid 1x1 JPEG.
        vec![
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00,
            0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x03, 0x02, 0x02,
            0x02, 0x02, 0x02, 0x03, 0x02, 0x02, 0x02, 0x03, 0x03, 0x03, 0x03, 0x04, 0x06, 0x04,
            0x04, 0x04, 0x04, 0x04, 0x08, 0x06, 0x06, 0x05, 0x06, 0x09, 0x08, 0x0A, 0x0A, 0x09,
            0x08, 0x09, 0x09, 0x0A, 0x0C, 0x0F, 0x0C, 0x0A, 0x0B, 0x0E, 0x0B, 0x09, 0x09, 0x0D,
            0x11, 0x0D, 0x0E, 0x0F, 0x10, 0x10, 0x11, 0x10, 0x0A, 0x0C, 0x12, 0x13, 0x12, 0x10,
            0x13, 0x0F, 0x10, 0x10, 0x10, 0xFF, 0xC9, 0x00, 0x0B, 0x08, 0x00, 0x01, 0x00, 0x01,
            0x01, 0x01, 0x11, 0x00, 0xFF, 0xCC, 0x00, 0x06, 0x00, 0x10, 0x10, 0x05, 0xFF, 0xDA,
            0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, 0xD2, 0xCF, 0x20, 0xFF, 0xD9,
        ]
    }

    #[test]
    fn after_stop_a_new_recording_of_either_kind_can_start() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), 7.5);
        rec.start_trajectory().unwrap();
        rec.stop_trajectory().unwrap();
        rec.start_video().unwrap();
        assert!(rec.stop_video().is_ok());
    }

    #[test]
    fn is_video_active_only_true_during_a_video_recording() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path(), 7.5);
        assert!(!rec.is_video_active());
        rec.start_trajectory().unwrap();
        assert!(!rec.is_video_active());
        rec.stop_trajectory().unwrap();
        rec.start_video().unwrap();
        assert!(rec.is_video_active());
        rec.stop_video().unwrap();
        assert!(!rec.is_video_active());
    }
}
