//! FFmpeg-based transcoder implementation.

use async_trait::async_trait;
use regex_lite::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::config::TranscoderConfig;
use super::error::TranscodeError;
use super::progress::ProgressReporter;
use super::traits::Transcoder;
use super::types::{QualityProfile, TranscodeJob, TranscodeOutput};

/// Maximum bytes of ffmpeg error output kept for diagnostics.
const MAX_ERROR_OUTPUT: usize = 4096;

/// How the encoder process ended.
enum EncoderExit {
    Finished(ExitStatus),
    Cancelled,
}

/// FFmpeg-based transcoder using the LAME MP3 encoder.
pub struct FfmpegTranscoder {
    config: TranscoderConfig,
}

impl FfmpegTranscoder {
    /// Creates a new FFmpeg transcoder with the given configuration.
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Creates a transcoder with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(TranscoderConfig::default())
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Path the encoder writes to before the output is moved into place.
    fn partial_path(destination: &Path) -> PathBuf {
        let mut name = OsString::from(destination.as_os_str());
        name.push(".part");
        PathBuf::from(name)
    }

    /// Encoder arguments for a quality profile.
    fn profile_args(profile: QualityProfile) -> Vec<String> {
        // LAME VBR presets whose average bitrates match the profile labels.
        let vbr_quality = match profile {
            QualityProfile::Vbr65 => Some(9),
            QualityProfile::Vbr115 => Some(6),
            QualityProfile::Vbr165 => Some(4),
            QualityProfile::Vbr190 => Some(2),
            QualityProfile::Vbr245 => Some(0),
            _ => None,
        };

        match (vbr_quality, profile.bitrate_kbps()) {
            (Some(q), _) => vec!["-q:a".to_string(), q.to_string()],
            (None, Some(kbps)) => vec!["-b:a".to_string(), format!("{}k", kbps)],
            (None, None) => Vec::new(),
        }
    }

    /// Builds ffmpeg arguments for one job.
    fn build_args(&self, job: &TranscodeJob, partial_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            job.source_path.to_string_lossy().to_string(),
            // First audio stream only; drops embedded artwork.
            "-map".to_string(),
            "0:a:0".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
        ];

        args.extend(Self::profile_args(job.profile));

        if self.config.measure_level {
            args.extend(["-af".to_string(), "volumedetect".to_string()]);
        }

        args.extend(job.metadata.to_ffmpeg_args());
        args.extend(["-id3v2_version".to_string(), "3".to_string()]);

        args.extend([
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            "-progress".to_string(),
            "pipe:2".to_string(),
            "-nostats".to_string(),
        ]);

        args.extend(self.config.extra_ffmpeg_args.iter().cloned());

        // The partial name has no .mp3 extension, so the muxer is explicit.
        args.extend(["-f".to_string(), "mp3".to_string()]);
        args.push(partial_path.to_string_lossy().to_string());

        args
    }

    /// Parses an `out_time_us=` / `out_time_ms=` progress line into seconds.
    ///
    /// Both keys carry microseconds.
    fn parse_out_time(line: &str) -> Option<f64> {
        let value = line
            .strip_prefix("out_time_us=")
            .or_else(|| line.strip_prefix("out_time_ms="))?;
        value
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|us| *us >= 0)
            .map(|us| us as f64 / 1_000_000.0)
    }

    /// Extracts the `volumedetect` mean volume in dB.
    fn parse_mean_volume(re: &Regex, line: &str) -> Option<f64> {
        re.captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    }

    /// Removes a partial output file, ignoring a missing file.
    async fn discard(path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial output {:?}: {}", path, e);
            }
        }
    }

    /// Checks the source is an existing regular file.
    async fn check_source(path: &Path) -> Result<(), TranscodeError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| TranscodeError::source_unreadable(path, e))?;
        if !meta.is_file() {
            return Err(TranscodeError::source_unreadable(path, "not a regular file"));
        }
        Ok(())
    }

    /// Runs ffmpeg into `partial_path`, returning the measured level.
    async fn run_encoder(
        &self,
        job: &TranscodeJob,
        partial_path: &Path,
        progress: &ProgressReporter,
    ) -> Result<Option<f64>, TranscodeError> {
        let args = self.build_args(job, partial_path);
        debug!("Running {:?} {}", self.config.ffmpeg_path, args.join(" "));

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscodeError::EncoderNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    TranscodeError::codec_failed(format!("Failed to start ffmpeg: {}", e), None)
                }
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TranscodeError::codec_failed("ffmpeg stderr not captured", None))?;
        let mut reader = BufReader::new(stderr).lines();

        let volume_regex = Regex::new(r"mean_volume:\s*(-?\d+(?:\.\d+)?) dB").ok();
        let mut level_db = None;
        let mut error_output = String::new();

        let encode = async {
            loop {
                let line = tokio::select! {
                    _ = progress.cancelled() => return Ok(EncoderExit::Cancelled),
                    line = reader.next_line() => line?,
                };
                let Some(line) = line else { break };

                if let Some(secs) = Self::parse_out_time(&line) {
                    if let Some(duration) = job.duration_secs {
                        if !progress.report(secs / duration) {
                            return Ok(EncoderExit::Cancelled);
                        }
                    }
                    continue;
                }

                if let Some(ref re) = volume_regex {
                    if let Some(db) = Self::parse_mean_volume(re, &line) {
                        level_db = Some(db);
                        continue;
                    }
                }

                if (line.contains("Error") || line.contains("error"))
                    && error_output.len() < MAX_ERROR_OUTPUT
                {
                    error_output.push_str(&line);
                    error_output.push('\n');
                }
            }

            let status = child.wait().await?;
            Ok::<EncoderExit, std::io::Error>(EncoderExit::Finished(status))
        };

        let exit = match self.config.timeout() {
            Some(limit) => match timeout(limit, encode).await {
                Ok(exit) => exit,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(TranscodeError::Timeout {
                        timeout_secs: self.config.timeout_secs,
                    });
                }
            },
            None => encode.await,
        };

        match exit {
            Ok(EncoderExit::Finished(status)) if status.success() => Ok(level_db),
            Ok(EncoderExit::Finished(status)) => Err(TranscodeError::codec_failed(
                format!("FFmpeg exited with code: {:?}", status.code()),
                (!error_output.is_empty()).then_some(error_output),
            )),
            Ok(EncoderExit::Cancelled) => {
                let _ = child.kill().await;
                Err(TranscodeError::Cancelled)
            }
            Err(e) => {
                let _ = child.kill().await;
                Err(TranscodeError::codec_failed(
                    format!("Failed reading ffmpeg output: {}", e),
                    None,
                ))
            }
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        job: TranscodeJob,
        progress: ProgressReporter,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let start = Instant::now();

        job.ensure_supported_kind()?;
        if progress.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }
        Self::check_source(&job.source_path).await?;

        if let Some(parent) = job.destination_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TranscodeError::destination_write(parent, e))?;
        }

        let partial_path = Self::partial_path(&job.destination_path);
        let level_db = match self.run_encoder(&job, &partial_path, &progress).await {
            Ok(level_db) => level_db,
            Err(e) => {
                Self::discard(&partial_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial_path, &job.destination_path).await {
            Self::discard(&partial_path).await;
            return Err(TranscodeError::destination_write(&job.destination_path, e));
        }

        let output_meta = tokio::fs::metadata(&job.destination_path)
            .await
            .map_err(|e| TranscodeError::destination_write(&job.destination_path, e))?;
        if output_meta.len() == 0 {
            Self::discard(&job.destination_path).await;
            return Err(TranscodeError::codec_failed("Encoder produced an empty file", None));
        }

        Ok(TranscodeOutput {
            track_id: job.track_id,
            output_path: job.destination_path,
            output_size_bytes: output_meta.len(),
            level_db,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn validate(&self) -> Result<(), TranscodeError> {
        let output = Command::new(&self.config.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscodeError::EncoderNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    TranscodeError::codec_failed(format!("Failed to run ffmpeg: {}", e), None)
                }
            })?;

        if !output.status.success() {
            return Err(TranscodeError::codec_failed(
                "ffmpeg -encoders failed",
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
            ));
        }

        if !String::from_utf8_lossy(&output.stdout).contains("libmp3lame") {
            return Err(TranscodeError::codec_failed(
                "ffmpeg was built without libmp3lame",
                None,
            ));
        }

        Ok(())
    }
}
