use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::AudioFormat;
use crate::{Result, VidSnatchError};

/// Common layout every stitched clip is scaled to
const STITCH_WIDTH: u32 = 1280;
const STITCH_HEIGHT: u32 = 720;
const STITCH_FPS: u32 = 30;
const SAMPLE_RATE: &str = "44100";

/// Bitrate for mp3 output when the source does not report one
pub const DEFAULT_MP3_KBPS: u32 = 192;

/// Local media processing (merge, transcode, cut, concatenate, measure)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Mux a video-only and an audio-only file into `output`
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;

    /// Re-encode audio into `format`
    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        format: AudioFormat,
        bitrate_kbps: Option<u32>,
    ) -> Result<()>;

    /// Cut `duration` seconds starting at `start`
    async fn trim(&self, input: &Path, output: &Path, start: f64, duration: f64) -> Result<()>;

    /// Concatenate clips, in order, into one file
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    /// Duration of a media file in seconds, if it can be determined
    async fn media_duration(&self, path: &Path) -> Result<Option<f64>>;
}

/// ffmpeg/ffprobe backed [`MediaTool`]
pub struct Ffmpeg {
    ffmpeg_path: String,
    ffprobe_path: String,
    timeout: Option<Duration>,
}

impl Ffmpeg {
    pub fn new(
        ffmpeg_path: impl Into<String>,
        ffprobe_path: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            timeout,
        }
    }

    /// Run one ffmpeg invocation to completion and check that it produced `output`
    async fn run(&self, args: Vec<String>, output: &Path) -> Result<()> {
        tracing::debug!("{} {}", self.ffmpeg_path, args.join(" "));

        let mut command = Command::new(&self.ffmpeg_path);
        command
            .arg("-y")
            .args(["-hide_banner", "-loglevel", "error"])
            .args(&args)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = run_with_timeout(&mut command, self.timeout, &self.ffmpeg_path).await?;

        if !result.status.success() {
            return Err(VidSnatchError::Subprocess {
                tool: self.ffmpeg_path.clone(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            }
            .into());
        }

        let written = tokio::fs::metadata(output)
            .await
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if !written {
            return Err(VidSnatchError::Subprocess {
                tool: self.ffmpeg_path.clone(),
                stderr: format!("exited successfully but {} is missing or empty", output.display()),
            }
            .into());
        }

        Ok(())
    }
}

async fn run_with_timeout(
    command: &mut Command,
    timeout: Option<Duration>,
    tool: &str,
) -> Result<std::process::Output> {
    let spawn_error = |e: std::io::Error| VidSnatchError::Subprocess {
        tool: tool.to_string(),
        stderr: format!("could not start: {}", e),
    };

    match timeout {
        // the child is killed on drop when the timeout fires
        Some(limit) => match tokio::time::timeout(limit, command.output()).await {
            Ok(output) => Ok(output.map_err(spawn_error)?),
            Err(_) => Err(VidSnatchError::Subprocess {
                tool: tool.to_string(),
                stderr: format!("timed out after {}s", limit.as_secs()),
            }
            .into()),
        },
        None => Ok(command.output().await.map_err(spawn_error)?),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

/// Filter graph normalizing every input to one layout before concatenation.
///
/// `audio_inputs[i]` is the input index carrying clip `i`'s audio: the clip
/// itself, or a generated silence input for clips without an audio track.
pub fn concat_filter(audio_inputs: &[usize]) -> String {
    let clip_count = audio_inputs.len();
    let mut filter = String::new();
    for (i, audio) in audio_inputs.iter().enumerate() {
        filter.push_str(&format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}[v{i}];\
             [{a}:a]aresample={rate},aformat=channel_layouts=stereo[a{i}];",
            i = i,
            a = audio,
            w = STITCH_WIDTH,
            h = STITCH_HEIGHT,
            fps = STITCH_FPS,
            rate = SAMPLE_RATE,
        ));
    }
    for i in 0..clip_count {
        filter.push_str(&format!("[v{i}][a{i}]", i = i));
    }
    filter.push_str(&format!("concat=n={}:v=1:a=1[outv][outa]", clip_count));
    filter
}

/// Encoder arguments for an audio target
pub fn audio_codec_args(format: AudioFormat, bitrate_kbps: Option<u32>) -> Vec<String> {
    let mut args = strings(&["-vn"]);
    match format {
        AudioFormat::Mp3 => {
            let kbps = bitrate_kbps.unwrap_or(DEFAULT_MP3_KBPS);
            args.extend(strings(&["-c:a", "libmp3lame", "-b:a"]));
            args.push(format!("{}k", kbps));
        }
        AudioFormat::M4a => {
            args.extend(strings(&["-c:a", "aac"]));
            if let Some(kbps) = bitrate_kbps {
                args.push("-b:a".to_string());
                args.push(format!("{}k", kbps));
            }
        }
        AudioFormat::Wav => args.extend(strings(&["-c:a", "pcm_s16le"])),
    }
    args.extend(strings(&["-ar", SAMPLE_RATE, "-ac", "2"]));
    args
}

#[async_trait]
impl MediaTool for Ffmpeg {
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let args = vec![
            "-i".to_string(),
            path_arg(video),
            "-i".to_string(),
            path_arg(audio),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
        ];
        self.run(args, output).await
    }

    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        format: AudioFormat,
        bitrate_kbps: Option<u32>,
    ) -> Result<()> {
        let mut args = vec!["-i".to_string(), path_arg(input)];
        args.extend(audio_codec_args(format, bitrate_kbps));
        self.run(args, output).await
    }

    async fn trim(&self, input: &Path, output: &Path, start: f64, duration: f64) -> Result<()> {
        let mut args = vec![
            "-ss".to_string(),
            format!("{:.3}", start),
            "-i".to_string(),
            path_arg(input),
            "-t".to_string(),
            format!("{:.3}", duration),
        ];
        let mut encoded = args.clone();
        encoded.extend(strings(&[
            "-c:v", "libx264", "-c:a", "aac", "-preset", "fast", "-crf", "23",
            "-avoid_negative_ts", "make_zero",
        ]));

        match self.run(encoded, output).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!("Re-encoding trim failed, retrying with stream copy: {}", err);
                args.extend(strings(&["-c", "copy", "-avoid_negative_ts", "make_zero"]));
                self.run(args, output).await
            }
        }
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let mut audio_inputs = Vec::with_capacity(inputs.len());
        let mut silences = Vec::new();
        for (i, input) in inputs.iter().enumerate() {
            if self.has_audio(input).await? {
                audio_inputs.push(i);
                continue;
            }
            let duration = self.media_duration(input).await?.ok_or_else(|| {
                VidSnatchError::InvalidInput(format!(
                    "{} has no audio track and its length could not be determined",
                    input.display()
                ))
            })?;
            tracing::debug!("{} has no audio track, padding with silence", input.display());
            audio_inputs.push(inputs.len() + silences.len());
            silences.push(duration);
        }

        let mut args = Vec::with_capacity(inputs.len() * 2 + silences.len() * 6 + 16);
        for input in inputs {
            args.push("-i".to_string());
            args.push(path_arg(input));
        }
        for duration in silences {
            args.extend(strings(&["-f", "lavfi", "-t"]));
            args.push(format!("{:.3}", duration));
            args.push("-i".to_string());
            args.push(format!("anullsrc=channel_layout=stereo:sample_rate={}", SAMPLE_RATE));
        }
        args.push("-filter_complex".to_string());
        args.push(concat_filter(&audio_inputs));
        args.extend(strings(&[
            "-map", "[outv]", "-map", "[outa]", "-c:v", "libx264", "-preset", "fast", "-crf",
            "23", "-c:a", "aac", "-b:a", "192k", "-movflags", "+faststart",
        ]));
        self.run(args, output).await
    }

    async fn media_duration(&self, path: &Path) -> Result<Option<f64>> {
        let stdout = self
            .ffprobe(
                &[
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ],
                path,
            )
            .await?;
        Ok(stdout.trim().parse::<f64>().ok())
    }
}

impl Ffmpeg {
    /// Whether `path` carries at least one audio stream
    pub async fn has_audio(&self, path: &Path) -> Result<bool> {
        let stdout = self
            .ffprobe(
                &["-select_streams", "a", "-show_entries", "stream=index", "-of", "csv=p=0"],
                path,
            )
            .await?;
        Ok(!stdout.trim().is_empty())
    }

    async fn ffprobe(&self, args: &[&str], path: &Path) -> Result<String> {
        let mut command = Command::new(&self.ffprobe_path);
        command
            .args(["-v", "error"])
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = run_with_timeout(&mut command, self.timeout, &self.ffprobe_path).await?;
        if !output.status.success() {
            return Err(VidSnatchError::Subprocess {
                tool: self.ffprobe_path.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Delete intermediate files after a successful step; keep them after a failure.
///
/// Returns the paths that were left on disk.
pub fn cleanup_intermediates(paths: &[PathBuf], succeeded: bool) -> Vec<PathBuf> {
    if !succeeded {
        for path in paths.iter().filter(|p| p.exists()) {
            tracing::warn!("Keeping intermediate file for inspection: {}", path.display());
        }
        return paths.iter().filter(|p| p.exists()).cloned().collect();
    }

    let mut remaining = Vec::new();
    for path in paths {
        if !path.exists() {
            continue;
        }
        if let Err(e) = fs_err::remove_file(path) {
            tracing::warn!("Failed to remove intermediate file: {}", e);
            remaining.push(path.clone());
        }
    }
    remaining
}
