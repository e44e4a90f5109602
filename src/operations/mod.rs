use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

pub mod media_tool;
pub mod selection;

use crate::config::Config;
use crate::extractors::transcript::CaptionTranscriptProvider;
use crate::extractors::youtube::YtDlpProvider;
use crate::extractors::{
    validate_youtube_url, SearchHit, SearchSort, StreamDescriptor, StreamKind,
    TranscriptProvider, VideoDetails, VideoProvider,
};
use crate::output::formatters::transcript_document;
use crate::retry::RetryPolicy;
use crate::utils::{
    bytes_to_mb, check_file_accessible, format_file_size, format_hms, generate_timestamped_filename,
    parse_timestamp, safe_title, sanitize_filename,
};
use crate::{Result, VidSnatchError};

use media_tool::{cleanup_intermediates, Ffmpeg, MediaTool};
use selection::{select_audio, select_video, AudioQuality, VideoQuality, VideoSelection};

/// Largest number of search results one request may ask for
pub const MAX_SEARCH_RESULTS: usize = 50;

/// Supported audio output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    M4a,
    Wav,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Wav => "wav",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "m4a" | "aac" => Some(AudioFormat::M4a),
            "wav" => Some(AudioFormat::Wav),
            _ => None,
        }
    }

    /// Get MIME type for the format
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Wav => "audio/wav",
        }
    }
}

impl FromStr for AudioFormat {
    type Err = VidSnatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AudioFormat::from_extension(s.trim()).ok_or_else(|| {
            VidSnatchError::InvalidInput(format!("Unknown audio format '{}'. Use mp3, m4a or wav", s))
        })
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file produced by an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub file_path: PathBuf,
    pub file_size_bytes: u64,
    pub file_size_mb: f64,

    /// Probed length in seconds
    pub duration_seconds: Option<f64>,

    /// Container or format extension
    pub format: String,
    pub download_directory: PathBuf,
}

impl MediaFile {
    /// Describe a file that is already on disk
    pub fn from_path(
        path: &Path,
        format: &str,
        download_directory: &Path,
        duration_seconds: Option<f64>,
    ) -> Result<Self> {
        let size = fs_err::metadata(path)
            .map_err(|e| VidSnatchError::FileError(e.to_string()))?
            .len();

        Ok(Self {
            file_path: path.to_path_buf(),
            file_size_bytes: size,
            file_size_mb: bytes_to_mb(size),
            duration_seconds,
            format: format.to_string(),
            download_directory: download_directory.to_path_buf(),
        })
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Short listing of one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub format_id: String,
    pub kind: StreamKind,
    pub quality: String,
    pub container: String,
    pub fps: Option<f64>,
    pub size_mb: Option<f64>,
}

impl From<&StreamDescriptor> for StreamSummary {
    fn from(stream: &StreamDescriptor) -> Self {
        Self {
            format_id: stream.format_id.clone(),
            kind: stream.kind,
            quality: stream.quality_label(),
            container: stream.container.clone(),
            fps: stream.fps,
            size_mb: stream.filesize.map(bytes_to_mb),
        }
    }
}

/// Video metadata and the qualities that can be requested for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub duration: Option<f64>,
    pub views: Option<u64>,
    pub publish_date: Option<String>,
    pub thumbnail: Option<String>,
    pub video_qualities: Vec<String>,
    pub audio_qualities: Vec<String>,
    pub video_streams: Vec<StreamSummary>,
    pub audio_streams: Vec<StreamSummary>,
    /// Languages with uploaded captions
    pub caption_languages: Vec<String>,
    pub has_automatic_captions: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptFile {
    #[serde(flatten)]
    pub file: MediaFile,
    pub language: String,
    pub language_name: String,
    pub is_generated: bool,
    pub entry_count: usize,
    pub transcript_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentFile {
    #[serde(flatten)]
    pub file: MediaFile,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    /// Full source kept next to the clip
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchedFile {
    #[serde(flatten)]
    pub file: MediaFile,
    pub clip_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadEntry {
    pub filename: String,
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub size_mb: f64,
    /// RFC 3339 local time
    pub modified: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadListing {
    pub directory: PathBuf,
    pub total_count: usize,
    pub files: Vec<DownloadEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub sort_by: SearchSort,
    pub count: usize,
    pub results: Vec<SearchHit>,
}

/// The operation layer shared by every front end
#[derive(Clone)]
pub struct MediaOperations {
    config: Arc<Config>,
    provider: Arc<dyn VideoProvider>,
    transcripts: Arc<dyn TranscriptProvider>,
    media: Arc<dyn MediaTool>,
    retry: RetryPolicy,
}

impl MediaOperations {
    /// Build the operation layer on yt-dlp, caption tracks and ffmpeg
    pub fn new(config: Config) -> Result<Self> {
        let provider = YtDlpProvider::new(config.tools.yt_dlp.clone(), config.verify_tls);
        tracing::debug!(
            "Using {} provider via {}",
            provider.platform_name(),
            config.tools.yt_dlp
        );
        let transcripts = CaptionTranscriptProvider::new(config.verify_tls)
            .context("Failed to create caption HTTP client")?;
        let media = Ffmpeg::new(
            config.tools.ffmpeg.clone(),
            config.tools.ffprobe.clone(),
            config.subprocess_timeout(),
        );

        Ok(Self::with_parts(
            config,
            Arc::new(provider),
            Arc::new(transcripts),
            Arc::new(media),
        ))
    }

    pub fn with_parts(
        config: Config,
        provider: Arc<dyn VideoProvider>,
        transcripts: Arc<dyn TranscriptProvider>,
        media: Arc<dyn MediaTool>,
    ) -> Self {
        let retry = config.retry_policy();
        Self {
            config: Arc::new(config),
            provider,
            transcripts,
            media,
            retry,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metadata and requestable qualities for a video
    pub async fn video_info(&self, url: &str) -> Result<VideoInfo> {
        let url = validate_youtube_url(url)?;
        let details = self.resolve(&url).await?;
        Ok(describe(details))
    }

    /// Download a video at the requested quality, merging separate tracks when needed
    pub async fn download_video(
        &self,
        url: &str,
        quality: Option<&str>,
        output_dir: Option<&Path>,
    ) -> Result<MediaFile> {
        let url = validate_youtube_url(url)?;
        let quality: VideoQuality = quality
            .unwrap_or(&self.config.default_video_quality)
            .parse()?;

        let details = self.resolve(&url).await?;
        let selection = select_video(&details.streams, quality)?;
        let container = output_container(&selection);
        self.check_format_allowed(&container)?;
        self.check_size(selection.estimated_size())?;

        let dir = self.prepare_directory(output_dir)?;
        tracing::info!(
            "Downloading '{}' at {} ({})",
            details.title,
            quality,
            if selection.requires_merge() { "merge" } else { "single stream" }
        );

        let path = self
            .fetch_video(&url, &selection, &dir, &safe_title(&details.title))
            .await?;
        let duration = self.duration_of(&path).await;

        MediaFile::from_path(&path, &container, &dir, duration)
    }

    /// Download the audio track, re-encoding when the source container differs
    pub async fn download_audio(
        &self,
        url: &str,
        quality: Option<&str>,
        format: Option<&str>,
        output_dir: Option<&Path>,
    ) -> Result<MediaFile> {
        let url = validate_youtube_url(url)?;
        let quality: AudioQuality = quality
            .unwrap_or(&self.config.default_audio_quality)
            .parse()?;
        let format: AudioFormat = format
            .unwrap_or(&self.config.default_audio_format)
            .parse()?;
        self.check_format_allowed(format.as_str())?;

        let details = self.resolve(&url).await?;
        let native = (format == AudioFormat::M4a).then_some("m4a");
        let stream = select_audio(&details.streams, quality, native)?;
        self.check_size(stream.filesize)?;

        let dir = self.prepare_directory(output_dir)?;
        let stem = safe_title(&details.title);
        let output = dir.join(format!("{}.{}", stem, format.as_str()));

        if format == AudioFormat::M4a && stream.container.eq_ignore_ascii_case("m4a") {
            self.download_stream(&url, stream, &output).await?;
        } else {
            let source = dir.join(format!("{}.source.{}", stem, stream.container));
            self.download_stream(&url, stream, &source).await?;

            let bitrate = stream.abr.map(|abr| abr.round() as u32);
            let result = self
                .media
                .transcode_audio(&source, &output, format, bitrate)
                .await;
            cleanup_intermediates(&[source], result.is_ok());
            result?;
        }

        let duration = self.duration_of(&output).await;
        MediaFile::from_path(&output, format.as_str(), &dir, duration)
    }

    /// Fetch captions and write them as a timestamped text file
    pub async fn download_transcript(
        &self,
        url: &str,
        language: &str,
        output_dir: Option<&Path>,
    ) -> Result<TranscriptFile> {
        let url = validate_youtube_url(url)?;
        let details = self.resolve(&url).await?;
        let transcript = self.transcripts.fetch(&details, language).await?;

        let dir = self.prepare_directory(output_dir)?;
        let path = dir.join(format!("{}_transcript.txt", safe_title(&details.title)));
        let content = transcript_document(&details, &transcript);
        fs_err::write(&path, &content).map_err(|e| VidSnatchError::FileError(e.to_string()))?;

        tracing::info!("Transcript saved: {}", path.display());

        Ok(TranscriptFile {
            file: MediaFile::from_path(&path, "txt", &dir, details.duration)?,
            language: transcript.language_code,
            language_name: transcript.language,
            is_generated: transcript.is_generated,
            entry_count: transcript.entries.len(),
            transcript_content: content,
        })
    }

    /// Download a video and cut the `[start, end)` range out of it
    pub async fn trim(
        &self,
        url: &str,
        start: &str,
        end: &str,
        quality: Option<&str>,
        output_dir: Option<&Path>,
    ) -> Result<SegmentFile> {
        let start = parse_timestamp(start)?;
        let end = parse_timestamp(end)?;
        if end <= start {
            return Err(VidSnatchError::InvalidInput(format!(
                "End time ({}) must be after start time ({})",
                format_hms(end),
                format_hms(start)
            ))
            .into());
        }

        let url = validate_youtube_url(url)?;
        let quality: VideoQuality = quality
            .unwrap_or(&self.config.default_video_quality)
            .parse()?;
        self.check_format_allowed("mp4")?;

        let details = self.resolve(&url).await?;
        if let Some(total) = details.duration {
            if end > total {
                return Err(VidSnatchError::InvalidInput(format!(
                    "End time {} is past the end of the video ({})",
                    format_hms(end),
                    format_hms(total)
                ))
                .into());
            }
        }

        let selection = select_video(&details.streams, quality)?;
        self.check_size(selection.estimated_size())?;

        let dir = self.prepare_directory(output_dir)?;
        let stem = safe_title(&details.title);
        let output = dir.join(format!(
            "{}_segment_{}_to_{}.mp4",
            stem,
            format_hms(start).replace(':', "-"),
            format_hms(end).replace(':', "-")
        ));

        let scratch = tempfile::Builder::new()
            .prefix("vidsnatch-trim-")
            .tempdir()
            .map_err(|e| VidSnatchError::FileError(format!("Failed to create temporary directory: {}", e)))?;

        let source = match self.fetch_video(&url, &selection, scratch.path(), "source").await {
            Ok(source) => source,
            Err(err) => {
                let kept = scratch.keep();
                tracing::warn!("Download for trim failed, partial files kept in {}", kept.display());
                return Err(err);
            }
        };

        let duration = end - start;
        tracing::info!(
            "Trimming {} to {} ({:.1}s)",
            format_hms(start),
            format_hms(end),
            duration
        );

        if let Err(err) = self.media.trim(&source, &output, start, duration).await {
            let kept = scratch.keep();
            tracing::warn!("Trim failed, source kept in {}", kept.display());
            return Err(err);
        }

        let source_path = if self.config.keep_trim_source {
            let ext = source
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_else(|| "mp4".to_string());
            let kept = dir.join(format!("{}.{}", stem, ext));
            move_file(&source, &kept)?;
            Some(kept)
        } else {
            None
        };

        let measured = self.duration_of(&output).await;
        Ok(SegmentFile {
            file: MediaFile::from_path(&output, "mp4", &dir, measured)?,
            start_time: start,
            end_time: end,
            duration,
            source_path,
        })
    }

    /// Concatenate local clips, in order, into one mp4
    pub async fn stitch(
        &self,
        inputs: &[PathBuf],
        output_name: Option<&str>,
        output_dir: Option<&Path>,
    ) -> Result<StitchedFile> {
        if inputs.len() < 2 {
            return Err(VidSnatchError::InvalidInput(format!(
                "Stitching needs at least two clips, got {}",
                inputs.len()
            ))
            .into());
        }

        for input in inputs {
            check_file_accessible(input)
                .map_err(|e| VidSnatchError::InvalidInput(e.to_string()))?;
        }
        self.check_format_allowed("mp4")?;

        let file_name = match output_name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => {
                let name = sanitize_filename(name);
                if name.to_lowercase().ends_with(".mp4") {
                    name
                } else {
                    format!("{}.mp4", name)
                }
            }
            None => generate_timestamped_filename("stitched", "mp4"),
        };

        let dir = self.prepare_directory(output_dir)?;
        let output = dir.join(file_name);

        tracing::info!("Stitching {} clips into {}", inputs.len(), output.display());
        self.media.concat(inputs, &output).await?;

        let duration = self.duration_of(&output).await;
        Ok(StitchedFile {
            file: MediaFile::from_path(&output, "mp4", &dir, duration)?,
            clip_count: inputs.len(),
        })
    }

    /// Files in the download directory, newest first
    pub fn list_downloads(&self, dir: Option<&Path>) -> Result<DownloadListing> {
        let directory = dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.download_directory.clone());

        if !directory.exists() {
            return Ok(DownloadListing {
                directory,
                total_count: 0,
                files: Vec::new(),
            });
        }

        let mut files: Vec<(SystemTime, DownloadEntry)> = Vec::new();
        for entry in fs_err::read_dir(&directory).map_err(|e| VidSnatchError::FileError(e.to_string()))? {
            let entry = entry.map_err(|e| VidSnatchError::FileError(e.to_string()))?;
            let meta = entry
                .metadata()
                .map_err(|e| VidSnatchError::FileError(e.to_string()))?;
            if !meta.is_file() {
                continue;
            }

            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((
                modified,
                DownloadEntry {
                    filename: entry.file_name().to_string_lossy().into_owned(),
                    file_path: entry.path(),
                    size_bytes: meta.len(),
                    size_mb: bytes_to_mb(meta.len()),
                    modified: chrono::DateTime::<chrono::Local>::from(modified).to_rfc3339(),
                },
            ));
        }

        files.sort_by(|a, b| b.0.cmp(&a.0));
        let files: Vec<DownloadEntry> = files.into_iter().map(|(_, entry)| entry).collect();

        Ok(DownloadListing {
            directory,
            total_count: files.len(),
            files,
        })
    }

    /// Search for videos
    pub async fn search(&self, query: &str, sort: SearchSort, limit: usize) -> Result<SearchResults> {
        let query = query.trim();
        if query.is_empty() {
            return Err(VidSnatchError::InvalidInput("Search query is empty".to_string()).into());
        }

        let limit = limit.clamp(1, MAX_SEARCH_RESULTS);
        let results = self.provider.search(query, sort, limit).await?;

        Ok(SearchResults {
            query: query.to_string(),
            sort_by: sort,
            count: results.len(),
            results,
        })
    }

    async fn resolve(&self, url: &str) -> Result<VideoDetails> {
        let provider = &self.provider;
        self.retry
            .run("Resolving video", move || provider.resolve(url))
            .await
    }

    /// Download the selected stream(s) into `dir` and return the playable file
    async fn fetch_video(
        &self,
        url: &str,
        selection: &VideoSelection,
        dir: &Path,
        stem: &str,
    ) -> Result<PathBuf> {
        match selection {
            VideoSelection::Single(stream) => {
                let path = dir.join(format!("{}.{}", stem, stream.container));
                self.download_stream(url, stream, &path).await?;
                Ok(path)
            }
            VideoSelection::Merge { video, audio } => {
                let video_part = dir.join(format!("{}.video.{}", stem, video.container));
                let audio_part = dir.join(format!("{}.audio.{}", stem, audio.container));
                let output = dir.join(format!("{}.mp4", stem));

                let result = async {
                    self.download_stream(url, video, &video_part).await?;
                    self.download_stream(url, audio, &audio_part).await?;
                    tracing::debug!("Merging {} + {}", video.quality_label(), audio.quality_label());
                    self.media.merge(&video_part, &audio_part, &output).await
                }
                .await;

                cleanup_intermediates(&[video_part, audio_part], result.is_ok());
                result.map(|()| output)
            }
        }
    }

    /// Download one stream, replacing whatever an earlier run left at `destination`
    async fn download_stream(
        &self,
        url: &str,
        stream: &StreamDescriptor,
        destination: &Path,
    ) -> Result<()> {
        if destination.exists() {
            tracing::debug!("Replacing existing {}", destination.display());
            fs_err::remove_file(destination)
                .map_err(|e| VidSnatchError::FileError(e.to_string()))?;
        }
        self.provider.download(url, stream, destination).await
    }

    async fn duration_of(&self, path: &Path) -> Option<f64> {
        match self.media.media_duration(path).await {
            Ok(duration) => duration,
            Err(e) => {
                tracing::debug!("Could not read the duration of {}: {}", path.display(), e);
                None
            }
        }
    }

    fn prepare_directory(&self, output_dir: Option<&Path>) -> Result<PathBuf> {
        let dir = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.download_directory.clone());
        fs_err::create_dir_all(&dir).map_err(|e| VidSnatchError::FileError(e.to_string()))?;
        Ok(dir)
    }

    fn check_format_allowed(&self, format: &str) -> Result<()> {
        if self.config.is_format_allowed(format) {
            Ok(())
        } else {
            Err(VidSnatchError::InvalidInput(format!(
                "Format '{}' is not allowed (allowed: {})",
                format,
                self.config.allowed_formats.join(", ")
            ))
            .into())
        }
    }

    fn check_size(&self, size: Option<u64>) -> Result<()> {
        match size {
            Some(bytes) if bytes > self.config.max_file_size_bytes() => {
                Err(VidSnatchError::StreamSelection(format!(
                    "selected streams are {}, above the {} MB limit",
                    format_file_size(bytes),
                    self.config.max_file_size_mb
                ))
                .into())
            }
            _ => Ok(()),
        }
    }
}

fn output_container(selection: &VideoSelection) -> String {
    match selection {
        VideoSelection::Single(stream) => stream.container.to_lowercase(),
        VideoSelection::Merge { .. } => "mp4".to_string(),
    }
}

/// Rename, falling back to copy and delete across filesystems
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs_err::rename(from, to).is_ok() {
        return Ok(());
    }
    fs_err::copy(from, to).map_err(|e| VidSnatchError::FileError(e.to_string()))?;
    fs_err::remove_file(from).map_err(|e| VidSnatchError::FileError(e.to_string()))?;
    Ok(())
}

fn describe(details: VideoDetails) -> VideoInfo {
    let mut heights: Vec<u32> = details
        .streams
        .iter()
        .filter(|s| s.has_video())
        .filter_map(|s| s.height)
        .collect();
    heights.sort_unstable_by(|a, b| b.cmp(a));
    heights.dedup();

    let mut bitrates: Vec<u32> = details
        .streams
        .iter()
        .filter(|s| s.kind == StreamKind::AudioOnly)
        .filter_map(|s| s.abr.map(|abr| abr.round() as u32))
        .collect();
    bitrates.sort_unstable_by(|a, b| b.cmp(a));
    bitrates.dedup();

    let with_bounds = |middle: Vec<String>| {
        let mut all = vec!["highest".to_string()];
        all.extend(middle);
        all.push("lowest".to_string());
        all
    };

    let mut video_streams: Vec<&StreamDescriptor> =
        details.streams.iter().filter(|s| s.has_video()).collect();
    video_streams.sort_by(|a, b| b.height.cmp(&a.height));

    let mut audio_streams: Vec<&StreamDescriptor> = details
        .streams
        .iter()
        .filter(|s| s.kind == StreamKind::AudioOnly)
        .collect();
    audio_streams.sort_by(|a, b| b.abr.unwrap_or(0.0).total_cmp(&a.abr.unwrap_or(0.0)));

    VideoInfo {
        video_qualities: with_bounds(heights.iter().map(|h| format!("{}p", h)).collect()),
        audio_qualities: with_bounds(bitrates.iter().map(|k| format!("{}kbps", k)).collect()),
        video_streams: video_streams.into_iter().take(10).map(StreamSummary::from).collect(),
        audio_streams: audio_streams.into_iter().take(5).map(StreamSummary::from).collect(),
        caption_languages: details.subtitles.keys().cloned().collect(),
        has_automatic_captions: !details.automatic_captions.is_empty(),
        id: details.id,
        url: details.url,
        title: details.title,
        author: details.author,
        duration: details.duration,
        views: details.views,
        publish_date: details.publish_date,
        thumbnail: details.thumbnail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::{
        CaptionTrack, MockTranscriptProvider, MockVideoProvider, Transcript, TranscriptEntry,
    };
    use media_tool::MockMediaTool;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    const URL: &str = "https://www.youtube.com/watch?v=PDKhUknuQDg";

    fn stream(id: &str, kind: StreamKind, height: Option<u32>, container: &str) -> StreamDescriptor {
        StreamDescriptor {
            format_id: id.to_string(),
            kind,
            container: container.to_string(),
            height,
            fps: height.map(|_| 30.0),
            abr: match kind {
                StreamKind::AudioOnly => Some(129.5),
                _ => None,
            },
            tbr: None,
            filesize: Some(4 * 1024 * 1024),
            vcodec: None,
            acodec: None,
        }
    }

    fn details(streams: Vec<StreamDescriptor>) -> VideoDetails {
        VideoDetails {
            id: "PDKhUknuQDg".into(),
            url: URL.into(),
            title: "Sample Clip!".into(),
            author: Some("Someone".into()),
            duration: Some(600.0),
            views: Some(1000),
            publish_date: Some("2024-01-01".into()),
            thumbnail: None,
            language: Some("en".into()),
            streams,
            subtitles: BTreeMap::new(),
            automatic_captions: BTreeMap::from([(
                "en".to_string(),
                vec![CaptionTrack {
                    ext: "json3".into(),
                    url: "https://example.com/en.json3".into(),
                    name: Some("English".into()),
                }],
            )]),
        }
    }

    fn hd_streams() -> Vec<StreamDescriptor> {
        vec![
            stream("22", StreamKind::Progressive, Some(720), "mp4"),
            stream("137", StreamKind::VideoOnly, Some(1080), "mp4"),
            stream("140", StreamKind::AudioOnly, None, "m4a"),
        ]
    }

    fn test_config(dir: &TempDir) -> Config {
        Config {
            download_directory: dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    fn operations(
        config: Config,
        provider: MockVideoProvider,
        transcripts: MockTranscriptProvider,
        media: MockMediaTool,
    ) -> MediaOperations {
        MediaOperations::with_parts(
            config,
            Arc::new(provider),
            Arc::new(transcripts),
            Arc::new(media),
        )
        .with_retry(RetryPolicy::new(3, Duration::ZERO, 2.0))
    }

    fn provider_with(streams: Vec<StreamDescriptor>) -> MockVideoProvider {
        let mut provider = MockVideoProvider::new();
        let resolved = details(streams);
        provider
            .expect_resolve()
            .returning(move |_| Ok(resolved.clone()));
        provider.expect_download().returning(|_, _, destination| {
            fs_err::write(destination, b"stream data")?;
            Ok(())
        });
        provider
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs_err::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_audio_format_parse() {
        assert_eq!("MP3".parse::<AudioFormat>().unwrap(), AudioFormat::Mp3);
        assert_eq!("aac".parse::<AudioFormat>().unwrap(), AudioFormat::M4a);
        assert_eq!(AudioFormat::Wav.mime_type(), "audio/wav");
        assert!("flac".parse::<AudioFormat>().is_err());
    }

    #[tokio::test]
    async fn test_trim_rejects_end_before_start_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        // no expectations: any provider or media call panics
        let ops = operations(
            test_config(&dir),
            MockVideoProvider::new(),
            MockTranscriptProvider::new(),
            MockMediaTool::new(),
        );

        let err = ops.trim(URL, "03:00", "01:30", None, None).await.unwrap_err();
        assert!(matches!(crate::error_kind(&err), Some(VidSnatchError::InvalidInput(_))));

        let err = ops.trim(URL, "90", "90", None, None).await.unwrap_err();
        assert!(matches!(crate::error_kind(&err), Some(VidSnatchError::InvalidInput(_))));

        let err = ops.trim(URL, "abc", "90", None, None).await.unwrap_err();
        assert!(matches!(crate::error_kind(&err), Some(VidSnatchError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_trim_requests_exact_duration() {
        let dir = tempfile::tempdir().unwrap();
        let mut media = MockMediaTool::new();
        media
            .expect_trim()
            .withf(|_, _, start, duration| *start == 90.0 && *duration == 90.0)
            .times(1)
            .returning(|_, output, _, _| {
                fs_err::write(output, b"clip")?;
                Ok(())
            });
        media.expect_media_duration().returning(|_| Ok(Some(90.0)));

        let ops = operations(
            test_config(&dir),
            provider_with(hd_streams()),
            MockTranscriptProvider::new(),
            media,
        );

        let segment = ops
            .trim(URL, "00:01:30", "180", Some("high"), None)
            .await
            .unwrap();

        assert_eq!(segment.duration, 90.0);
        assert_eq!(segment.file.duration_seconds, Some(90.0));
        assert!(segment.source_path.is_none());
        assert_eq!(
            files_in(dir.path()),
            vec!["Sample-Clip_segment_00-01-30_to_00-03-00.mp4"]
        );
    }

    #[tokio::test]
    async fn test_trim_keeps_source_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut media = MockMediaTool::new();
        media.expect_trim().returning(|_, output, _, _| {
            fs_err::write(output, b"clip")?;
            Ok(())
        });
        media.expect_media_duration().returning(|_| Ok(None));

        let config = Config {
            keep_trim_source: true,
            ..test_config(&dir)
        };
        let ops = operations(config, provider_with(hd_streams()), MockTranscriptProvider::new(), media);

        let segment = ops.trim(URL, "0", "10", Some("720p"), None).await.unwrap();
        let source = segment.source_path.unwrap();
        assert!(source.exists());
        assert_eq!(source.file_name().unwrap(), "Sample-Clip.mp4");
    }

    #[tokio::test]
    async fn test_failed_trim_keeps_downloaded_source() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(None::<PathBuf>));
        let recorded = Arc::clone(&seen);
        let mut media = MockMediaTool::new();
        media.expect_trim().returning(move |input, _, _, _| {
            *recorded.lock().unwrap() = Some(input.to_path_buf());
            Err(VidSnatchError::Subprocess {
                tool: "ffmpeg".into(),
                stderr: "Conversion failed".into(),
            }
            .into())
        });

        let ops = operations(
            test_config(&dir),
            provider_with(hd_streams()),
            MockTranscriptProvider::new(),
            media,
        );
        let err = ops.trim(URL, "10", "20", Some("high"), None).await.unwrap_err();
        assert!(err.to_string().contains("Conversion failed"));

        let source = seen.lock().unwrap().clone().unwrap();
        assert!(source.exists(), "source must survive a failed trim");
        assert!(files_in(dir.path()).is_empty());
        fs_err::remove_dir_all(source.parent().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_trim_past_end_of_video_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = MockVideoProvider::new();
        provider
            .expect_resolve()
            .returning(|_| Ok(details(hd_streams())));
        let ops = operations(test_config(&dir), provider, MockTranscriptProvider::new(), MockMediaTool::new());

        let err = ops.trim(URL, "500", "700", None, None).await.unwrap_err();
        assert!(matches!(crate::error_kind(&err), Some(VidSnatchError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_highest_above_threshold_merges_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut media = MockMediaTool::new();
        media
            .expect_merge()
            .times(1)
            .returning(|video, audio, output| {
                assert!(video.exists() && audio.exists());
                fs_err::write(output, b"merged video")?;
                Ok(())
            });
        media.expect_media_duration().returning(|_| Ok(Some(600.0)));

        let ops = operations(
            test_config(&dir),
            provider_with(hd_streams()),
            MockTranscriptProvider::new(),
            media,
        );

        let file = ops.download_video(URL, Some("highest"), None).await.unwrap();

        assert_eq!(file.format, "mp4");
        assert!(file.file_path.exists());
        assert!(file.file_size_bytes > 0);
        assert_eq!(files_in(dir.path()), vec!["Sample-Clip.mp4"]);
    }

    #[tokio::test]
    async fn test_redownload_replaces_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        // leftovers from an earlier highest-quality run and a failed merge
        fs_err::write(dir.path().join("Sample-Clip.mp4"), b"old 1080p merge").unwrap();
        fs_err::write(dir.path().join("Sample-Clip.video.mp4"), b"trunc").unwrap();

        let mut provider = MockVideoProvider::new();
        provider
            .expect_resolve()
            .returning(|_| Ok(details(hd_streams())));
        provider
            .expect_download()
            .withf(|_, _, destination| !destination.exists())
            .times(1)
            .returning(|_, stream, destination| {
                assert_eq!(stream.format_id, "22");
                fs_err::write(destination, b"fresh 720p")?;
                Ok(())
            });
        let mut media = MockMediaTool::new();
        media.expect_media_duration().returning(|_| Ok(Some(600.0)));

        let ops = operations(test_config(&dir), provider, MockTranscriptProvider::new(), media);
        let file = ops.download_video(URL, Some("high"), None).await.unwrap();

        assert_eq!(fs_err::read(&file.file_path).unwrap(), b"fresh 720p");
        assert_eq!(file.file_size_bytes, 10);
    }

    #[tokio::test]
    async fn test_merge_never_reuses_stale_parts() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("Sample-Clip.video.mp4"), b"truncated").unwrap();
        fs_err::write(dir.path().join("Sample-Clip.audio.m4a"), b"truncated").unwrap();

        let mut provider = MockVideoProvider::new();
        provider
            .expect_resolve()
            .returning(|_| Ok(details(hd_streams())));
        provider
            .expect_download()
            .withf(|_, _, destination| !destination.exists())
            .times(2)
            .returning(|_, _, destination| {
                fs_err::write(destination, b"complete part")?;
                Ok(())
            });
        let mut media = MockMediaTool::new();
        media.expect_merge().times(1).returning(|video, audio, output| {
            assert_eq!(fs_err::read(video)?, b"complete part");
            assert_eq!(fs_err::read(audio)?, b"complete part");
            fs_err::write(output, b"merged video")?;
            Ok(())
        });
        media.expect_media_duration().returning(|_| Ok(None));

        let ops = operations(test_config(&dir), provider, MockTranscriptProvider::new(), media);
        ops.download_video(URL, Some("highest"), None).await.unwrap();

        assert_eq!(files_in(dir.path()), vec!["Sample-Clip.mp4"]);
    }

    #[tokio::test]
    async fn test_failed_merge_keeps_parts() {
        let dir = tempfile::tempdir().unwrap();
        let mut media = MockMediaTool::new();
        media.expect_merge().returning(|_, _, _| {
            Err(VidSnatchError::Subprocess {
                tool: "ffmpeg".into(),
                stderr: "Invalid data found when processing input".into(),
            }
            .into())
        });

        let ops = operations(
            test_config(&dir),
            provider_with(hd_streams()),
            MockTranscriptProvider::new(),
            media,
        );

        let err = ops.download_video(URL, None, None).await.unwrap_err();
        assert!(err.to_string().contains("Invalid data found"));
        assert_eq!(
            files_in(dir.path()),
            vec!["Sample-Clip.audio.m4a", "Sample-Clip.video.mp4"]
        );
    }

    #[tokio::test]
    async fn test_size_limit_fails_before_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = MockVideoProvider::new();
        provider
            .expect_resolve()
            .returning(|_| Ok(details(hd_streams())));
        provider.expect_download().never();

        let config = Config {
            max_file_size_mb: 1,
            ..test_config(&dir)
        };
        let ops = operations(config, provider, MockTranscriptProvider::new(), MockMediaTool::new());

        let err = ops.download_video(URL, Some("high"), None).await.unwrap_err();
        assert!(matches!(
            crate::error_kind(&err),
            Some(VidSnatchError::StreamSelection(_))
        ));
    }

    #[tokio::test]
    async fn test_disallowed_format_is_rejected_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            allowed_formats: vec!["mp4".into()],
            ..test_config(&dir)
        };
        let ops = operations(config, MockVideoProvider::new(), MockTranscriptProvider::new(), MockMediaTool::new());

        let err = ops.download_audio(URL, None, Some("mp3"), None).await.unwrap_err();
        assert!(matches!(crate::error_kind(&err), Some(VidSnatchError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_audio_native_m4a_skips_transcode() {
        let dir = tempfile::tempdir().unwrap();
        let mut media = MockMediaTool::new();
        media.expect_transcode_audio().never();
        media.expect_media_duration().returning(|_| Ok(Some(600.0)));

        let ops = operations(test_config(&dir), provider_with(hd_streams()), MockTranscriptProvider::new(), media);

        let file = ops.download_audio(URL, None, Some("m4a"), None).await.unwrap();
        assert_eq!(file.format, "m4a");
        assert_eq!(files_in(dir.path()), vec!["Sample-Clip.m4a"]);
    }

    #[tokio::test]
    async fn test_audio_mp3_transcodes_and_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut media = MockMediaTool::new();
        media
            .expect_transcode_audio()
            .withf(|_, _, format, bitrate| *format == AudioFormat::Mp3 && *bitrate == Some(130))
            .times(1)
            .returning(|_, output, _, _| {
                fs_err::write(output, b"mp3 data")?;
                Ok(())
            });
        media.expect_media_duration().returning(|_| Ok(None));

        let ops = operations(test_config(&dir), provider_with(hd_streams()), MockTranscriptProvider::new(), media);

        let file = ops.download_audio(URL, Some("highest"), Some("mp3"), None).await.unwrap();
        assert_eq!(file.format, "mp3");
        assert_eq!(files_in(dir.path()), vec!["Sample-Clip.mp3"]);
    }

    #[tokio::test]
    async fn test_resolve_is_retried_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = MockVideoProvider::new();
        let mut calls = 0;
        provider.expect_resolve().times(3).returning(move |_| {
            calls += 1;
            if calls < 3 {
                Err(VidSnatchError::Provider("HTTP Error 503".into()).into())
            } else {
                Ok(details(hd_streams()))
            }
        });

        let ops = operations(test_config(&dir), provider, MockTranscriptProvider::new(), MockMediaTool::new());

        let info = ops.video_info(URL).await.unwrap();
        assert_eq!(info.title, "Sample Clip!");
        assert_eq!(info.video_qualities, vec!["highest", "1080p", "720p", "lowest"]);
        assert_eq!(info.audio_qualities, vec!["highest", "130kbps", "lowest"]);
        assert!(info.has_automatic_captions);
    }

    #[tokio::test]
    async fn test_invalid_url_never_reaches_provider() {
        let dir = tempfile::tempdir().unwrap();
        let ops = operations(test_config(&dir), MockVideoProvider::new(), MockTranscriptProvider::new(), MockMediaTool::new());

        let err = ops.video_info("https://vimeo.com/12345").await.unwrap_err();
        assert!(crate::retry::is_invalid_url(&err));
    }

    #[tokio::test]
    async fn test_stitch_missing_input_fails_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("a.mp4");
        fs_err::write(&clip, b"clip").unwrap();

        let mut media = MockMediaTool::new();
        media.expect_concat().never();
        let ops = operations(test_config(&dir), MockVideoProvider::new(), MockTranscriptProvider::new(), media);

        let inputs = vec![clip.clone(), dir.path().join("missing.mp4")];
        let err = ops.stitch(&inputs, None, None).await.unwrap_err();
        assert!(err.to_string().contains("missing.mp4"));

        let err = ops.stitch(&[clip], None, None).await.unwrap_err();
        assert!(matches!(crate::error_kind(&err), Some(VidSnatchError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_stitch_passes_all_clips_to_one_concat() {
        let dir = tempfile::tempdir().unwrap();
        let inputs: Vec<PathBuf> = ["one", "two", "three"]
            .iter()
            .map(|name| {
                let path = dir.path().join(format!("{}.mp4", name));
                fs_err::write(&path, b"clip").unwrap();
                path
            })
            .collect();

        let mut media = MockMediaTool::new();
        let expected = inputs.clone();
        media
            .expect_concat()
            .withf(move |clips, _| clips == expected.as_slice())
            .times(1)
            .returning(|_, output| {
                fs_err::write(output, b"stitched")?;
                Ok(())
            });
        media.expect_media_duration().returning(|_| Ok(Some(30.0)));

        let out_dir = dir.path().join("out");
        let ops = operations(test_config(&dir), MockVideoProvider::new(), MockTranscriptProvider::new(), media);

        let stitched = ops
            .stitch(&inputs, Some("highlights"), Some(out_dir.as_path()))
            .await
            .unwrap();

        assert_eq!(stitched.clip_count, 3);
        assert_eq!(stitched.file.file_path, out_dir.join("highlights.mp4"));
        assert!(stitched.file.file_path.exists());
    }

    #[tokio::test]
    async fn test_transcript_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = MockVideoProvider::new();
        provider
            .expect_resolve()
            .returning(|_| Ok(details(hd_streams())));

        let mut transcripts = MockTranscriptProvider::new();
        transcripts
            .expect_fetch()
            .withf(|_, language| language == "auto")
            .returning(|_, _| {
                Ok(Transcript {
                    language_code: "en".into(),
                    language: "English".into(),
                    is_generated: true,
                    entries: vec![
                        TranscriptEntry { text: "hello".into(), start: 0.0, duration: 1.5 },
                        TranscriptEntry { text: "ninety".into(), start: 90.2, duration: 2.0 },
                    ],
                })
            });

        let ops = operations(test_config(&dir), provider, transcripts, MockMediaTool::new());
        let file = ops.download_transcript(URL, "auto", None).await.unwrap();

        assert_eq!(file.entry_count, 2);
        assert_eq!(file.file.file_name(), "Sample-Clip_transcript.txt");
        assert!(file.transcript_content.contains("[00:00] hello"));
        assert!(file.transcript_content.contains("[01:30] ninety"));

        let on_disk = fs_err::read_to_string(&file.file.file_path).unwrap();
        assert_eq!(on_disk, file.transcript_content);
    }

    #[test]
    fn test_list_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let ops = operations(test_config(&dir), MockVideoProvider::new(), MockTranscriptProvider::new(), MockMediaTool::new());

        let missing = ops.list_downloads(Some(dir.path().join("nope").as_path())).unwrap();
        assert_eq!(missing.total_count, 0);

        fs_err::write(dir.path().join("a.mp4"), vec![0u8; 2048]).unwrap();
        fs_err::create_dir(dir.path().join("nested")).unwrap();

        let listing = ops.list_downloads(None).unwrap();
        assert_eq!(listing.total_count, 1);
        assert_eq!(listing.files[0].filename, "a.mp4");
        assert_eq!(listing.files[0].size_bytes, 2048);
    }

    #[tokio::test]
    async fn test_search_validates_query_and_clamps_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = MockVideoProvider::new();
        provider
            .expect_search()
            .withf(|query, sort, limit| query == "lofi" && *sort == SearchSort::Views && *limit == MAX_SEARCH_RESULTS)
            .returning(|_, _, _| Ok(vec![]));

        let ops = operations(test_config(&dir), provider, MockTranscriptProvider::new(), MockMediaTool::new());

        assert!(ops.search("   ", SearchSort::Relevance, 10).await.is_err());
        let results = ops.search(" lofi ", SearchSort::Views, 500).await.unwrap();
        assert_eq!(results.count, 0);
        assert_eq!(results.sort_by, SearchSort::Views);
    }
}
