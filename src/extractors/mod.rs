use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub mod transcript;
pub mod youtube;

use crate::{Result, VidSnatchError};

static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:youtube\.com/watch\?(?:.*&)?v=)([0-9A-Za-z_-]{11})",
        r"(?:youtube\.com/embed/)([0-9A-Za-z_-]{11})",
        r"(?:youtube\.com/shorts/)([0-9A-Za-z_-]{11})",
        r"(?:youtube\.com/live/)([0-9A-Za-z_-]{11})",
        r"(?:youtube\.com/v/)([0-9A-Za-z_-]{11})",
        r"(?:youtu\.be/)([0-9A-Za-z_-]{11})",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid video id pattern"))
    .collect()
});

static BARE_VIDEO_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z_-]{11}$").expect("valid video id pattern"));

/// What a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Video and audio in one file
    Progressive,
    VideoOnly,
    AudioOnly,
}

/// One selectable stream as reported by the extraction provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Provider format identifier passed back when downloading
    pub format_id: String,

    pub kind: StreamKind,

    /// Container extension (mp4, webm, m4a)
    pub container: String,

    /// Vertical resolution for streams with video
    pub height: Option<u32>,

    pub fps: Option<f64>,

    /// Audio bitrate in kbps
    pub abr: Option<f64>,

    /// Total bitrate in kbps
    pub tbr: Option<f64>,

    /// Exact or approximate size in bytes
    pub filesize: Option<u64>,

    pub vcodec: Option<String>,
    pub acodec: Option<String>,
}

impl StreamDescriptor {
    pub fn has_video(&self) -> bool {
        matches!(self.kind, StreamKind::Progressive | StreamKind::VideoOnly)
    }

    pub fn has_audio(&self) -> bool {
        matches!(self.kind, StreamKind::Progressive | StreamKind::AudioOnly)
    }

    /// Label such as `720p` or `128kbps`
    pub fn quality_label(&self) -> String {
        match (self.height, self.abr) {
            (Some(height), _) if self.has_video() => format!("{}p", height),
            (_, Some(abr)) => format!("{}kbps", abr.round() as u32),
            _ => self.format_id.clone(),
        }
    }
}

/// A caption track offered by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionTrack {
    /// File format of the track (json3, vtt, srv1)
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Metadata and streams for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDetails {
    pub id: String,
    pub url: String,
    pub title: String,
    pub author: Option<String>,

    /// Length in seconds
    pub duration: Option<f64>,
    pub views: Option<u64>,
    pub publish_date: Option<String>,
    pub thumbnail: Option<String>,

    /// Spoken language when the provider knows it
    pub language: Option<String>,

    pub streams: Vec<StreamDescriptor>,

    /// Uploaded captions by language code
    pub subtitles: BTreeMap<String, Vec<CaptionTrack>>,

    /// Auto-generated captions by language code
    pub automatic_captions: BTreeMap<String, Vec<CaptionTrack>>,
}

/// One timed transcript line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub text: String,
    /// Start in seconds
    pub start: f64,
    /// Duration in seconds
    pub duration: f64,
}

/// A fetched transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub language_code: String,
    pub language: String,
    pub is_generated: bool,
    pub entries: Vec<TranscriptEntry>,
}

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub url: String,
    /// Length in seconds
    pub duration: Option<u64>,
    pub author: Option<String>,
    pub views: Option<u64>,
}

/// Search ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SearchSort {
    Relevance,
    Date,
    Views,
}

impl SearchSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSort::Relevance => "relevance",
            SearchSort::Date => "date",
            SearchSort::Views => "views",
        }
    }
}

impl std::str::FromStr for SearchSort {
    type Err = VidSnatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relevance" => Ok(SearchSort::Relevance),
            "date" => Ok(SearchSort::Date),
            "views" => Ok(SearchSort::Views),
            other => Err(VidSnatchError::InvalidInput(format!(
                "Unknown sort order '{}'. Use relevance, date or views",
                other
            ))),
        }
    }
}

/// Source of video metadata, streams and downloads
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Resolve a validated watch URL into details and streams
    async fn resolve(&self, url: &str) -> Result<VideoDetails>;

    /// Download one stream to `destination`
    async fn download(&self, url: &str, stream: &StreamDescriptor, destination: &Path) -> Result<()>;

    /// Search for videos, in the provider's order for the given sort
    async fn search(&self, query: &str, sort: SearchSort, limit: usize) -> Result<Vec<SearchHit>>;

    /// Get the name of this platform
    fn platform_name(&self) -> &'static str;
}

/// Source of caption text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptProvider: Send + Sync {
    /// Fetch the transcript for `language` (`auto` picks the first available track)
    async fn fetch(&self, details: &VideoDetails, language: &str) -> Result<Transcript>;
}

/// Extract the 11-character video id from a YouTube URL or a bare id
pub fn extract_video_id(input: &str) -> Result<String> {
    let trimmed = input.trim();

    if BARE_VIDEO_ID.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }

    VIDEO_ID_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(trimmed))
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
        .ok_or_else(|| VidSnatchError::InvalidUrl(input.to_string()).into())
}

/// Validate a YouTube URL (or bare id) and return the canonical watch URL
pub fn validate_youtube_url(input: &str) -> Result<String> {
    let trimmed = input.trim();

    if !BARE_VIDEO_ID.is_match(trimmed) {
        let parsed = url::Url::parse(trimmed)
            .map_err(|_| VidSnatchError::InvalidUrl(input.to_string()))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(VidSnatchError::InvalidUrl(input.to_string()).into());
        }

        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        let known_host = host == "youtu.be"
            || host == "youtube.com"
            || host.ends_with(".youtube.com");
        if !known_host {
            return Err(VidSnatchError::InvalidUrl(input.to_string()).into());
        }
    }

    let id = extract_video_id(trimmed)?;
    Ok(format!("https://www.youtube.com/watch?v={}", id))
}
