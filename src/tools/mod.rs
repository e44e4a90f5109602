//! Typed tool facade over [`MediaOperations`].
//!
//! Each method returns an [`Envelope`], so the CLI and both MCP transports report
//! results the same way. [`ToolFacade::call_tool`] dispatches MCP `tools/call`
//! requests by name with JSON arguments.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::extractors::SearchSort;
use crate::operations::{
    DownloadListing, MediaFile, MediaOperations, SearchResults, SegmentFile, StitchedFile,
    TranscriptFile, VideoInfo,
};
use crate::output::Envelope;
use crate::{Result, VidSnatchError};

/// Results returned by `search_videos` when the caller names no limit
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Tools answered as an event stream by the HTTP transport
pub const DOWNLOAD_TOOLS: &[&str] = &[
    "download_video",
    "download_audio",
    "download_transcript",
    "download_video_segment",
    "stitch_clips",
];

/// MCP tool description as listed by `tools/list`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Outcome of a name-dispatched tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Serialized envelope
    pub envelope: Value,
    pub is_error: bool,
}

impl ToolOutput {
    fn from_envelope<T: Serialize>(envelope: Envelope<T>) -> Self {
        Self {
            is_error: !envelope.is_success(),
            envelope: envelope.to_value(),
        }
    }

    fn invalid_arguments(tool: &str, err: serde_json::Error) -> Self {
        let err = anyhow::Error::from(VidSnatchError::InvalidInput(err.to_string()))
            .context(format!("Invalid arguments for {}", tool));
        Self::from_envelope(Envelope::<Value>::error(&err))
    }
}

/// Seconds given either as a number or as a timestamp string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeArg {
    Seconds(f64),
    Text(String),
}

impl TimeArg {
    pub fn as_timestamp(&self) -> String {
        match self {
            TimeArg::Seconds(seconds) => seconds.to_string(),
            TimeArg::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UrlArgs {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideoArgs {
    url: String,
    quality: Option<String>,
    /// Overrides `quality` when given
    resolution: Option<String>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct AudioArgs {
    url: String,
    quality: Option<String>,
    format: Option<String>,
    output_dir: Option<PathBuf>,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize)]
struct TranscriptArgs {
    url: String,
    #[serde(default = "default_language")]
    language: String,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SegmentArgs {
    url: String,
    start_time: TimeArg,
    end_time: TimeArg,
    quality: Option<String>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct StitchArgs {
    file_paths: Vec<PathBuf>,
    output_filename: Option<String>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    sort_by: Option<String>,
    limit: Option<usize>,
}

/// Shared facade used by the CLI and the MCP transports
#[derive(Clone)]
pub struct ToolFacade {
    ops: MediaOperations,
}

impl ToolFacade {
    pub fn new(ops: MediaOperations) -> Self {
        Self { ops }
    }

    pub fn operations(&self) -> &MediaOperations {
        &self.ops
    }

    pub async fn get_video_info(&self, url: &str) -> Envelope<VideoInfo> {
        tracing::info!("Getting video info for: {}", url);
        Envelope::from_result(
            self.ops
                .video_info(url)
                .await
                .context("Failed to get video information"),
        )
    }

    pub async fn download_video(
        &self,
        url: &str,
        quality: Option<&str>,
        output_dir: Option<&Path>,
    ) -> Envelope<MediaFile> {
        tracing::info!("Downloading video: {} (quality: {})", url, quality.unwrap_or("default"));
        Envelope::from_result(
            self.ops
                .download_video(url, quality, output_dir)
                .await
                .context("Failed to download video"),
        )
    }

    pub async fn download_audio(
        &self,
        url: &str,
        quality: Option<&str>,
        format: Option<&str>,
        output_dir: Option<&Path>,
    ) -> Envelope<MediaFile> {
        tracing::info!(
            "Downloading audio: {} (quality: {}, format: {})",
            url,
            quality.unwrap_or("default"),
            format.unwrap_or("default")
        );
        Envelope::from_result(
            self.ops
                .download_audio(url, quality, format, output_dir)
                .await
                .context("Failed to download audio"),
        )
    }

    pub async fn download_transcript(
        &self,
        url: &str,
        language: &str,
        output_dir: Option<&Path>,
    ) -> Envelope<TranscriptFile> {
        tracing::info!("Downloading transcript: {} (language: {})", url, language);
        Envelope::from_result(
            self.ops
                .download_transcript(url, language, output_dir)
                .await
                .context("Failed to download transcript"),
        )
    }

    pub async fn download_video_segment(
        &self,
        url: &str,
        start: &str,
        end: &str,
        quality: Option<&str>,
        output_dir: Option<&Path>,
    ) -> Envelope<SegmentFile> {
        tracing::info!("Downloading video segment: {} from {} to {}", url, start, end);
        Envelope::from_result(
            self.ops
                .trim(url, start, end, quality, output_dir)
                .await
                .context("Failed to download video segment"),
        )
    }

    pub async fn stitch_clips(
        &self,
        inputs: &[PathBuf],
        output_name: Option<&str>,
        output_dir: Option<&Path>,
    ) -> Envelope<StitchedFile> {
        Envelope::from_result(
            self.ops
                .stitch(inputs, output_name, output_dir)
                .await
                .context("Failed to stitch clips"),
        )
    }

    pub fn list_downloads(&self, directory: Option<&Path>) -> Envelope<DownloadListing> {
        Envelope::from_result(
            self.ops
                .list_downloads(directory)
                .context("Failed to list downloads"),
        )
    }

    pub async fn search_videos(
        &self,
        query: &str,
        sort: SearchSort,
        limit: usize,
    ) -> Envelope<SearchResults> {
        tracing::info!("Searching for: {} (sort: {})", query, sort.as_str());
        Envelope::from_result(
            self.ops
                .search(query, sort, limit)
                .await
                .context("Failed to search videos"),
        )
    }

    pub fn get_config(&self) -> Envelope<Config> {
        Envelope::Success(self.ops.config().clone())
    }

    /// Dispatch a tool by name. Unknown tool names are an error; argument and
    /// operation failures are reported inside the returned envelope.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        // absent arguments are an empty object
        let arguments = if arguments.is_null() { json!({}) } else { arguments };

        macro_rules! parse {
            ($ty:ty) => {
                match serde_json::from_value::<$ty>(arguments) {
                    Ok(args) => args,
                    Err(e) => return Ok(ToolOutput::invalid_arguments(name, e)),
                }
            };
        }

        let output = match name {
            "get_video_info" => {
                let args = parse!(UrlArgs);
                ToolOutput::from_envelope(self.get_video_info(&args.url).await)
            }
            "download_video" => {
                let args = parse!(VideoArgs);
                let quality = args.resolution.as_deref().or(args.quality.as_deref());
                ToolOutput::from_envelope(
                    self.download_video(&args.url, quality, args.output_dir.as_deref())
                        .await,
                )
            }
            "download_audio" => {
                let args = parse!(AudioArgs);
                ToolOutput::from_envelope(
                    self.download_audio(
                        &args.url,
                        args.quality.as_deref(),
                        args.format.as_deref(),
                        args.output_dir.as_deref(),
                    )
                    .await,
                )
            }
            "download_transcript" => {
                let args = parse!(TranscriptArgs);
                ToolOutput::from_envelope(
                    self.download_transcript(&args.url, &args.language, args.output_dir.as_deref())
                        .await,
                )
            }
            "download_video_segment" => {
                let args = parse!(SegmentArgs);
                ToolOutput::from_envelope(
                    self.download_video_segment(
                        &args.url,
                        &args.start_time.as_timestamp(),
                        &args.end_time.as_timestamp(),
                        args.quality.as_deref(),
                        args.output_dir.as_deref(),
                    )
                    .await,
                )
            }
            "stitch_clips" => {
                let args = parse!(StitchArgs);
                ToolOutput::from_envelope(
                    self.stitch_clips(
                        &args.file_paths,
                        args.output_filename.as_deref(),
                        args.output_dir.as_deref(),
                    )
                    .await,
                )
            }
            // remote callers only ever see the configured download directory
            "list_downloads" => ToolOutput::from_envelope(self.list_downloads(None)),
            "search_videos" => {
                let args = parse!(SearchArgs);
                let sort = match args.sort_by.as_deref().unwrap_or("relevance").parse::<SearchSort>() {
                    Ok(sort) => sort,
                    Err(e) => {
                        return Ok(ToolOutput::from_envelope(Envelope::<Value>::error(
                            &anyhow::Error::from(e).context("Failed to search videos"),
                        )))
                    }
                };
                ToolOutput::from_envelope(
                    self.search_videos(&args.query, sort, args.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
                        .await,
                )
            }
            "get_config" => ToolOutput::from_envelope(self.get_config()),
            other => anyhow::bail!("Unknown tool: {}", other),
        };

        Ok(output)
    }

    pub fn is_download_tool(name: &str) -> bool {
        DOWNLOAD_TOOLS.contains(&name)
    }

    /// Tool list advertised over MCP
    pub fn tool_definitions() -> Vec<ToolDefinition> {
        let url = json!({"type": "string", "description": "YouTube video URL or video ID"});
        let output_dir = json!({
            "type": "string",
            "description": "Directory to save into (defaults to the configured download directory)"
        });

        vec![
            ToolDefinition {
                name: "get_video_info",
                description: "Get detailed information about a YouTube video: title, channel, duration, \
                              views and the video/audio qualities that can be downloaded",
                input_schema: json!({
                    "type": "object",
                    "properties": { "url": url.clone() },
                    "required": ["url"]
                }),
            },
            ToolDefinition {
                name: "download_video",
                description: "Download a YouTube video. Qualities above 720p are downloaded as separate \
                              video and audio tracks and merged",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "url": url.clone(),
                        "quality": {
                            "type": "string",
                            "description": "highest, high, medium, low or a resolution like 1080p",
                            "default": "highest"
                        },
                        "resolution": {"type": "string", "description": "Specific resolution, overrides quality"},
                        "output_dir": output_dir.clone()
                    },
                    "required": ["url"]
                }),
            },
            ToolDefinition {
                name: "download_audio",
                description: "Download the audio track of a YouTube video",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "url": url.clone(),
                        "quality": {
                            "type": "string",
                            "description": "highest, high, medium, low or a bitrate like 128kbps",
                            "default": "highest"
                        },
                        "format": {"type": "string", "enum": ["mp3", "m4a", "wav"], "default": "mp3"},
                        "output_dir": output_dir.clone()
                    },
                    "required": ["url"]
                }),
            },
            ToolDefinition {
                name: "download_transcript",
                description: "Download the transcript of a YouTube video with [MM:SS] timestamps. \
                              Fetch the transcript first when asked for clips about a topic, then \
                              use the timestamps with download_video_segment",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "url": url.clone(),
                        "language": {
                            "type": "string",
                            "description": "Language code such as en or es, or auto for the first available track",
                            "default": "en"
                        },
                        "output_dir": output_dir.clone()
                    },
                    "required": ["url"]
                }),
            },
            ToolDefinition {
                name: "download_video_segment",
                description: "Download one segment of a YouTube video between two timestamps",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "url": url.clone(),
                        "start_time": {
                            "type": ["number", "string"],
                            "description": "Start in seconds, or HH:MM:SS / MM:SS"
                        },
                        "end_time": {
                            "type": ["number", "string"],
                            "description": "End in seconds, or HH:MM:SS / MM:SS"
                        },
                        "quality": {"type": "string", "description": "Video quality", "default": "highest"},
                        "output_dir": output_dir.clone()
                    },
                    "required": ["url", "start_time", "end_time"]
                }),
            },
            ToolDefinition {
                name: "stitch_clips",
                description: "Join two or more local video files, in order, into one mp4",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "file_paths": {
                            "type": "array",
                            "items": {"type": "string"},
                            "minItems": 2,
                            "description": "Clips to join, in playback order"
                        },
                        "output_filename": {"type": "string", "description": "Name of the stitched file"},
                        "output_dir": output_dir.clone()
                    },
                    "required": ["file_paths"]
                }),
            },
            ToolDefinition {
                name: "list_downloads",
                description: "List files in the download directory, newest first",
                input_schema: json!({"type": "object", "properties": {}}),
            },
            ToolDefinition {
                name: "search_videos",
                description: "Search YouTube for videos. Returned URLs can be passed to the other tools",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Search query string"},
                        "sort_by": {
                            "type": "string",
                            "enum": ["relevance", "date", "views"],
                            "default": "relevance"
                        },
                        "limit": {"type": "integer", "minimum": 1, "maximum": 50, "default": DEFAULT_SEARCH_LIMIT}
                    },
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: "get_config",
                description: "Get the current server configuration",
                input_schema: json!({"type": "object", "properties": {}}),
            },
        ]
    }
}
