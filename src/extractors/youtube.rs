use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{
    CaptionTrack, SearchHit, SearchSort, StreamDescriptor, StreamKind, VideoDetails, VideoProvider,
};
use crate::{Result, VidSnatchError};

/// Player client tried when the default one reports a video as unavailable
const FALLBACK_PLAYER_CLIENT: &str = "youtube:player_client=tv";

/// YouTube extractor using yt-dlp
pub struct YtDlpProvider {
    yt_dlp_path: String,
    verify_tls: bool,
}

/// Subset of `yt-dlp --dump-json` output used here
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    upload_date: Option<String>,
    thumbnail: Option<String>,
    language: Option<String>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
    #[serde(default)]
    subtitles: BTreeMap<String, Vec<CaptionTrack>>,
    #[serde(default)]
    automatic_captions: BTreeMap<String, Vec<CaptionTrack>>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: String,
    ext: Option<String>,
    height: Option<u32>,
    fps: Option<f64>,
    abr: Option<f64>,
    tbr: Option<f64>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
    vcodec: Option<String>,
    acodec: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YtDlpSearchEntry {
    id: String,
    title: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    channel: Option<String>,
    uploader: Option<String>,
    view_count: Option<u64>,
}

fn codec_present(codec: &Option<String>) -> bool {
    codec
        .as_deref()
        .map(|c| !c.is_empty() && c != "none")
        .unwrap_or(false)
}

impl YtDlpFormat {
    fn into_descriptor(self) -> Option<StreamDescriptor> {
        let kind = match (codec_present(&self.vcodec), codec_present(&self.acodec)) {
            (true, true) => StreamKind::Progressive,
            (true, false) => StreamKind::VideoOnly,
            (false, true) => StreamKind::AudioOnly,
            // storyboards and other image-only formats
            (false, false) => return None,
        };

        Some(StreamDescriptor {
            format_id: self.format_id,
            kind,
            container: self.ext.unwrap_or_else(|| "mp4".to_string()),
            height: self.height,
            fps: self.fps,
            abr: self.abr,
            tbr: self.tbr,
            filesize: self.filesize.or(self.filesize_approx),
            vcodec: self.vcodec,
            acodec: self.acodec,
        })
    }
}

impl YtDlpInfo {
    fn into_details(self, url: &str) -> VideoDetails {
        let publish_date = self.upload_date.as_deref().and_then(|date| {
            chrono::NaiveDate::parse_from_str(date, "%Y%m%d")
                .ok()
                .map(|d| d.format("%Y-%m-%d").to_string())
        });

        VideoDetails {
            id: self.id,
            url: url.to_string(),
            title: self.title.unwrap_or_else(|| "Untitled".to_string()),
            author: self.uploader.or(self.channel),
            duration: self.duration,
            views: self.view_count,
            publish_date,
            thumbnail: self.thumbnail,
            language: self.language,
            streams: self
                .formats
                .into_iter()
                .filter_map(YtDlpFormat::into_descriptor)
                .collect(),
            subtitles: self.subtitles,
            automatic_captions: self.automatic_captions,
        }
    }
}

/// Map yt-dlp stderr onto an error kind.
fn classify_failure(stderr: &str) -> VidSnatchError {
    let lower = stderr.to_lowercase();
    if lower.contains("is not a valid url")
        || lower.contains("unsupported url")
        || lower.contains("incomplete youtube id")
    {
        VidSnatchError::InvalidUrl(stderr.trim().to_string())
    } else {
        VidSnatchError::Provider(stderr.trim().to_string())
    }
}

impl YtDlpProvider {
    pub fn new(yt_dlp_path: impl Into<String>, verify_tls: bool) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
            verify_tls,
        }
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.yt_dlp_path);
        command.arg("--no-playlist").arg("--no-warnings");
        if !self.verify_tls {
            command.arg("--no-check-certificates");
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn download_command(&self, url: &str, format_id: &str, destination: &Path) -> Command {
        let mut command = self.base_command();
        command
            .arg("--format")
            .arg(format_id)
            .args(["--concurrent-fragments", "4"])
            .arg("--no-part")
            .arg("--force-overwrites")
            .arg("--output")
            .arg(destination)
            .arg(url);
        command
    }

    async fn dump_json(&self, url: &str, player_client: Option<&str>) -> Result<Vec<u8>> {
        let mut command = self.base_command();
        command.arg("--dump-json");
        if let Some(client) = player_client {
            command.args(["--extractor-args", client]);
        }
        command.arg(url);

        let output = command.output().await.map_err(|e| {
            VidSnatchError::Provider(format!("could not run {}: {}", self.yt_dlp_path, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr).into());
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl VideoProvider for YtDlpProvider {
    async fn resolve(&self, url: &str) -> Result<VideoDetails> {
        tracing::debug!("Extracting video info for: {}", url);

        let stdout = match self.dump_json(url, None).await {
            Ok(stdout) => stdout,
            Err(err) if err.to_string().to_lowercase().contains("video unavailable") => {
                tracing::warn!("Video unavailable, trying TV client...");
                self.dump_json(url, Some(FALLBACK_PLAYER_CLIENT)).await?
            }
            Err(err) => return Err(err),
        };

        let info: YtDlpInfo = serde_json::from_slice(&stdout)
            .map_err(|e| VidSnatchError::Provider(format!("unexpected yt-dlp output: {}", e)))?;

        Ok(info.into_details(url))
    }

    async fn download(&self, url: &str, stream: &StreamDescriptor, destination: &Path) -> Result<()> {
        tracing::debug!(
            "Downloading format {} ({}) to {}",
            stream.format_id,
            stream.quality_label(),
            destination.display()
        );

        // a leftover file at the destination would be reported as this download
        if destination.exists() {
            tokio::fs::remove_file(destination).await.map_err(|e| {
                VidSnatchError::FileError(format!(
                    "Failed to replace {}: {}",
                    destination.display(),
                    e
                ))
            })?;
        }

        let output = self
            .download_command(url, &stream.format_id, destination)
            .output()
            .await
            .map_err(|e| {
                VidSnatchError::Provider(format!("could not run {}: {}", self.yt_dlp_path, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr).into());
        }

        if !destination.exists() {
            return Err(VidSnatchError::Provider(format!(
                "yt-dlp reported success but {} was not written",
                destination.display()
            ))
            .into());
        }

        Ok(())
    }

    async fn search(&self, query: &str, sort: SearchSort, limit: usize) -> Result<Vec<SearchHit>> {
        let prefix = match sort {
            SearchSort::Date => "ytsearchdate",
            SearchSort::Relevance | SearchSort::Views => "ytsearch",
        };
        let term = format!("{}{}:{}", prefix, limit, query);

        let output = self
            .base_command()
            .arg("--flat-playlist")
            .arg("--dump-json")
            .arg(&term)
            .output()
            .await
            .map_err(|e| {
                VidSnatchError::Provider(format!("could not run {}: {}", self.yt_dlp_path, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VidSnatchError::Provider(stderr.trim().to_string()).into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut hits = parse_search_lines(&stdout);

        if sort == SearchSort::Views {
            hits.sort_by(|a, b| b.views.unwrap_or(0).cmp(&a.views.unwrap_or(0)));
        }
        hits.truncate(limit);

        Ok(hits)
    }

    fn platform_name(&self) -> &'static str {
        "YouTube"
    }
}

fn parse_search_lines(stdout: &str) -> Vec<SearchHit> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<YtDlpSearchEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("Skipping unparsable search entry: {}", e);
                None
            }
        })
        .map(|entry| SearchHit {
            url: entry
                .url
                .filter(|u| u.starts_with("http"))
                .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", entry.id)),
            title: entry.title.unwrap_or_else(|| "Untitled".to_string()),
            duration: entry.duration.map(|d| d.round() as u64),
            author: entry.channel.or(entry.uploader),
            views: entry.view_count,
            id: entry.id,
        })
        .collect()
}
