use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::operations::selection::{AudioQuality, VideoQuality};
use crate::retry::RetryPolicy;

/// Name of the config file looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "vidsnatch.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory downloads are written to
    pub download_directory: PathBuf,

    /// Quality used when a video request names none
    pub default_video_quality: String,

    /// Quality used when an audio request names none
    pub default_audio_quality: String,

    /// Audio container used when an audio request names none
    pub default_audio_format: String,

    /// Largest stream size accepted for download
    pub max_file_size_mb: u64,

    /// Output containers and audio formats that may be produced
    pub allowed_formats: Vec<String>,

    /// Verify TLS certificates on outbound requests
    pub verify_tls: bool,

    /// Keep the full source next to the clip after a trim
    pub keep_trim_source: bool,

    /// External executables
    pub tools: ToolsConfig,

    /// Retry behaviour for resolving videos
    pub retry: RetryConfig,

    /// MCP HTTP transport
    pub http_transport: HttpTransportConfig,

    /// Local web UI
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub yt_dlp: String,
    pub ffmpeg: String,
    pub ffprobe: String,

    /// Seconds a single subprocess may run before it is killed
    pub subprocess_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpTransportConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,

    /// Answer download tool calls as a server-sent event stream
    pub stream_downloads: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_directory: PathBuf::from("./downloads"),
            default_video_quality: "highest".to_string(),
            default_audio_quality: "highest".to_string(),
            default_audio_format: "mp3".to_string(),
            max_file_size_mb: 500,
            allowed_formats: ["mp4", "webm", "mp3", "m4a", "wav"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            verify_tls: true,
            keep_trim_source: false,
            tools: ToolsConfig::default(),
            retry: RetryConfig::default(),
            http_transport: HttpTransportConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            subprocess_timeout_secs: Some(3600),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 5.0,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            enable_cors: true,
            stream_downloads: true,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from file (or defaults) and apply environment overrides
    pub async fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let config_path = Self::config_path(explicit_path)?;

        let mut config = if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            serde_json::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file {}", config_path.display()))?
        } else {
            tracing::debug!("No config file at {}, using defaults", config_path.display());
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, explicit_path: Option<&Path>) -> Result<PathBuf> {
        let config_path = Self::config_path(explicit_path)?;

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(config_path)
    }

    /// Get configuration file path
    pub fn config_path(explicit_path: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit_path {
            return Ok(path.to_path_buf());
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("vidsnatch").join("config.json"))
    }

    /// Apply `VIDSNATCH_*` overrides using the given variable lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("VIDSNATCH_DOWNLOAD_DIR") {
            self.download_directory = PathBuf::from(dir);
        }
        if let Some(quality) = lookup("VIDSNATCH_VIDEO_QUALITY") {
            self.default_video_quality = quality;
        }
        if let Some(quality) = lookup("VIDSNATCH_AUDIO_QUALITY") {
            self.default_audio_quality = quality;
        }
        if let Some(format) = lookup("VIDSNATCH_AUDIO_FORMAT") {
            self.default_audio_format = format;
        }
        if let Some(size) = lookup("VIDSNATCH_MAX_FILE_SIZE_MB") {
            self.max_file_size_mb = size
                .parse()
                .with_context(|| format!("VIDSNATCH_MAX_FILE_SIZE_MB is not a number: {}", size))?;
        }
        if let Some(flag) = lookup("VIDSNATCH_VERIFY_TLS") {
            self.verify_tls = parse_flag(&flag);
        }
        if let Some(path) = lookup("VIDSNATCH_YTDLP") {
            self.tools.yt_dlp = path;
        }
        if let Some(path) = lookup("VIDSNATCH_FFMPEG") {
            self.tools.ffmpeg = path;
        }
        if let Some(path) = lookup("VIDSNATCH_FFPROBE") {
            self.tools.ffprobe = path;
        }
        if let Some(host) = lookup("VIDSNATCH_HTTP_HOST") {
            self.http_transport.host = host;
        }
        if let Some(port) = lookup("VIDSNATCH_HTTP_PORT") {
            self.http_transport.port = port
                .parse()
                .with_context(|| format!("VIDSNATCH_HTTP_PORT is not a port: {}", port))?;
        }
        if let Some(flag) = lookup("VIDSNATCH_HTTP_ENABLE_CORS") {
            self.http_transport.enable_cors = parse_flag(&flag);
        }
        if let Some(flag) = lookup("VIDSNATCH_HTTP_STREAM_DOWNLOADS") {
            self.http_transport.stream_downloads = parse_flag(&flag);
        }
        if let Some(host) = lookup("VIDSNATCH_WEB_HOST") {
            self.web.host = host;
        }
        if let Some(port) = lookup("VIDSNATCH_WEB_PORT") {
            self.web.port = port
                .parse()
                .with_context(|| format!("VIDSNATCH_WEB_PORT is not a port: {}", port))?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.default_video_quality
            .parse::<VideoQuality>()
            .context("default_video_quality is invalid")?;
        self.default_audio_quality
            .parse::<AudioQuality>()
            .context("default_audio_quality is invalid")?;
        self.default_audio_format
            .parse::<crate::operations::AudioFormat>()
            .context("default_audio_format is invalid")?;

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.base_delay_secs < 0.0 || self.retry.backoff_multiplier < 1.0 {
            anyhow::bail!("retry delays must be non-negative with a backoff multiplier of at least 1");
        }
        if self.http_transport.port == 0 || self.web.port == 0 {
            anyhow::bail!("HTTP ports must be non-zero");
        }

        Ok(())
    }

    /// Whether an output container or audio format may be produced
    pub fn is_format_allowed(&self, format: &str) -> bool {
        self.allowed_formats
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(format))
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn subprocess_timeout(&self) -> Option<Duration> {
        self.tools.subprocess_timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_secs_f64(self.retry.base_delay_secs),
            self.retry.backoff_multiplier,
        )
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.download_directory, PathBuf::from("./downloads"));
        assert_eq!(config.http_transport.port, 8090);
        assert!(config.is_format_allowed("MP4"));
        assert!(!config.is_format_allowed("flac"));
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"download_directory": "/tmp/media", "http_transport": {"port": 9000}}"#,
        )
        .unwrap();
        assert_eq!(config.download_directory, PathBuf::from("/tmp/media"));
        assert_eq!(config.http_transport.port, 9000);
        assert_eq!(config.http_transport.host, "0.0.0.0");
        assert_eq!(config.max_file_size_mb, 500);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(lookup_from(&[
                ("VIDSNATCH_DOWNLOAD_DIR", "/data/yt"),
                ("VIDSNATCH_VIDEO_QUALITY", "720p"),
                ("VIDSNATCH_MAX_FILE_SIZE_MB", "42"),
                ("VIDSNATCH_HTTP_PORT", "9999"),
                ("VIDSNATCH_HTTP_ENABLE_CORS", "false"),
                ("VIDSNATCH_VERIFY_TLS", "0"),
            ]))
            .unwrap();

        assert_eq!(config.download_directory, PathBuf::from("/data/yt"));
        assert_eq!(config.default_video_quality, "720p");
        assert_eq!(config.max_file_size_mb, 42);
        assert_eq!(config.http_transport.port, 9999);
        assert!(!config.http_transport.enable_cors);
        assert!(!config.verify_tls);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_env_number_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(lookup_from(&[("VIDSNATCH_HTTP_PORT", "eighty")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_quality() {
        let config = Config {
            default_video_quality: "ultra".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_then_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            max_file_size_mb: 64,
            ..Config::default()
        };

        let written = config.save(Some(&path)).await.unwrap();
        assert_eq!(written, path);

        let loaded = Config::load(Some(&path)).await.unwrap();
        assert_eq!(loaded.max_file_size_mb, 64);
    }
}
