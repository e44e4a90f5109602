use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::VidSnatchError;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static DASH_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").expect("valid regex"));

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Bytes to megabytes rounded to two decimals
pub fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// `HH:MM:SS` with whole seconds, the form ffmpeg and segment filenames use
pub fn format_hms(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// `[MM:SS]` transcript line prefix
pub fn format_transcript_stamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("[{:02}:{:02}]", total / 60, total % 60)
}

/// Parse `HH:MM:SS`, `MM:SS` or raw seconds into seconds.
pub fn parse_timestamp(input: &str) -> Result<f64> {
    let trimmed = input.trim();
    let invalid = || {
        VidSnatchError::InvalidInput(format!(
            "Invalid timestamp '{}'. Use HH:MM:SS, MM:SS or seconds",
            input
        ))
    };

    let parts: Vec<&str> = trimmed.split(':').collect();
    let seconds = match parts.as_slice() {
        [h, m, s] => {
            let h: u64 = h.parse().map_err(|_| invalid())?;
            let m: u64 = m.parse().map_err(|_| invalid())?;
            let s: f64 = s.parse().map_err(|_| invalid())?;
            let whole = h
                .checked_mul(3600)
                .zip(m.checked_mul(60))
                .and_then(|(h, m)| h.checked_add(m))
                .ok_or_else(invalid)?;
            whole as f64 + s
        }
        [m, s] => {
            let m: u64 = m.parse().map_err(|_| invalid())?;
            let s: f64 = s.parse().map_err(|_| invalid())?;
            m.checked_mul(60).ok_or_else(invalid)? as f64 + s
        }
        [s] => s.parse::<f64>().map_err(|_| invalid())?,
        _ => return Err(invalid().into()),
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(invalid().into());
    }

    Ok(seconds)
}

/// Sanitize filename for safe filesystem usage
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            c if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' || c == '.' => c,
            _ => '_',
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Title slug used for generated files: punctuation dropped, whitespace runs become `-`.
pub fn safe_title(title: &str) -> String {
    let stripped = NON_WORD.replace_all(title, "");
    let slug = DASH_RUNS.replace_all(stripped.trim(), "-").to_string();
    if slug.is_empty() {
        "video".to_string()
    } else {
        slug
    }
}

/// Check if a file exists and is readable
pub fn check_file_accessible(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(VidSnatchError::FileError(format!("File does not exist: {}", path.display())).into());
    }

    if !path.is_file() {
        return Err(VidSnatchError::FileError(format!("Path is not a file: {}", path.display())).into());
    }

    std::fs::File::open(path).map_err(|e| {
        VidSnatchError::FileError(format!("Cannot read file {}: {}", path.display(), e))
    })?;

    Ok(())
}

/// Generate a timestamped filename, e.g. `stitched_20240101_120000.mp4`
pub fn generate_timestamped_filename(base_name: &str, extension: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}.{}", sanitize_filename(base_name), timestamp, extension)
}

/// Check if the current environment has required tools
pub async fn check_dependencies(yt_dlp: &str, ffmpeg: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(yt_dlp, "--version").await {
        missing.push(format!("{} - required for stream extraction and downloads", yt_dlp));
    }

    if !check_command_available(ffmpeg, "-version").await {
        missing.push(format!("{} - required for merging, audio conversion, trim and stitch", ffmpeg));
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str, version_flag: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(version_flag)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
