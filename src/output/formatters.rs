use console::style;
use std::fmt::Write;

use crate::config::Config;
use crate::extractors::{Transcript, VideoDetails};
use crate::operations::{
    DownloadListing, MediaFile, SearchResults, SegmentFile, StitchedFile, TranscriptFile, VideoInfo,
};
use crate::utils::{format_duration, format_file_size, format_transcript_stamp};

/// Plain-text rendering of a result for terminal output
pub trait HumanDisplay {
    fn render(&self) -> String;
}

/// Transcript file body: a short header, a rule, then one `[MM:SS] text` line per entry
pub fn transcript_document(details: &VideoDetails, transcript: &Transcript) -> String {
    let mut doc = String::new();
    let _ = writeln!(doc, "Transcript for: {}", details.title);
    let _ = writeln!(doc, "Video URL: {}", details.url);
    let _ = writeln!(doc, "Video ID: {}", details.id);
    let _ = writeln!(
        doc,
        "Language: {} ({}{})",
        transcript.language_code,
        transcript.language,
        if transcript.is_generated { ", auto-generated" } else { "" }
    );
    let _ = writeln!(doc, "Format: [MM:SS] Text with timestamps");
    let _ = writeln!(doc, "{}", "=".repeat(60));
    doc.push('\n');

    let lines: Vec<String> = transcript
        .entries
        .iter()
        .map(|entry| format!("{} {}", format_transcript_stamp(entry.start), entry.text))
        .collect();
    doc.push_str(&lines.join("\n"));
    doc
}

fn file_lines(out: &mut String, file: &MediaFile) {
    let _ = writeln!(out, "  {} {}", style("File:").bold(), file.file_path.display());
    let _ = writeln!(
        out,
        "  {} {} ({} MB)",
        style("Size:").bold(),
        format_file_size(file.file_size_bytes),
        file.file_size_mb
    );
    if let Some(duration) = file.duration_seconds {
        let _ = writeln!(out, "  {} {}", style("Duration:").bold(), format_duration(duration));
    }
}

fn done(message: &str) -> String {
    format!("{} {}\n", style("✓").green().bold(), message)
}

impl HumanDisplay for MediaFile {
    fn render(&self) -> String {
        let mut out = done(&format!("Saved {}", self.format));
        file_lines(&mut out, self);
        out.trim_end().to_string()
    }
}

impl HumanDisplay for SegmentFile {
    fn render(&self) -> String {
        let mut out = done(&format!(
            "Saved {:.1}s segment ({:.1}s to {:.1}s)",
            self.duration, self.start_time, self.end_time
        ));
        file_lines(&mut out, &self.file);
        if let Some(source) = &self.source_path {
            let _ = writeln!(out, "  {} {}", style("Source:").bold(), source.display());
        }
        out.trim_end().to_string()
    }
}

impl HumanDisplay for StitchedFile {
    fn render(&self) -> String {
        let mut out = done(&format!("Stitched {} clips", self.clip_count));
        file_lines(&mut out, &self.file);
        out.trim_end().to_string()
    }
}

impl HumanDisplay for TranscriptFile {
    fn render(&self) -> String {
        let mut out = done(&format!(
            "Saved {} transcript ({} lines{})",
            self.language,
            self.entry_count,
            if self.is_generated { ", auto-generated" } else { "" }
        ));
        let _ = writeln!(out, "  {} {}", style("File:").bold(), self.file.file_path.display());
        out.trim_end().to_string()
    }
}

impl HumanDisplay for VideoInfo {
    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", style(&self.title).cyan().bold());
        if let Some(author) = &self.author {
            let _ = writeln!(out, "  {} {}", style("Channel:").bold(), author);
        }
        if let Some(duration) = self.duration {
            let _ = writeln!(out, "  {} {}", style("Duration:").bold(), format_duration(duration));
        }
        if let Some(views) = self.views {
            let _ = writeln!(out, "  {} {}", style("Views:").bold(), views);
        }
        if let Some(date) = &self.publish_date {
            let _ = writeln!(out, "  {} {}", style("Published:").bold(), date);
        }
        let _ = writeln!(out, "  {} {}", style("Video:").bold(), self.video_qualities.join(", "));
        let _ = writeln!(out, "  {} {}", style("Audio:").bold(), self.audio_qualities.join(", "));

        let captions = if self.caption_languages.is_empty() {
            "none uploaded".to_string()
        } else {
            self.caption_languages.join(", ")
        };
        let _ = writeln!(
            out,
            "  {} {}{}",
            style("Captions:").bold(),
            captions,
            if self.has_automatic_captions { " (+ auto-generated)" } else { "" }
        );
        out.trim_end().to_string()
    }
}

impl HumanDisplay for DownloadListing {
    fn render(&self) -> String {
        if self.files.is_empty() {
            return format!("No downloads in {}", self.directory.display());
        }

        let mut out = format!(
            "{} file(s) in {}\n",
            self.total_count,
            style(self.directory.display()).bold()
        );
        for file in &self.files {
            let modified = chrono::DateTime::parse_from_rfc3339(&file.modified)
                .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|_| file.modified.clone());
            let _ = writeln!(
                out,
                "  {:>10}  {}  {}",
                format_file_size(file.size_bytes),
                style(modified).dim(),
                file.filename
            );
        }
        out.trim_end().to_string()
    }
}

impl HumanDisplay for SearchResults {
    fn render(&self) -> String {
        if self.results.is_empty() {
            return format!("No results for '{}'", self.query);
        }

        let mut out = String::new();
        for (i, hit) in self.results.iter().enumerate() {
            let _ = writeln!(out, "{:>2}. {}", i + 1, style(&hit.title).bold());
            let mut details = vec![hit.url.clone()];
            if let Some(duration) = hit.duration {
                details.push(format_duration(duration as f64));
            }
            if let Some(author) = &hit.author {
                details.push(author.clone());
            }
            if let Some(views) = hit.views {
                details.push(format!("{} views", views));
            }
            let _ = writeln!(out, "    {}", style(details.join(" | ")).dim());
        }
        out.trim_end().to_string()
    }
}

impl HumanDisplay for Config {
    fn render(&self) -> String {
        let mut out = String::from("Current Configuration:\n");
        let _ = writeln!(out, "  Download Directory: {}", self.download_directory.display());
        let _ = writeln!(out, "  Video Quality: {}", self.default_video_quality);
        let _ = writeln!(
            out,
            "  Audio Quality: {} ({})",
            self.default_audio_quality, self.default_audio_format
        );
        let _ = writeln!(out, "  Max File Size: {} MB", self.max_file_size_mb);
        let _ = writeln!(out, "  Allowed Formats: {}", self.allowed_formats.join(", "));
        let _ = writeln!(out, "  Verify TLS: {}", self.verify_tls);
        let _ = writeln!(
            out,
            "  Tools: {} / {} / {}",
            self.tools.yt_dlp, self.tools.ffmpeg, self.tools.ffprobe
        );
        let _ = writeln!(
            out,
            "  MCP HTTP: {}:{} (cors: {}, streaming: {})",
            self.http_transport.host,
            self.http_transport.port,
            self.http_transport.enable_cors,
            self.http_transport.stream_downloads
        );
        let _ = writeln!(out, "  Web UI: {}:{}", self.web.host, self.web.port);
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::TranscriptEntry;
    use std::collections::BTreeMap;

    #[test]
    fn test_transcript_document_layout() {
        let details = VideoDetails {
            id: "PDKhUknuQDg".into(),
            url: "https://www.youtube.com/watch?v=PDKhUknuQDg".into(),
            title: "Sample".into(),
            author: None,
            duration: None,
            views: None,
            publish_date: None,
            thumbnail: None,
            language: None,
            streams: vec![],
            subtitles: BTreeMap::new(),
            automatic_captions: BTreeMap::new(),
        };
        let transcript = Transcript {
            language_code: "en".into(),
            language: "English".into(),
            is_generated: false,
            entries: vec![
                TranscriptEntry { text: "intro".into(), start: 5.0, duration: 2.0 },
                TranscriptEntry { text: "later".into(), start: 3725.0, duration: 2.0 },
            ],
        };

        let doc = transcript_document(&details, &transcript);
        let lines: Vec<&str> = doc.lines().collect();

        assert_eq!(lines[0], "Transcript for: Sample");
        assert_eq!(lines[3], "Language: en (English)");
        assert_eq!(lines[5], "=".repeat(60));
        assert_eq!(lines[7], "[00:05] intro");
        assert_eq!(lines[8], "[62:05] later");
    }
}
