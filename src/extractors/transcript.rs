use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{CaptionTrack, Transcript, TranscriptEntry, TranscriptProvider, VideoDetails};
use crate::{Result, VidSnatchError};

/// Fetches caption tracks listed in the video metadata (json3 format)
pub struct CaptionTranscriptProvider {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct Json3Captions {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Json3Event {
    t_start_ms: Option<u64>,
    d_duration_ms: Option<u64>,
    #[serde(default)]
    segs: Vec<Json3Segment>,
}

#[derive(Debug, Deserialize)]
struct Json3Segment {
    #[serde(default)]
    utf8: String,
}

/// A track picked for a language request
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedTrack<'a> {
    pub language_code: &'a str,
    pub is_generated: bool,
    pub tracks: &'a [CaptionTrack],
}

impl CaptionTranscriptProvider {
    /// `verify_tls = false` accepts invalid certificates for caption requests only
    pub fn new(verify_tls: bool) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .user_agent(concat!("vidsnatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

/// Choose the caption track for `language`.
///
/// Uploaded captions win over generated ones. `auto` takes the first uploaded track,
/// else the generated track in the video's own language, else the first generated one.
/// An unavailable language falls back to the first track with a warning.
pub fn select_track<'a>(details: &'a VideoDetails, language: &str) -> Option<SelectedTrack<'a>> {
    let uploaded = |code: &str| {
        details.subtitles.get_key_value(code).map(|(code, tracks)| SelectedTrack {
            language_code: code.as_str(),
            is_generated: false,
            tracks: tracks.as_slice(),
        })
    };
    let generated = |code: &str| {
        details
            .automatic_captions
            .get_key_value(code)
            .map(|(code, tracks)| SelectedTrack {
                language_code: code.as_str(),
                is_generated: true,
                tracks: tracks.as_slice(),
            })
    };
    let first_uploaded = || details.subtitles.keys().next().and_then(|code| uploaded(code.as_str()));
    let first_generated = || {
        details
            .language
            .as_deref()
            .and_then(|code| generated(code))
            .or_else(|| {
                details
                    .automatic_captions
                    .keys()
                    .next()
                    .and_then(|code| generated(code.as_str()))
            })
    };

    if language.eq_ignore_ascii_case("auto") {
        return first_uploaded().or_else(first_generated);
    }

    let exact = uploaded(language).or_else(|| generated(language));
    if exact.is_some() {
        return exact;
    }

    let fallback = first_uploaded().or_else(first_generated);
    if let Some(track) = &fallback {
        tracing::warn!(
            "No '{}' transcript, falling back to '{}'",
            language,
            track.language_code
        );
    }
    fallback
}

fn parse_json3(body: &str) -> Result<Vec<TranscriptEntry>> {
    let captions: Json3Captions = serde_json::from_str(body)
        .map_err(|e| VidSnatchError::Provider(format!("unreadable caption data: {}", e)))?;

    let entries = captions
        .events
        .into_iter()
        .filter_map(|event| {
            let text: String = event.segs.iter().map(|seg| seg.utf8.as_str()).collect();
            let text = text.replace('\n', " ").trim().to_string();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptEntry {
                text,
                start: event.t_start_ms.unwrap_or(0) as f64 / 1000.0,
                duration: event.d_duration_ms.unwrap_or(0) as f64 / 1000.0,
            })
        })
        .collect();

    Ok(entries)
}

#[async_trait]
impl TranscriptProvider for CaptionTranscriptProvider {
    async fn fetch(&self, details: &VideoDetails, language: &str) -> Result<Transcript> {
        let selected = select_track(details, language).ok_or_else(|| {
            VidSnatchError::TranscriptUnavailable(
                "This video has no captions, they are disabled, or the video is restricted"
                    .to_string(),
            )
        })?;

        let track = selected
            .tracks
            .iter()
            .find(|track| track.ext == "json3")
            .ok_or_else(|| {
                VidSnatchError::TranscriptUnavailable(format!(
                    "No timed caption format offered for '{}'",
                    selected.language_code
                ))
            })?;

        tracing::debug!("Fetching {} captions from {}", selected.language_code, track.url);

        let response = self
            .client
            .get(&track.url)
            .send()
            .await
            .map_err(|e| VidSnatchError::Provider(format!("caption request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(VidSnatchError::Provider(format!(
                "caption request failed: HTTP {}",
                response.status()
            ))
            .into());
        }

        let body = response
            .text()
            .await
            .map_err(|e| VidSnatchError::Provider(format!("caption download failed: {}", e)))?;
        let entries = parse_json3(&body)?;

        if entries.is_empty() {
            return Err(VidSnatchError::TranscriptUnavailable(format!(
                "The '{}' caption track is empty",
                selected.language_code
            ))
            .into());
        }

        Ok(Transcript {
            language_code: selected.language_code.to_string(),
            language: track
                .name
                .clone()
                .unwrap_or_else(|| selected.language_code.to_string()),
            is_generated: selected.is_generated,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn track(lang: &str) -> Vec<CaptionTrack> {
        vec![CaptionTrack {
            ext: "json3".into(),
            url: format!("https://example.com/{lang}.json3"),
            name: None,
        }]
    }

    fn details(uploaded: &[&str], generated: &[&str], language: Option<&str>) -> VideoDetails {
        VideoDetails {
            id: "PDKhUknuQDg".into(),
            url: "https://www.youtube.com/watch?v=PDKhUknuQDg".into(),
            title: "Sample".into(),
            author: None,
            duration: Some(100.0),
            views: None,
            publish_date: None,
            thumbnail: None,
            language: language.map(String::from),
            streams: vec![],
            subtitles: uploaded.iter().map(|l| (l.to_string(), track(l))).collect::<BTreeMap<_, _>>(),
            automatic_captions: generated
                .iter()
                .map(|l| (l.to_string(), track(l)))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_exact_language_prefers_uploaded() {
        let d = details(&["es"], &["en", "es"], Some("en"));
        let selected = select_track(&d, "es").unwrap();
        assert_eq!(selected.language_code, "es");
        assert!(!selected.is_generated);

        let selected = select_track(&d, "en").unwrap();
        assert_eq!(selected.language_code, "en");
        assert!(selected.is_generated);
    }

    #[test]
    fn test_auto_uses_video_language_for_generated() {
        let d = details(&[], &["de", "en", "fr"], Some("fr"));
        let selected = select_track(&d, "auto").unwrap();
        assert_eq!(selected.language_code, "fr");
    }

    #[test]
    fn test_missing_language_falls_back() {
        let d = details(&["ja"], &[], None);
        assert_eq!(select_track(&d, "en").unwrap().language_code, "ja");
        assert!(select_track(&details(&[], &[], None), "en").is_none());
    }

    #[test]
    fn test_parse_json3_skips_blank_events() {
        let body = r#"{"events": [
            {"tStartMs": 0, "dDurationMs": 1500, "segs": [{"utf8": "hello "}, {"utf8": "world"}]},
            {"tStartMs": 1500, "dDurationMs": 10, "segs": [{"utf8": "\n"}]},
            {"tStartMs": 90000, "dDurationMs": 2000, "segs": [{"utf8": "ninety"}]},
            {"tStartMs": 95000}
        ]}"#;
        let entries = parse_json3(body).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "hello world");
        assert_eq!(entries[0].duration, 1.5);
        assert_eq!(entries[1].start, 90.0);
    }
}
