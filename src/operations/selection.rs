//! Quality tier to stream resolution.
//!
//! A selected video stream never exceeds the tier's target height, and a request that
//! no stream satisfies fails instead of falling back to an unrelated quality.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::extractors::{StreamDescriptor, StreamKind};
use crate::VidSnatchError;

/// Highest resolution served as a single combined file without merging
pub const SAFE_COMBINED_HEIGHT: u32 = 720;

const HIGH_HEIGHT: u32 = 720;
const MEDIUM_HEIGHT: u32 = 480;
const HIGH_AUDIO_KBPS: u32 = 160;
const MEDIUM_AUDIO_KBPS: u32 = 128;
const BITRATE_SLACK_KBPS: f64 = 2.0;

/// Requested video quality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoQuality {
    Highest,
    High,
    Medium,
    Low,
    /// Exact or nearest-below height, e.g. `1080p`
    Resolution(u32),
}

/// Requested audio quality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioQuality {
    Highest,
    High,
    Medium,
    Low,
    /// Exact or nearest-below bitrate in kbps, e.g. `128kbps`
    Bitrate(u32),
}

impl FromStr for VideoQuality {
    type Err = VidSnatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "highest" | "best" => Ok(VideoQuality::Highest),
            "high" => Ok(VideoQuality::High),
            "medium" => Ok(VideoQuality::Medium),
            "low" | "lowest" => Ok(VideoQuality::Low),
            other => other
                .strip_suffix('p')
                .unwrap_or(other)
                .parse::<u32>()
                .ok()
                .filter(|height| *height > 0)
                .map(VideoQuality::Resolution)
                .ok_or_else(|| {
                    VidSnatchError::InvalidInput(format!(
                        "Unknown video quality '{}'. Use highest, high, medium, low or a resolution like 720p",
                        s
                    ))
                }),
        }
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoQuality::Highest => write!(f, "highest"),
            VideoQuality::High => write!(f, "high"),
            VideoQuality::Medium => write!(f, "medium"),
            VideoQuality::Low => write!(f, "low"),
            VideoQuality::Resolution(height) => write!(f, "{}p", height),
        }
    }
}

impl FromStr for AudioQuality {
    type Err = VidSnatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "highest" | "best" => Ok(AudioQuality::Highest),
            "high" => Ok(AudioQuality::High),
            "medium" => Ok(AudioQuality::Medium),
            "low" | "lowest" => Ok(AudioQuality::Low),
            other => other
                .trim_end_matches("kbps")
                .trim_end_matches('k')
                .parse::<u32>()
                .ok()
                .filter(|kbps| *kbps > 0)
                .map(AudioQuality::Bitrate)
                .ok_or_else(|| {
                    VidSnatchError::InvalidInput(format!(
                        "Unknown audio quality '{}'. Use highest, high, medium, low or a bitrate like 128kbps",
                        s
                    ))
                }),
        }
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioQuality::Highest => write!(f, "highest"),
            AudioQuality::High => write!(f, "high"),
            AudioQuality::Medium => write!(f, "medium"),
            AudioQuality::Low => write!(f, "low"),
            AudioQuality::Bitrate(kbps) => write!(f, "{}kbps", kbps),
        }
    }
}

/// Streams chosen for a video request
#[derive(Debug, Clone, PartialEq)]
pub enum VideoSelection {
    /// One combined stream, downloaded as-is
    Single(StreamDescriptor),
    /// Separate tracks that must be merged after download
    Merge {
        video: StreamDescriptor,
        audio: StreamDescriptor,
    },
}

impl VideoSelection {
    pub fn requires_merge(&self) -> bool {
        matches!(self, VideoSelection::Merge { .. })
    }

    /// Height of the resulting video
    pub fn height(&self) -> Option<u32> {
        match self {
            VideoSelection::Single(stream) => stream.height,
            VideoSelection::Merge { video, .. } => video.height,
        }
    }

    /// Known total download size, if every part reports one
    pub fn estimated_size(&self) -> Option<u64> {
        match self {
            VideoSelection::Single(stream) => stream.filesize,
            VideoSelection::Merge { video, audio } => Some(video.filesize? + audio.filesize?),
        }
    }
}

fn is_mp4(stream: &StreamDescriptor) -> bool {
    stream.container.eq_ignore_ascii_case("mp4")
}

/// Preference among video streams of equal height: mp4, then fps, then bitrate
fn compare_video(a: &StreamDescriptor, b: &StreamDescriptor) -> Ordering {
    a.height
        .cmp(&b.height)
        .then_with(|| is_mp4(a).cmp(&is_mp4(b)))
        .then_with(|| a.fps.unwrap_or(0.0).total_cmp(&b.fps.unwrap_or(0.0)))
        .then_with(|| a.tbr.unwrap_or(0.0).total_cmp(&b.tbr.unwrap_or(0.0)))
}

fn audio_bitrate(stream: &StreamDescriptor) -> f64 {
    stream.abr.or(stream.tbr).unwrap_or(0.0)
}

fn compare_audio(a: &StreamDescriptor, b: &StreamDescriptor) -> Ordering {
    audio_bitrate(a)
        .total_cmp(&audio_bitrate(b))
        .then_with(|| {
            let a_m4a = a.container.eq_ignore_ascii_case("m4a");
            let b_m4a = b.container.eq_ignore_ascii_case("m4a");
            a_m4a.cmp(&b_m4a)
        })
}

fn with_height<'a>(
    streams: &'a [StreamDescriptor],
    kind: StreamKind,
) -> impl Iterator<Item = &'a StreamDescriptor> + 'a {
    streams
        .iter()
        .filter(move |s| s.kind == kind && s.height.is_some())
}

/// Best combined stream at or below `max_height`
fn best_progressive_at_most(streams: &[StreamDescriptor], max_height: u32) -> Option<&StreamDescriptor> {
    with_height(streams, StreamKind::Progressive)
        .filter(|s| s.height.unwrap_or(0) <= max_height)
        .max_by(|a, b| compare_video(a, b))
}

/// Best audio-only stream overall
pub fn best_audio(streams: &[StreamDescriptor]) -> Option<&StreamDescriptor> {
    streams
        .iter()
        .filter(|s| s.kind == StreamKind::AudioOnly)
        .max_by(|a, b| compare_audio(a, b))
}

fn merge_at(
    streams: &[StreamDescriptor],
    height: u32,
) -> Result<VideoSelection, VidSnatchError> {
    let video = with_height(streams, StreamKind::VideoOnly)
        .filter(|s| s.height == Some(height))
        .max_by(|a, b| compare_video(a, b))
        .ok_or_else(|| {
            VidSnatchError::StreamSelection(format!("no {}p video stream available", height))
        })?;
    let audio = best_audio(streams).ok_or_else(|| {
        VidSnatchError::StreamSelection(format!(
            "{}p requires merging but no audio-only stream is available",
            height
        ))
    })?;

    Ok(VideoSelection::Merge {
        video: video.clone(),
        audio: audio.clone(),
    })
}

/// Resolve a video quality against the available streams
pub fn select_video(
    streams: &[StreamDescriptor],
    quality: VideoQuality,
) -> Result<VideoSelection, VidSnatchError> {
    let best_height = streams
        .iter()
        .filter(|s| s.has_video())
        .filter_map(|s| s.height)
        .max()
        .ok_or_else(|| VidSnatchError::StreamSelection("no video streams available".to_string()))?;

    match quality {
        VideoQuality::Highest => {
            if best_height <= SAFE_COMBINED_HEIGHT {
                if let Some(stream) = best_progressive_at_most(streams, best_height)
                    .filter(|s| s.height == Some(best_height))
                {
                    return Ok(VideoSelection::Single(stream.clone()));
                }
            }

            let best_adaptive = with_height(streams, StreamKind::VideoOnly)
                .max_by(|a, b| compare_video(a, b));
            match best_adaptive {
                Some(video) => {
                    let audio = best_audio(streams).ok_or_else(|| {
                        VidSnatchError::StreamSelection(format!(
                            "{} requires merging but no audio-only stream is available",
                            video.quality_label()
                        ))
                    })?;
                    Ok(VideoSelection::Merge {
                        video: video.clone(),
                        audio: audio.clone(),
                    })
                }
                // sources without adaptive tracks only offer combined streams
                None => best_progressive_at_most(streams, best_height)
                    .map(|s| VideoSelection::Single(s.clone()))
                    .ok_or_else(|| {
                        VidSnatchError::StreamSelection("no playable video stream available".to_string())
                    }),
            }
        }
        VideoQuality::High | VideoQuality::Medium => {
            let target = if quality == VideoQuality::High {
                HIGH_HEIGHT
            } else {
                MEDIUM_HEIGHT
            };
            best_progressive_at_most(streams, target)
                .map(|s| VideoSelection::Single(s.clone()))
                .ok_or_else(|| {
                    VidSnatchError::StreamSelection(format!(
                        "no combined stream at or below {}p for quality '{}'",
                        target, quality
                    ))
                })
        }
        VideoQuality::Low => with_height(streams, StreamKind::Progressive)
            .min_by(|a, b| {
                a.height
                    .cmp(&b.height)
                    .then_with(|| compare_video(b, a))
            })
            .map(|s| VideoSelection::Single(s.clone()))
            .ok_or_else(|| {
                VidSnatchError::StreamSelection("no combined stream available for quality 'low'".to_string())
            }),
        VideoQuality::Resolution(target) => {
            let height = streams
                .iter()
                .filter(|s| s.has_video())
                .filter_map(|s| s.height)
                .filter(|h| *h <= target)
                .max()
                .ok_or_else(|| {
                    VidSnatchError::StreamSelection(format!(
                        "no video stream at or below {}p",
                        target
                    ))
                })?;

            if let Some(stream) = with_height(streams, StreamKind::Progressive)
                .filter(|s| s.height == Some(height))
                .max_by(|a, b| compare_video(a, b))
            {
                return Ok(VideoSelection::Single(stream.clone()));
            }
            merge_at(streams, height)
        }
    }
}

/// Resolve an audio quality against the available audio-only streams.
///
/// With `prefer_container` set, streams in that container are considered first so a
/// native format needs no re-encode.
pub fn select_audio<'a>(
    streams: &'a [StreamDescriptor],
    quality: AudioQuality,
    prefer_container: Option<&str>,
) -> Result<&'a StreamDescriptor, VidSnatchError> {
    let audio: Vec<&StreamDescriptor> = streams
        .iter()
        .filter(|s| s.kind == StreamKind::AudioOnly)
        .collect();

    if audio.is_empty() {
        return Err(VidSnatchError::StreamSelection("no audio-only streams available".to_string()));
    }

    let preferred: Vec<&StreamDescriptor> = match prefer_container {
        Some(container) => audio
            .iter()
            .copied()
            .filter(|s| s.container.eq_ignore_ascii_case(container))
            .collect(),
        None => Vec::new(),
    };

    let pick = |candidates: &[&'a StreamDescriptor]| -> Option<&'a StreamDescriptor> {
        let at_most = |limit: u32| {
            candidates
                .iter()
                .copied()
                // reported bitrates overshoot nominal ones (129.5 for a 128k track)
                .filter(move |s| audio_bitrate(s) <= limit as f64 + BITRATE_SLACK_KBPS)
                .max_by(|a, b| compare_audio(a, b))
        };
        match quality {
            AudioQuality::Highest => candidates.iter().copied().max_by(|a, b| compare_audio(a, b)),
            AudioQuality::High => at_most(HIGH_AUDIO_KBPS),
            AudioQuality::Medium => at_most(MEDIUM_AUDIO_KBPS),
            AudioQuality::Low => candidates.iter().copied().min_by(|a, b| compare_audio(a, b)),
            AudioQuality::Bitrate(kbps) => at_most(kbps),
        }
    };

    pick(preferred.as_slice())
        .or_else(|| pick(audio.as_slice()))
        .ok_or_else(|| {
            VidSnatchError::StreamSelection(format!("no audio stream matches quality '{}'", quality))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, kind: StreamKind, height: u32, container: &str) -> StreamDescriptor {
        StreamDescriptor {
            format_id: id.to_string(),
            kind,
            container: container.to_string(),
            height: Some(height),
            fps: Some(30.0),
            abr: None,
            tbr: Some(height as f64),
            filesize: Some(height as u64 * 1000),
            vcodec: Some("avc1".to_string()),
            acodec: match kind {
                StreamKind::Progressive => Some("mp4a".to_string()),
                _ => Some("none".to_string()),
            },
        }
    }

    fn audio(id: &str, abr: f64, container: &str) -> StreamDescriptor {
        StreamDescriptor {
            format_id: id.to_string(),
            kind: StreamKind::AudioOnly,
            container: container.to_string(),
            height: None,
            fps: None,
            abr: Some(abr),
            tbr: None,
            filesize: Some(1000),
            vcodec: Some("none".to_string()),
            acodec: Some("opus".to_string()),
        }
    }

    /// A typical source: combined 360p/720p, adaptive up to 2160p
    fn hd_source() -> Vec<StreamDescriptor> {
        vec![
            video("18", StreamKind::Progressive, 360, "mp4"),
            video("22", StreamKind::Progressive, 720, "mp4"),
            video("136", StreamKind::VideoOnly, 720, "mp4"),
            video("137", StreamKind::VideoOnly, 1080, "mp4"),
            video("248", StreamKind::VideoOnly, 1080, "webm"),
            video("313", StreamKind::VideoOnly, 2160, "webm"),
            audio("140", 129.5, "m4a"),
            audio("251", 160.0, "webm"),
            audio("249", 50.0, "webm"),
        ]
    }

    #[test]
    fn test_parse_video_quality() {
        assert_eq!("highest".parse::<VideoQuality>().unwrap(), VideoQuality::Highest);
        assert_eq!("HIGH".parse::<VideoQuality>().unwrap(), VideoQuality::High);
        assert_eq!("1080p".parse::<VideoQuality>().unwrap(), VideoQuality::Resolution(1080));
        assert_eq!("480".parse::<VideoQuality>().unwrap(), VideoQuality::Resolution(480));
        assert!("ultra".parse::<VideoQuality>().is_err());
        assert!("0p".parse::<VideoQuality>().is_err());
    }

    #[test]
    fn test_parse_audio_quality() {
        assert_eq!("128kbps".parse::<AudioQuality>().unwrap(), AudioQuality::Bitrate(128));
        assert_eq!("192k".parse::<AudioQuality>().unwrap(), AudioQuality::Bitrate(192));
        assert_eq!("lowest".parse::<AudioQuality>().unwrap(), AudioQuality::Low);
        assert!("loud".parse::<AudioQuality>().is_err());
    }

    #[test]
    fn test_highest_above_threshold_merges_best_tracks() {
        let selection = select_video(&hd_source(), VideoQuality::Highest).unwrap();
        match selection {
            VideoSelection::Merge { video, audio } => {
                assert_eq!(video.format_id, "313");
                assert_eq!(audio.format_id, "251");
            }
            other => panic!("expected a merge, got {:?}", other),
        }
    }

    #[test]
    fn test_highest_within_threshold_uses_combined() {
        let streams = vec![
            video("18", StreamKind::Progressive, 360, "mp4"),
            video("22", StreamKind::Progressive, 720, "mp4"),
            video("136", StreamKind::VideoOnly, 720, "mp4"),
            audio("140", 128.0, "m4a"),
        ];
        let selection = select_video(&streams, VideoQuality::Highest).unwrap();
        assert_eq!(selection, VideoSelection::Single(streams[1].clone()));
        assert!(!selection.requires_merge());
    }

    #[test]
    fn test_highest_low_res_source_without_adaptive_tracks() {
        let streams = vec![video("18", StreamKind::Progressive, 360, "mp4")];
        let selection = select_video(&streams, VideoQuality::Highest).unwrap();
        assert_eq!(selection.height(), Some(360));
    }

    #[test]
    fn test_highest_merges_when_best_combined_is_above_threshold() {
        let streams = vec![
            video("37", StreamKind::Progressive, 1080, "mp4"),
            video("136", StreamKind::VideoOnly, 720, "mp4"),
            audio("140", 128.0, "m4a"),
        ];
        match select_video(&streams, VideoQuality::Highest).unwrap() {
            VideoSelection::Merge { video, audio } => {
                assert_eq!(video.format_id, "136");
                assert_eq!(audio.format_id, "140");
            }
            other => panic!("expected a merge, got {:?}", other),
        }
    }

    #[test]
    fn test_highest_combined_only_source_above_threshold() {
        let streams = vec![
            video("18", StreamKind::Progressive, 360, "mp4"),
            video("37", StreamKind::Progressive, 1080, "mp4"),
        ];
        let selection = select_video(&streams, VideoQuality::Highest).unwrap();
        assert_eq!(selection, VideoSelection::Single(streams[1].clone()));
    }

    #[test]
    fn test_highest_above_threshold_without_audio_fails() {
        let streams = vec![
            video("22", StreamKind::Progressive, 720, "mp4"),
            video("137", StreamKind::VideoOnly, 1080, "mp4"),
        ];
        let err = select_video(&streams, VideoQuality::Highest).unwrap_err();
        assert!(matches!(err, VidSnatchError::StreamSelection(_)));
    }

    #[test]
    fn test_tiers_never_exceed_target() {
        let streams = hd_source();
        for (quality, target) in [
            (VideoQuality::High, 720),
            (VideoQuality::Medium, 480),
            (VideoQuality::Resolution(1080), 1080),
            (VideoQuality::Resolution(1000), 1000),
            (VideoQuality::Resolution(400), 400),
        ] {
            let selection = select_video(&streams, quality).unwrap();
            assert!(
                selection.height().unwrap() <= target,
                "{} selected {:?}",
                quality,
                selection.height()
            );
        }
    }

    #[test]
    fn test_named_tiers_pick_combined_streams() {
        let streams = hd_source();
        let high = select_video(&streams, VideoQuality::High).unwrap();
        assert_eq!(high, VideoSelection::Single(streams[1].clone()));

        let medium = select_video(&streams, VideoQuality::Medium).unwrap();
        assert_eq!(medium.height(), Some(360));
        assert!(!medium.requires_merge());

        let low = select_video(&streams, VideoQuality::Low).unwrap();
        assert_eq!(low.height(), Some(360));
    }

    #[test]
    fn test_medium_without_small_stream_fails() {
        let streams = vec![video("22", StreamKind::Progressive, 720, "mp4")];
        let err = select_video(&streams, VideoQuality::Medium).unwrap_err();
        assert!(matches!(err, VidSnatchError::StreamSelection(_)));
    }

    #[test]
    fn test_explicit_resolution_nearest_below() {
        let streams = hd_source();

        // 1080p has no combined stream: mp4 video-only preferred, merged with best audio
        match select_video(&streams, VideoQuality::Resolution(1440)).unwrap() {
            VideoSelection::Merge { video, audio } => {
                assert_eq!(video.format_id, "137");
                assert_eq!(audio.format_id, "251");
            }
            other => panic!("expected a merge, got {:?}", other),
        }

        // 720p has a combined stream
        let exact = select_video(&streams, VideoQuality::Resolution(720)).unwrap();
        assert_eq!(exact, VideoSelection::Single(streams[1].clone()));

        let err = select_video(&streams, VideoQuality::Resolution(144)).unwrap_err();
        assert!(matches!(err, VidSnatchError::StreamSelection(_)));
    }

    #[test]
    fn test_no_video_streams() {
        let streams = vec![audio("140", 128.0, "m4a")];
        assert!(select_video(&streams, VideoQuality::Highest).is_err());
    }

    #[test]
    fn test_estimated_size_sums_merge_parts() {
        let selection = select_video(&hd_source(), VideoQuality::Highest).unwrap();
        assert_eq!(selection.estimated_size(), Some(2160 * 1000 + 1000));
    }

    #[test]
    fn test_select_audio() {
        let streams = hd_source();
        assert_eq!(select_audio(&streams, AudioQuality::Highest, None).unwrap().format_id, "251");
        assert_eq!(select_audio(&streams, AudioQuality::Medium, None).unwrap().format_id, "140");
        assert_eq!(select_audio(&streams, AudioQuality::Low, None).unwrap().format_id, "249");
        assert_eq!(
            select_audio(&streams, AudioQuality::Bitrate(100), None).unwrap().format_id,
            "249"
        );
        assert!(select_audio(&streams, AudioQuality::Bitrate(32), None).is_err());
    }

    #[test]
    fn test_select_audio_prefers_native_container() {
        let streams = hd_source();
        let stream = select_audio(&streams, AudioQuality::Highest, Some("m4a")).unwrap();
        assert_eq!(stream.format_id, "140");
    }
}
