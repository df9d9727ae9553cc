//! YouTube: stream enumeration, quality selection, and muxing of separate tracks.

use super::http::{ensure_success, snippet, write_body};
use super::{FetchedFile, SourceFetcher};
use crate::models::{DownloadPolicy, SourceKind};
use crate::mux::{MuxInput, Muxer};
use crate::{VaultError, VaultResult};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::process::Command;
use vault_files::ContentStore;
use vault_types::FileExtension;

static RAW_VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid video id regex"));

static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:youtube(?:-nocookie)?\.com/(?:watch\?(?:[^#]*&)?v=|shorts/|embed/|live/|v/)|youtu\.be/)([A-Za-z0-9_-]{11})",
    )
    .expect("valid video url regex")
});

/// Extracts the 11-character video id from a raw id or a watch, short-link, shorts, embed or
/// live URL.
///
/// # Errors
///
/// `VaultError::InvalidInput` if no id can be found.
pub fn parse_video_id(source: &str) -> VaultResult<String> {
    let source = source.trim();
    if RAW_VIDEO_ID.is_match(source) {
        return Ok(source.to_owned());
    }
    VIDEO_URL
        .captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
        .ok_or_else(|| VaultError::InvalidInput(format!("not a YouTube video: {source}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Audio and video in one container.
    Muxed,
    VideoOnly,
    AudioOnly,
}

impl StreamKind {
    fn label(self) -> &'static str {
        match self {
            StreamKind::Muxed => "muxed",
            StreamKind::VideoOnly => "video-only",
            StreamKind::AudioOnly => "audio-only",
        }
    }
}

/// One downloadable rendition of a video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamVariant {
    pub kind: StreamKind,
    /// Quality label: `1080p`, `720p60` for video, `128kbps` for audio.
    pub label: String,
    /// Bits per second.
    pub bitrate: u64,
    /// Container extension, e.g. `mp4`, `webm`, `m4a`.
    pub container: String,
    pub height: Option<u32>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoManifest {
    pub id: String,
    pub title: String,
    pub variants: Vec<StreamVariant>,
}

/// Where stream manifests and bytes come from.
#[async_trait]
pub trait YouTubeCatalog: Send + Sync {
    async fn manifest(&self, video_id: &str) -> VaultResult<VideoManifest>;

    /// Writes the bytes of `variant` into `file`, returning the byte count.
    async fn download(&self, variant: &StreamVariant, file: &mut tokio::fs::File)
    -> VaultResult<u64>;
}

/// What to download for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Single(StreamVariant),
    Mux {
        video: StreamVariant,
        audio: StreamVariant,
    },
}

fn by_height_then_bitrate(a: &&StreamVariant, b: &&StreamVariant) -> Ordering {
    a.height
        .cmp(&b.height)
        .then_with(|| a.bitrate.cmp(&b.bitrate))
}

/// Highest-bitrate variant whose label equals `quality`, ignoring case.
fn exact<'a>(candidates: &[&'a StreamVariant], quality: &str) -> Option<&'a StreamVariant> {
    candidates
        .iter()
        .filter(|v| v.label.eq_ignore_ascii_case(quality))
        .max_by_key(|v| v.bitrate)
        .copied()
}

/// Exact label match if any, otherwise the largest resolution then highest bitrate.
fn best<'a>(candidates: &[&'a StreamVariant], quality: Option<&str>) -> Option<&'a StreamVariant> {
    quality
        .and_then(|q| exact(candidates, q))
        .or_else(|| candidates.iter().copied().max_by(by_height_then_bitrate))
}

fn of_kind(variants: &[StreamVariant], kind: StreamKind) -> Vec<&StreamVariant> {
    variants.iter().filter(|v| v.kind == kind).collect()
}

fn required<'a>(
    candidates: &[&'a StreamVariant],
    quality: Option<&str>,
    kind: StreamKind,
    all: &[StreamVariant],
) -> VaultResult<&'a StreamVariant> {
    best(candidates, quality).ok_or_else(|| VaultError::NoSuitableStream {
        kind: kind.label().to_owned(),
        available: all.iter().map(|v| v.label.clone()).collect(),
    })
}

/// Picks the variant(s) to download under `policy`.
///
/// With both tracks requested, any muxed variant beats muxing: the one labelled with the
/// requested video quality, else the largest resolution then highest bitrate. Only when there is
/// no muxed variant are the best video-only and audio-only variants picked for muxing. A single
/// requested track is chosen from its own class by label, then resolution, then bitrate.
///
/// # Errors
///
/// - `VaultError::NoSuitableStream` when a needed class is empty
/// - `VaultError::InvalidInput` when neither track is requested
pub fn select_streams(variants: &[StreamVariant], policy: &DownloadPolicy) -> VaultResult<Selection> {
    let muxed = of_kind(variants, StreamKind::Muxed);
    let video = of_kind(variants, StreamKind::VideoOnly);
    let audio = of_kind(variants, StreamKind::AudioOnly);
    let video_quality = policy.video_quality.as_deref();
    let audio_quality = policy.audio_quality.as_deref();

    match (policy.video, policy.audio) {
        (true, true) => {
            if let Some(hit) = best(&muxed, video_quality) {
                return Ok(Selection::Single(hit.clone()));
            }
            let video = required(&video, video_quality, StreamKind::VideoOnly, variants)?;
            let audio = required(&audio, audio_quality, StreamKind::AudioOnly, variants)?;
            Ok(Selection::Mux {
                video: video.clone(),
                audio: audio.clone(),
            })
        }
        (true, false) => required(&video, video_quality, StreamKind::VideoOnly, variants)
            .map(|v| Selection::Single(v.clone())),
        (false, true) => required(&audio, audio_quality, StreamKind::AudioOnly, variants)
            .map(|v| Selection::Single(v.clone())),
        (false, false) => Err(VaultError::InvalidInput(
            "at least one of video or audio must be requested".into(),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    fps: Option<f64>,
    #[serde(default)]
    tbr: Option<f64>,
    #[serde(default)]
    abr: Option<f64>,
}

fn has_codec(codec: &Option<String>) -> bool {
    codec.as_deref().is_some_and(|c| !c.is_empty() && c != "none")
}

impl YtDlpFormat {
    fn into_variant(self) -> Option<StreamVariant> {
        if let Some(protocol) = self.protocol.as_deref() {
            if protocol != "https" && protocol != "http" {
                return None;
            }
        }
        let kind = match (has_codec(&self.vcodec), has_codec(&self.acodec)) {
            (true, true) => StreamKind::Muxed,
            (true, false) => StreamKind::VideoOnly,
            (false, true) => StreamKind::AudioOnly,
            (false, false) => return None,
        };
        let kbps = match kind {
            StreamKind::AudioOnly => self.abr.or(self.tbr),
            _ => self.tbr,
        }
        .unwrap_or(0.0);
        let label = match (kind, self.height) {
            (StreamKind::AudioOnly, _) => format!("{}kbps", kbps.round() as u64),
            (_, Some(height)) => match self.fps {
                Some(fps) if fps > 30.0 => format!("{height}p{}", fps.round() as u32),
                _ => format!("{height}p"),
            },
            (_, None) => "unknown".to_owned(),
        };
        Some(StreamVariant {
            kind,
            label,
            bitrate: (kbps * 1000.0).round() as u64,
            container: self.ext?,
            height: self.height,
            url: self.url?,
        })
    }
}

fn parse_manifest(json: &[u8]) -> VaultResult<VideoManifest> {
    let info: YtDlpInfo = serde_json::from_slice(json).map_err(|e| VaultError::FetchFailed {
        status: None,
        body: format!("unreadable stream manifest: {e}"),
    })?;
    Ok(VideoManifest {
        id: info.id,
        title: info.title.unwrap_or_default(),
        variants: info
            .formats
            .into_iter()
            .filter_map(YtDlpFormat::into_variant)
            .collect(),
    })
}

/// Enumerates streams with `yt-dlp` and downloads the chosen variant over HTTP.
#[derive(Debug, Clone)]
pub struct YtDlpCatalog {
    program: PathBuf,
    http: reqwest::Client,
}

impl YtDlpCatalog {
    pub fn new(program: impl Into<PathBuf>, http: reqwest::Client) -> Self {
        Self {
            program: program.into(),
            http,
        }
    }
}

#[async_trait]
impl YouTubeCatalog for YtDlpCatalog {
    async fn manifest(&self, video_id: &str) -> VaultResult<VideoManifest> {
        let url = format!("https://www.youtube.com/watch?v={video_id}");
        let output = Command::new(&self.program)
            .args([
                "--dump-single-json",
                "--skip-download",
                "--no-warnings",
                "--no-playlist",
                "--",
                url.as_str(),
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("failed to start {}: {}", self.program.display(), e),
                )
            })?;

        if !output.status.success() {
            return Err(VaultError::FetchFailed {
                status: None,
                body: snippet(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        parse_manifest(&output.stdout)
    }

    async fn download(
        &self,
        variant: &StreamVariant,
        file: &mut tokio::fs::File,
    ) -> VaultResult<u64> {
        let response = self
            .http
            .get(&variant.url)
            .send()
            .await
            .map_err(VaultError::transport)?;
        let response = ensure_success(response).await?;
        write_body(response, file).await
    }
}

pub struct YouTubeFetcher {
    catalog: Arc<dyn YouTubeCatalog>,
    muxer: Muxer,
    mux_timeout: Duration,
}

impl YouTubeFetcher {
    pub fn new(catalog: Arc<dyn YouTubeCatalog>, muxer: Muxer, mux_timeout: Duration) -> Self {
        Self {
            catalog,
            muxer,
            mux_timeout,
        }
    }

    async fn download_variant(
        &self,
        variant: &StreamVariant,
        store: &ContentStore,
        prefix: &str,
    ) -> VaultResult<tempfile::TempPath> {
        let started = std::time::Instant::now();
        let (mut file, temp) = store.create_temp(prefix).await?;
        let bytes = self.catalog.download(variant, &mut file).await?;
        tracing::info!(
            label = %variant.label,
            kind = variant.kind.label(),
            bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stream downloaded"
        );
        Ok(temp)
    }
}

fn container_extension(container: &str) -> FileExtension {
    FileExtension::new(container).unwrap_or_else(|_| FileExtension::generic())
}

#[async_trait]
impl SourceFetcher for YouTubeFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::YouTube
    }

    #[tracing::instrument(skip(self, policy, store))]
    async fn fetch(
        &self,
        source: &str,
        policy: &DownloadPolicy,
        store: &ContentStore,
    ) -> VaultResult<FetchedFile> {
        let video_id = parse_video_id(source)?;
        let manifest = self.catalog.manifest(&video_id).await?;
        let selection = select_streams(&manifest.variants, policy)?;
        let name = Some(manifest.title.trim().to_owned()).filter(|t| !t.is_empty());

        match selection {
            Selection::Single(variant) => {
                let temp = self.download_variant(&variant, store, "yt-").await?;
                Ok(FetchedFile {
                    temp,
                    name,
                    extension: container_extension(&variant.container),
                })
            }
            Selection::Mux { video, audio } => {
                let video_temp = self.download_variant(&video, store, "yt-video-").await?;
                let audio_temp = self.download_variant(&audio, store, "yt-audio-").await?;
                let (output_file, output) = store.create_temp("yt-mux-").await?;
                drop(output_file);

                self.muxer
                    .combine(
                        MuxInput::new(video_temp, video.container),
                        MuxInput::new(audio_temp, audio.container),
                        &output,
                        self.mux_timeout,
                    )
                    .await?;

                Ok(FetchedFile {
                    temp: output,
                    name,
                    extension: self.muxer.container().clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(kind: StreamKind, label: &str, bitrate: u64, height: Option<u32>) -> StreamVariant {
        StreamVariant {
            kind,
            label: label.to_owned(),
            bitrate,
            container: "mp4".to_owned(),
            height,
            url: format!("https://example.invalid/{label}"),
        }
    }

    fn policy(video: bool, audio: bool, vq: Option<&str>, aq: Option<&str>) -> DownloadPolicy {
        DownloadPolicy {
            video,
            audio,
            video_quality: vq.map(str::to_owned),
            audio_quality: aq.map(str::to_owned),
        }
    }

    #[test]
    fn test_video_ids_from_common_forms() {
        let id = "dQw4w9WgXcQ";
        for source in [
            "dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=10",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/live/dQw4w9WgXcQ",
        ] {
            assert_eq!(parse_video_id(source).unwrap(), id, "{source}");
        }
        assert!(matches!(
            parse_video_id("https://example.com/watch?v=short"),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_muxed_label_match_uses_bitrate_tie_break() {
        let variants = vec![
            variant(StreamKind::Muxed, "720p", 1_000, Some(720)),
            variant(StreamKind::Muxed, "720P", 2_000, Some(720)),
            variant(StreamKind::Muxed, "1080p", 3_000, Some(1080)),
        ];
        let chosen = select_streams(&variants, &policy(true, true, Some("720p"), None)).unwrap();
        assert_eq!(chosen, Selection::Single(variants[1].clone()));
    }

    #[test]
    fn test_muxed_falls_back_to_resolution_then_bitrate() {
        let variants = vec![
            variant(StreamKind::Muxed, "360p", 9_000, Some(360)),
            variant(StreamKind::Muxed, "720p", 1_000, Some(720)),
            variant(StreamKind::Muxed, "720p", 1_500, Some(720)),
        ];
        let chosen = select_streams(&variants, &policy(true, true, Some("4320p"), None)).unwrap();
        assert_eq!(chosen, Selection::Single(variants[2].clone()));
    }

    #[test]
    fn test_separate_tracks_are_muxed_when_no_muxed_variant() {
        let variants = vec![
            variant(StreamKind::VideoOnly, "1080p", 4_000_000, Some(1080)),
            variant(StreamKind::VideoOnly, "720p", 2_000_000, Some(720)),
            variant(StreamKind::AudioOnly, "128kbps", 128_000, None),
            variant(StreamKind::AudioOnly, "48kbps", 48_000, None),
        ];
        let chosen = select_streams(&variants, &policy(true, true, Some("1080p"), None)).unwrap();
        assert_eq!(
            chosen,
            Selection::Mux {
                video: variants[0].clone(),
                audio: variants[2].clone(),
            }
        );
    }

    #[test]
    fn test_any_muxed_variant_beats_separate_tracks() {
        let variants = vec![
            variant(StreamKind::Muxed, "360p", 500_000, Some(360)),
            variant(StreamKind::VideoOnly, "1080p", 4_000_000, Some(1080)),
            variant(StreamKind::AudioOnly, "128kbps", 128_000, None),
        ];
        let chosen = select_streams(&variants, &policy(true, true, Some("1080p"), None)).unwrap();
        assert_eq!(chosen, Selection::Single(variants[0].clone()));
    }

    #[test]
    fn test_muxing_needs_both_separate_classes() {
        let variants = vec![variant(StreamKind::VideoOnly, "1080p", 4_000_000, Some(1080))];
        let err = select_streams(&variants, &policy(true, true, None, None)).unwrap_err();
        assert!(matches!(err, VaultError::NoSuitableStream { ref kind, .. } if kind == "audio-only"));
    }

    #[test]
    fn test_audio_only_honours_kbps_label() {
        let variants = vec![
            variant(StreamKind::AudioOnly, "160kbps", 160_000, None),
            variant(StreamKind::AudioOnly, "128kbps", 128_000, None),
        ];
        let chosen =
            select_streams(&variants, &policy(false, true, None, Some("128KBPS"))).unwrap();
        assert_eq!(chosen, Selection::Single(variants[1].clone()));

        let chosen = select_streams(&variants, &policy(false, true, None, None)).unwrap();
        assert_eq!(chosen, Selection::Single(variants[0].clone()));
    }

    #[test]
    fn test_empty_class_lists_available_labels() {
        let variants = vec![variant(StreamKind::VideoOnly, "720p", 1, Some(720))];
        let err = select_streams(&variants, &policy(false, true, None, None)).unwrap_err();
        match err {
            VaultError::NoSuitableStream { kind, available } => {
                assert_eq!(kind, "audio-only");
                assert_eq!(available, vec!["720p".to_owned()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_nothing_requested_is_invalid() {
        let err = select_streams(&[], &policy(false, false, None, None)).unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));
    }

    #[test]
    fn test_yt_dlp_formats_are_classified() {
        let json = br#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "formats": [
                {"format_id": "sb0", "ext": "mhtml", "protocol": "mhtml", "vcodec": "none", "acodec": "none", "url": "https://x/sb"},
                {"format_id": "140", "ext": "m4a", "protocol": "https", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 129.5, "url": "https://x/140"},
                {"format_id": "137", "ext": "mp4", "protocol": "https", "vcodec": "avc1.640028", "acodec": "none", "height": 1080, "fps": 30, "tbr": 4400.2, "url": "https://x/137"},
                {"format_id": "299", "ext": "mp4", "protocol": "https", "vcodec": "avc1.64002a", "acodec": "none", "height": 1080, "fps": 60, "tbr": 6000, "url": "https://x/299"},
                {"format_id": "18", "ext": "mp4", "protocol": "https", "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "height": 360, "tbr": 600, "url": "https://x/18"},
                {"format_id": "hls", "ext": "mp4", "protocol": "m3u8_native", "vcodec": "avc1", "acodec": "mp4a", "height": 720, "url": "https://x/hls"}
            ]
        }"#;
        let manifest = parse_manifest(json).unwrap();
        assert_eq!(manifest.title, "Never Gonna Give You Up");

        let labels: Vec<(StreamKind, &str)> = manifest
            .variants
            .iter()
            .map(|v| (v.kind, v.label.as_str()))
            .collect();
        assert_eq!(
            labels,
            vec![
                (StreamKind::AudioOnly, "130kbps"),
                (StreamKind::VideoOnly, "1080p"),
                (StreamKind::VideoOnly, "1080p60"),
                (StreamKind::Muxed, "360p"),
            ]
        );
        assert_eq!(manifest.variants[1].bitrate, 4_400_200);
    }

    #[test]
    fn test_unreadable_manifest_is_fetch_failure() {
        assert!(matches!(
            parse_manifest(b"not json"),
            Err(VaultError::FetchFailed { status: None, .. })
        ));
    }
}
