//! Defaults and fixed names used across the vault core.

/// Encoder invoked to mux separate audio and video streams.
pub const DEFAULT_ENCODER_PROGRAM: &str = "ffmpeg";

/// Hard limit on a single mux run, independent of the caller's deadline.
pub const DEFAULT_MUX_TIMEOUT_SECS: u64 = 15;

/// How long encoder standard error is still read after the encoder exits.
pub const MUX_STDERR_GRACE_MILLIS: u64 = 2_000;

/// Container produced by muxing.
pub const DEFAULT_MUX_CONTAINER: &str = "mp4";

/// Deadline applied to a fetch when the caller supplies none.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 600;

/// Program used to enumerate YouTube stream variants.
pub const DEFAULT_YT_DLP_PROGRAM: &str = "yt-dlp";

pub const DEFAULT_USER_AGENT: &str = concat!("vault/", env!("CARGO_PKG_VERSION"));

pub const GOOGLE_DRIVE_BASE_URL: &str = "https://drive.google.com";
pub const ONEDRIVE_BASE_URL: &str = "https://api.onedrive.com";

/// Display names used when a source offers nothing better.
pub const YOUTUBE_DEFAULT_NAME: &str = "YouTube Video";
pub const GOOGLE_DRIVE_DEFAULT_NAME: &str = "Google Drive File";
pub const ONEDRIVE_DEFAULT_NAME: &str = "OneDrive File";

/// Upstream error bodies are cut to this many characters.
pub const BODY_SNIPPET_CHARS: usize = 200;

/// `tracing` target for per-access audit events.
pub const ACCESS_LOG_TARGET: &str = "vault::access";
