//! Core runtime configuration.
//!
//! Everything here is resolved once at process startup and passed into services. Core code
//! never reads environment variables while handling a request.

use crate::constants::{
    DEFAULT_ENCODER_PROGRAM, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_MUX_CONTAINER,
    DEFAULT_MUX_TIMEOUT_SECS, DEFAULT_USER_AGENT, DEFAULT_YT_DLP_PROGRAM, GOOGLE_DRIVE_BASE_URL,
    ONEDRIVE_BASE_URL,
};
use crate::{VaultError, VaultResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vault_types::FileExtension;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    storage_root: PathBuf,
    encoder_program: PathBuf,
    yt_dlp_program: PathBuf,
    mux_timeout: Duration,
    mux_container: FileExtension,
    fetch_timeout: Duration,
    user_agent: String,
    google_drive_base_url: String,
    onedrive_base_url: String,
}

impl CoreConfig {
    /// Creates a configuration with defaults for everything but the storage root.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::InvalidInput` if `storage_root` is not an existing directory.
    pub fn new(storage_root: PathBuf) -> VaultResult<Self> {
        if !storage_root.is_dir() {
            return Err(VaultError::InvalidInput(format!(
                "storage root is not a directory: {}",
                storage_root.display()
            )));
        }

        Ok(Self {
            storage_root,
            encoder_program: PathBuf::from(DEFAULT_ENCODER_PROGRAM),
            yt_dlp_program: PathBuf::from(DEFAULT_YT_DLP_PROGRAM),
            mux_timeout: Duration::from_secs(DEFAULT_MUX_TIMEOUT_SECS),
            mux_container: FileExtension::new(DEFAULT_MUX_CONTAINER)?,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            google_drive_base_url: GOOGLE_DRIVE_BASE_URL.to_owned(),
            onedrive_base_url: ONEDRIVE_BASE_URL.to_owned(),
        })
    }

    pub fn with_encoder_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.encoder_program = program.into();
        self
    }

    pub fn with_yt_dlp_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.yt_dlp_program = program.into();
        self
    }

    /// # Errors
    ///
    /// Returns `VaultError::InvalidInput` for a zero timeout.
    pub fn with_mux_timeout(mut self, timeout: Duration) -> VaultResult<Self> {
        if timeout.is_zero() {
            return Err(VaultError::InvalidInput(
                "mux timeout must be greater than zero".into(),
            ));
        }
        self.mux_timeout = timeout;
        Ok(self)
    }

    pub fn with_mux_container(mut self, container: FileExtension) -> Self {
        self.mux_container = container;
        self
    }

    /// # Errors
    ///
    /// Returns `VaultError::InvalidInput` for a zero timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> VaultResult<Self> {
        if timeout.is_zero() {
            return Err(VaultError::InvalidInput(
                "fetch timeout must be greater than zero".into(),
            ));
        }
        self.fetch_timeout = timeout;
        Ok(self)
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Points the Google Drive fetcher somewhere other than the public service.
    pub fn with_google_drive_base_url(mut self, url: impl Into<String>) -> Self {
        self.google_drive_base_url = trim_base(url.into());
        self
    }

    /// Points the OneDrive fetcher somewhere other than the public service.
    pub fn with_onedrive_base_url(mut self, url: impl Into<String>) -> Self {
        self.onedrive_base_url = trim_base(url.into());
        self
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn encoder_program(&self) -> &Path {
        &self.encoder_program
    }

    pub fn yt_dlp_program(&self) -> &Path {
        &self.yt_dlp_program
    }

    pub fn mux_timeout(&self) -> Duration {
        self.mux_timeout
    }

    pub fn mux_container(&self) -> &FileExtension {
        &self.mux_container
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn google_drive_base_url(&self) -> &str {
        &self.google_drive_base_url
    }

    pub fn onedrive_base_url(&self) -> &str {
        &self.onedrive_base_url
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_owned()
}

/// Parse an optional whole-seconds value read from the environment.
///
/// Blank or missing values give `default`; anything else must be a positive integer.
pub fn duration_secs_from_env_value(
    value: Option<String>,
    default: Duration,
) -> VaultResult<Duration> {
    let Some(raw) = value else {
        return Ok(default);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(default);
    }
    match trimmed.parse::<u64>() {
        Ok(0) | Err(_) => Err(VaultError::InvalidInput(format!(
            "expected a positive number of seconds, got '{}'",
            trimmed
        ))),
        Ok(secs) => Ok(Duration::from_secs(secs)),
    }
}

/// Parse an optional program path read from the environment, falling back to `default`.
pub fn program_from_env_value(value: Option<String>, default: &str) -> PathBuf {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}
