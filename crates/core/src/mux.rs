//! Combining separate video and audio streams with an external encoder.
//!
//! The encoder runs as a child process with `kill_on_drop`, so a caller that abandons the
//! future (cancellation, outer deadline) also takes the process down. Standard error is drained
//! on its own task while the exit is awaited under a hard timeout. After the exit the drain
//! gets a short grace period, since a grandchild can keep the pipe open indefinitely.

use crate::constants::MUX_STDERR_GRACE_MILLIS;
use crate::{VaultError, VaultResult};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use vault_types::FileExtension;

/// One elementary stream to feed the encoder. The temp file is deleted when this is dropped.
#[derive(Debug)]
pub struct MuxInput {
    pub path: TempPath,
    /// Container of the input, e.g. `mp4` or `webm`.
    pub format: String,
}

impl MuxInput {
    pub fn new(path: TempPath, format: impl Into<String>) -> Self {
        Self {
            path,
            format: format.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Muxer {
    program: PathBuf,
    container: FileExtension,
}

/// Encoder demuxer/muxer name for a container extension.
fn format_hint(container: &str) -> String {
    match container.to_ascii_lowercase().as_str() {
        "mkv" => "matroska".to_owned(),
        "m4a" | "m4v" => "mp4".to_owned(),
        other => other.to_owned(),
    }
}

impl Muxer {
    pub fn new(program: impl Into<PathBuf>, container: FileExtension) -> Self {
        Self {
            program: program.into(),
            container,
        }
    }

    /// Container the output is written in.
    pub fn container(&self) -> &FileExtension {
        &self.container
    }

    fn arguments(&self, video: &MuxInput, audio: &MuxInput, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push("-f".into());
        args.push(format_hint(&video.format).into());
        args.push("-i".into());
        args.push(video.path.as_os_str().to_owned());
        args.push("-f".into());
        args.push(format_hint(&audio.format).into());
        args.push("-i".into());
        args.push(audio.path.as_os_str().to_owned());
        for arg in ["-c:v", "copy", "-c:a", "aac", "-shortest", "-f"] {
            args.push(arg.into());
        }
        args.push(format_hint(self.container.as_str()).into());
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Muxes `video` and `audio` into `output`, copying video and re-encoding audio to AAC,
    /// stopping at the shorter input.
    ///
    /// Both inputs are consumed and their temp files deleted whatever the outcome. `output`
    /// is only meaningful when this returns `Ok`.
    ///
    /// # Errors
    ///
    /// - `VaultError::Timeout` if the encoder is still running after `timeout`; it is killed
    /// - `VaultError::MuxFailed` on a non-zero exit, carrying the full standard error
    /// - `VaultError::Io` if the encoder cannot be started
    #[tracing::instrument(skip_all, fields(program = %self.program.display()))]
    pub async fn combine(
        &self,
        video: MuxInput,
        audio: MuxInput,
        output: &Path,
        timeout: Duration,
    ) -> VaultResult<()> {
        let args = self.arguments(&video, &audio, output);
        let started = Instant::now();

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("failed to start encoder {}: {}", self.program.display(), e),
                )
            })?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("encoder stderr was not captured"))?;
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let mut drain = tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match stderr.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend_from_slice(&chunk[..n]),
                }
            }
        });

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("failed to kill encoder after timeout: {}", e);
                }
                drain.abort();
                tracing::error!(
                    args = ?args,
                    "encoder timed out after {:?}",
                    timeout
                );
                return Err(VaultError::Timeout {
                    operation: "mux",
                    after: timeout,
                });
            }
        };

        let grace = Duration::from_millis(MUX_STDERR_GRACE_MILLIS);
        if tokio::time::timeout(grace, &mut drain).await.is_err() {
            drain.abort();
            tracing::warn!(
                "encoder stderr still open {:?} after exit, keeping what was read",
                grace
            );
        }
        let stderr = {
            let buf = captured.lock().unwrap_or_else(|e| e.into_inner());
            String::from_utf8_lossy(&buf).into_owned()
        };
        if !status.success() {
            tracing::error!(
                args = ?args,
                code = ?status.code(),
                "encoder failed: {}",
                stderr.trim()
            );
            return Err(VaultError::MuxFailed {
                exit_code: status.code(),
                stderr,
            });
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "mux complete"
        );
        drop((video, audio));
        Ok(())
    }
}
