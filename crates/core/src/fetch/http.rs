//! HTTP plumbing shared by the fetchers.

use crate::constants::BODY_SNIPPET_CHARS;
use crate::{CoreConfig, VaultError, VaultResult};
use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Response;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use vault_files::ContentStore;
use vault_types::FileExtension;

/// Client shared by all fetchers. Deadlines are enforced by the caller, not per request.
pub fn build_client(config: &CoreConfig) -> VaultResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent())
        .build()
        .map_err(VaultError::transport)
}

/// Passes successful responses through; anything else becomes `FetchFailed` with a body
/// snippet.
pub(crate) async fn ensure_success(response: Response) -> VaultResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(VaultError::FetchFailed {
        status: Some(status.as_u16()),
        body: snippet(&body),
    })
}

/// Media type without parameters, lowercased.
pub(crate) fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .filter(|v| !v.is_empty())
}

pub(crate) fn is_html(response: &Response) -> bool {
    content_type(response).is_some_and(|ct| ct == "text/html" || ct == "application/xhtml+xml")
}

pub(crate) fn disposition_file_name(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_content_disposition)
}

/// First `BODY_SNIPPET_CHARS` characters of an upstream body.
pub(crate) fn snippet(body: &str) -> String {
    body.trim().chars().take(BODY_SNIPPET_CHARS).collect()
}

/// Streams a response body into `file`, returning the byte count.
pub(crate) async fn write_body(response: Response, file: &mut tokio::fs::File) -> VaultResult<u64> {
    let mut written = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(VaultError::transport)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Streams a response body into a new temp file in the store's temp area.
///
/// The temp file is removed if the transfer fails.
pub(crate) async fn download_to_temp(
    response: Response,
    store: &ContentStore,
    prefix: &str,
) -> VaultResult<TempPath> {
    let (mut file, path) = store.create_temp(prefix).await?;
    let written = write_body(response, &mut file).await?;
    tracing::debug!(bytes = written, temp = %path.display(), "download complete");
    Ok(path)
}

/// Maps a media type to a file extension, defaulting to `bin`.
pub fn extension_for_content_type(content_type: &str) -> FileExtension {
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let known = match ct.as_str() {
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/ogg" => Some("ogg"),
        "audio/mp4" => Some("m4a"),
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "application/pdf" => Some("pdf"),
        "application/zip" => Some("zip"),
        "text/plain" => Some("txt"),
        "application/octet-stream" | "binary/octet-stream" => Some(FileExtension::GENERIC),
        _ => None,
    };

    let guessed = known
        .map(str::to_owned)
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&ct)
                .and_then(|exts| exts.first())
                .map(|e| (*e).to_owned())
        })
        .or_else(|| {
            let by_fragment = [
                ("mp4", "mp4"),
                ("webm", "webm"),
                ("mpeg", "mp3"),
                ("ogg", "ogg"),
                ("png", "png"),
                ("jpeg", "jpg"),
                ("pdf", "pdf"),
                ("zip", "zip"),
                ("text", "txt"),
            ];
            by_fragment
                .iter()
                .find(|(needle, _)| ct.contains(needle))
                .map(|(_, ext)| (*ext).to_owned())
        });

    guessed
        .and_then(|e| FileExtension::new(e).ok())
        .unwrap_or_else(FileExtension::generic)
}

/// Extracts the file name from a `Content-Disposition` value.
///
/// `filename*` (RFC 5987) takes precedence over `filename`. Any directory part is dropped.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in value.split(';').map(str::trim) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = raw.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.split_once("''").map_or(raw, |(_, rest)| rest);
                let decoded = percent_encoding::percent_decode_str(encoded.trim_matches('"'))
                    .decode_utf8_lossy()
                    .into_owned();
                extended = Some(decoded);
            }
            "filename" => plain = Some(raw.trim_matches('"').to_owned()),
            _ => {}
        }
    }

    extended
        .or(plain)
        .map(|name| {
            name.rsplit(|c| c == '/' || c == '\\')
                .next()
                .unwrap_or_default()
                .trim()
                .to_owned()
        })
        .filter(|name| !name.is_empty())
}

/// Splits `report.final.pdf` into (`report.final`, `pdf`). The extension is `None` when
/// absent or unusable.
pub(crate) fn split_file_name(name: &str) -> (String, Option<FileExtension>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.trim().is_empty() => match FileExtension::new(ext) {
            Ok(ext) => (stem.trim().to_owned(), Some(ext)),
            Err(_) => (name.trim().to_owned(), None),
        },
        _ => (name.trim().to_owned(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_table() {
        assert_eq!(extension_for_content_type("video/mp4").as_str(), "mp4");
        assert_eq!(
            extension_for_content_type("image/jpeg; charset=binary").as_str(),
            "jpg"
        );
        assert_eq!(
            extension_for_content_type("application/octet-stream").as_str(),
            "bin"
        );
        assert_eq!(extension_for_content_type("").as_str(), "bin");
        assert_eq!(
            extension_for_content_type("application/x-totally-unknown").as_str(),
            "bin"
        );
    }

    #[test]
    fn test_content_type_falls_back_to_fragments() {
        assert_eq!(
            extension_for_content_type("video/x-custom-webm").as_str(),
            "webm"
        );
        assert_eq!(extension_for_content_type("text/x-weird").as_str(), "txt");
    }

    #[test]
    fn test_disposition_prefers_extended_name() {
        let value = "attachment; filename=\"fallback.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf";
        assert_eq!(
            filename_from_content_disposition(value).as_deref(),
            Some("résumé.pdf")
        );
    }

    #[test]
    fn test_disposition_plain_and_unsafe_names() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"clip.mp4\"").as_deref(),
            Some("clip.mp4")
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
    }

    #[test]
    fn test_split_names() {
        let (stem, ext) = split_file_name("report.final.PDF");
        assert_eq!(stem, "report.final");
        assert_eq!(ext.unwrap().as_str(), "pdf");

        let (stem, ext) = split_file_name(".hidden");
        assert_eq!(stem, ".hidden");
        assert!(ext.is_none());

        let (stem, ext) = split_file_name("README");
        assert_eq!(stem, "README");
        assert!(ext.is_none());
    }

    #[test]
    fn test_snippet_is_bounded() {
        let long = "x".repeat(1000);
        assert_eq!(snippet(&long).chars().count(), BODY_SNIPPET_CHARS);
    }
}
