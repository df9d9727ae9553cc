//! Google Drive share links.

use super::http::{
    content_type, disposition_file_name, download_to_temp, ensure_success,
    extension_for_content_type, is_html, snippet, split_file_name,
};
use super::{FetchedFile, SourceFetcher};
use crate::models::{DownloadPolicy, SourceKind};
use crate::{VaultError, VaultResult};
use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use reqwest::Response;
use reqwest::header::SET_COOKIE;
use std::sync::LazyLock;
use vault_files::ContentStore;
use vault_types::FileExtension;

/// Everything but RFC 3986 unreserved characters.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

static RAW_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-]{10,100}$").expect("valid drive id regex"));

/// `/file/d/{id}/view`, `/open?id={id}`, `/uc?id={id}&export=download`.
static URL_ID: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"/d/([A-Za-z0-9_\-]+)").expect("valid drive path regex"),
        Regex::new(r"[?&]id=([A-Za-z0-9_\-]+)").expect("valid drive query regex"),
    ]
});

static CONFIRM_COOKIE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"download_warning_[^=]+=([^;]+)").expect("valid cookie regex"));

static CONFIRM_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"confirm=([0-9A-Za-z_\-]+)").expect("valid confirm regex"));

/// Extracts a Drive file id from a raw id or a share URL.
///
/// # Errors
///
/// `VaultError::InvalidInput` if nothing id-shaped is present.
pub fn extract_drive_id(source: &str) -> VaultResult<String> {
    let source = source.trim();
    if RAW_ID.is_match(source) {
        return Ok(source.to_owned());
    }
    URL_ID
        .iter()
        .find_map(|re| re.captures(source).and_then(|c| c.get(1)))
        .map(|m| m.as_str().to_owned())
        .ok_or_else(|| {
            VaultError::InvalidInput(format!("could not find a Google Drive file id in {source}"))
        })
}

fn confirm_from_cookies(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| CONFIRM_COOKIE.captures(cookie))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

pub struct GoogleDriveFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl GoogleDriveFetcher {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn get(&self, url: &str) -> VaultResult<Response> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(VaultError::transport)?;
        ensure_success(response).await
    }

    /// Follows the virus-scan interstitial Drive serves for large files.
    async fn confirm(&self, id: &str, url: &str, interstitial: Response) -> VaultResult<Response> {
        let cookie_token = confirm_from_cookies(&interstitial);
        let body = interstitial.text().await.map_err(VaultError::transport)?;
        // Native documents have no binary download, whatever tokens the page carries.
        if body.contains("docs.google.com") {
            return Err(VaultError::UnsupportedDocumentType(format!(
                "Google Drive file {id} is a native Docs, Sheets or Slides document"
            )));
        }
        let token = cookie_token
            .or_else(|| {
                CONFIRM_BODY
                    .captures(&body)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_owned())
            })
            .unwrap_or_else(|| "t".to_owned());
        tracing::debug!(file_id = id, "following download confirmation");

        let confirmed = self
            .get(&format!(
                "{url}&confirm={}",
                utf8_percent_encode(&token, QUERY_VALUE)
            ))
            .await?;
        if is_html(&confirmed) {
            let status = confirmed.status().as_u16();
            let body = confirmed.text().await.unwrap_or_default();
            tracing::warn!(
                file_id = id,
                "Google Drive returned a page instead of file content: {}",
                snippet(&body)
            );
            return Err(VaultError::FetchFailed {
                status: Some(status),
                body: snippet(&body),
            });
        }
        Ok(confirmed)
    }
}

#[async_trait]
impl SourceFetcher for GoogleDriveFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::GoogleDrive
    }

    #[tracing::instrument(skip(self, _policy, store))]
    async fn fetch(
        &self,
        source: &str,
        _policy: &DownloadPolicy,
        store: &ContentStore,
    ) -> VaultResult<FetchedFile> {
        let id = extract_drive_id(source)?;
        let url = format!("{}/uc?export=download&id={}", self.base_url, id);

        let response = self.get(&url).await?;
        let response = if is_html(&response) {
            self.confirm(&id, &url, response).await?
        } else {
            response
        };

        let extension = disposition_file_name(&response)
            .and_then(|name| split_file_name(&name).1)
            .or_else(|| content_type(&response).map(|ct| extension_for_content_type(&ct)))
            .unwrap_or_else(FileExtension::generic);

        let temp = download_to_temp(response, store, "gdrive-").await?;
        Ok(FetchedFile {
            temp,
            name: None,
            extension,
        })
    }
}
