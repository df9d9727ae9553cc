//! OneDrive share links, resolved through the shares API.

use super::http::{
    content_type, disposition_file_name, download_to_temp, ensure_success,
    extension_for_content_type, is_html, snippet, split_file_name,
};
use super::{FetchedFile, SourceFetcher};
use crate::models::{DownloadPolicy, SourceKind};
use crate::{VaultError, VaultResult};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use vault_files::ContentStore;
use vault_types::FileExtension;

/// Share id for a sharing URL: `u!` followed by the unpadded base64url of the URL.
pub fn share_token(share_url: &str) -> String {
    format!("u!{}", URL_SAFE_NO_PAD.encode(share_url.trim().as_bytes()))
}

pub struct OneDriveFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl OneDriveFetcher {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SourceFetcher for OneDriveFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::OneDrive
    }

    #[tracing::instrument(skip(self, _policy, store))]
    async fn fetch(
        &self,
        source: &str,
        _policy: &DownloadPolicy,
        store: &ContentStore,
    ) -> VaultResult<FetchedFile> {
        if source.trim().is_empty() {
            return Err(VaultError::InvalidInput("OneDrive share url is required".into()));
        }
        let url = format!(
            "{}/v1.0/shares/{}/root/content",
            self.base_url,
            share_token(source)
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(VaultError::transport)?;
        let response = ensure_success(response).await?;

        if is_html(&response) {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                "OneDrive returned a page instead of file content: {}",
                snippet(&body)
            );
            return Err(VaultError::FetchFailed {
                status: Some(status),
                body: snippet(&body),
            });
        }

        let (name, advertised) = match disposition_file_name(&response) {
            Some(file_name) => {
                let (stem, ext) = split_file_name(&file_name);
                (Some(stem), ext)
            }
            None => (None, None),
        };
        let extension = advertised
            .or_else(|| content_type(&response).map(|ct| extension_for_content_type(&ct)))
            .unwrap_or_else(FileExtension::generic);

        let temp = download_to_temp(response, store, "onedrive-").await?;
        Ok(FetchedFile {
            temp,
            name,
            extension,
        })
    }
}
