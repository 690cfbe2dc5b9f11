use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.dirview.example";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    NotFound,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct StoreClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl StoreClient {
    pub fn new(token: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, StoreError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: token.into(),
        }
    }

    /// Lists one page of a folder. `search` narrows the page to entries whose
    /// name matches the given file name.
    pub async fn list_folder_page(
        &self,
        folder: &str,
        private: bool,
        offset: u32,
        limit: u32,
        search: Option<&str>,
    ) -> Result<ListingPage, StoreError> {
        let mut url = self.endpoint("/v1/folders/items")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("path", folder)
                .append_pair("private", flag(private))
                .append_pair("offset", &offset.to_string())
                .append_pair("limit", &limit.to_string());
            if let Some(search) = search.filter(|s| !s.is_empty()) {
                query.append_pair("search", search);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn remove_item(&self, ident: &str) -> Result<(), StoreError> {
        let url = self.endpoint("/v1/items/remove")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .form(&[("ident", ident)])
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    pub async fn rename_item(&self, ident: &str, name: &str) -> Result<(), StoreError> {
        let url = self.endpoint("/v1/items/rename")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .form(&[("ident", ident), ("name", name)])
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    pub async fn move_item(
        &self,
        src: &str,
        src_private: bool,
        dest: &str,
        dest_private: bool,
    ) -> Result<(), StoreError> {
        let url = self.endpoint("/v1/items/move")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .form(&[
                ("src", src),
                ("src_private", flag(src_private)),
                ("dest", dest),
                ("dest_private", flag(dest_private)),
            ])
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Api { status, body })
        }
    }

    async fn handle_empty(response: reqwest::Response) -> Result<(), StoreError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Api { status, body })
        }
    }
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

impl StoreError {
    pub fn classification(&self) -> ApiErrorClass {
        match self {
            StoreError::Api { status, .. } => classify_api_status(*status),
            StoreError::Request(err) if err.is_decode() => ApiErrorClass::Permanent,
            StoreError::Request(_) => ApiErrorClass::Transient,
            StoreError::Url(_) => ApiErrorClass::Permanent,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE) {
        ApiErrorClass::NotFound
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT
                | StatusCode::CONFLICT
                | StatusCode::TOO_EARLY
                | StatusCode::TOO_MANY_REQUESTS
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ListingEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub ident: String,
    pub path: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    /// Server processing state, `"ready"` once the item is fully stored.
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ListingPage {
    pub items: Vec<ListingEntry>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            classify_api_status(StatusCode::UNAUTHORIZED),
            ApiErrorClass::Auth
        );
        assert_eq!(
            classify_api_status(StatusCode::NOT_FOUND),
            ApiErrorClass::NotFound
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_GATEWAY),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_REQUEST),
            ApiErrorClass::Permanent
        );
    }

    #[test]
    fn entry_defaults_optional_fields() {
        let entry: ListingEntry = serde_json::from_str(
            r#"{"type":"folder","ident":"f1","path":"/Docs/"}"#,
        )
        .unwrap();
        assert_eq!(entry.kind, EntryKind::Folder);
        assert!(entry.size.is_none());
        assert!(entry.state.is_none());
    }
}
