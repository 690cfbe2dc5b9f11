use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://auth.dirview.example";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Clone)]
pub struct SessionClient {
    http: Client,
    base_url: Url,
    client_id: String,
}

impl SessionClient {
    pub fn new(client_id: impl Into<String>) -> Result<Self, SessionError> {
        Self::with_base_url(DEFAULT_BASE_URL, client_id)
    }

    pub fn with_base_url(
        base_url: &str,
        client_id: impl Into<String>,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            client_id: client_id.into(),
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<SessionToken, SessionError> {
        let url = self.base_url.join("/token")?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];

        let response = self.http.post(url).form(&form).send().await?;
        if response.status().is_success() {
            Ok(response.json::<SessionToken>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SessionError::Api { status, body })
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SessionToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}
