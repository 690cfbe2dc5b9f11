use dirview_core::{SessionClient, SessionError, SessionToken};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenProviderError {
    #[error("session client is required to refresh an expired token")]
    MissingSessionClient,
    #[error("refresh token is missing")]
    MissingRefreshToken,
    #[error("session refresh failed: {0}")]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds; `None` when the server gave no lifetime.
    pub expires_at: Option<i64>,
}

impl SessionState {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: None,
        }
    }

    fn from_session_token(token: SessionToken) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|secs| now_unix().saturating_add(i64::try_from(secs).unwrap_or(i64::MAX))),
        }
    }
}

pub struct TokenProvider {
    state: SessionState,
    session_client: Option<SessionClient>,
    refresh_skew_secs: i64,
}

impl TokenProvider {
    pub fn new(state: SessionState, session_client: Option<SessionClient>) -> Self {
        Self {
            state,
            session_client,
            refresh_skew_secs: 60,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.session_client.is_some() && self.state.refresh_token.is_some()
    }

    pub async fn valid_access_token(&mut self) -> Result<String, TokenProviderError> {
        if self.should_refresh() {
            self.refresh().await?;
        }
        Ok(self.state.access_token.clone())
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub async fn refresh_now(&mut self) -> Result<String, TokenProviderError> {
        self.refresh().await?;
        Ok(self.state.access_token.clone())
    }

    fn should_refresh(&self) -> bool {
        let Some(expires_at) = self.state.expires_at else {
            return false;
        };
        expires_at <= now_unix().saturating_add(self.refresh_skew_secs)
    }

    async fn refresh(&mut self) -> Result<(), TokenProviderError> {
        let refresh_token = self
            .state
            .refresh_token
            .clone()
            .ok_or(TokenProviderError::MissingRefreshToken)?;
        let client = self
            .session_client
            .as_ref()
            .ok_or(TokenProviderError::MissingSessionClient)?;
        let token = client.refresh(&refresh_token).await?;
        let mut refreshed = SessionState::from_session_token(token);
        // Servers that do not rotate refresh tokens omit them on refresh.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }
        tracing::debug!(expires_at = ?refreshed.expires_at, "session token refreshed");
        self.state = refreshed;
        Ok(())
    }
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn expired(refresh_token: Option<&str>) -> SessionState {
        SessionState {
            access_token: "old-token".into(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: Some(0),
        }
    }

    #[tokio::test]
    async fn returns_current_token_when_not_expired() {
        let mut provider = TokenProvider::new(
            SessionState {
                access_token: "token-1".into(),
                refresh_token: Some("refresh-1".into()),
                expires_at: Some(i64::MAX),
            },
            None,
        );

        let token = provider
            .valid_access_token()
            .await
            .expect("token should be valid");
        assert_eq!(token, "token-1");
    }

    #[tokio::test]
    async fn token_without_lifetime_is_never_refreshed_proactively() {
        let mut provider = TokenProvider::new(SessionState::new("static", None), None);
        assert_eq!(provider.valid_access_token().await.unwrap(), "static");
        assert!(!provider.can_refresh());
    }

    #[tokio::test]
    async fn refreshes_token_when_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-token",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        let session_client = SessionClient::with_base_url(&server.uri(), "client-id")
            .expect("session client should be built");
        let mut provider = TokenProvider::new(expired(Some("refresh-1")), Some(session_client));

        let token = provider
            .valid_access_token()
            .await
            .expect("token should refresh");
        assert_eq!(token, "new-token");
        // Kept because the response did not rotate it.
        assert_eq!(provider.state().refresh_token.as_deref(), Some("refresh-1"));
        assert!(provider.state().expires_at.unwrap() > now_unix());
    }

    #[tokio::test]
    async fn refresh_now_surfaces_server_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;
        let session_client = SessionClient::with_base_url(&server.uri(), "client-id").unwrap();
        let mut provider = TokenProvider::new(
            SessionState::new("token", Some("refresh-1".into())),
            Some(session_client),
        );

        let err = provider.refresh_now().await.expect_err("refresh should fail");
        assert!(matches!(err, TokenProviderError::Session(SessionError::Api { .. })));
        assert_eq!(provider.state().access_token, "token");
    }

    #[tokio::test]
    async fn returns_error_when_expired_and_no_refresh_token() {
        let mut provider = TokenProvider::new(expired(None), None);

        let err = provider
            .valid_access_token()
            .await
            .expect_err("expected missing refresh token error");
        assert!(matches!(err, TokenProviderError::MissingRefreshToken));
    }

    #[tokio::test]
    async fn returns_error_when_expired_without_session_client() {
        let mut provider = TokenProvider::new(expired(Some("refresh-1")), None);

        let err = provider
            .valid_access_token()
            .await
            .expect_err("expected missing client error");
        assert!(matches!(err, TokenProviderError::MissingSessionClient));
    }
}
