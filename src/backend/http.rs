//! HTTP gateway backend.
//!
//! Speaks JSON to a messaging gateway. Authenticated calls carry
//! `Authorization: Bearer <token>`. Status codes are mapped onto the crate's error
//! taxonomy so the session's retry and flood-wait handling can act on them:
//!
//! | Status | Error |
//! | --- | --- |
//! | 401, 403 | [`Error::Auth`] |
//! | 404 | call-specific (`ChannelNotFound` on resolve) |
//! | 429 | [`Error::RateLimited`] from `Retry-After` |
//! | 5xx, timeouts, refused connections | [`Error::Network`] |
//! | other | [`Error::Service`] |

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{AuthToken, Credentials, HistoryRequest, LoginChallenge, MessagingBackend};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::types::{
    ChannelId, ChannelRef, MediaRef, Message, MessageId, ResolvedChannel,
};

/// Wait assumed when a 429 carries no usable `Retry-After`
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// [`MessagingBackend`] over HTTP
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Serialize)]
struct SendCodeRequest<'a> {
    api_id: i32,
    api_hash: &'a str,
    phone: &'a str,
}

#[derive(Deserialize)]
struct SendCodeResponse {
    phone_code_hash: String,
}

#[derive(Serialize)]
struct SignInRequest<'a> {
    api_id: i32,
    api_hash: &'a str,
    phone: &'a str,
    phone_code_hash: &'a str,
    code: &'a str,
}

#[derive(Deserialize)]
struct SignInResponse {
    session_token: String,
}

#[derive(Deserialize)]
struct ChannelBody {
    id: i64,
    title: String,
}

#[derive(Deserialize)]
struct HistoryBody {
    messages: Vec<MessageBody>,
}

#[derive(Deserialize)]
struct MessageBody {
    id: i64,
    #[serde(default)]
    text: Option<String>,
    date: DateTime<Utc>,
    #[serde(default)]
    media: Option<MediaRef>,
}

impl From<MessageBody> for Message {
    fn from(body: MessageBody) -> Self {
        Message {
            id: MessageId(body.id),
            text: body.text.unwrap_or_default(),
            date: body.date,
            media: body.media,
        }
    }
}

impl HttpBackend {
    /// Create a backend rooted at `base_url`.
    ///
    /// # Errors
    /// Returns a configuration error if the URL is invalid or the HTTP client cannot be
    /// built.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url).map_err(|e| Error::Config {
            message: format!("invalid service URL {}: {}", base_url, e),
            key: Some("service.base_url".to_string()),
        })?;
        // Url::join replaces the last segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("channel-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    /// Create a backend from the service section of the configuration.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Self::new(&config.base_url, config.request_timeout)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Other(format!("invalid endpoint {}: {}", path, e)))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        on_not_found: impl FnOnce(String) -> Error,
    ) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, retry_after, body, on_not_found))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        on_not_found: impl FnOnce(String) -> Error,
    ) -> Result<T> {
        let response = self.send(request, on_not_found).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Protocol(format!("undecodable response body: {}", e)))
    }
}

/// Transport failures become the retryable [`Error::Network`]
fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
        Error::Network(e.to_string())
    } else {
        Error::Http(e)
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

fn status_error(
    status: StatusCode,
    retry_after: Duration,
    body: String,
    on_not_found: impl FnOnce(String) -> Error,
) -> Error {
    let message = if body.trim().is_empty() {
        status.to_string()
    } else {
        body
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(message),
        StatusCode::NOT_FOUND => on_not_found(message),
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited { retry_after },
        s if s.is_server_error() => Error::Network(format!("{}: {}", s, message)),
        s => Error::Service {
            status: s.as_u16(),
            message,
        },
    }
}

fn service_not_found(message: String) -> Error {
    Error::Service {
        status: 404,
        message,
    }
}

#[async_trait::async_trait]
impl MessagingBackend for HttpBackend {
    async fn request_login_code(&self, credentials: &Credentials) -> Result<LoginChallenge> {
        let body = SendCodeRequest {
            api_id: credentials.api_id,
            api_hash: &credentials.api_hash,
            phone: &credentials.phone,
        };
        let request = self.client.post(self.endpoint("auth/send_code")?).json(&body);
        let response: SendCodeResponse = self.send_json(request, service_not_found).await?;
        Ok(LoginChallenge {
            phone_code_hash: response.phone_code_hash,
        })
    }

    async fn sign_in(
        &self,
        credentials: &Credentials,
        challenge: &LoginChallenge,
        code: &str,
    ) -> Result<AuthToken> {
        let body = SignInRequest {
            api_id: credentials.api_id,
            api_hash: &credentials.api_hash,
            phone: &credentials.phone,
            phone_code_hash: &challenge.phone_code_hash,
            code,
        };
        let request = self.client.post(self.endpoint("auth/sign_in")?).json(&body);
        let response: SignInResponse = self.send_json(request, service_not_found).await?;
        Ok(AuthToken(response.session_token))
    }

    async fn check_session(&self, token: &AuthToken) -> Result<()> {
        let request = self
            .client
            .get(self.endpoint("auth/check")?)
            .bearer_auth(token.as_str());
        self.send(request, Error::Auth).await?;
        Ok(())
    }

    async fn close_session(&self, token: &AuthToken) -> Result<()> {
        let request = self
            .client
            .post(self.endpoint("auth/disconnect")?)
            .bearer_auth(token.as_str());
        self.send(request, service_not_found).await?;
        Ok(())
    }

    async fn resolve_channel(
        &self,
        token: &AuthToken,
        reference: &ChannelRef,
    ) -> Result<ResolvedChannel> {
        let request = self
            .client
            .get(self.endpoint("channels/resolve")?)
            .query(&[("reference", reference.handle())])
            .bearer_auth(token.as_str());
        let original = reference.original().to_string();
        let body: ChannelBody = self
            .send_json(request, move |_| Error::ChannelNotFound {
                reference: original,
            })
            .await?;
        Ok(ResolvedChannel {
            id: ChannelId(body.id),
            title: body.title,
            reference: reference.clone(),
        })
    }

    async fn fetch_history(
        &self,
        token: &AuthToken,
        channel: ChannelId,
        request: HistoryRequest,
    ) -> Result<Vec<Message>> {
        let mut query = vec![("limit", request.limit.to_string())];
        if let Some(offset) = request.offset_id {
            query.push(("offset_id", offset.to_string()));
        }
        let http_request = self
            .client
            .get(self.endpoint(&format!("channels/{}/messages", channel))?)
            .query(&query)
            .bearer_auth(token.as_str());
        let body: HistoryBody = self.send_json(http_request, service_not_found).await?;
        Ok(body.messages.into_iter().map(Message::from).collect())
    }

    async fn download_media(&self, token: &AuthToken, media: &MediaRef) -> Result<Vec<u8>> {
        let path = format!("media/{}", urlencoding::encode(&media.id));
        let request = self
            .client
            .get(self.endpoint(&path)?)
            .bearer_auth(token.as_str());
        let response = self.send(request, service_not_found).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}
