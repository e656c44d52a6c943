//! Remote messaging service abstraction.
//!
//! [`MessagingBackend`] is the seam between the scraping pipeline and the wire. The
//! production implementation is [`http::HttpBackend`]; tests substitute an in-memory
//! fake. Backends are stateless with respect to authentication: the session token is
//! owned by [`crate::session::Session`] and passed into every call.

pub mod http;

use crate::error::Result;
use crate::types::{ChannelId, ChannelRef, MediaRef, Message, MessageId, ResolvedChannel};

pub use http::HttpBackend;

/// Application credentials plus the account they log into
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Application id issued by the service
    pub api_id: i32,
    /// Application hash issued by the service
    pub api_hash: String,
    /// Account phone number
    pub phone: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .field("phone", &"<redacted>")
            .finish()
    }
}

/// Opaque session token returned by sign-in
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(pub String);

impl AuthToken {
    /// Token text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Pending login, returned when the service sends a login code out of band
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginChallenge {
    /// Hash tying the code to this login attempt
    pub phone_code_hash: String,
}

/// One page of history
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Maximum messages in the page
    pub limit: usize,
    /// Only return messages strictly older than this id (None = newest)
    pub offset_id: Option<MessageId>,
}

/// Operations the pipeline needs from the remote service.
#[async_trait::async_trait]
pub trait MessagingBackend: Send + Sync {
    /// Ask the service to send a login code to the account.
    async fn request_login_code(&self, credentials: &Credentials) -> Result<LoginChallenge>;

    /// Complete login with the code the operator received.
    async fn sign_in(
        &self,
        credentials: &Credentials,
        challenge: &LoginChallenge,
        code: &str,
    ) -> Result<AuthToken>;

    /// Check that a stored token is still accepted.
    async fn check_session(&self, token: &AuthToken) -> Result<()>;

    /// Release server-side resources held for the token.
    async fn close_session(&self, token: &AuthToken) -> Result<()>;

    /// Map a channel reference to a channel.
    async fn resolve_channel(
        &self,
        token: &AuthToken,
        reference: &ChannelRef,
    ) -> Result<ResolvedChannel>;

    /// Fetch one page of history, newest first.
    async fn fetch_history(
        &self,
        token: &AuthToken,
        channel: ChannelId,
        request: HistoryRequest,
    ) -> Result<Vec<Message>>;

    /// Download an attachment's bytes.
    async fn download_media(&self, token: &AuthToken, media: &MediaRef) -> Result<Vec<u8>>;
}
