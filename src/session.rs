//! Authenticated session lifecycle.
//!
//! [`SessionManager`] owns the single network session of a run. `connect` reuses a
//! persisted token when the service still accepts it and otherwise performs the
//! interactive login (request code, read code, sign in). The resulting [`Session`] is a
//! cheap handle shared by every channel worker; all remote calls go through
//! [`Session::call`], which applies the request rate limit, retries transient failures
//! and sleeps through short flood waits.

use crate::backend::{AuthToken, Credentials, MessagingBackend};
use crate::config::{Config, RateLimitConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::retry::{IsRetryable, with_retry};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Flood waits slept through per call before the rate limit is surfaced
const MAX_FLOOD_WAITS: u32 = 3;

/// Source of the login code the service sends out of band
#[async_trait::async_trait]
pub trait CodeProvider: Send + Sync {
    /// Return the code sent to `phone`.
    async fn login_code(&self, phone: &str) -> Result<String>;
}

/// A login code known up front (config or environment)
#[derive(Clone)]
pub struct StaticCode(String);

impl StaticCode {
    /// Wrap a known code
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }
}

impl std::fmt::Debug for StaticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticCode(<redacted>)")
    }
}

#[async_trait::async_trait]
impl CodeProvider for StaticCode {
    async fn login_code(&self, _phone: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Prompts the operator on stderr and reads the code from stdin
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinCode;

#[async_trait::async_trait]
impl CodeProvider for StdinCode {
    async fn login_code(&self, phone: &str) -> Result<String> {
        use tokio::io::AsyncBufReadExt;

        eprint!("Enter the login code sent to {}: ", mask_phone(phone));
        let mut line = String::new();
        tokio::io::BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await?;
        let code = line.trim().to_string();
        if code.is_empty() {
            return Err(Error::Auth("no login code entered".into()));
        }
        Ok(code)
    }
}

/// Token persisted between runs
#[derive(Serialize, Deserialize)]
struct StoredSession {
    api_id: i32,
    phone: String,
    token: String,
}

/// Owns the run's single session
pub struct SessionManager {
    backend: Arc<dyn MessagingBackend>,
    session_file: Option<PathBuf>,
    retry: RetryConfig,
    rate_limit: RateLimitConfig,
    active: Mutex<Option<Session>>,
}

impl SessionManager {
    /// Create a manager for `backend` using the session, retry and rate-limit settings
    /// of `config`.
    pub fn new(backend: Arc<dyn MessagingBackend>, config: &Config) -> Self {
        Self {
            backend,
            session_file: config.service.session_file.clone(),
            retry: config.retry.clone(),
            rate_limit: config.rate_limit.clone(),
            active: Mutex::new(None),
        }
    }

    /// Establish the session.
    ///
    /// # Errors
    /// - [`Error::AlreadyConnected`] if this manager already holds a live session
    /// - [`Error::Auth`] if the credentials or the login code are rejected
    /// - [`Error::Network`] if the service stays unreachable after retries
    pub async fn connect(
        &self,
        credentials: &Credentials,
        codes: &dyn CodeProvider,
    ) -> Result<Session> {
        // Held for the whole login so a concurrent connect waits and then fails
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(Error::AlreadyConnected);
        }

        let token = match self.reuse_stored_token(credentials).await? {
            Some(token) => token,
            None => self.login(credentials, codes).await?,
        };

        let session = Session::new(
            Arc::clone(&self.backend),
            token,
            self.retry.clone(),
            &self.rate_limit,
        );
        *active = Some(session.clone());
        tracing::info!(api_id = credentials.api_id, "session connected");
        Ok(session)
    }

    /// Release the session.
    ///
    /// Idempotent: without a live session (never connected, connect failed, already
    /// disconnected) this does nothing. Errors while notifying the service are logged,
    /// not returned.
    pub async fn disconnect(&self) {
        let Some(session) = self.active.lock().await.take() else {
            tracing::debug!("disconnect without a live session");
            return;
        };

        session.close();
        if let Err(e) = self.backend.close_session(session.token()).await {
            tracing::warn!(error = %e, "failed to close session on the service");
        }
        tracing::info!("session disconnected");
    }

    /// Whether a session is live
    pub async fn is_connected(&self) -> bool {
        self.active.lock().await.is_some()
    }

    async fn reuse_stored_token(&self, credentials: &Credentials) -> Result<Option<AuthToken>> {
        let Some(path) = self.session_file.as_deref() else {
            return Ok(None);
        };
        let Some(stored) = load_session(path, credentials).await else {
            return Ok(None);
        };

        let backend = self.backend.as_ref();
        let token = AuthToken(stored.token);
        let token_ref = &token;
        match with_retry(&self.retry, || async move {
            backend.check_session(token_ref).await
        })
        .await
        {
            Ok(()) => {
                tracing::info!(path = %path.display(), "reusing stored session");
                Ok(Some(token))
            }
            Err(Error::Auth(reason)) => {
                tracing::warn!(
                    path = %path.display(),
                    reason = %reason,
                    "stored session rejected, logging in again"
                );
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::warn!(error = %e, "failed to remove stale session file");
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn login(&self, credentials: &Credentials, codes: &dyn CodeProvider) -> Result<AuthToken> {
        let backend = self.backend.as_ref();
        let challenge = with_retry(&self.retry, || async move {
            backend.request_login_code(credentials).await
        })
        .await?;

        let code = codes.login_code(&credentials.phone).await?;
        let token = backend.sign_in(credentials, &challenge, &code).await?;

        if let Some(path) = self.session_file.as_deref()
            && let Err(e) = store_session(path, credentials, &token).await
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist session");
        }
        Ok(token)
    }
}

async fn load_session(path: &Path, credentials: &Credentials) -> Option<StoredSession> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read session file");
            return None;
        }
    };
    match serde_json::from_str::<StoredSession>(&text) {
        Ok(stored) if stored.api_id == credentials.api_id && stored.phone == credentials.phone => {
            Some(stored)
        }
        Ok(_) => {
            tracing::info!(path = %path.display(), "session file belongs to another account");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt session file");
            None
        }
    }
}

async fn store_session(path: &Path, credentials: &Credentials, token: &AuthToken) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let stored = StoredSession {
        api_id: credentials.api_id,
        phone: credentials.phone.clone(),
        token: token.as_str().to_string(),
    };
    let json = serde_json::to_vec_pretty(&stored)?;
    crate::utils::write_atomic(path, &json).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

fn mask_phone(phone: &str) -> String {
    let visible: String = phone
        .chars()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{}", visible)
}

/// Handle to the live session, shared by all channel workers
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    backend: Arc<dyn MessagingBackend>,
    token: AuthToken,
    limiter: RateLimiter,
    retry: RetryConfig,
    flood_sleep_threshold: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("limiter", &self.inner.limiter)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    fn new(
        backend: Arc<dyn MessagingBackend>,
        token: AuthToken,
        retry: RetryConfig,
        rate_limit: &RateLimitConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                backend,
                token,
                limiter: RateLimiter::new(rate_limit.requests_per_second),
                retry,
                flood_sleep_threshold: rate_limit.flood_sleep_threshold,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Whether the session has been disconnected
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn backend(&self) -> &dyn MessagingBackend {
        self.inner.backend.as_ref()
    }

    pub(crate) fn token(&self) -> &AuthToken {
        &self.inner.token
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Run a remote call under the session's policies.
    ///
    /// Each attempt waits for a request permit. Transient errors are retried per the
    /// retry config; once retries run out the call fails with [`Error::Unavailable`],
    /// which ends the run. Flood waits up to the configured threshold are slept through, at
    /// most [`MAX_FLOOD_WAITS`] times; longer waits surface as
    /// [`Error::RateLimited`]. Fails with [`Error::SessionClosed`] once disconnected.
    pub(crate) async fn call<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limiter = &self.inner.limiter;
        let mut flood_waits = 0;
        loop {
            if self.is_closed() {
                return Err(Error::SessionClosed);
            }

            let result = with_retry(&self.inner.retry, || {
                let attempt = op();
                async move {
                    limiter.acquire().await;
                    attempt.await
                }
            })
            .await;

            match result {
                Err(Error::RateLimited { retry_after })
                    if retry_after <= self.inner.flood_sleep_threshold
                        && flood_waits < MAX_FLOOD_WAITS =>
                {
                    flood_waits += 1;
                    tracing::warn!(
                        operation,
                        wait_secs = retry_after.as_secs_f64(),
                        flood_waits,
                        "flood wait, sleeping"
                    );
                    tokio::time::sleep(retry_after).await;
                }
                // with_retry only hands back a retryable error once it gave up on it
                Err(e) if e.is_retryable() => {
                    return Err(Error::Unavailable {
                        operation,
                        attempts: self.inner.retry.max_attempts + 1,
                        reason: e.to_string(),
                    });
                }
                other => return other,
            }
        }
    }
}
