//! Shared test helpers: an in-memory messaging backend and scraper fixtures.

use crate::backend::{AuthToken, Credentials, HistoryRequest, LoginChallenge, MessagingBackend};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::{Session, SessionManager, StaticCode};
use crate::types::{ChannelId, ChannelRef, MediaKind, MediaRef, Message, MessageId, ResolvedChannel};
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Login code the fake accepts
pub(crate) const VALID_CODE: &str = "12345";

/// Backend operations, used for call counting and fault injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    SendCode,
    SignIn,
    Check,
    Close,
    Resolve,
    History,
    Media,
}

const ALL_OPS: [Op; 7] = [
    Op::SendCode,
    Op::SignIn,
    Op::Check,
    Op::Close,
    Op::Resolve,
    Op::History,
    Op::Media,
];

/// Injected failure
#[derive(Clone, Debug)]
pub(crate) enum Fault {
    /// Transient network failure
    Network,
    /// Flood wait of the given length
    RateLimited(Duration),
    /// Credentials or token rejected
    Auth,
    /// Never completes
    Hang,
}

impl Fault {
    fn into_error(self) -> Error {
        match self {
            Fault::Network => Error::Network("connection reset by fake".into()),
            Fault::RateLimited(retry_after) => Error::RateLimited { retry_after },
            Fault::Auth => Error::Auth("rejected by fake".into()),
            Fault::Hang => unreachable!("hang is handled before conversion"),
        }
    }
}

struct FakeChannel {
    id: ChannelId,
    title: String,
    /// Ascending by id
    messages: Vec<Message>,
}

/// In-memory [`MessagingBackend`]
pub(crate) struct FakeBackend {
    channels: Mutex<HashMap<String, FakeChannel>>,
    media: Mutex<HashMap<String, Vec<u8>>>,
    valid_tokens: Mutex<HashSet<String>>,
    faults: Mutex<HashMap<Op, VecDeque<Fault>>>,
    always: Mutex<HashMap<Op, Fault>>,
    from_call: Mutex<HashMap<Op, (usize, Fault)>>,
    history_requests: Mutex<Vec<(ChannelId, HistoryRequest)>>,
    counters: HashMap<Op, AtomicUsize>,
    next_token: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    ascending_pages: AtomicBool,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            media: Mutex::new(HashMap::new()),
            valid_tokens: Mutex::new(HashSet::new()),
            faults: Mutex::new(HashMap::new()),
            always: Mutex::new(HashMap::new()),
            from_call: Mutex::new(HashMap::new()),
            history_requests: Mutex::new(Vec::new()),
            counters: ALL_OPS.iter().map(|op| (*op, AtomicUsize::new(0))).collect(),
            next_token: AtomicUsize::new(1),
            latency: Mutex::new(None),
            ascending_pages: AtomicBool::new(false),
        }
    }

    /// Add a channel; `messages` may be in any order.
    pub(crate) fn with_channel(self, handle: &str, title: &str, mut messages: Vec<Message>) -> Self {
        messages.sort_by_key(|m| m.id);
        let id = ChannelId(1000 + self.channels.lock().unwrap().len() as i64);
        self.channels.lock().unwrap().insert(
            handle.to_lowercase(),
            FakeChannel {
                id,
                title: title.to_string(),
                messages,
            },
        );
        self
    }

    /// Add a channel holding `count` text messages with ids 1..=count.
    pub(crate) fn with_text_channel(self, handle: &str, title: &str, count: i64) -> Self {
        let messages = (1..=count)
            .map(|id| text_message(id, &format!("post {id}")))
            .collect();
        self.with_channel(handle, title, messages)
    }

    /// Register downloadable bytes for a media ref.
    pub(crate) fn with_media(self, media_ref: &str, bytes: &[u8]) -> Self {
        self.media
            .lock()
            .unwrap()
            .insert(media_ref.to_string(), bytes.to_vec());
        self
    }

    /// Accept `token` in `check_session` without a login.
    pub(crate) fn with_valid_token(self, token: &str) -> Self {
        self.valid_tokens.lock().unwrap().insert(token.to_string());
        self
    }

    /// Delay every call by `latency`.
    pub(crate) fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = Some(latency);
        self
    }

    /// Serve each history page oldest first (the page itself still holds the newest
    /// messages below the offset).
    pub(crate) fn with_ascending_pages(self) -> Self {
        self.ascending_pages.store(true, Ordering::SeqCst);
        self
    }

    /// Fail the next `times` calls of `op` with `fault`.
    pub(crate) fn inject(&self, op: Op, fault: Fault, times: usize) {
        let mut faults = self.faults.lock().unwrap();
        let queue = faults.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(fault.clone());
        }
    }

    /// Fail every call of `op` with `fault`.
    pub(crate) fn fail_always(&self, op: Op, fault: Fault) {
        self.always.lock().unwrap().insert(op, fault);
    }

    /// Fail every call of `op` from the `call`-th one (1-based) on.
    pub(crate) fn fail_from_call(&self, op: Op, call: usize, fault: Fault) {
        self.from_call.lock().unwrap().insert(op, (call, fault));
    }

    /// Number of calls made to `op`.
    pub(crate) fn calls(&self, op: Op) -> usize {
        self.counters[&op].load(Ordering::SeqCst)
    }

    /// Every history request made, in order.
    pub(crate) fn history_requests(&self) -> Vec<(ChannelId, HistoryRequest)> {
        self.history_requests.lock().unwrap().clone()
    }

    async fn enter(&self, op: Op) -> Result<()> {
        let call = self.counters[&op].fetch_add(1, Ordering::SeqCst) + 1;
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let fault = {
            let queued = self
                .faults
                .lock()
                .unwrap()
                .get_mut(&op)
                .and_then(|q| q.pop_front());
            queued
                .or_else(|| self.always.lock().unwrap().get(&op).cloned())
                .or_else(|| {
                    self.from_call
                        .lock()
                        .unwrap()
                        .get(&op)
                        .filter(|(from, _)| call >= *from)
                        .map(|(_, fault)| fault.clone())
                })
        };
        match fault {
            None => Ok(()),
            Some(Fault::Hang) => std::future::pending().await,
            Some(fault) => Err(fault.into_error()),
        }
    }

    fn authorize(&self, token: &AuthToken) -> Result<()> {
        if self.valid_tokens.lock().unwrap().contains(token.as_str()) {
            Ok(())
        } else {
            Err(Error::Auth("unknown token".into()))
        }
    }
}

#[async_trait::async_trait]
impl MessagingBackend for FakeBackend {
    async fn request_login_code(&self, _credentials: &Credentials) -> Result<LoginChallenge> {
        self.enter(Op::SendCode).await?;
        Ok(LoginChallenge {
            phone_code_hash: "fake-hash".into(),
        })
    }

    async fn sign_in(
        &self,
        _credentials: &Credentials,
        challenge: &LoginChallenge,
        code: &str,
    ) -> Result<AuthToken> {
        self.enter(Op::SignIn).await?;
        if code != VALID_CODE || challenge.phone_code_hash != "fake-hash" {
            return Err(Error::Auth("PHONE_CODE_INVALID".into()));
        }
        let token = format!("token-{}", self.next_token.fetch_add(1, Ordering::SeqCst));
        self.valid_tokens.lock().unwrap().insert(token.clone());
        Ok(AuthToken(token))
    }

    async fn check_session(&self, token: &AuthToken) -> Result<()> {
        self.enter(Op::Check).await?;
        self.authorize(token)
    }

    async fn close_session(&self, token: &AuthToken) -> Result<()> {
        self.enter(Op::Close).await?;
        self.authorize(token)
    }

    async fn resolve_channel(
        &self,
        token: &AuthToken,
        reference: &ChannelRef,
    ) -> Result<ResolvedChannel> {
        self.enter(Op::Resolve).await?;
        self.authorize(token)?;
        let channels = self.channels.lock().unwrap();
        let channel = channels
            .get(&reference.dedup_key())
            .ok_or_else(|| Error::ChannelNotFound {
                reference: reference.original().to_string(),
            })?;
        Ok(ResolvedChannel {
            id: channel.id,
            title: channel.title.clone(),
            reference: reference.clone(),
        })
    }

    async fn fetch_history(
        &self,
        token: &AuthToken,
        channel: ChannelId,
        request: HistoryRequest,
    ) -> Result<Vec<Message>> {
        self.history_requests
            .lock()
            .unwrap()
            .push((channel, request));
        self.enter(Op::History).await?;
        self.authorize(token)?;
        let channels = self.channels.lock().unwrap();
        let found = channels
            .values()
            .find(|c| c.id == channel)
            .ok_or_else(|| Error::Service {
                status: 404,
                message: "no such channel".into(),
            })?;
        let mut page: Vec<Message> = found
            .messages
            .iter()
            .rev()
            .filter(|m| request.offset_id.is_none_or(|offset| m.id < offset))
            .take(request.limit)
            .cloned()
            .collect();
        if self.ascending_pages.load(Ordering::SeqCst) {
            page.reverse();
        }
        Ok(page)
    }

    async fn download_media(&self, token: &AuthToken, media: &MediaRef) -> Result<Vec<u8>> {
        self.enter(Op::Media).await?;
        self.authorize(token)?;
        self.media
            .lock()
            .unwrap()
            .get(&media.id)
            .cloned()
            .ok_or_else(|| Error::Service {
                status: 404,
                message: format!("no media {}", media.id),
            })
    }
}

/// Text-only message dated from its id
pub(crate) fn text_message(id: i64, text: &str) -> Message {
    Message {
        id: MessageId(id),
        text: text.to_string(),
        date: Utc.timestamp_opt(1_714_550_400 + id * 60, 0).unwrap(),
        media: None,
    }
}

/// Message with a photo attachment
pub(crate) fn photo_message(id: i64, text: &str, media_ref: &str) -> Message {
    Message {
        media: Some(MediaRef {
            kind: MediaKind::Photo,
            id: media_ref.to_string(),
        }),
        ..text_message(id, text)
    }
}

/// Credentials the fake accepts
pub(crate) fn test_credentials() -> Credentials {
    Credentials {
        api_id: 42,
        api_hash: "hash".into(),
        phone: "+251911000000".into(),
    }
}

/// Config with fast retries, no throttling and no session file, writing under `dir`.
pub(crate) fn test_config(dir: &std::path::Path, channels: &[&str]) -> Config {
    let mut config = Config {
        channels: channels.iter().map(|c| c.to_string()).collect(),
        ..Config::default()
    };
    config.service.api_id = Some(42);
    config.service.api_hash = Some("hash".into());
    config.service.phone = Some("+251911000000".into());
    config.service.session_file = None;
    config.output.output_path = dir.join("data").join("out.csv");
    config.output.media_dir = dir.join("photos");
    config.output.sync_writes = false;
    config.retry.max_attempts = 2;
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config.retry.jitter = false;
    config.rate_limit.requests_per_second = None;
    config.rate_limit.media_downloads_per_second = None;
    config.rate_limit.flood_sleep_threshold = Duration::from_secs(1);
    config
}

/// Connected session against `backend`, using [`test_config`] settings.
pub(crate) async fn connected_session(backend: Arc<FakeBackend>) -> (SessionManager, Session) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &["@test"]);
    let manager = SessionManager::new(backend, &config);
    let session = manager
        .connect(&test_credentials(), &StaticCode::new(VALID_CODE))
        .await
        .unwrap();
    (manager, session)
}
