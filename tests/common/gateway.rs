//! Mock messaging gateway and matching scraper configuration

use channel_dl::Config;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Login code the mock gateway accepts
pub const LOGIN_CODE: &str = "24680";

/// Session token the mock gateway hands out
pub const SESSION_TOKEN: &str = "gw-token-1";

/// A channel served by the mock gateway
pub struct MockChannel {
    /// Handle the resolve endpoint answers for
    pub handle: &'static str,
    /// Numeric id
    pub id: i64,
    /// Display title
    pub title: &'static str,
    /// Messages, newest first
    pub messages: Vec<Value>,
}

/// Message JSON as the gateway serves it
pub fn message_json(id: i64, text: &str, photo: Option<&str>) -> Value {
    let date = format!("2024-05-01T10:{:02}:00Z", id % 60);
    match photo {
        Some(media_ref) => json!({
            "id": id,
            "text": text,
            "date": date,
            "media": {"kind": "photo", "ref": media_ref}
        }),
        None => json!({"id": id, "text": text, "date": date}),
    }
}

/// Start a gateway that accepts [`LOGIN_CODE`] and serves `channels`.
///
/// History pages honour `limit` and `offset_id` the way the live service does:
/// newest first, strictly older than the offset. Unknown handles resolve to 404.
pub async fn start_gateway(channels: Vec<MockChannel>) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/send_code"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"phone_code_hash": "hash-1"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/sign_in"))
        .respond_with(move |request: &wiremock::Request| {
            let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
            if body["code"] == LOGIN_CODE && body["phone_code_hash"] == "hash-1" {
                ResponseTemplate::new(200).set_body_json(json!({"session_token": SESSION_TOKEN}))
            } else {
                ResponseTemplate::new(401).set_body_string("PHONE_CODE_INVALID")
            }
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/check"))
        .and(header("authorization", format!("Bearer {SESSION_TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/check"))
        .respond_with(ResponseTemplate::new(401).set_body_string("AUTH_KEY_UNREGISTERED"))
        .with_priority(10)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/disconnect"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    for channel in channels {
        Mock::given(method("GET"))
            .and(path("/channels/resolve"))
            .and(query_param("reference", channel.handle))
            .and(header("authorization", format!("Bearer {SESSION_TOKEN}").as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": channel.id, "title": channel.title})),
            )
            .mount(&server)
            .await;

        let messages = channel.messages;
        Mock::given(method("GET"))
            .and(path(format!("/channels/{}/messages", channel.id)))
            .respond_with(move |request: &wiremock::Request| {
                let mut limit = usize::MAX;
                let mut offset = i64::MAX;
                for (key, value) in request.url.query_pairs() {
                    match key.as_ref() {
                        "limit" => limit = value.parse().unwrap_or(limit),
                        "offset_id" => offset = value.parse().unwrap_or(offset),
                        _ => {}
                    }
                }
                let page: Vec<Value> = messages
                    .iter()
                    .filter(|m| m["id"].as_i64().is_some_and(|id| id < offset))
                    .take(limit)
                    .cloned()
                    .collect();
                ResponseTemplate::new(200).set_body_json(json!({"messages": page}))
            })
            .mount(&server)
            .await;
    }

    // Lowest priority: anything not matched above is an unknown channel
    Mock::given(method("GET"))
        .and(path("/channels/resolve"))
        .respond_with(ResponseTemplate::new(404).set_body_string("USERNAME_NOT_OCCUPIED"))
        .with_priority(10)
        .mount(&server)
        .await;

    server
}

/// Serve `bytes` for `media_ref`.
pub async fn mount_media(server: &MockServer, media_ref: &str, bytes: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/media/{}", urlencoding::encode(media_ref))))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
        .mount(server)
        .await;
}

/// Fail every download of `media_ref` with `status`.
pub async fn mount_media_failure(server: &MockServer, media_ref: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/media/{}", urlencoding::encode(media_ref))))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Configuration pointing at `server`, writing everything under `dir`.
pub fn gateway_config(server: &MockServer, dir: &Path, channels: &[&str]) -> Config {
    let mut config = Config {
        channels: channels.iter().map(|c| c.to_string()).collect(),
        ..Config::default()
    };
    config.service.base_url = server.uri();
    config.service.api_id = Some(42);
    config.service.api_hash = Some("hash".into());
    config.service.phone = Some("+251911000000".into());
    config.service.session_file = Some(dir.join("session.json"));
    config.service.request_timeout = Duration::from_secs(5);
    config.output.output_path = dir.join("data").join("telegram_data.csv");
    config.output.media_dir = dir.join("photos");
    config.retry.max_attempts = 2;
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config.retry.jitter = false;
    config.rate_limit.requests_per_second = None;
    config.rate_limit.media_downloads_per_second = None;
    config
}
