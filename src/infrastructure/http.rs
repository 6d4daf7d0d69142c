use crate::config::AppConfig;
use crate::infrastructure::debug_log::DebugLog;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Request, StatusCode};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Statuses worth another attempt
pub const RETRY_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Upper bound for a single backoff sleep
const BACKOFF_MAX: Duration = Duration::from_secs(120);

/// Characters of a body kept in error messages
const BODY_PREVIEW_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request body cannot be replayed")]
    NotReplayable,

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    #[error("Server error ({0})")]
    Server(u16),

    #[error("API returned HTML error page (status {0})")]
    Html(u16),

    #[error("{status}:{body}")]
    Status { status: u16, body: String },

    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),

    #[error("Invalid XML response: {0}")]
    InvalidXml(String),

    #[error("{0}")]
    Unrecognized(String),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_factor: config.backoff_factor,
        }
    }

    /// Sleep before retry number `retry` (1-based): `factor * 2^(retry-1)` seconds
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31) as i32;
        let secs = self.backoff_factor * 2f64.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(BACKOFF_MAX)
            .min(BACKOFF_MAX)
    }

    pub fn is_retryable(status: StatusCode) -> bool {
        RETRY_STATUSES.contains(&status.as_u16())
    }
}

/// A fully-read upstream response
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: String,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body shortened for error messages
    pub fn body_preview(&self) -> &str {
        preview(&self.body, BODY_PREVIEW_CHARS)
    }

    /// Interprets the body as JSON or XML. `Ok(None)` means no content.
    pub fn parse_body(&self) -> Result<Option<Value>, BodyError> {
        parse_body(self.status, &self.content_type, &self.body)
    }
}

/// Shared outbound client with timeouts and retries
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
    debug: Arc<DebugLog>,
}

impl HttpClient {
    pub fn new(config: &AppConfig, debug: Arc<DebugLog>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.outbound_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()?;

        Ok(Self {
            client,
            policy: RetryPolicy::from_config(config),
            debug,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Executes `request`, retrying transport errors and retryable statuses.
    /// Once retries run out the last response is returned as-is.
    pub async fn execute(&self, request: Request) -> Result<UpstreamResponse, HttpError> {
        let url = request.url().to_string();
        let method = request.method().clone();
        let mut retries = 0;

        loop {
            let attempt = request.try_clone().ok_or(HttpError::NotReplayable)?;

            match self.client.execute(attempt).await {
                Ok(response) => {
                    let status = response.status();

                    if RetryPolicy::is_retryable(status) && retries < self.policy.max_retries {
                        retries += 1;
                        let delay = retry_after(&response)
                            .map(|d| d.min(BACKOFF_MAX))
                            .unwrap_or_else(|| self.policy.backoff(retries));
                        tracing::warn!(
                            "{} {} returned {}, retrying in {:?} ({}/{})",
                            method,
                            url,
                            status,
                            delay,
                            retries,
                            self.policy.max_retries
                        );
                        sleep(delay).await;
                        continue;
                    }

                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();

                    let body = response.text().await.map_err(|e| HttpError::Transport {
                        url: url.clone(),
                        message: e.to_string(),
                    })?;

                    let upstream = UpstreamResponse::new(status, content_type, body);
                    self.inspect(&url, &upstream).await;
                    return Ok(upstream);
                }
                Err(e) if retries < self.policy.max_retries => {
                    retries += 1;
                    let delay = self.policy.backoff(retries);
                    tracing::warn!(
                        "{} {} failed: {}, retrying in {:?} ({}/{})",
                        method,
                        url,
                        e,
                        delay,
                        retries,
                        self.policy.max_retries
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!("HTTP request error {} {}: {}", method, url, e);
                    self.debug
                        .record(json!({
                            "url": url,
                            "method": method.as_str(),
                            "error": e.to_string(),
                        }))
                        .await;
                    return Err(HttpError::Transport {
                        url,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Records HTML pages and unexpected non-OK bodies in the debug log
    async fn inspect(&self, url: &str, response: &UpstreamResponse) {
        let ct = response.content_type.to_lowercase();
        let structured = ct.contains("json") || ct.contains("xml");

        if ct.contains("html") || (!response.is_success() && !structured) {
            tracing::warn!(
                "Unexpected response from {} (status={} ct={})",
                url,
                response.status,
                response.content_type
            );
            self.debug
                .record(json!({
                    "url": url,
                    "status": response.status.as_u16(),
                    "content_type": response.content_type,
                    "body_start": preview(&response.body, 2000),
                }))
                .await;
        }
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// First `max_chars` characters of `text`
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn looks_like_html(text: &str) -> bool {
    let start = text.trim_start();
    let head = preview(start, 9).to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

pub fn parse_body(status: StatusCode, content_type: &str, text: &str) -> Result<Option<Value>, BodyError> {
    let code = status.as_u16();
    let ct = content_type.to_lowercase();
    let trimmed = text.trim();

    if status == StatusCode::NO_CONTENT {
        return Ok(None);
    }

    if status.is_server_error() {
        tracing::warn!("Server error (status={}): {}", code, preview(text, 500));
        return Err(BodyError::Server(code));
    }

    if ct.contains("html") || looks_like_html(text) {
        tracing::warn!("Received HTML response instead of JSON/XML (status={})", code);
        return Err(BodyError::Html(code));
    }

    if status.is_client_error() {
        return Err(BodyError::Status {
            status: code,
            body: preview(text, BODY_PREVIEW_CHARS).to_string(),
        });
    }

    if ct.contains("json") || trimmed.starts_with('{') || trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map(Some).map_err(|e| {
            tracing::warn!(
                "JSON parse error: {}. Content-Type={}, Body preview={}",
                e,
                content_type,
                preview(text, 200)
            );
            BodyError::InvalidJson(e.to_string())
        });
    }

    if ct.contains("xml") || trimmed.starts_with('<') {
        return xml_to_value(trimmed).map(Some).map_err(|e| {
            tracing::warn!("XML parse error: {}", e);
            BodyError::InvalidXml(e)
        });
    }

    Err(BodyError::Unrecognized(
        preview(text, BODY_PREVIEW_CHARS).to_string(),
    ))
}

struct XmlFrame {
    name: String,
    children: Map<String, Value>,
    text: String,
}

/// Converts an XML document into JSON. The root tag is dropped; leaves become
/// strings, parents become objects keyed by child tag, and repeated tags
/// collect into arrays.
pub fn xml_to_value(text: &str) -> Result<Value, String> {
    let mut reader = Reader::from_str(text);

    let mut stack: Vec<XmlFrame> = Vec::new();
    let mut root: Option<Value> = None;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => stack.push(XmlFrame {
                name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                children: Map::new(),
                text: String::new(),
            }),
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                attach(&mut stack, &mut root, name, Value::String(String::new()));
            }
            Event::Text(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&e.decode().map_err(|e| e.to_string())?);
                }
            }
            Event::CData(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&e.decode().map_err(|e| e.to_string())?);
                }
            }
            Event::GeneralRef(e) => {
                let resolved = match e.resolve_char_ref().map_err(|e| e.to_string())? {
                    Some(ch) => ch.to_string(),
                    None => {
                        let name = e.decode().map_err(|e| e.to_string())?;
                        resolve_predefined_entity(&name)
                            .ok_or_else(|| format!("unknown entity &{};", name))?
                            .to_string()
                    }
                };
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&resolved);
                }
            }
            Event::End(_) => {
                let frame = stack.pop().ok_or("unbalanced closing tag")?;
                // Entities split text into fragments, so trim only the joined value
                let value = if frame.children.is_empty() {
                    Value::String(frame.text.trim().to_string())
                } else {
                    Value::Object(frame.children)
                };
                attach(&mut stack, &mut root, frame.name, value);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err("unexpected end of document".to_string());
    }

    root.ok_or_else(|| "document has no root element".to_string())
}

fn attach(stack: &mut [XmlFrame], root: &mut Option<Value>, name: String, value: Value) {
    let Some(parent) = stack.last_mut() else {
        if root.is_none() {
            *root = Some(value);
        }
        return;
    };

    match parent.children.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            parent.children.insert(name, value);
        }
    }
}
