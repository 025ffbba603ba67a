use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// HTTP method a [`Request`] is issued with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
    Options,
}

impl Method {
    /// Upper-case wire form, used both on the network and inside the fingerprint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
        }
    }
}

impl Default for Method {
    fn default() -> Self {
        Method::Get
    }
}

/// A queued crawl request: a Scrapy-style descriptor carrying a named callback,
/// retry bookkeeping, and a free-form `meta` bag that follows it to the `Response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    #[serde(default)]
    pub method: Method,
    /// Name of the handler on the spider that should receive the response.
    /// Defaults to `"parse"`, matching a Request with no explicit callback.
    #[serde(default = "default_callback")]
    pub callback: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub dont_filter: bool,
    pub cookies: Option<HashMap<String, String>>,
    pub timeout: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
}

fn default_callback() -> String {
    "parse".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            callback: default_callback(),
            headers: HashMap::new(),
            body: None,
            meta: serde_json::Map::new(),
            priority: 0,
            dont_filter: false,
            cookies: None,
            timeout: None,
            max_retries: default_max_retries(),
            retry_count: 0,
            retry_delay: default_retry_delay(),
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        let mut req = Self::new(url);
        req.method = Method::Post;
        req.body = Some(body.into());
        req
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = callback.into();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Map<String, serde_json::Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn dont_filter(mut self) -> Self {
        self.dont_filter = true;
        self
    }

    /// Stable dedup key: `md5(url | METHOD | body-or-empty)`, matching the
    /// source crawler's `Request.fingerprint()` exactly so fixtures recorded
    /// against it stay valid.
    pub fn fingerprint(&self) -> String {
        let parts = [
            self.url.as_str(),
            self.method.as_str(),
            self.body.as_deref().unwrap_or(""),
        ];
        let content = parts.join("|");
        format!("{:x}", md5::compute(content.as_bytes()))
    }

    /// Whether this callback name counts toward project-level success/failure
    /// stats. Only `parse_detail` is a "detail" callback; list-page callbacks
    /// (typically named `parse`) are excluded by design.
    pub fn is_detail_callback(&self) -> bool {
        self.callback == "parse_detail"
    }

    /// Priority-queue score: lower sorts first, so negate priority and add a
    /// sub-second fraction of the current time to break ties by insertion
    /// order, matching `score = -priority + now()/1e10`.
    pub fn score(&self) -> f64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        -(self.priority as f64) + now / 1e10
    }

    /// Clone with `retry_count` incremented, as used by `retry()`.
    pub fn bump_retry(&self) -> Self {
        let mut next = self.clone();
        next.retry_count += 1;
        next
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Exponential backoff delay before a retried request is refetched:
    /// `retry_delay * 2^(retry_count-1)`, only meaningful once `retry_count > 0`.
    pub fn backoff_delay(&self) -> std::time::Duration {
        if self.retry_count == 0 {
            return std::time::Duration::ZERO;
        }
        let secs = self.retry_delay * 2f64.powi(self.retry_count as i32 - 1);
        std::time::Duration::from_secs_f64(secs.max(0.0))
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}
impl Eq for Request {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_across_clones() {
        let r1 = Request::new("https://example.com/a");
        let r2 = r1.clone();
        assert_eq!(r1.fingerprint(), r2.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_method_case_and_depends_on_body() {
        let mut r1 = Request::new("https://example.com/a");
        r1.method = Method::Post;
        r1.body = Some("x=1".into());

        let mut r2 = Request::new("https://example.com/a");
        r2.method = Method::Post;
        r2.body = Some("x=2".into());

        assert_ne!(r1.fingerprint(), r2.fingerprint());
    }

    #[test]
    fn detail_callback_gate() {
        let detail = Request::new("u").with_callback("parse_detail");
        let list = Request::new("u").with_callback("parse");
        assert!(detail.is_detail_callback());
        assert!(!list.is_detail_callback());
    }

    #[test]
    fn backoff_is_zero_on_first_attempt() {
        let r = Request::new("u");
        assert_eq!(r.backoff_delay(), std::time::Duration::ZERO);
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let mut r = Request::new("u");
        r.retry_count = 1;
        assert_eq!(r.backoff_delay(), std::time::Duration::from_secs_f64(1.0));
        r.retry_count = 2;
        assert_eq!(r.backoff_delay(), std::time::Duration::from_secs_f64(2.0));
        r.retry_count = 3;
        assert_eq!(r.backoff_delay(), std::time::Duration::from_secs_f64(4.0));
    }
}
