use scraper::{Html, Selector};
use url::Url;

use crate::request::Request;

/// HTTP response paired with the request that produced it. Holds a read-only
/// reference to its `Request` (never the reverse) so the two never form a
/// cycle.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub headers: std::collections::HashMap<String, String>,
    pub body: Vec<u8>,
    pub encoding: String,
    pub request: Request,
}

impl Response {
    pub fn new(
        url: impl Into<String>,
        body: Vec<u8>,
        status: u16,
        headers: std::collections::HashMap<String, String>,
        request: Request,
    ) -> Self {
        Self {
            url: url.into(),
            status,
            headers,
            body,
            encoding: "utf-8".to_string(),
            request,
        }
    }

    /// Request's transplanted `meta`, as the response's own `meta` accessor.
    pub fn meta(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.request.meta
    }

    /// Lazily decoded text body (lossy UTF-8, matching the source's
    /// `errors='replace'` decode policy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }

    /// Run a CSS selector over the (lazily parsed) document and collect the
    /// text content of every match. `::text`/`::attr(x)` pseudo-selectors from
    /// the source's parsel-backed API are not part of CSS proper; callers
    /// after an attribute should use [`Response::css_attr`] instead.
    pub fn css_text(&self, selector: &str) -> Vec<String> {
        let Ok(sel) = Selector::parse(selector) else {
            return Vec::new();
        };
        let doc = Html::parse_document(&self.text());
        doc.select(&sel)
            .map(|el| el.text().collect::<String>())
            .collect()
    }

    /// Run a CSS selector and collect a named attribute from every match.
    pub fn css_attr(&self, selector: &str, attr: &str) -> Vec<String> {
        let Ok(sel) = Selector::parse(selector) else {
            return Vec::new();
        };
        let doc = Html::parse_document(&self.text());
        doc.select(&sel)
            .filter_map(|el| el.value().attr(attr).map(str::to_string))
            .collect()
    }

    /// Resolve a possibly-relative URL against this response's URL.
    pub fn urljoin(&self, url: &str) -> String {
        match Url::parse(&self.url).and_then(|base| base.join(url)) {
            Ok(joined) => joined.to_string(),
            Err(_) => url.to_string(),
        }
    }

    /// Build a follow-up `Request` inheriting this response's (inherited)
    /// `meta`, resolved against the response's own URL.
    pub fn follow(&self, url: &str, callback: impl Into<String>) -> Request {
        let full_url = self.urljoin(url);
        let mut req = Request::new(full_url).with_callback(callback);
        req.meta = self.meta().clone();
        req
    }

    pub fn follow_all(&self, urls: &[String], callback: impl Into<String> + Clone) -> Vec<Request> {
        urls.iter()
            .map(|u| self.follow(u, callback.clone()))
            .collect()
    }

    /// Whether the response represents success, `2xx`.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response(body: &str) -> Response {
        Response::new(
            "https://example.com/page",
            body.as_bytes().to_vec(),
            200,
            Default::default(),
            Request::new("https://example.com/page"),
        )
    }

    #[test]
    fn css_text_extracts_matches() {
        let r = sample_response("<html><body><h1>Hello</h1><h1>World</h1></body></html>");
        assert_eq!(r.css_text("h1"), vec!["Hello", "World"]);
    }

    #[test]
    fn css_attr_extracts_href() {
        let r = sample_response(r#"<a href="/a">x</a><a href="/b">y</a>"#);
        assert_eq!(r.css_attr("a", "href"), vec!["/a", "/b"]);
    }

    #[test]
    fn follow_resolves_relative_url_and_inherits_meta() {
        let mut req = Request::new("https://example.com/page");
        req.meta.insert("page".into(), serde_json::json!(1));
        let r = Response::new(
            "https://example.com/page",
            b"".to_vec(),
            200,
            Default::default(),
            req,
        );
        let next = r.follow("/next", "parse_detail");
        assert_eq!(next.url, "https://example.com/next");
        assert_eq!(next.callback, "parse_detail");
        assert_eq!(next.meta.get("page"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn is_ok_matches_2xx_only() {
        let r = sample_response("");
        assert!(r.is_ok());
    }
}
