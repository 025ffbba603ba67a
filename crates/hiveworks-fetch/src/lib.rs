//! HTTP fetcher for the crawl-and-process worker.
//!
//! One request in, one response (or a typed terminal error) out: linear
//! retry backoff, a fixed browser-like default header set merged under the
//! caller's own headers, and an `http://`/`socks5://` proxy applied to every
//! request issued by a given [`HttpFetcher`].

pub mod fetch;
pub mod proxy;

pub use fetch::{FetchError, FetchOutcome, FetchedResponse, HttpFetcher, RetryPolicy};
pub use proxy::ProxyConfig;
