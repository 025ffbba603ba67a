use async_trait::async_trait;
use thiserror::Error;

use crate::item::Item;
use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Error)]
pub enum SpiderError {
    #[error("no spider registered for entry file {0:?}")]
    NotFound(String),
    #[error("spider {0:?} has no callback named {1:?}")]
    UnknownCallback(String, String),
    #[error("callback {0:?} raised: {1}")]
    CallbackFailed(String, String),
}

/// A single element yielded by a callback: either a follow-up request to
/// enqueue, or a terminal item to forward upward. A callback may yield any
/// mix of the two, in order.
#[derive(Debug, Clone)]
pub enum CallbackYield {
    Request(Request),
    Item(Item),
}

/// What a callback invocation produces, in yield order.
pub type CallbackOutput = Vec<CallbackYield>;

/// The capability a project loader resolves and the queue consumer drives.
/// Corresponds to the source's `Spider` base class: a project supplies
/// `start_requests` and named callbacks, plus optional lifecycle hooks.
///
/// This implementation favors compiled, build-time-registered spiders (see
/// `hiveworks-spider::SpiderRegistry`) over a dynamic scripting sandbox; any
/// type implementing this trait is an acceptable loader target.
#[async_trait]
pub trait Spider: Send + Sync {
    /// Stable name, typically the project's `entry_file`.
    fn name(&self) -> &str;

    /// Recognized `__custom_setting__` keys this spider declares, e.g.
    /// `CONCURRENT_REQUESTS`. Returning `None` leaves the runner's default.
    fn concurrency_override(&self) -> Option<usize> {
        None
    }

    /// Pull the next seed request, or `None` once the generator is exhausted.
    /// Lazily advanced by the consumer's seeding logic (one call per check),
    /// never called concurrently with itself.
    async fn next_start_request(&self) -> Option<Request>;

    /// Dispatch to the named callback. Unknown callback names are a
    /// programmer error surfaced via `SpiderError::UnknownCallback`.
    async fn dispatch(
        &self,
        callback: &str,
        request: &Request,
        response: &Response,
    ) -> Result<CallbackOutput, SpiderError>;

    /// Optional request preprocessing; returning `None` skips the request
    /// without treating it as a retry-worthy failure.
    async fn download_midware(&self, request: Request) -> Option<Request> {
        Some(request)
    }

    /// Optional post-fetch validation; `false` is treated as a fetch failure.
    async fn validate(&self, _request: &Request, _response: &Response) -> bool {
        true
    }

    /// Called once a request's retries are exhausted.
    async fn failed_request(&self, _request: &Request, _error: &str) {}

    /// Called once when the consumer shuts down.
    async fn close(&self) {}
}
