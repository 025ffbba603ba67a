//! Shared domain types for the crawl-and-process worker.
//!
//! Mirrors the Request/Response/Item model a crawl project operates on, the
//! structured schedule model the scheduler fires against, and the `Spider`
//! capability a project loader resolves and the consumer drives.

pub mod error;
pub mod item;
pub mod request;
pub mod response;
pub mod schedule;
pub mod spider;

pub use error::TypesError;
pub use item::{FailedSentinel, Item, ItemKind, RunnerEvent};
pub use request::{Method, Request};
pub use response::Response;
pub use schedule::{Schedule, Weekday};
pub use spider::{CallbackOutput, Spider, SpiderError};
