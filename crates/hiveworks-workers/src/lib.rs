//! Queue consumer worker pool: drives one project's crawl to completion
//! against a shared `RequestQueue`, plus a `cron`-free scheduler that fires
//! `run` commands against a structured schedule model.

pub mod consumer;
pub mod error;
pub mod scheduler;

pub use consumer::{Consumer, ConsumerConfig};
pub use error::WorkerError;
pub use scheduler::{RunDispatcher, Scheduler};
