use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use hiveworks_types::{Spider, SpiderError};

/// Produces a fresh [`Spider`] instance. Factories (not shared instances)
/// are registered because a spider owns per-run state (its
/// `start_requests` cursor) that must not be reused across runs.
pub type SpiderFactory = Arc<dyn Fn() -> Arc<dyn Spider> + Send + Sync>;

/// Build-time substitute for the source's dynamic module loader: spiders
/// register themselves under the project's `entry_file` string instead of
/// being compiled from persisted source at runtime.
#[derive(Default, Clone)]
pub struct SpiderRegistry {
    factories: Arc<DashMap<String, SpiderFactory>>,
}

impl SpiderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `entry_file`. Re-registering the same key
    /// replaces the previous factory.
    pub fn register<F>(&self, entry_file: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Spider> + Send + Sync + 'static,
    {
        let entry_file = entry_file.into();
        debug!(entry_file = %entry_file, "registering spider");
        self.factories.insert(entry_file, Arc::new(factory));
    }

    /// Resolve `entry_file` to a fresh spider instance. Mirrors the
    /// source's "first matching Spider subclass, or a clear error before
    /// the consumer starts" contract.
    pub fn resolve(&self, entry_file: &str) -> Result<Arc<dyn Spider>, SpiderError> {
        self.factories
            .get(entry_file)
            .map(|factory| factory())
            .ok_or_else(|| SpiderError::NotFound(entry_file.to_string()))
    }

    pub fn is_registered(&self, entry_file: &str) -> bool {
        self.factories.contains_key(entry_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hiveworks_types::{CallbackOutput, Request, Response};

    struct NoopSpider;

    #[async_trait]
    impl Spider for NoopSpider {
        fn name(&self) -> &str {
            "noop"
        }

        async fn next_start_request(&self) -> Option<Request> {
            None
        }

        async fn dispatch(
            &self,
            _callback: &str,
            _request: &Request,
            _response: &Response,
        ) -> Result<CallbackOutput, SpiderError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn resolves_registered_entry_file() {
        let registry = SpiderRegistry::new();
        registry.register("noop.py", || Arc::new(NoopSpider));
        assert!(registry.is_registered("noop.py"));
        assert!(registry.resolve("noop.py").is_ok());
    }

    #[test]
    fn unregistered_entry_file_is_not_found() {
        let registry = SpiderRegistry::new();
        assert!(matches!(
            registry.resolve("missing.py"),
            Err(SpiderError::NotFound(_))
        ));
    }

    #[test]
    fn resolve_produces_a_fresh_instance_each_call() {
        let registry = SpiderRegistry::new();
        registry.register("noop.py", || Arc::new(NoopSpider));
        let a = registry.resolve("noop.py").unwrap();
        let b = registry.resolve("noop.py").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
