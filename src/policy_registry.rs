//! Registry mapping endpoint categories to rate-limit policies.
//!
//! Unknown endpoints resolve to the default policy, so a handler added without a
//! registration is still limited rather than rejected.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::policy::RateLimitPolicy;
use tracing::warn;

/// Endpoint → policy table with a process-wide fallback.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    default_policy: RateLimitPolicy,
    policies: RwLock<HashMap<String, RateLimitPolicy>>,
}

impl PolicyRegistry {
    /// Empty registry falling back to `default_policy`.
    pub fn new(default_policy: RateLimitPolicy) -> Self {
        Self { default_policy, policies: RwLock::new(HashMap::new()) }
    }

    /// Register a policy for an endpoint, overwriting any existing entry.
    pub fn register(&self, endpoint: impl Into<String>, policy: RateLimitPolicy) {
        let endpoint = endpoint.into();
        let mut map = self.policies.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = map.insert(endpoint.clone(), policy) {
            if previous != policy {
                warn!(
                    target: "gatehouse::policy_registry",
                    endpoint = %endpoint,
                    "policy replaced; last registration wins"
                );
            }
        }
    }

    /// Policy for `endpoint`, or the default when none is registered.
    pub fn resolve(&self, endpoint: &str) -> RateLimitPolicy {
        let map = self.policies.read().unwrap_or_else(PoisonError::into_inner);
        map.get(endpoint).copied().unwrap_or(self.default_policy)
    }

    /// Fallback policy.
    pub fn default_policy(&self) -> RateLimitPolicy {
        self.default_policy
    }

    /// Registered policies sorted by endpoint.
    pub fn snapshot(&self) -> Vec<(String, RateLimitPolicy)> {
        let map = self.policies.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(String, RateLimitPolicy)> =
            map.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unknown_endpoint_uses_default() {
        let default = RateLimitPolicy::new(7, 30, 15).unwrap();
        let registry = PolicyRegistry::new(default);
        registry.register("menu", RateLimitPolicy::new(20, 60, 60).unwrap());

        assert_eq!(registry.resolve("menu").max_requests(), 20);
        assert_eq!(registry.resolve("never-registered"), default);
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = PolicyRegistry::default();
        registry.register("order", RateLimitPolicy::new(3, 300, 60).unwrap());
        registry.register("cart", RateLimitPolicy::new(15, 60, 60).unwrap());
        let names: Vec<_> = registry.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["cart", "order"]);
    }

    #[test]
    fn register_warns_and_replaces_changed_policy() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(writer))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let registry = PolicyRegistry::default();
        registry.register("cart", RateLimitPolicy::new(15, 60, 60).unwrap());
        registry.register("cart", RateLimitPolicy::new(5, 60, 60).unwrap());

        assert_eq!(registry.resolve("cart").max_requests(), 5, "last registration should win");

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("policy replaced"), "warning should be emitted on replacement");
    }
}
