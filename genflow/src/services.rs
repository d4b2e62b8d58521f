//! Registry of externally provided services (ledgers, caches, uploaders).
//!
//! Steps never look services up globally: the registry is injected into
//! every [`StepContext`](crate::context::StepContext).

use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Named, type-erased service instances.
///
/// Services are stored by value and handed out as clones, so register cheap
/// handles such as `Arc<dyn Trait>`.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a service under a name.
    pub fn register<T>(&self, name: impl Into<String>, service: T)
    where
        T: Any + Send + Sync,
    {
        self.services.insert(name.into(), Arc::new(service));
    }

    /// Resolves a service by name and type.
    ///
    /// Returns `None` if nothing is registered under `name` or the
    /// registered value is not a `T`.
    #[must_use]
    pub fn resolve<T>(&self, name: &str) -> Option<T>
    where
        T: Any + Send + Sync + Clone,
    {
        self.services
            .get(name)
            .and_then(|entry| entry.value().downcast_ref::<T>().cloned())
    }

    /// Removes a service.
    pub fn unregister(&self, name: &str) -> bool {
        self.services.remove(name).is_some()
    }

    /// Checks if a name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Lists registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}
