//! Generic lifecycle management for every subsystem (heartbeat
//! supervisor, cluster state store, scheduler, monitor, quorum, listener):
//! one `ManagedService` per subsystem, initialized in registration order
//! and shut down in reverse.

use std::any::{Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::config::AgentConfig;

/// Context handed to every service at `init()`.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<AgentConfig>,
}

/// Lifecycle-managed subsystem trait. Every C1-C10 subsystem that owns
/// background tasks or persistent state implements this so the daemon can
/// bring the whole fleet up and tear it down uniformly.
#[async_trait]
pub trait ManagedService: Send + Sync + Any {
    fn name(&self) -> &'static str;
    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()>;
    async fn shutdown(&self, terminate: bool) -> anyhow::Result<()>;
}

/// Registry for lifecycle-managed subsystems, looked up either by name or
/// by concrete type.
pub struct ServiceRegistry {
    by_name: DashMap<&'static str, Arc<dyn ManagedService>>,
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    init_order: RwLock<Vec<&'static str>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { by_name: DashMap::new(), by_type: DashMap::new(), init_order: RwLock::new(Vec::new()) }
    }

    pub fn register<T: ManagedService>(&self, service: T) {
        let name = service.name();
        let arc = Arc::new(service);
        self.by_name.insert(name, arc.clone());
        self.by_type.insert(TypeId::of::<T>(), arc);
        self.init_order.write().push(name);
    }

    pub fn get<T: ManagedService>(&self) -> Option<Arc<T>> {
        self.by_type.get(&TypeId::of::<T>()).and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn ManagedService>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    /// # Errors
    /// Returns the first error raised by any service's `init()`.
    pub async fn init_all(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let order = self.init_order.read().clone();
        for name in &order {
            if let Some(service) = self.get_by_name(name) {
                service.init(ctx).await?;
            }
        }
        Ok(())
    }

    /// # Errors
    /// Returns the first error raised by any service's `shutdown()`; the
    /// remaining services are still given a chance to shut down.
    pub async fn shutdown_all(&self, terminate: bool) -> anyhow::Result<()> {
        let order = self.init_order.read().clone();
        let mut first_err = None;
        for name in order.iter().rev() {
            if let Some(service) = self.get_by_name(name) {
                if let Err(e) = service.shutdown(terminate).await {
                    tracing::warn!(service = name, error = %e, "service shutdown failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
