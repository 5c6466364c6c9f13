//! Shared host context
//!
//! The one shared resource every module may depend on: the service
//! registry, the database base handles from storage bootstrap, and the
//! global configuration. Injected into service construction; cheap to
//! clone.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ConfigService;
use crate::error::EngineError;
use crate::lifecycle::Service;
use crate::registry::ServiceRegistry;
use crate::storage::BaseHandle;

#[derive(Clone)]
pub struct HostContext {
    registry: Arc<ServiceRegistry>,
    databases: Arc<HashMap<String, BaseHandle>>,
    config: ConfigService,
}

impl HostContext {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        databases: Arc<HashMap<String, BaseHandle>>,
        config: ConfigService,
    ) -> Self {
        Self {
            registry,
            databases,
            config,
        }
    }

    /// Read surface of the service registry.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Lookup that treats absence as an error, for required dependencies.
    pub fn require(&self, module: &str, service: &str) -> Result<Arc<dyn Service>, EngineError> {
        self.registry
            .lookup(service)
            .ok_or_else(|| EngineError::missing_service(module, service))
    }

    /// Base handle of a database created during storage bootstrap.
    pub fn database(&self, name: &str) -> Option<BaseHandle> {
        self.databases.get(name).cloned()
    }

    pub fn config(&self) -> &ConfigService {
        &self.config
    }
}
