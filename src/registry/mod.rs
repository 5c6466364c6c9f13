//! Service registry
//!
//! Process-wide directory of live, fully initialized services. Populated
//! only during Phase 2 (temporal isolation: Phase 1 hooks cannot observe
//! it because it is not handed to them and is still empty), read-mostly
//! thereafter, drained module-by-module during shutdown.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;

use crate::error::EngineError;
use crate::lifecycle::Service;

/// Introspection metadata for one exposed method. Dashboard material only;
/// nothing is enforced at call time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub returns: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: None,
            description: None,
            tags: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, shape: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            shape: shape.into(),
        });
        self
    }

    pub fn returns(mut self, shape: impl Into<String>) -> Self {
        self.returns = Some(shape.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub shape: String,
}

/// One routable endpoint a module exposes. The engine only collects these;
/// serving them is the routing layer's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub path: String,
    /// Handler reference by name, resolved by the routing layer.
    pub handler: String,
    /// Owning module identity; filled in by the orchestrator.
    pub module: String,
}

impl RouteEntry {
    pub fn new(path: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            handler: handler.into(),
            module: String::new(),
        }
    }
}

/// A registered service: live handle plus its declared metadata.
#[derive(Clone)]
pub struct ServiceRecord {
    pub name: String,
    pub module: String,
    pub handle: Arc<dyn Service>,
    pub methods: Vec<MethodSpec>,
    pub routes: Vec<RouteEntry>,
    pub priority: i32,
    pub registered_at: DateTime<Utc>,
}

/// Read-only metadata snapshot of a registered service, as handed to the
/// dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub module: String,
    pub methods: Vec<MethodSpec>,
    pub priority: i32,
    pub registered_at: DateTime<Utc>,
}

impl ServiceRecord {
    fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.name.clone(),
            module: self.module.clone(),
            methods: self.methods.clone(),
            priority: self.priority,
            registered_at: self.registered_at,
        }
    }
}

/// Name → record map with entry-granular locking: one module registering
/// does not block lookups of unrelated, already-registered services.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, ServiceRecord>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Service names are globally unique: a second
    /// registration under an existing name is rejected and the first
    /// registration stays intact.
    pub fn register(&self, record: ServiceRecord) -> Result<(), EngineError> {
        match self.services.entry(record.name.clone()) {
            Entry::Occupied(existing) => Err(EngineError::DuplicateServiceRegistration {
                service: record.name,
                owner: existing.get().module.clone(),
            }),
            Entry::Vacant(slot) => {
                tracing::debug!(service = %record.name, module = %record.module, "service registered");
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Handle lookup. Absence is a normal condition, not an error.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).map(|r| Arc::clone(&r.handle))
    }

    pub fn info(&self, name: &str) -> Option<ServiceInfo> {
        self.services.get(name).map(|r| r.info())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Restartable metadata sequence for introspection, sorted by service
    /// name. Reflects only currently registered services; call again for a
    /// fresh pass.
    pub fn list_services(&self) -> Vec<ServiceInfo> {
        let mut infos: Vec<_> = self.services.iter().map(|r| r.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Dashboard snapshot as JSON.
    pub fn snapshot_json(&self) -> serde_json::Value {
        serde_json::to_value(self.list_services()).unwrap_or_default()
    }

    /// Flat route list gathered from registered services, for the routing
    /// layer.
    pub fn routes(&self) -> Vec<RouteEntry> {
        let mut routes: Vec<_> = self
            .services
            .iter()
            .flat_map(|r| r.routes.clone())
            .collect();
        routes.sort_by(|a, b| a.path.cmp(&b.path));
        routes
    }

    /// Remove one service. Shutdown-coordinator use only: teardown drains
    /// the registry strictly module-by-module, never in bulk.
    pub fn unregister(&self, name: &str) -> Option<ServiceRecord> {
        let removed = self.services.remove(name).map(|(_, record)| record);
        if let Some(record) = &removed {
            tracing::debug!(service = %record.name, module = %record.module, "service unregistered");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullService;

    #[async_trait]
    impl Service for NullService {}

    fn record(name: &str, module: &str) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            module: module.to_string(),
            handle: Arc::new(NullService),
            methods: vec![
                MethodSpec::new("get")
                    .param("id", "string")
                    .returns("object")
                    .tag("read"),
            ],
            routes: vec![RouteEntry {
                path: format!("/{name}"),
                handler: "index".to_string(),
                module: module.to_string(),
            }],
            priority: 100,
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_registration_fails_and_first_stays() {
        let registry = ServiceRegistry::new();
        registry.register(record("svc.a", "acme.first")).unwrap();

        let err = registry.register(record("svc.a", "acme.second")).unwrap_err();
        match err {
            EngineError::DuplicateServiceRegistration { service, owner } => {
                assert_eq!(service, "svc.a");
                assert_eq!(owner, "acme.first");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.info("svc.a").unwrap().module, "acme.first");
    }

    #[test]
    fn lookup_absence_is_not_an_error() {
        let registry = ServiceRegistry::new();
        assert!(registry.lookup("svc.missing").is_none());
    }

    #[test]
    fn list_services_reflects_current_state_only() {
        let registry = ServiceRegistry::new();
        registry.register(record("svc.b", "acme.b")).unwrap();
        registry.register(record("svc.a", "acme.a")).unwrap();

        let names: Vec<_> = registry.list_services().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["svc.a", "svc.b"]);

        registry.unregister("svc.a");
        let names: Vec<_> = registry.list_services().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["svc.b"]);
    }

    #[test]
    fn routes_are_flattened_across_services() {
        let registry = ServiceRegistry::new();
        registry.register(record("svc.a", "acme.a")).unwrap();
        registry.register(record("svc.b", "acme.b")).unwrap();

        let routes = registry.routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].path, "/svc.a");
        assert_eq!(routes[0].module, "acme.a");
    }

    #[test]
    fn snapshot_serializes_for_the_dashboard() {
        let registry = ServiceRegistry::new();
        registry.register(record("svc.a", "acme.a")).unwrap();
        let snapshot = registry.snapshot_json();
        assert_eq!(snapshot[0]["name"], "svc.a");
        assert_eq!(snapshot[0]["methods"][0]["params"][0]["shape"], "string");
    }
}
