//! Lifecycle traits and module states
//!
//! The two seams of the engine: [`LifecycleModule`] is what a module
//! implements to participate in bootstrap, [`Service`] is what its
//! constructed service instance implements to participate in Phase 2
//! initialization, health checks, and teardown.

use async_trait::async_trait;
use serde::Serialize;

use crate::config::SettingsSink;
use crate::descriptor::ModuleDescriptor;
use crate::host::HostContext;
use crate::registry::{MethodSpec, RouteEntry};
use std::sync::Arc;

/// Per-module position in the bootstrap/teardown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Descriptor parsed, nothing run yet.
    Discovered,
    /// Settings schema registered.
    Phase1Done,
    /// Service instance constructed, not yet initialized.
    ServiceCreated,
    /// Full initialization finished.
    Phase2Done,
    /// Service inserted into the registry.
    Registered,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Phase1Done => "phase1-done",
            Self::ServiceCreated => "service-created",
            Self::Phase2Done => "phase2-done",
            Self::Registered => "registered",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a module hands back from construction: the live service instance
/// plus the introspection metadata and routes it wants published alongside.
pub struct ServiceOffering {
    pub service: Arc<dyn Service>,
    pub methods: Vec<MethodSpec>,
    pub routes: Vec<RouteEntry>,
}

impl ServiceOffering {
    pub fn new(service: Arc<dyn Service>) -> Self {
        Self {
            service,
            methods: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }

    pub fn route(mut self, route: RouteEntry) -> Self {
        self.routes.push(route);
        self
    }
}

/// A module as seen by the orchestrator.
///
/// # Example
/// ```rust,ignore
/// use modulith::prelude::*;
///
/// struct BillingModule;
///
/// #[async_trait]
/// impl LifecycleModule for BillingModule {
///     fn identity(&self) -> &str {
///         "acme.billing"
///     }
///
///     fn descriptor(&self) -> Option<ModuleDescriptor> {
///         ModuleDescriptor::builder("acme.billing")
///             .provides("svc.billing")
///             .requires("svc.users")
///             .build()
///             .ok()
///     }
///
///     async fn create(&self, ctx: HostContext) -> anyhow::Result<Option<ServiceOffering>> {
///         let service = Arc::new(BillingService::new(ctx));
///         Ok(Some(ServiceOffering::new(service)))
///     }
/// }
/// ```
#[async_trait]
pub trait LifecycleModule: Send + Sync {
    /// Unique dotted module identity.
    fn identity(&self) -> &str;

    /// Explicit static declaration. When `None`, discovery falls back to
    /// the module's legacy `module.toml` in the module tree.
    fn descriptor(&self) -> Option<ModuleDescriptor> {
        None
    }

    /// Phase 1 hook: register this module's configuration schema.
    ///
    /// Runs for all modules concurrently, in no particular order. The
    /// sink is the only shared state reachable here; the service registry
    /// is still empty and is not passed in.
    async fn register_settings(&self, _settings: &SettingsSink) -> anyhow::Result<()> {
        Ok(())
    }

    /// Construct this module's service instance, if it declares one.
    ///
    /// Invoked once, after Phase 1 and before any Phase 2 hook runs, so
    /// the registry inside `ctx` is still empty here. Hold on to the
    /// context for later; actual cross-service work belongs in
    /// [`Service::initialize`].
    async fn create(&self, ctx: HostContext) -> anyhow::Result<Option<ServiceOffering>>;
}

/// A constructed service instance.
///
/// Hooks take `&self`: services own their interior mutability, and the
/// same `Arc` handle is shared between the registry and its consumers.
#[async_trait]
pub trait Service: Send + Sync {
    /// Phase 2 hook: full initialization, external I/O allowed.
    ///
    /// Runs in dependency order. Required services of earlier modules are
    /// already `Registered` and may be looked up through `ctx`; services
    /// of later modules are not observable yet.
    async fn initialize(&self, _ctx: &HostContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Cooperative teardown, run under the descriptor's graceful timeout.
    async fn shutdown_graceful(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Synchronous fallback teardown. Runs on a blocking thread under the
    /// forced timeout, only when the graceful pass did not complete.
    fn shutdown_forced(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Liveness probe, registered when the descriptor names one.
    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
