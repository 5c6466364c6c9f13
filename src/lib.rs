//! # Modulith
//!
//! A module lifecycle and service-orchestration engine for embedded
//! application hosts.
//!
//! Independently deployable modules declare, through static data-only
//! descriptors, the services they offer, the services they require,
//! their storage needs, and their teardown behavior. The engine discovers
//! those declarations, orders them along the dependency graph, brings the
//! system up through two strictly separated phases, and tears it down in
//! priority-ordered, timeout-bounded reverse order.
//!
//! ## Features
//!
//! - **Declarative descriptors**: builder-produced immutable metadata,
//!   with a legacy `module.toml` fallback per module
//! - **Storage bootstrap**: every declared database is created before any
//!   module constructs, and shared through immutable base handles
//! - **Deterministic ordering**: topological load order with priority
//!   tie-breaks; cycles fail fast, named
//! - **Two-phase bootstrap**: settings-only Phase 1 (concurrent,
//!   registry unreachable), dependency-ordered Phase 2 in waves
//! - **Service registry**: process-wide name → handle directory with
//!   introspection metadata for dashboards and a route list for routing
//! - **Orderly shutdown**: graceful, time-boxed teardown with a
//!   synchronous forced fallback, in reverse dependency order
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use modulith::prelude::*;
//!
//! struct UsersModule;
//!
//! #[async_trait]
//! impl LifecycleModule for UsersModule {
//!     fn identity(&self) -> &str {
//!         "acme.users"
//!     }
//!
//!     fn descriptor(&self) -> Option<ModuleDescriptor> {
//!         ModuleDescriptor::builder("acme.users")
//!             .provides("svc.users")
//!             .database("users")
//!             .build()
//!             .ok()
//!     }
//!
//!     async fn create(&self, ctx: HostContext) -> anyhow::Result<Option<ServiceOffering>> {
//!         let service = Arc::new(UsersService::new(ctx));
//!         Ok(Some(ServiceOffering::new(service)))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let host = Host::builder()
//!         .module(Arc::new(UsersModule))
//!         .module_tree("./modules")
//!         .build()
//!         .await?;
//!
//!     let shutdown = host.spawn_shutdown_handler();
//!     shutdown.await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod health;
pub mod host;
pub mod lifecycle;
pub mod registry;
pub mod storage;

// Re-export core types
pub use descriptor::{DescriptorBuilder, ModuleDescriptor};
pub use error::{EngineError, ErrorKind, Result};
pub use host::{Host, HostBuilder, HostContext};
pub use lifecycle::{LifecycleModule, ModuleState, Service, ServiceOffering};
pub use registry::ServiceRegistry;

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;

/// Prelude module for convenient imports
///
/// ```
/// use modulith::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigService, SettingEntry, SettingsSink};
    pub use crate::descriptor::{DescriptorBuilder, ModuleDescriptor, ModuleManifest};
    pub use crate::discovery::{DependencyGraph, LoadOrder, ModuleDiscovery};
    pub use crate::error::{EngineError, ErrorKind, Result};
    pub use crate::health::{HealthRegistry, HealthStatus};
    pub use crate::host::{Host, HostBuilder, HostContext};
    pub use crate::lifecycle::{
        BootstrapReport, LifecycleModule, ModuleState, Orchestrator, OrchestratorOptions, Service,
        ServiceOffering, ShutdownCoordinator, ShutdownReport, shutdown_signal,
    };
    pub use crate::registry::{MethodSpec, RouteEntry, ServiceInfo, ServiceRegistry};
    pub use crate::storage::{BaseHandle, StorageBootstrap, StorageEngine, TableDecl};
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
