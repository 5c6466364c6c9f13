//! Host façade
//!
//! High-level bootstrap API in the builder shape: register modules,
//! point at the module tree, hand over the storage collaborator, then
//! `build().await` runs the whole sequence (storage bootstrap, discovery,
//! dependency ordering, Phase 1, Phase 2) and returns the running host.
//!
//! # Example
//!
//! ```rust,ignore
//! use modulith::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let host = Host::builder()
//!         .module(Arc::new(UsersModule))
//!         .module(Arc::new(BillingModule))
//!         .module_tree("./modules")
//!         .storage_engine(Arc::new(SqliteEngine::new("./data")))
//!         .build()
//!         .await?;
//!
//!     let handle = host.spawn_shutdown_handler();
//!     // ... serve host.routes() through the routing layer ...
//!     handle.await?;
//!     Ok(())
//! }
//! ```

mod context;

pub use context::HostContext;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{ConfigService, SettingsSink};
use crate::descriptor::ModuleDescriptor;
use crate::discovery::{DependencyGraph, ModuleDiscovery};
use crate::error::EngineError;
use crate::health::HealthRegistry;
use crate::lifecycle::{
    BootstrapReport, LifecycleModule, ModuleState, Orchestrator, OrchestratorOptions,
    ShutdownCoordinator, ShutdownReport,
};
use crate::registry::{RouteEntry, ServiceInfo, ServiceRegistry};
use crate::storage::{StorageBootstrap, StorageEngine, StorageLayout};

pub struct HostBuilder {
    modules: Vec<Arc<dyn LifecycleModule>>,
    module_tree: Option<PathBuf>,
    storage: Option<Arc<dyn StorageEngine>>,
    config: ConfigService,
    options: OrchestratorOptions,
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBuilder {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            module_tree: None,
            storage: None,
            config: ConfigService::new(),
            options: OrchestratorOptions::default(),
        }
    }

    pub fn module(mut self, module: Arc<dyn LifecycleModule>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn modules(mut self, modules: impl IntoIterator<Item = Arc<dyn LifecycleModule>>) -> Self {
        self.modules.extend(modules);
        self
    }

    /// Root of the module tree: legacy `module.toml` declarations and
    /// table declarations are looked up under `<tree>/<identity>/`.
    pub fn module_tree<P: AsRef<Path>>(mut self, module_tree: P) -> Self {
        self.module_tree = Some(module_tree.as_ref().to_path_buf());
        self
    }

    pub fn storage_engine(mut self, engine: Arc<dyn StorageEngine>) -> Self {
        self.storage = Some(engine);
        self
    }

    pub fn config(mut self, config: ConfigService) -> Self {
        self.config = config;
        self
    }

    pub fn phase2_timeout(mut self, timeout: Duration) -> Self {
        self.options.phase2_timeout = timeout;
        self
    }

    pub fn startup_deadline(mut self, deadline: Duration) -> Self {
        self.options.startup_deadline = deadline;
        self
    }

    /// Run the full bootstrap.
    ///
    /// # Errors
    ///
    /// Fails only on the whole-system fatals: storage bootstrap failure
    /// or a dependency cycle. Per-module failures land in the returned
    /// host's [`BootstrapReport`] instead.
    pub async fn build(self) -> Result<Host, EngineError> {
        info!(modules = self.modules.len(), "building host");

        // Descriptor discovery is a pure metadata pass; no module object
        // is constructed before storage stands.
        let discovery = match &self.module_tree {
            Some(tree) => ModuleDiscovery::with_module_tree(tree),
            None => ModuleDiscovery::new(),
        };
        let discovered = discovery.discover(&self.modules);

        let layout = self.bootstrap_storage(&discovered.modules).await?;

        let descriptors: Vec<ModuleDescriptor> = discovered
            .modules
            .iter()
            .map(|m| m.descriptor.clone())
            .collect();
        let (graph, duplicate_rejects) = DependencyGraph::build(&descriptors);
        let order = graph.resolve()?;

        let mut rejected = discovered.rejected;
        let rejected_ids: Vec<String> = duplicate_rejects.iter().map(|(m, _)| m.clone()).collect();
        rejected.extend(duplicate_rejects);
        let accepted: Vec<_> = discovered
            .modules
            .into_iter()
            .filter(|m| !rejected_ids.contains(&m.descriptor.identity))
            .collect();

        let accepted_descriptors: Vec<ModuleDescriptor> =
            accepted.iter().map(|m| m.descriptor.clone()).collect();

        let registry = Arc::new(ServiceRegistry::new());
        let health = Arc::new(HealthRegistry::new());
        let settings = Arc::new(SettingsSink::new());
        let ctx = HostContext::new(Arc::clone(&registry), layout.handles(), self.config.clone());

        let orchestrator = Orchestrator::new(
            accepted,
            rejected,
            order.clone(),
            ctx,
            Arc::clone(&settings),
            Arc::clone(&health),
            self.options,
        );
        let report = orchestrator.run().await?;
        let states = orchestrator.states();

        let coordinator = Arc::new(ShutdownCoordinator::new(
            accepted_descriptors,
            graph.edges().to_vec(),
            &order.sequence,
            Arc::clone(&registry),
            Arc::clone(&health),
            Arc::clone(&states),
        ));

        Ok(Host {
            registry,
            health,
            settings,
            config: self.config,
            report,
            states,
            coordinator,
        })
    }

    async fn bootstrap_storage(
        &self,
        discovered: &[crate::discovery::DiscoveredModule],
    ) -> Result<StorageLayout, EngineError> {
        let declared: Vec<&str> = discovered
            .iter()
            .filter_map(|m| m.descriptor.database.as_deref())
            .collect();

        match &self.storage {
            Some(engine) => {
                let tree = self
                    .module_tree
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("."));
                StorageBootstrap::run(engine.as_ref(), &tree, declared).await
            }
            None if declared.is_empty() => Ok(StorageLayout::empty()),
            None => Err(EngineError::storage_bootstrap(
                "modules declare databases but no storage engine is configured",
            )),
        }
    }
}

/// A bootstrapped host: registry read surface, route list, health
/// registry, and the shutdown coordinator.
pub struct Host {
    registry: Arc<ServiceRegistry>,
    health: Arc<HealthRegistry>,
    settings: Arc<SettingsSink>,
    config: ConfigService,
    report: BootstrapReport,
    states: Arc<dashmap::DashMap<String, ModuleState>>,
    coordinator: Arc<ShutdownCoordinator>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl Host {
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Dashboard surface: metadata snapshots of registered services.
    pub fn services(&self) -> Vec<ServiceInfo> {
        self.registry.list_services()
    }

    /// Routing-layer surface: flat route list from registered modules.
    pub fn routes(&self) -> Vec<RouteEntry> {
        self.registry.routes()
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn settings(&self) -> &Arc<SettingsSink> {
        &self.settings
    }

    pub fn config(&self) -> &ConfigService {
        &self.config
    }

    pub fn report(&self) -> &BootstrapReport {
        &self.report
    }

    pub fn state_of(&self, module: &str) -> Option<ModuleState> {
        self.states.get(module).map(|s| *s)
    }

    pub fn shutdown_coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Drain everything now.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.coordinator.execute().await
    }

    /// Background task that waits for SIGTERM/ctrl-c and then drains.
    pub fn spawn_shutdown_handler(&self) -> tokio::task::JoinHandle<ShutdownReport> {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move { coordinator.wait_for_shutdown().await })
    }
}
