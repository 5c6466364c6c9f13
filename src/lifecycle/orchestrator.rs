//! Lifecycle orchestrator
//!
//! Drives every discovered module through the two bootstrap phases:
//! Phase 1 (settings registration only, concurrent, no cross-module
//! access) and Phase 2 (full initialization, wave by wave in dependency
//! order). A module's failure degrades the host instead of crashing it;
//! dependents of a failed provider fail with a missing-dependency error
//! rather than hanging.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::discovery::{DiscoveredModule, LoadOrder};
use crate::error::EngineError;
use crate::health::HealthRegistry;
use crate::host::HostContext;
use crate::lifecycle::{ModuleState, ServiceOffering};
use crate::registry::ServiceRecord;

/// Bootstrap deadlines.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Per-module Phase 2 deadline. Expiry cancels only that module's
    /// attempt; siblings keep initializing.
    pub phase2_timeout: Duration,
    /// Overall Phase 2 deadline. A hung bootstrap fails the remaining
    /// modules instead of waiting forever.
    pub startup_deadline: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            phase2_timeout: Duration::from_secs(30),
            startup_deadline: Duration::from_secs(120),
        }
    }
}

/// Final state of one module after bootstrap.
#[derive(Debug, Clone)]
pub struct ModuleReport {
    pub module: String,
    pub state: ModuleState,
    pub error: Option<EngineError>,
}

/// What the bootstrap produced, module by module.
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub load_order: Vec<String>,
    pub modules: Vec<ModuleReport>,
}

impl BootstrapReport {
    pub fn running(&self) -> impl Iterator<Item = &ModuleReport> {
        self.modules
            .iter()
            .filter(|m| m.state == ModuleState::Running)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ModuleReport> {
        self.modules
            .iter()
            .filter(|m| m.state == ModuleState::Failed)
    }

    /// True when at least one module failed but the host itself is up.
    pub fn is_degraded(&self) -> bool {
        self.failed().next().is_some()
    }
}

pub struct Orchestrator {
    discovered: Vec<DiscoveredModule>,
    rejected: Vec<(String, EngineError)>,
    order: LoadOrder,
    ctx: HostContext,
    settings: Arc<crate::config::SettingsSink>,
    health: Arc<HealthRegistry>,
    options: OrchestratorOptions,
    states: Arc<DashMap<String, ModuleState>>,
    errors: Arc<DashMap<String, EngineError>>,
}

impl Orchestrator {
    pub fn new(
        discovered: Vec<DiscoveredModule>,
        rejected: Vec<(String, EngineError)>,
        order: LoadOrder,
        ctx: HostContext,
        settings: Arc<crate::config::SettingsSink>,
        health: Arc<HealthRegistry>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            discovered,
            rejected,
            order,
            ctx,
            settings,
            health,
            options,
            states: Arc::new(DashMap::new()),
            errors: Arc::new(DashMap::new()),
        }
    }

    /// Live per-module states, shared with the shutdown coordinator.
    pub fn states(&self) -> Arc<DashMap<String, ModuleState>> {
        Arc::clone(&self.states)
    }

    fn set_state(&self, module: &str, state: ModuleState) {
        self.states.insert(module.to_string(), state);
    }

    fn fail(&self, module: &str, err: EngineError) {
        error!(module, kind = ?err.kind(), "module failed: {err}");
        self.states.insert(module.to_string(), ModuleState::Failed);
        self.errors.insert(module.to_string(), err);
    }

    /// Run the full bootstrap and report per-module outcomes.
    pub async fn run(&self) -> Result<BootstrapReport, EngineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, modules = self.discovered.len(), "bootstrap starting");

        // Phase barrier: Phase 1 hooks must not be able to observe any
        // service, which holds exactly because the registry is empty and
        // never handed to them.
        if !self.ctx.registry().is_empty() {
            return Err(EngineError::Internal(
                "service registry must be empty before phase 1".to_string(),
            ));
        }

        for found in &self.discovered {
            self.set_state(&found.descriptor.identity, ModuleState::Discovered);
        }
        for (module, err) in &self.rejected {
            self.fail(module, err.clone());
        }

        self.run_phase1().await;
        let offerings = self.instantiate_services().await;
        self.run_phase2(offerings).await;

        let finished_at = Utc::now();
        let report = self.build_report(run_id, started_at, finished_at);
        info!(
            %run_id,
            running = report.running().count(),
            failed = report.failed().count(),
            "bootstrap finished"
        );
        Ok(report)
    }

    /// Phase 1: settings registration for all modules, fully concurrent.
    async fn run_phase1(&self) {
        info!("phase 1: registering settings schemas");
        let mut join: JoinSet<(String, anyhow::Result<()>)> = JoinSet::new();
        let mut task_modules: HashMap<tokio::task::Id, String> = HashMap::new();

        for found in &self.discovered {
            let module = Arc::clone(&found.module);
            let identity = found.descriptor.identity.clone();
            let settings = Arc::clone(&self.settings);
            let handle = join.spawn(async move {
                let result = module.register_settings(&settings).await;
                (identity, result)
            });
            task_modules.insert(handle.id(), found.descriptor.identity.clone());
        }

        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((identity, Ok(()))) => {
                    debug!(module = %identity, "phase 1 done");
                    self.set_state(&identity, ModuleState::Phase1Done);
                }
                Ok((identity, Err(e))) => {
                    self.fail(&identity, EngineError::phase1_failed(&identity, format!("{e:#}")));
                }
                Err(join_err) => {
                    let identity = task_modules
                        .get(&join_err.id())
                        .cloned()
                        .unwrap_or_else(|| "<unknown>".to_string());
                    self.fail(
                        &identity,
                        EngineError::phase1_failed(&identity, "phase 1 hook panicked"),
                    );
                }
            }
        }
    }

    /// Construct one service instance per declaring module. Runs after
    /// Phase 1 and before any Phase 2 hook, while the registry is still
    /// empty.
    async fn instantiate_services(&self) -> HashMap<String, ServiceOffering> {
        info!("instantiating services");
        let mut offerings = HashMap::new();

        for identity in &self.order.sequence {
            let Some(found) = self.find(identity) else {
                continue;
            };
            if self.state_of(identity) != Some(ModuleState::Phase1Done) {
                continue;
            }
            match found.module.create(self.ctx.clone()).await {
                Ok(Some(offering)) => {
                    if found.descriptor.provides.is_none() {
                        self.fail(
                            identity,
                            EngineError::phase2_failed(
                                identity,
                                "module constructed a service but declares no provided service name",
                            ),
                        );
                        continue;
                    }
                    self.set_state(identity, ModuleState::ServiceCreated);
                    offerings.insert(identity.clone(), offering);
                }
                Ok(None) => {
                    if let Some(service) = &found.descriptor.provides {
                        self.fail(
                            identity,
                            EngineError::phase2_failed(
                                identity,
                                format!("module declares service '{service}' but constructed none"),
                            ),
                        );
                    }
                    // Service-less modules stay at Phase1Done and finish
                    // during their wave slot.
                }
                Err(e) => {
                    self.fail(
                        identity,
                        EngineError::phase2_failed(identity, format!("service construction failed: {e:#}")),
                    );
                }
            }
        }
        offerings
    }

    /// Phase 2: dependency-ordered initialization, wave by wave. Members
    /// of one wave run concurrently; an edge forces strict sequencing via
    /// wave membership.
    async fn run_phase2(&self, mut offerings: HashMap<String, ServiceOffering>) {
        info!(waves = self.order.waves.len(), "phase 2: initializing modules");
        let deadline = Instant::now() + self.options.startup_deadline;

        for (index, wave) in self.order.waves.iter().enumerate() {
            debug!(wave = index, members = wave.len(), "starting wave");
            let mut join: JoinSet<(String, Result<(), EngineError>)> = JoinSet::new();
            let mut task_modules: HashMap<tokio::task::Id, String> = HashMap::new();

            for identity in wave {
                let Some(found) = self.find(identity) else {
                    continue;
                };
                match self.state_of(identity) {
                    Some(ModuleState::ServiceCreated) | Some(ModuleState::Phase1Done) => {}
                    _ => continue,
                }

                // Every required service must already be registered;
                // a failed provider surfaces here as a missing service.
                if let Some(service) = found
                    .descriptor
                    .requires
                    .iter()
                    .find(|s| !self.ctx.registry().contains(s))
                {
                    self.fail(identity, EngineError::missing_service(identity, service));
                    continue;
                }

                let Some(offering) = offerings.remove(identity) else {
                    // No service declared: nothing to initialize.
                    self.set_state(identity, ModuleState::Phase2Done);
                    self.set_state(identity, ModuleState::Running);
                    continue;
                };

                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    warn!(module = %identity, "startup deadline exhausted before module could start");
                    self.fail(
                        identity,
                        EngineError::Phase2Timeout {
                            module: identity.clone(),
                            timeout: self.options.startup_deadline,
                        },
                    );
                    continue;
                }
                let per_module = self.options.phase2_timeout.min(remaining);

                let ctx = self.ctx.clone();
                let service = Arc::clone(&offering.service);
                let module = identity.clone();
                let handle = join.spawn(async move {
                    let result = match timeout(per_module, service.initialize(&ctx)).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => {
                            Err(EngineError::phase2_failed(&module, format!("{e:#}")))
                        }
                        Err(_) => Err(EngineError::Phase2Timeout {
                            module: module.clone(),
                            timeout: per_module,
                        }),
                    };
                    (module, result)
                });
                task_modules.insert(handle.id(), identity.clone());
                offerings.insert(identity.clone(), offering);
            }

            while let Some(joined) = join.join_next().await {
                match joined {
                    Ok((identity, Ok(()))) => {
                        self.set_state(&identity, ModuleState::Phase2Done);
                        if let Some(offering) = offerings.remove(&identity) {
                            self.register(&identity, offering);
                        }
                    }
                    Ok((identity, Err(e))) => {
                        offerings.remove(&identity);
                        self.fail(&identity, e);
                    }
                    Err(join_err) => {
                        let identity = task_modules
                            .get(&join_err.id())
                            .cloned()
                            .unwrap_or_else(|| "<unknown>".to_string());
                        offerings.remove(&identity);
                        self.fail(
                            &identity,
                            EngineError::phase2_failed(&identity, "phase 2 hook panicked"),
                        );
                    }
                }
            }
        }
    }

    /// Insert the service into the registry and finish the module's
    /// transitions: `Registered`, health-check registration, `Running`.
    fn register(&self, identity: &str, offering: ServiceOffering) {
        let Some(found) = self.find(identity) else {
            return;
        };
        let descriptor = &found.descriptor;
        let Some(service_name) = descriptor.provides.clone() else {
            return;
        };

        let mut routes = offering.routes;
        for route in &mut routes {
            route.module = identity.to_string();
        }
        let record = ServiceRecord {
            name: service_name.clone(),
            module: identity.to_string(),
            handle: Arc::clone(&offering.service),
            methods: offering.methods,
            routes,
            priority: descriptor.priority,
            registered_at: Utc::now(),
        };
        if let Err(e) = self.ctx.registry().register(record) {
            self.fail(identity, e);
            return;
        }
        self.set_state(identity, ModuleState::Registered);
        debug!(module = %identity, service = %service_name, "registered");

        if let Some(probe) = &descriptor.health_check {
            self.health
                .register(probe, identity, Arc::clone(&offering.service));
        }
        self.set_state(identity, ModuleState::Running);
    }

    fn find(&self, identity: &str) -> Option<&DiscoveredModule> {
        self.discovered
            .iter()
            .find(|m| m.descriptor.identity == identity)
    }

    fn state_of(&self, identity: &str) -> Option<ModuleState> {
        self.states.get(identity).map(|s| *s)
    }

    fn build_report(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> BootstrapReport {
        let mut modules = Vec::with_capacity(self.states.len());
        for identity in self
            .order
            .sequence
            .iter()
            .chain(self.rejected.iter().map(|(m, _)| m))
        {
            let Some(state) = self.state_of(identity) else {
                continue;
            };
            modules.push(ModuleReport {
                module: identity.clone(),
                state,
                error: self.errors.get(identity).map(|e| e.clone()),
            });
        }
        BootstrapReport {
            run_id,
            started_at,
            finished_at,
            load_order: self.order.sequence.clone(),
            modules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigService, SettingsSink};
    use crate::descriptor::ModuleDescriptor;
    use crate::discovery::{DependencyGraph, DescriptorSource, DiscoveredModule};
    use crate::error::ErrorKind;
    use crate::lifecycle::{LifecycleModule, Service};
    use crate::registry::{MethodSpec, ServiceRecord, ServiceRegistry};
    use async_trait::async_trait;

    struct NullService;

    #[async_trait]
    impl Service for NullService {}

    struct PlainModule {
        descriptor: ModuleDescriptor,
        fail_create: bool,
    }

    #[async_trait]
    impl LifecycleModule for PlainModule {
        fn identity(&self) -> &str {
            &self.descriptor.identity
        }

        fn descriptor(&self) -> Option<ModuleDescriptor> {
            Some(self.descriptor.clone())
        }

        async fn create(&self, _ctx: HostContext) -> anyhow::Result<Option<ServiceOffering>> {
            if self.fail_create {
                anyhow::bail!("no database connection");
            }
            if self.descriptor.provides.is_none() {
                return Ok(None);
            }
            Ok(Some(
                ServiceOffering::new(Arc::new(NullService)).method(MethodSpec::new("noop")),
            ))
        }
    }

    fn orchestrator_for(
        modules: Vec<(ModuleDescriptor, bool)>,
        registry: Arc<ServiceRegistry>,
    ) -> Orchestrator {
        let descriptors: Vec<_> = modules.iter().map(|(d, _)| d.clone()).collect();
        let (graph, rejected) = DependencyGraph::build(&descriptors);
        let order = graph.resolve().unwrap();
        let discovered = modules
            .into_iter()
            .map(|(descriptor, fail_create)| DiscoveredModule {
                module: Arc::new(PlainModule {
                    descriptor: descriptor.clone(),
                    fail_create,
                }),
                descriptor,
                source: DescriptorSource::Static,
            })
            .collect();
        let ctx = HostContext::new(
            registry,
            Arc::new(HashMap::new()),
            ConfigService::new(),
        );
        Orchestrator::new(
            discovered,
            rejected,
            order,
            ctx,
            Arc::new(SettingsSink::new()),
            Arc::new(HealthRegistry::new()),
            OrchestratorOptions::default(),
        )
    }

    fn descriptor(identity: &str, provides: Option<&str>) -> ModuleDescriptor {
        let mut builder = ModuleDescriptor::builder(identity);
        if let Some(service) = provides {
            builder = builder.provides(service);
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn refuses_to_start_with_populated_registry() {
        let registry = Arc::new(ServiceRegistry::new());
        registry
            .register(ServiceRecord {
                name: "svc.ghost".to_string(),
                module: "acme.ghost".to_string(),
                handle: Arc::new(NullService),
                methods: Vec::new(),
                routes: Vec::new(),
                priority: 100,
                registered_at: Utc::now(),
            })
            .unwrap();

        let orchestrator =
            orchestrator_for(vec![(descriptor("acme.a", Some("svc.a")), false)], registry);
        let err = orchestrator.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn service_less_module_runs_without_registry_entry() {
        let registry = Arc::new(ServiceRegistry::new());
        let orchestrator = orchestrator_for(
            vec![(descriptor("acme.sidecar", None), false)],
            Arc::clone(&registry),
        );

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.modules[0].state, ModuleState::Running);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn constructor_failure_is_phase2_scoped() {
        let registry = Arc::new(ServiceRegistry::new());
        let orchestrator = orchestrator_for(
            vec![
                (descriptor("acme.broken", Some("svc.broken")), true),
                (descriptor("acme.fine", Some("svc.fine")), false),
            ],
            Arc::clone(&registry),
        );

        let report = orchestrator.run().await.unwrap();
        let broken = report
            .modules
            .iter()
            .find(|m| m.module == "acme.broken")
            .unwrap();
        assert_eq!(broken.state, ModuleState::Failed);
        assert_eq!(
            broken.error.as_ref().unwrap().kind(),
            ErrorKind::Phase2Failed
        );
        assert!(registry.contains("svc.fine"));
        assert!(report.is_degraded());
    }

    #[tokio::test]
    async fn declared_service_not_constructed_is_an_error() {
        struct LyingModule;

        #[async_trait]
        impl LifecycleModule for LyingModule {
            fn identity(&self) -> &str {
                "acme.liar"
            }

            fn descriptor(&self) -> Option<ModuleDescriptor> {
                Some(
                    ModuleDescriptor::builder("acme.liar")
                        .provides("svc.liar")
                        .build()
                        .unwrap(),
                )
            }

            async fn create(&self, _ctx: HostContext) -> anyhow::Result<Option<ServiceOffering>> {
                Ok(None)
            }
        }

        let d = ModuleDescriptor::builder("acme.liar")
            .provides("svc.liar")
            .build()
            .unwrap();
        let (graph, rejected) = DependencyGraph::build(std::slice::from_ref(&d));
        let order = graph.resolve().unwrap();
        let registry = Arc::new(ServiceRegistry::new());
        let ctx = HostContext::new(
            Arc::clone(&registry),
            Arc::new(HashMap::new()),
            ConfigService::new(),
        );
        let orchestrator = Orchestrator::new(
            vec![DiscoveredModule {
                module: Arc::new(LyingModule),
                descriptor: d,
                source: DescriptorSource::Static,
            }],
            rejected,
            order,
            ctx,
            Arc::new(SettingsSink::new()),
            Arc::new(HealthRegistry::new()),
            OrchestratorOptions::default(),
        );

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.modules[0].state, ModuleState::Failed);
        assert!(registry.is_empty());
    }
}
