//! Shutdown coordinator
//!
//! Executes graceful then forced teardown in priority- and
//! dependency-aware reverse order: a module that others depend on shuts
//! down after its dependents. Within a wave, graceful hooks run
//! concurrently under their declared timeouts; any member whose graceful
//! hook timed out, failed, or was never declared gets its forced hook (a
//! plain blocking call under a shorter deadline) before the next wave
//! begins. The coordinator's job is "attempt an orderly shutdown of
//! everything", so individual failures are logged and tolerated.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::descriptor::{DEFAULT_PRIORITY, ForcedSpec, GracefulSpec, ModuleDescriptor};
use crate::discovery::topo_waves;
use crate::error::EngineError;
use crate::health::HealthRegistry;
use crate::lifecycle::{ModuleState, Service};
use crate::registry::ServiceRegistry;

/// How one hook invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Completed,
    TimedOut,
    Failed(String),
    /// No hook declared.
    Skipped,
}

/// Per-module teardown result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownOutcome {
    pub module: String,
    pub graceful: HookOutcome,
    /// `None` when the graceful hook completed and no fallback was needed.
    pub forced: Option<HookOutcome>,
}

/// Completion is reported even when individual modules failed.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub outcomes: Vec<ShutdownOutcome>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| {
            o.graceful == HookOutcome::Completed
                || matches!(o.forced, Some(HookOutcome::Completed))
        })
    }
}

/// One unit of teardown work, built from the startup descriptors at
/// shutdown time.
struct ShutdownTask {
    module: String,
    service_name: String,
    service: Arc<dyn Service>,
    graceful: Option<GracefulSpec>,
    forced: Option<ForcedSpec>,
}

pub struct ShutdownCoordinator {
    descriptors: HashMap<String, ModuleDescriptor>,
    /// Startup edges, provider → dependent.
    startup_edges: Vec<(String, String)>,
    /// Reverse of the startup sequence, the fallback teardown order.
    reverse_sequence: Vec<String>,
    registry: Arc<ServiceRegistry>,
    health: Arc<HealthRegistry>,
    states: Arc<DashMap<String, ModuleState>>,
    triggered: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(
        descriptors: impl IntoIterator<Item = ModuleDescriptor>,
        startup_edges: Vec<(String, String)>,
        startup_sequence: &[String],
        registry: Arc<ServiceRegistry>,
        health: Arc<HealthRegistry>,
        states: Arc<DashMap<String, ModuleState>>,
    ) -> Self {
        let descriptors = descriptors
            .into_iter()
            .map(|d| (d.identity.clone(), d))
            .collect();
        let reverse_sequence = startup_sequence.iter().rev().cloned().collect();
        Self {
            descriptors,
            startup_edges,
            reverse_sequence,
            registry,
            health,
            states,
            triggered: AtomicBool::new(false),
        }
    }

    /// Block until SIGTERM/ctrl-c, then drain everything.
    pub async fn wait_for_shutdown(&self) -> ShutdownReport {
        shutdown_signal().await;
        self.execute().await
    }

    /// Run the teardown. Triggered once; later calls are no-ops.
    pub async fn execute(&self) -> ShutdownReport {
        if self.triggered.swap(true, Ordering::SeqCst) {
            warn!("shutdown already triggered, ignoring");
            return ShutdownReport::default();
        }
        info!("starting orderly shutdown");

        let waves = self.teardown_waves();
        let mut report = ShutdownReport::default();

        for wave in waves {
            let mut tasks = Vec::new();
            for module in &wave {
                if let Some(task) = self.task_for(module) {
                    self.states
                        .insert(module.clone(), ModuleState::ShuttingDown);
                    tasks.push(task);
                }
            }
            if tasks.is_empty() {
                continue;
            }

            // Graceful and, where needed, forced cleanup of the whole
            // wave completes before any earlier-started module is touched.
            let mut join = JoinSet::new();
            for task in tasks {
                join.spawn(run_task(task));
            }
            while let Some(joined) = join.join_next().await {
                let Ok((outcome, service_name)) = joined else {
                    continue;
                };
                self.registry.unregister(&service_name);
                self.health.remove_module(&outcome.module);
                self.states
                    .insert(outcome.module.clone(), ModuleState::Stopped);
                report.outcomes.push(outcome);
            }
        }

        // Service-less modules have no hooks; they just stop.
        let still_running: Vec<String> = self
            .states
            .iter()
            .filter(|e| *e.value() == ModuleState::Running)
            .map(|e| e.key().clone())
            .collect();
        for module in still_running {
            self.states.insert(module, ModuleState::Stopped);
        }

        info!(
            modules = report.outcomes.len(),
            clean = report.is_clean(),
            "shutdown complete"
        );
        report
    }

    /// Reverse-dependency waves over the modules currently holding a live
    /// service, tie-broken by declared shutdown priority (lower first).
    /// Equal depth, equal priority, and no explicit edge between two
    /// modules leaves their relative order implementation-defined.
    fn teardown_waves(&self) -> Vec<Vec<String>> {
        let live: Vec<String> = self
            .reverse_sequence
            .iter()
            .filter(|m| {
                let up = self
                    .states
                    .get(m.as_str())
                    .is_some_and(|s| matches!(*s, ModuleState::Registered | ModuleState::Running));
                up && self
                    .descriptors
                    .get(*m)
                    .and_then(|d| d.provides.as_ref())
                    .is_some_and(|s| self.registry.contains(s))
            })
            .cloned()
            .collect();

        let position: HashMap<&str, usize> = live
            .iter()
            .enumerate()
            .map(|(i, m)| (m.as_str(), i))
            .collect();

        // Dependents tear down before their providers; explicit
        // `shutdown_after` declarations add edges on top.
        let mut edges: Vec<(String, String)> = self
            .startup_edges
            .iter()
            .map(|(provider, dependent)| (dependent.clone(), provider.clone()))
            .collect();
        for module in &live {
            if let Some(descriptor) = self.descriptors.get(module) {
                for earlier in &descriptor.shutdown_after {
                    edges.push((earlier.clone(), module.clone()));
                }
            }
        }

        let priority_of = |module: &str| {
            self.descriptors
                .get(module)
                .and_then(|d| d.graceful.as_ref())
                .map(|g| g.priority)
                .unwrap_or(DEFAULT_PRIORITY)
        };
        let key = |module: &str| {
            (
                priority_of(module),
                position.get(module).copied().unwrap_or(usize::MAX),
            )
        };

        let waves = match topo_waves(&live, &edges, key) {
            Ok(waves) => waves,
            Err(_) => {
                // Explicit shutdown_after declarations contradicted the
                // dependency order; honor the derived order and proceed.
                warn!("explicit shutdown ordering forms a cycle, falling back to reverse load order");
                return live.into_iter().map(|m| vec![m]).collect();
            }
        };

        // Dependency order first, declared priority second: a wave only
        // runs concurrently across equal priorities, lower first.
        let mut grouped = Vec::new();
        for wave in waves {
            let mut current: Vec<String> = Vec::new();
            for module in wave {
                if let Some(last) = current.last() {
                    if priority_of(last) != priority_of(&module) {
                        grouped.push(std::mem::take(&mut current));
                    }
                }
                current.push(module);
            }
            if !current.is_empty() {
                grouped.push(current);
            }
        }
        grouped
    }

    fn task_for(&self, module: &str) -> Option<ShutdownTask> {
        let descriptor = self.descriptors.get(module)?;
        let service_name = descriptor.provides.clone()?;
        let service = self.registry.lookup(&service_name)?;
        Some(ShutdownTask {
            module: module.to_string(),
            service_name,
            service,
            graceful: descriptor.graceful.clone(),
            forced: descriptor.forced.clone(),
        })
    }
}

/// Graceful attempt, then the forced fallback when it did not complete.
async fn run_task(task: ShutdownTask) -> (ShutdownOutcome, String) {
    let module = task.module.clone();

    let graceful = match &task.graceful {
        None => HookOutcome::Skipped,
        Some(spec) => {
            debug!(module = %module, timeout = ?spec.timeout, "graceful shutdown");
            match timeout(spec.timeout, task.service.shutdown_graceful()).await {
                Ok(Ok(())) => HookOutcome::Completed,
                Ok(Err(e)) => {
                    let err = EngineError::ShutdownHookError {
                        module: module.clone(),
                        message: format!("{e:#}"),
                    };
                    warn!(module = %module, "{err}");
                    HookOutcome::Failed(format!("{e:#}"))
                }
                Err(_) => {
                    // Abandon the hook and move on; do not block the rest
                    // of shutdown on it.
                    let err = EngineError::ShutdownHookTimeout {
                        module: module.clone(),
                        timeout: spec.timeout,
                    };
                    warn!(module = %module, "{err}");
                    HookOutcome::TimedOut
                }
            }
        }
    };

    let forced = if graceful == HookOutcome::Completed {
        None
    } else {
        Some(run_forced(&task, &module).await)
    };

    (
        ShutdownOutcome {
            module,
            graceful,
            forced,
        },
        task.service_name,
    )
}

async fn run_forced(task: &ShutdownTask, module: &str) -> HookOutcome {
    let Some(spec) = &task.forced else {
        return HookOutcome::Skipped;
    };
    debug!(module, timeout = ?spec.timeout, "forced shutdown");

    let service = Arc::clone(&task.service);
    let blocking = tokio::task::spawn_blocking(move || service.shutdown_forced());
    match timeout(spec.timeout, blocking).await {
        Ok(Ok(Ok(()))) => HookOutcome::Completed,
        Ok(Ok(Err(e))) => {
            // Swallowed: a forced cleanup that fails must not abort the
            // remaining cleanups.
            let err = EngineError::ShutdownHookError {
                module: module.to_string(),
                message: format!("{e:#}"),
            };
            error!(module, "{err}");
            HookOutcome::Failed(format!("{e:#}"))
        }
        Ok(Err(join_err)) => {
            error!(module, "forced shutdown panicked: {join_err}");
            HookOutcome::Failed("forced hook panicked".to_string())
        }
        Err(_) => {
            let err = EngineError::ShutdownHookTimeout {
                module: module.to_string(),
                timeout: spec.timeout,
            };
            error!(module, "{err}");
            HookOutcome::TimedOut
        }
    }
}

/// Completes when the process receives ctrl-c or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received ctrl-c");
        },
        _ = terminate => {
            info!("received SIGTERM");
        },
    }
}
