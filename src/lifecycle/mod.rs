//! Module lifecycle
//!
//! The bootstrap and teardown machinery, driven by the host:
//!
//! ```text
//! 1. Storage Bootstrap (all declared databases created)
//!    ↓
//! 2. Discovery + Dependency Graph (load order computed)
//!    ↓
//! 3. Phase 1: settings registration      ← all modules, concurrent
//!    ↓
//! 4. Service instantiation               ← registry still empty
//!    ↓
//! 5. Phase 2: full initialization        ← dependency order, in waves
//!    ↓
//! 6. Registered services + health checks
//!    ↓
//! [Running...]
//!    ↓
//! 7. Termination signal (SIGTERM / ctrl-c)
//!    ↓
//! 8. Graceful pass, forced fallback      ← reverse order, in waves
//!    ↓
//! 9. Stopped
//! ```
//!
//! Phase 1 hooks can register their configuration schema and nothing
//! else: the service registry is empty and never handed to them. Phase 2
//! runs wave by wave in dependency order, so a module only ever observes
//! services of modules initialized before it.

mod orchestrator;
mod shutdown;
mod traits;

pub use orchestrator::{BootstrapReport, ModuleReport, Orchestrator, OrchestratorOptions};
pub use shutdown::{
    HookOutcome, ShutdownCoordinator, ShutdownOutcome, ShutdownReport, shutdown_signal,
};
pub use traits::{LifecycleModule, ModuleState, Service, ServiceOffering};
