use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the orchestration engine.
///
/// Startup failures are module-scoped wherever possible: a single module
/// failing degrades the host (fewer services available) instead of killing
/// it. The two exceptions are `StorageBootstrapFailure` and
/// `CyclicDependency`, which abort the whole bootstrap.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// No safe partial state exists without databases; aborts startup.
    #[error("storage bootstrap failed: {reason}")]
    StorageBootstrapFailure { reason: String },

    /// The dependency graph contains a cycle; aborts before Phase 2.
    #[error("cyclic module dependency: {cycle}")]
    CyclicDependency { cycle: String },

    #[error("invalid descriptor for module '{module}': {reason}")]
    DescriptorParse { module: String, reason: String },

    #[error("service '{service}' is already provided by module '{owner}'")]
    DuplicateServiceRegistration { service: String, owner: String },

    #[error("phase 1 failed for module '{module}': {message}")]
    Phase1Failed { module: String, message: String },

    #[error("phase 2 failed for module '{module}': {message}")]
    Phase2Failed { module: String, message: String },

    #[error("phase 2 for module '{module}' did not finish within {timeout:?}")]
    Phase2Timeout { module: String, timeout: Duration },

    #[error("module '{module}' requires service '{service}', which is not registered")]
    MissingRequiredService { module: String, service: String },

    /// Logged and tolerated; the forced pass is still attempted.
    #[error("graceful shutdown of module '{module}' exceeded {timeout:?}")]
    ShutdownHookTimeout { module: String, timeout: Duration },

    /// Logged and tolerated; never halts the remaining teardown.
    #[error("shutdown hook of module '{module}' failed: {message}")]
    ShutdownHookError { module: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Machine-readable error kind, stable across message wording changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StorageBootstrapFailure,
    CyclicDependency,
    DescriptorParse,
    DuplicateServiceRegistration,
    Phase1Failed,
    Phase2Failed,
    Phase2Timeout,
    MissingRequiredService,
    ShutdownHookTimeout,
    ShutdownHookError,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StorageBootstrapFailure { .. } => ErrorKind::StorageBootstrapFailure,
            Self::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            Self::DescriptorParse { .. } => ErrorKind::DescriptorParse,
            Self::DuplicateServiceRegistration { .. } => ErrorKind::DuplicateServiceRegistration,
            Self::Phase1Failed { .. } => ErrorKind::Phase1Failed,
            Self::Phase2Failed { .. } => ErrorKind::Phase2Failed,
            Self::Phase2Timeout { .. } => ErrorKind::Phase2Timeout,
            Self::MissingRequiredService { .. } => ErrorKind::MissingRequiredService,
            Self::ShutdownHookTimeout { .. } => ErrorKind::ShutdownHookTimeout,
            Self::ShutdownHookError { .. } => ErrorKind::ShutdownHookError,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for the two whole-system fatals; everything else is module-scoped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StorageBootstrapFailure { .. } | Self::CyclicDependency { .. }
        )
    }

    pub fn storage_bootstrap(reason: impl Into<String>) -> Self {
        Self::StorageBootstrapFailure {
            reason: reason.into(),
        }
    }

    pub fn descriptor_parse(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DescriptorParse {
            module: module.into(),
            reason: reason.into(),
        }
    }

    pub fn phase1_failed(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Phase1Failed {
            module: module.into(),
            message: message.into(),
        }
    }

    pub fn phase2_failed(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Phase2Failed {
            module: module.into(),
            message: message.into(),
        }
    }

    pub fn missing_service(module: impl Into<String>, service: impl Into<String>) -> Self {
        Self::MissingRequiredService {
            module: module.into(),
            service: service.into(),
        }
    }
}
