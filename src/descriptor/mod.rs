//! Module descriptors
//!
//! A descriptor is the static, data-only declaration a module attaches to
//! itself: identity, provided/required services, storage needs, priority,
//! and teardown behavior. The engine never inspects module source or
//! runtime type information, only this value.

mod manifest;

pub use manifest::{ManifestShutdown, ModuleManifest};

use crate::error::EngineError;
use std::time::Duration;

/// Default priority assigned when a module does not declare one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Cooperative teardown declaration: the graceful hook runs under this
/// deadline, and lower priority shuts down earlier within a wave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GracefulSpec {
    pub timeout: Duration,
    pub priority: i32,
}

/// Synchronous fallback teardown declaration. The forced hook is a plain
/// blocking call under a short deadline, run only when the graceful hook
/// timed out, failed, or was never declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedSpec {
    pub timeout: Duration,
}

/// Immutable metadata describing one module.
///
/// Built either explicitly through [`DescriptorBuilder`] (the static
/// declaration, which wins) or parsed from a legacy `module.toml` file in
/// the module tree. Owned by discovery for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDescriptor {
    /// Unique dotted name, e.g. `acme.billing`.
    pub identity: String,
    pub version: String,
    pub description: String,
    /// Service name this module registers in Phase 2, if any.
    pub provides: Option<String>,
    /// Service names that must be `Registered` before this module's
    /// Phase 2 may start. Ordered, de-duplicated.
    pub requires: Vec<String>,
    /// Database this module stores its tables in, if any.
    pub database: Option<String>,
    /// Startup tie-break within a dependency depth; lower starts earlier.
    pub priority: i32,
    /// Name under which the module's health probe registers.
    pub health_check: Option<String>,
    pub graceful: Option<GracefulSpec>,
    pub forced: Option<ForcedSpec>,
    /// Modules that must finish their teardown before this one starts its
    /// own (explicit shutdown ordering, in addition to the derived order).
    pub shutdown_after: Vec<String>,
    pub disabled: bool,
}

impl ModuleDescriptor {
    pub fn builder(identity: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(identity)
    }
}

/// Fluent builder producing an immutable [`ModuleDescriptor`].
///
/// # Example
/// ```
/// use modulith::descriptor::ModuleDescriptor;
/// use std::time::Duration;
///
/// let descriptor = ModuleDescriptor::builder("acme.billing")
///     .version("1.2.0")
///     .description("Invoicing and payment orchestration")
///     .provides("svc.billing")
///     .requires("svc.users")
///     .database("billing")
///     .graceful_shutdown(Duration::from_secs(10), 50)
///     .forced_shutdown(Duration::from_secs(2))
///     .build()
///     .unwrap();
/// assert_eq!(descriptor.identity, "acme.billing");
/// ```
pub struct DescriptorBuilder {
    identity: String,
    version: String,
    description: String,
    provides: Option<String>,
    requires: Vec<String>,
    database: Option<String>,
    priority: i32,
    health_check: Option<String>,
    graceful: Option<GracefulSpec>,
    forced: Option<ForcedSpec>,
    shutdown_after: Vec<String>,
    disabled: bool,
}

impl DescriptorBuilder {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            version: "0.0.0".to_string(),
            description: String::new(),
            provides: None,
            requires: Vec::new(),
            database: None,
            priority: DEFAULT_PRIORITY,
            health_check: None,
            graceful: None,
            forced: None,
            shutdown_after: Vec::new(),
            disabled: false,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn provides(mut self, service: impl Into<String>) -> Self {
        self.provides = Some(service.into());
        self
    }

    /// Declare a required service. Duplicates are collapsed, order kept.
    pub fn requires(mut self, service: impl Into<String>) -> Self {
        let service = service.into();
        if !self.requires.contains(&service) {
            self.requires.push(service);
        }
        self
    }

    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn health_check(mut self, name: impl Into<String>) -> Self {
        self.health_check = Some(name.into());
        self
    }

    pub fn graceful_shutdown(mut self, timeout: Duration, priority: i32) -> Self {
        self.graceful = Some(GracefulSpec { timeout, priority });
        self
    }

    pub fn forced_shutdown(mut self, timeout: Duration) -> Self {
        self.forced = Some(ForcedSpec { timeout });
        self
    }

    /// Require the named module to finish its teardown before this one
    /// begins its own.
    pub fn shutdown_after(mut self, module: impl Into<String>) -> Self {
        let module = module.into();
        if !self.shutdown_after.contains(&module) {
            self.shutdown_after.push(module);
        }
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn build(self) -> Result<ModuleDescriptor, EngineError> {
        validate_identity(&self.identity)?;
        if let Some(spec) = &self.graceful {
            if spec.timeout.is_zero() {
                return Err(EngineError::descriptor_parse(
                    &self.identity,
                    "graceful shutdown timeout must be non-zero",
                ));
            }
        }
        if let Some(spec) = &self.forced {
            if spec.timeout.is_zero() {
                return Err(EngineError::descriptor_parse(
                    &self.identity,
                    "forced shutdown timeout must be non-zero",
                ));
            }
        }
        Ok(ModuleDescriptor {
            identity: self.identity,
            version: self.version,
            description: self.description,
            provides: self.provides,
            requires: self.requires,
            database: self.database,
            priority: self.priority,
            health_check: self.health_check,
            graceful: self.graceful,
            forced: self.forced,
            shutdown_after: self.shutdown_after,
            disabled: self.disabled,
        })
    }
}

/// Identities are dotted names: non-empty segments of `[a-z0-9_-]`,
/// separated by single dots.
fn validate_identity(identity: &str) -> Result<(), EngineError> {
    if identity.is_empty() {
        return Err(EngineError::descriptor_parse(
            "<unnamed>",
            "module identity cannot be empty",
        ));
    }
    let valid_segment = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    };
    if !identity.split('.').all(valid_segment) {
        return Err(EngineError::descriptor_parse(
            identity,
            "module identity must be a dotted name of [a-z0-9_-] segments",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_descriptor_with_defaults() {
        let d = ModuleDescriptor::builder("acme.core").build().unwrap();
        assert_eq!(d.priority, DEFAULT_PRIORITY);
        assert!(d.provides.is_none());
        assert!(d.requires.is_empty());
        assert!(!d.disabled);
    }

    #[test]
    fn requires_deduplicates_but_keeps_order() {
        let d = ModuleDescriptor::builder("acme.core")
            .requires("svc.b")
            .requires("svc.a")
            .requires("svc.b")
            .build()
            .unwrap();
        assert_eq!(d.requires, vec!["svc.b", "svc.a"]);
    }

    #[test]
    fn rejects_bad_identities() {
        for bad in ["", "Has.Upper", "double..dot", ".leading", "trailing."] {
            assert!(ModuleDescriptor::builder(bad).build().is_err(), "{bad:?}");
        }
        assert!(ModuleDescriptor::builder("ok.mod-2_x").build().is_ok());
    }

    #[test]
    fn rejects_zero_shutdown_timeouts() {
        let err = ModuleDescriptor::builder("acme.core")
            .graceful_shutdown(Duration::ZERO, 100)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("non-zero"));
    }
}
