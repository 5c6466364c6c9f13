//! Legacy declaration files
//!
//! Modules that predate the builder API declare themselves through a
//! `module.toml` next to their code. Discovery falls back to this file
//! when a module supplies no explicit static descriptor; the static
//! descriptor wins when both exist.

use crate::descriptor::{DEFAULT_PRIORITY, ModuleDescriptor};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// `module.toml` structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Module identity (dotted name).
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Service name registered in Phase 2.
    #[serde(default)]
    pub provides: Option<String>,
    /// Required service names.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Database name this module's tables live in.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub health_check: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub shutdown: Option<ManifestShutdown>,
}

/// `[shutdown]` table of a `module.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestShutdown {
    /// Graceful hook deadline in milliseconds; absent means no graceful hook.
    #[serde(default)]
    pub graceful_timeout_ms: Option<u64>,
    #[serde(default = "default_priority")]
    pub graceful_priority: i32,
    /// Forced hook deadline in milliseconds; absent means no forced hook.
    #[serde(default)]
    pub forced_timeout_ms: Option<u64>,
    /// Modules that must finish teardown before this one starts its own.
    #[serde(default)]
    pub after: Vec<String>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl ModuleManifest {
    /// Load and validate a manifest from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let module_hint = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let contents = std::fs::read_to_string(path).map_err(|e| {
            EngineError::descriptor_parse(&module_hint, format!("failed to read manifest: {e}"))
        })?;

        let manifest: ModuleManifest = toml::from_str(&contents).map_err(|e| {
            EngineError::descriptor_parse(&module_hint, format!("failed to parse manifest: {e}"))
        })?;

        if manifest.name.is_empty() {
            return Err(EngineError::descriptor_parse(
                &module_hint,
                "manifest name cannot be empty",
            ));
        }
        Ok(manifest)
    }

    /// Convert into the engine's descriptor form.
    pub fn into_descriptor(self) -> Result<ModuleDescriptor, EngineError> {
        let mut builder = ModuleDescriptor::builder(&self.name)
            .version(&self.version)
            .description(self.description.unwrap_or_default())
            .priority(self.priority)
            .disabled(self.disabled);

        if let Some(service) = self.provides {
            builder = builder.provides(service);
        }
        for service in self.requires {
            builder = builder.requires(service);
        }
        if let Some(database) = self.database {
            builder = builder.database(database);
        }
        if let Some(name) = self.health_check {
            builder = builder.health_check(name);
        }
        if let Some(shutdown) = self.shutdown {
            if let Some(ms) = shutdown.graceful_timeout_ms {
                builder = builder
                    .graceful_shutdown(Duration::from_millis(ms), shutdown.graceful_priority);
            }
            if let Some(ms) = shutdown.forced_timeout_ms {
                builder = builder.forced_shutdown(Duration::from_millis(ms));
            }
            for module in shutdown.after {
                builder = builder.shutdown_after(module);
            }
        }
        builder.build()
    }
}

// Keep the conversion usable in iterator chains.
impl TryFrom<ModuleManifest> for ModuleDescriptor {
    type Error = EngineError;

    fn try_from(manifest: ModuleManifest) -> Result<Self, Self::Error> {
        manifest.into_descriptor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const FULL_MANIFEST: &str = r#"
        name = "acme.billing"
        version = "1.2.0"
        description = "Invoicing"
        provides = "svc.billing"
        requires = ["svc.users", "svc.ledger"]
        database = "billing"
        priority = 40
        health_check = "billing"

        [shutdown]
        graceful_timeout_ms = 10000
        graceful_priority = 50
        forced_timeout_ms = 2000
        after = ["acme.webhooks"]
    "#;

    #[test]
    fn parses_full_manifest_into_descriptor() {
        let manifest: ModuleManifest = toml::from_str(FULL_MANIFEST).unwrap();
        let descriptor = manifest.into_descriptor().unwrap();

        assert_eq!(descriptor.identity, "acme.billing");
        assert_eq!(descriptor.provides.as_deref(), Some("svc.billing"));
        assert_eq!(descriptor.requires, vec!["svc.users", "svc.ledger"]);
        assert_eq!(descriptor.database.as_deref(), Some("billing"));
        assert_eq!(descriptor.priority, 40);
        let graceful = descriptor.graceful.unwrap();
        assert_eq!(graceful.timeout, Duration::from_secs(10));
        assert_eq!(graceful.priority, 50);
        assert_eq!(descriptor.forced.unwrap().timeout, Duration::from_secs(2));
        assert_eq!(descriptor.shutdown_after, vec!["acme.webhooks"]);
    }

    #[test]
    fn minimal_manifest_gets_defaults() {
        let manifest: ModuleManifest =
            toml::from_str("name = \"acme.min\"\nversion = \"0.1.0\"").unwrap();
        let descriptor = manifest.into_descriptor().unwrap();
        assert_eq!(descriptor.priority, DEFAULT_PRIORITY);
        assert!(descriptor.graceful.is_none());
        assert!(descriptor.forced.is_none());
        assert!(!descriptor.disabled);
    }

    #[test]
    fn from_file_reports_module_scoped_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let module_dir = dir.path().join("acme.broken");
        fs::create_dir(&module_dir).unwrap();
        fs::write(module_dir.join("module.toml"), "name = [not toml").unwrap();

        let err = ModuleManifest::from_file(module_dir.join("module.toml")).unwrap_err();
        match err {
            EngineError::DescriptorParse { module, .. } => assert_eq!(module, "acme.broken"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
