//! Module discovery
//!
//! Walks the registered module set once per process start and extracts a
//! descriptor for each: the explicit static declaration when the module
//! carries one, otherwise the legacy `module.toml` in the module tree
//! (first found wins). Disabled modules are skipped; a module whose
//! declaration cannot be parsed is reported and the rest proceed.

mod graph;

pub use graph::{DependencyGraph, LoadOrder};
pub(crate) use graph::topo_waves;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::descriptor::{ModuleDescriptor, ModuleManifest};
use crate::error::EngineError;
use crate::lifecycle::LifecycleModule;

/// Where a module's descriptor came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorSource {
    /// Explicit static declaration from the module itself.
    Static,
    /// Legacy declaration file.
    Manifest(PathBuf),
}

/// One successfully discovered module.
pub struct DiscoveredModule {
    pub module: Arc<dyn LifecycleModule>,
    pub descriptor: ModuleDescriptor,
    pub source: DescriptorSource,
}

/// Everything discovery learned in one pass. Descriptors are owned here
/// for the process lifetime.
pub struct DiscoveryReport {
    pub modules: Vec<DiscoveredModule>,
    /// Identities skipped because their descriptor flags them disabled.
    pub disabled: Vec<String>,
    /// Modules that produced no usable descriptor, with the reason.
    pub rejected: Vec<(String, EngineError)>,
}

/// Scans the registered module set against an optional module tree.
pub struct ModuleDiscovery {
    module_tree: Option<PathBuf>,
}

impl ModuleDiscovery {
    pub fn new() -> Self {
        Self { module_tree: None }
    }

    pub fn with_module_tree<P: AsRef<Path>>(module_tree: P) -> Self {
        Self {
            module_tree: Some(module_tree.as_ref().to_path_buf()),
        }
    }

    /// Run the pass. Registration order is preserved for accepted
    /// modules; duplicate identities keep the first registration.
    pub fn discover(&self, modules: &[Arc<dyn LifecycleModule>]) -> DiscoveryReport {
        info!(candidates = modules.len(), "discovering modules");

        let mut report = DiscoveryReport {
            modules: Vec::with_capacity(modules.len()),
            disabled: Vec::new(),
            rejected: Vec::new(),
        };
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

        for module in modules {
            let identity = module.identity().to_string();
            if !seen.insert(identity.clone()) {
                warn!(module = %identity, "duplicate module registration ignored");
                report.rejected.push((
                    identity.clone(),
                    EngineError::descriptor_parse(&identity, "module identity registered twice"),
                ));
                continue;
            }

            match self.descriptor_for(&identity, module.as_ref()) {
                Ok((descriptor, source)) => {
                    if descriptor.identity != identity {
                        report.rejected.push((
                            identity.clone(),
                            EngineError::descriptor_parse(
                                &identity,
                                format!(
                                    "descriptor identity '{}' does not match module identity",
                                    descriptor.identity
                                ),
                            ),
                        ));
                        continue;
                    }
                    if descriptor.disabled {
                        debug!(module = %identity, "module disabled, skipping");
                        report.disabled.push(identity);
                        continue;
                    }
                    debug!(module = %identity, ?source, "module discovered");
                    report.modules.push(DiscoveredModule {
                        module: Arc::clone(module),
                        descriptor,
                        source,
                    });
                }
                Err(e) => {
                    warn!(module = %identity, error = %e, "descriptor rejected");
                    report.rejected.push((identity, e));
                }
            }
        }

        info!(
            discovered = report.modules.len(),
            disabled = report.disabled.len(),
            rejected = report.rejected.len(),
            "discovery complete"
        );
        report
    }

    /// Static declaration first, legacy file second; first found wins.
    fn descriptor_for(
        &self,
        identity: &str,
        module: &dyn LifecycleModule,
    ) -> Result<(ModuleDescriptor, DescriptorSource), EngineError> {
        if let Some(descriptor) = module.descriptor() {
            return Ok((descriptor, DescriptorSource::Static));
        }

        let Some(tree) = &self.module_tree else {
            return Err(EngineError::descriptor_parse(
                identity,
                "no static descriptor and no module tree configured",
            ));
        };
        let manifest_path = tree.join(identity).join("module.toml");
        if !manifest_path.exists() {
            return Err(EngineError::descriptor_parse(
                identity,
                format!("no static descriptor and no {}", manifest_path.display()),
            ));
        }
        let descriptor = ModuleManifest::from_file(&manifest_path)?.into_descriptor()?;
        Ok((descriptor, DescriptorSource::Manifest(manifest_path)))
    }
}

impl Default for ModuleDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostContext;
    use crate::lifecycle::ServiceOffering;
    use async_trait::async_trait;
    use std::fs;

    struct TestModule {
        identity: String,
        descriptor: Option<ModuleDescriptor>,
    }

    impl TestModule {
        fn with_static(identity: &str, descriptor: ModuleDescriptor) -> Arc<dyn LifecycleModule> {
            Arc::new(Self {
                identity: identity.to_string(),
                descriptor: Some(descriptor),
            })
        }

        fn bare(identity: &str) -> Arc<dyn LifecycleModule> {
            Arc::new(Self {
                identity: identity.to_string(),
                descriptor: None,
            })
        }
    }

    #[async_trait]
    impl LifecycleModule for TestModule {
        fn identity(&self) -> &str {
            &self.identity
        }

        fn descriptor(&self) -> Option<ModuleDescriptor> {
            self.descriptor.clone()
        }

        async fn create(&self, _ctx: HostContext) -> anyhow::Result<Option<ServiceOffering>> {
            Ok(None)
        }
    }

    #[test]
    fn static_descriptor_wins_over_manifest() {
        let tree = tempfile::tempdir().unwrap();
        let dir = tree.path().join("acme.both");
        fs::create_dir(&dir).unwrap();
        fs::write(
            dir.join("module.toml"),
            "name = \"acme.both\"\nversion = \"9.9.9\"\n",
        )
        .unwrap();

        let static_descriptor = ModuleDescriptor::builder("acme.both")
            .version("1.0.0")
            .build()
            .unwrap();
        let discovery = ModuleDiscovery::with_module_tree(tree.path());
        let report =
            discovery.discover(&[TestModule::with_static("acme.both", static_descriptor)]);

        assert_eq!(report.modules.len(), 1);
        assert_eq!(report.modules[0].descriptor.version, "1.0.0");
        assert_eq!(report.modules[0].source, DescriptorSource::Static);
    }

    #[test]
    fn falls_back_to_manifest_file() {
        let tree = tempfile::tempdir().unwrap();
        let dir = tree.path().join("acme.legacy");
        fs::create_dir(&dir).unwrap();
        fs::write(
            dir.join("module.toml"),
            "name = \"acme.legacy\"\nversion = \"0.3.0\"\nprovides = \"svc.legacy\"\n",
        )
        .unwrap();

        let discovery = ModuleDiscovery::with_module_tree(tree.path());
        let report = discovery.discover(&[TestModule::bare("acme.legacy")]);

        assert_eq!(report.modules.len(), 1);
        let found = &report.modules[0];
        assert_eq!(found.descriptor.provides.as_deref(), Some("svc.legacy"));
        assert!(matches!(found.source, DescriptorSource::Manifest(_)));
    }

    #[test]
    fn disabled_modules_are_skipped() {
        let descriptor = ModuleDescriptor::builder("acme.off")
            .disabled(true)
            .build()
            .unwrap();
        let report =
            ModuleDiscovery::new().discover(&[TestModule::with_static("acme.off", descriptor)]);
        assert!(report.modules.is_empty());
        assert_eq!(report.disabled, vec!["acme.off"]);
    }

    #[test]
    fn parse_failure_is_module_scoped() {
        let tree = tempfile::tempdir().unwrap();
        let dir = tree.path().join("acme.broken");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("module.toml"), "version = [oops").unwrap();

        let ok = ModuleDescriptor::builder("acme.ok").build().unwrap();
        let discovery = ModuleDiscovery::with_module_tree(tree.path());
        let report = discovery.discover(&[
            TestModule::bare("acme.broken"),
            TestModule::with_static("acme.ok", ok),
        ]);

        assert_eq!(report.modules.len(), 1);
        assert_eq!(report.modules[0].descriptor.identity, "acme.ok");
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, "acme.broken");
    }

    #[test]
    fn mismatched_identity_is_rejected() {
        let descriptor = ModuleDescriptor::builder("acme.other").build().unwrap();
        let report = ModuleDiscovery::new()
            .discover(&[TestModule::with_static("acme.expected", descriptor)]);
        assert!(report.modules.is_empty());
        assert_eq!(report.rejected[0].0, "acme.expected");
    }
}
