//! Global configuration and the Phase 1 settings sink

use dashmap::DashMap;
use serde::Serialize;
use std::env;
use std::sync::Arc;

/// Process-global key/value configuration shared with every module through
/// the host context.
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the process environment.
    pub fn from_env() -> Self {
        let service = Self::default();
        for (key, value) in env::vars() {
            service.set(&key, &value);
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }
}

/// One configuration key a module declares during Phase 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingEntry {
    pub key: String,
    pub default: Option<String>,
    pub description: Option<String>,
    pub required: bool,
}

impl SettingEntry {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            default: None,
            description: None,
            required: false,
        }
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A module's declared configuration schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsSchema {
    pub module: String,
    pub entries: Vec<SettingEntry>,
}

/// Phase 1 registration sink.
///
/// The only shared mutable state Phase 1 hooks may touch. Writes are keyed
/// by module identity, so concurrent registration from all modules at once
/// is well-defined: each module owns its own slot.
#[derive(Default)]
pub struct SettingsSink {
    schemas: DashMap<String, SettingsSchema>,
}

impl SettingsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the schema slot of one module.
    pub fn register(&self, module: impl Into<String>, entries: Vec<SettingEntry>) {
        let module = module.into();
        self.schemas.insert(
            module.clone(),
            SettingsSchema { module, entries },
        );
    }

    pub fn get(&self, module: &str) -> Option<SettingsSchema> {
        self.schemas.get(module).map(|s| s.clone())
    }

    /// Snapshot of every registered schema, sorted by module identity.
    pub fn snapshot(&self) -> Vec<SettingsSchema> {
        let mut schemas: Vec<_> = self.schemas.iter().map(|s| s.clone()).collect();
        schemas.sort_by(|a, b| a.module.cmp(&b.module));
        schemas
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_set_get() {
        let config = ConfigService::new();
        config.set("host.name", "alpha");
        assert_eq!(config.get("host.name").as_deref(), Some("alpha"));
        assert_eq!(config.get_or("absent", "fallback"), "fallback");
    }

    #[tokio::test]
    async fn sink_tolerates_concurrent_registration() {
        let sink = Arc::new(SettingsSink::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                let module = format!("acme.mod{i}");
                sink.register(
                    &module,
                    vec![SettingEntry::new("endpoint").required()],
                );
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(sink.len(), 16);
        assert!(sink.get("acme.mod7").is_some());
    }

    #[test]
    fn snapshot_is_sorted_and_restartable() {
        let sink = SettingsSink::new();
        sink.register("b.mod", vec![]);
        sink.register("a.mod", vec![SettingEntry::new("k").default_value("v")]);
        let first: Vec<_> = sink.snapshot().iter().map(|s| s.module.clone()).collect();
        let second: Vec<_> = sink.snapshot().iter().map(|s| s.module.clone()).collect();
        assert_eq!(first, vec!["a.mod", "b.mod"]);
        assert_eq!(first, second);
    }
}
