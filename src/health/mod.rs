//! Health-check registry
//!
//! Modules that declare a health check get their probe registered the
//! moment they reach `Registered`. The dashboard polls snapshots from
//! here; probes disappear as their modules shut down.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use crate::lifecycle::Service;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub name: String,
    pub module: String,
    pub status: HealthStatus,
}

struct HealthProbe {
    module: String,
    service: Arc<dyn Service>,
}

/// Name → probe map, populated after `Registered`, drained at shutdown.
#[derive(Default)]
pub struct HealthRegistry {
    probes: DashMap<String, HealthProbe>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        module: impl Into<String>,
        service: Arc<dyn Service>,
    ) {
        let name = name.into();
        let module = module.into();
        tracing::debug!(probe = %name, %module, "health check registered");
        self.probes.insert(name, HealthProbe { module, service });
    }

    pub fn remove_module(&self, module: &str) {
        self.probes.retain(|_, probe| probe.module != module);
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub async fn check(&self, name: &str) -> Option<HealthReport> {
        let (module, service) = {
            let probe = self.probes.get(name)?;
            (probe.module.clone(), Arc::clone(&probe.service))
        };
        let status = match service.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(format!("{e:#}")),
        };
        Some(HealthReport {
            name: name.to_string(),
            module,
            status,
        })
    }

    /// Probe everything currently registered, sorted by probe name.
    pub async fn check_all(&self) -> Vec<HealthReport> {
        let names: Vec<String> = self.probes.iter().map(|p| p.key().clone()).collect();
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            if let Some(report) = self.check(&name).await {
                reports.push(report);
            }
        }
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FlakyService {
        healthy: bool,
    }

    #[async_trait]
    impl Service for FlakyService {
        async fn health_check(&self) -> anyhow::Result<()> {
            if self.healthy {
                Ok(())
            } else {
                anyhow::bail!("connection pool exhausted")
            }
        }
    }

    #[tokio::test]
    async fn reports_healthy_and_unhealthy_probes() {
        let registry = HealthRegistry::new();
        registry.register("billing", "acme.billing", Arc::new(FlakyService { healthy: true }));
        registry.register("ledger", "acme.ledger", Arc::new(FlakyService { healthy: false }));

        let reports = registry.check_all().await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].status, HealthStatus::Healthy);
        assert_eq!(
            reports[1].status,
            HealthStatus::Unhealthy("connection pool exhausted".to_string())
        );
    }

    #[tokio::test]
    async fn removing_a_module_removes_its_probes() {
        let registry = HealthRegistry::new();
        registry.register("billing", "acme.billing", Arc::new(FlakyService { healthy: true }));
        registry.remove_module("acme.billing");
        assert!(registry.is_empty());
        assert!(registry.check("billing").await.is_none());
    }
}
