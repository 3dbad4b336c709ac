//! Service Descriptor Store.
//!
//! Holds the validated, immutable descriptor set for the lifetime of the
//! supervisor. Construction fails fast on any invalid descriptor: no service
//! is launched from a set that did not validate as a whole.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::dependency_graph::DependencyGraph;
use crate::domain::errors::ConfigError;
use crate::domain::models::{CheckKind, ServiceDescriptor};

#[derive(Debug, Clone)]
pub struct DescriptorStore {
    descriptors: BTreeMap<String, Arc<ServiceDescriptor>>,
    graph: DependencyGraph,
    waves: Vec<Vec<String>>,
}

impl DescriptorStore {
    pub fn new(descriptors: Vec<ServiceDescriptor>) -> Result<Self, ConfigError> {
        if descriptors.is_empty() {
            return Err(ConfigError::NoServices);
        }
        validate_descriptors(&descriptors)?;

        let graph = DependencyGraph::from_descriptors(&descriptors);
        let waves = graph.waves()?;
        let descriptors = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(d)))
            .collect();

        Ok(Self {
            descriptors,
            graph,
            waves,
        })
    }

    pub fn get(&self, id: &str) -> Option<Arc<ServiceDescriptor>> {
        self.descriptors.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Startup waves: dependencies strictly before dependents.
    pub fn startup_waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// Every service id, dependencies before dependents.
    pub fn startup_order(&self) -> Vec<String> {
        self.waves.iter().flatten().cloned().collect()
    }

    /// Reverse of the startup order: dependents stop before their dependencies.
    pub fn shutdown_order(&self) -> Vec<String> {
        let mut order = self.startup_order();
        order.reverse();
        order
    }
}

/// Validate a descriptor set without building a store.
///
/// An empty set is valid here; [`DescriptorStore::new`] additionally
/// requires at least one service.
pub fn validate_descriptors(descriptors: &[ServiceDescriptor]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for descriptor in descriptors {
        if descriptor.id.trim().is_empty() {
            return Err(ConfigError::EmptyServiceId);
        }
        if !seen.insert(descriptor.id.as_str()) {
            return Err(ConfigError::DuplicateServiceId(descriptor.id.clone()));
        }
        if descriptor.start.command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand(descriptor.id.clone()));
        }
        validate_restart_policy(descriptor)?;
        validate_health_check(descriptor)?;
    }

    for descriptor in descriptors {
        if let Some(missing) = descriptor.depends_on.iter().find(|dep| !seen.contains(dep.as_str())) {
            return Err(ConfigError::UnknownDependency {
                service_id: descriptor.id.clone(),
                dependency: missing.clone(),
            });
        }
    }

    if let Some(cycle) = DependencyGraph::from_descriptors(descriptors).detect_cycle() {
        return Err(ConfigError::DependencyCycle(cycle));
    }

    Ok(())
}

fn validate_restart_policy(descriptor: &ServiceDescriptor) -> Result<(), ConfigError> {
    let policy = &descriptor.restart_policy;
    let invalid = |reason: &str| ConfigError::InvalidRestartPolicy {
        service_id: descriptor.id.clone(),
        reason: reason.to_string(),
    };

    if policy.max_consecutive_failures == 0 {
        return Err(invalid("max_consecutive_failures must be positive"));
    }
    if policy.backoff_base_ms == 0 {
        return Err(invalid("backoff_base_ms must be positive"));
    }
    if policy.backoff_max_ms < policy.backoff_base_ms {
        return Err(invalid("backoff_max_ms must be at least backoff_base_ms"));
    }
    if policy.cooldown_after_restart_ms == 0 {
        return Err(invalid("cooldown_after_restart_ms must be positive"));
    }
    if policy.flap_threshold == 0 {
        return Err(invalid("flap_threshold must be positive"));
    }
    if policy.sustained_healthy_probes == 0 {
        return Err(invalid("sustained_healthy_probes must be positive"));
    }
    Ok(())
}

fn validate_health_check(descriptor: &ServiceDescriptor) -> Result<(), ConfigError> {
    let check = &descriptor.health_check;
    let invalid = |reason: String| ConfigError::InvalidHealthCheck {
        service_id: descriptor.id.clone(),
        reason,
    };

    if check.timeout_ms == 0 {
        return Err(invalid("timeout_ms must be positive".to_string()));
    }

    let target = check.target.as_deref().map(str::trim).filter(|t| !t.is_empty());
    match (check.kind, target) {
        (kind, None) if kind.requires_target() => {
            Err(invalid(format!("{} check requires a target", kind.as_str())))
        }
        (CheckKind::HttpPing, Some(url)) => match reqwest::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
            Ok(parsed) => Err(invalid(format!("unsupported URL scheme '{}'", parsed.scheme()))),
            Err(e) => Err(invalid(format!("invalid URL '{url}': {e}"))),
        },
        (CheckKind::TcpConnect, Some(address)) if !address.contains(':') => {
            Err(invalid(format!("'{address}' is not a host:port address")))
        }
        _ => Ok(()),
    }
}
