//! Health prober port.

use async_trait::async_trait;

use crate::domain::models::{ProbeResult, ServiceDescriptor, ServiceInstance};

/// Performs one health evaluation of a running service.
///
/// Implementations must honor `descriptor.health_check.timeout_ms` and
/// report a hung check as `Unhealthy` with detail `"timeout"` rather than
/// returning an error.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, descriptor: &ServiceDescriptor, instance: &ServiceInstance) -> ProbeResult;
}
