//! Service launcher port.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::errors::StartError;
use crate::domain::models::{ServiceDescriptor, ServiceInstance, StopResult};

/// Events published by a launcher about the processes it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceEvent {
    /// The process exited without a stop having been requested.
    Terminated {
        service_id: String,
        instance_id: Uuid,
        exit_code: Option<i32>,
    },
}

/// Starts and stops service processes.
///
/// The launcher is the only component holding OS process handles; nothing
/// else signals a managed process directly.
#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    /// Spawn a new instance of the service.
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<ServiceInstance, StartError>;

    /// Request graceful termination, force-killing after `grace`.
    async fn stop(&self, instance: &ServiceInstance, grace: Duration) -> StopResult;

    /// Cheap liveness check.
    async fn is_alive(&self, instance: &ServiceInstance) -> bool;

    /// Subscribe to instance events.
    fn subscribe(&self) -> broadcast::Receiver<InstanceEvent>;
}
