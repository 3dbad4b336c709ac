pub mod dependency_graph;
pub mod descriptor_store;
pub mod health_state;
pub mod orchestrator;
pub mod recovery_policy;

pub use dependency_graph::DependencyGraph;
pub use descriptor_store::{validate_descriptors, DescriptorStore};
pub use health_state::HealthStateStore;
pub use orchestrator::{Orchestrator, ServiceStatus};
pub use recovery_policy::{RecoveryAction, RecoveryPolicyEngine, RecoveryState};
