//! Port traits: the seams between the supervisor core and the outside world.

pub mod alert_sink;
pub mod health_repository;
pub mod launcher;
pub mod prober;

pub use alert_sink::{Alert, AlertSink, EscalationReason};
pub use health_repository::HealthRepository;
pub use launcher::{InstanceEvent, ServiceLauncher};
pub use prober::HealthProber;
