pub mod health_prober;
pub mod process_launcher;
pub mod supervisor;

pub use health_prober::{classify_http_response, evaluate_resource_usage, Prober, ResourceUsage};
pub use process_launcher::ProcessLauncher;
pub use supervisor::{Supervisor, SupervisorParts};
