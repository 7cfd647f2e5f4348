/// Runtime orchestration and service wiring - Gateway

mod orchestrator;
mod services;

pub use orchestrator::Orchestrator;
pub use services::{ServiceStatus, Services, ShutdownReport, StartupReport};
