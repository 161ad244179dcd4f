//! Deployment phases, canary ramp and rollback

pub mod canary;
pub mod defaults;
pub mod executor;
pub mod fsm;
pub mod rollback;
pub mod scoring;

pub use executor::{HealthReport, Orchestrator, OrchestratorConfig};
