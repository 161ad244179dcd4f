//! fabrollout library
//!
//! Deployment orchestration core: a phase executor driving platform, service
//! mesh, security, compliance and monitoring collaborators through a pooled,
//! circuit-broken client layer, with distributed locking per deployment.

pub mod app;
pub mod cache;
pub mod collaborators;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod pool;
pub mod resilience;
pub mod server;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod utils;
pub mod workers;
