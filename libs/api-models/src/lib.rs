//! Wire models shared by the fabrollout HTTP surface.

pub mod models;

pub use models::{ComponentHealth, ErrorResponse, HealthStatus, VersionResponse};
