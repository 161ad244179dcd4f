//! In-memory caches

pub mod results;
