//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod locator;
pub mod model;
pub mod telemetry;
