//! Application layer: runtime configuration, processors and the
//! request-time orchestrator.

pub mod context;
pub mod error;
pub mod orchestrator;
pub mod processors;
pub mod runtime_config;
pub mod sources;
pub mod transport;
