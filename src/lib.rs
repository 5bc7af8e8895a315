//! fascio: a request-time JavaScript and stylesheet bundler.
//!
//! Requests under a configured prefix name a resource group; the
//! [`ProcessingOrchestrator`](application::orchestrator::ProcessingOrchestrator)
//! loads the group's members, runs them through the configured processor
//! chain, caches the artifact by source fingerprint and serves it.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
