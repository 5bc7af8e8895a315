//! Domain layer types: the resource model and content fingerprints.

pub mod fingerprint;
pub mod resource;
