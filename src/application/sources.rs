//! Collaborator traits describing where groups and resource bytes come from.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::application::transport::ResourceRequest;
use crate::domain::resource::{ResolvedGroup, Resource};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("request path `{path}` does not name a resource group")]
    MalformedPath { path: String },
    #[error("group `{name}` is not defined")]
    GroupNotFound { name: String },
    #[error("resource type `{extension}` is not supported")]
    UnsupportedType { extension: String },
    #[error("resource `{uri}` not found")]
    ResourceNotFound { uri: String },
    #[error("failed to read resource `{uri}`: {source}")]
    Io {
        uri: String,
        #[source]
        source: io::Error,
    },
}

impl ResolveError {
    pub fn io(uri: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            uri: uri.into(),
            source,
        }
    }

    /// True when the request named something that does not exist.
    pub fn is_not_found(&self) -> bool {
        !matches!(self, ResolveError::Io { .. })
    }
}

/// Maps an inbound request to the group it asks for.
#[async_trait]
pub trait GroupResolver: Send + Sync {
    async fn resolve(&self, request: &ResourceRequest) -> Result<ResolvedGroup, ResolveError>;
}

/// Loads the raw bytes of a single resource.
#[async_trait]
pub trait ResourceLocator: Send + Sync {
    async fn load(&self, resource: &Resource) -> Result<Bytes, ResolveError>;
}
