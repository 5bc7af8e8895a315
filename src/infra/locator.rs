//! Filesystem-backed resource loading.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::application::sources::{ResolveError, ResourceLocator};
use crate::domain::resource::Resource;

/// Reads resources relative to a root directory.
///
/// Resource uris are relative paths; a leading `/` is ignored. Uris that
/// would escape the root (`..`) are refused.
#[derive(Debug, Clone)]
pub struct FsResourceLocator {
    root: PathBuf,
}

impl FsResourceLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_path(&self, uri: &str) -> Option<PathBuf> {
        let relative = Path::new(uri.trim_start_matches('/'));
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(path)
    }
}

#[async_trait]
impl ResourceLocator for FsResourceLocator {
    async fn load(&self, resource: &Resource) -> Result<Bytes, ResolveError> {
        let path = self
            .resolve_path(&resource.uri)
            .ok_or_else(|| ResolveError::MalformedPath {
                path: resource.uri.clone(),
            })?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ResolveError::ResourceNotFound {
                uri: resource.uri.clone(),
            }),
            Err(err) => Err(ResolveError::io(resource.uri.clone(), err)),
        }
    }
}
