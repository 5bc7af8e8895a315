//! TOML group model and the resolver backed by it.
//!
//! ```toml
//! [[groups]]
//! name = "all"
//! resources = ["css/reset.css", "js/app.js"]
//! ```
//!
//! A request for `<prefix>/all.css` resolves to the stylesheet members of
//! `all`, in declaration order.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::sources::{GroupResolver, ResolveError};
use crate::application::transport::ResourceRequest;
use crate::cache::{PeriodicTask, rw_read, rw_write};
use crate::domain::resource::{GroupId, ResolvedGroup, Resource, ResourceType};

const SOURCE: &str = "infra::model";
const METRIC_MODEL_RELOAD_TOTAL: &str = "fascio_model_reload_total";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read group model `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse group model: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("group `{name}` is defined more than once")]
    DuplicateGroup { name: String },
    #[error("group name `{name}` is invalid: {reason}")]
    InvalidGroupName { name: String, reason: &'static str },
    #[error("resource `{uri}` in group `{group}` is neither .js nor .css")]
    UnsupportedResource { group: String, uri: String },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModel {
    #[serde(default)]
    groups: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGroup {
    name: String,
    #[serde(default)]
    resources: Vec<String>,
}

/// Named groups of resources, validated on parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupModel {
    groups: BTreeMap<String, Vec<Resource>>,
}

impl GroupModel {
    pub fn parse(text: &str) -> Result<Self, ModelError> {
        let raw: RawModel = toml::from_str(text)?;
        let mut groups = BTreeMap::new();

        for group in raw.groups {
            let name = group.name.trim().to_string();
            validate_group_name(&name)?;
            if groups.contains_key(&name) {
                return Err(ModelError::DuplicateGroup { name });
            }

            let resources = group
                .resources
                .into_iter()
                .map(|uri| match ResourceType::from_uri(&uri) {
                    Some(resource_type) => Ok(Resource::new(uri, resource_type)),
                    None => Err(ModelError::UnsupportedResource {
                        group: name.clone(),
                        uri,
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            groups.insert(name, resources);
        }

        Ok(Self { groups })
    }

    pub async fn load(path: &Path) -> Result<Self, ModelError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ModelError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&text)
    }

    /// Members of `name`, in declaration order.
    pub fn group(&self, name: &str) -> Option<&[Resource]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

fn validate_group_name(name: &str) -> Result<(), ModelError> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains('/') {
        "must not contain `/`"
    } else {
        return Ok(());
    };
    Err(ModelError::InvalidGroupName {
        name: name.to_string(),
        reason,
    })
}

/// Resolves `<prefix>/<group>.<js|css>` against a [`GroupModel`].
pub struct ModelGroupResolver {
    prefix: String,
    model_path: Option<PathBuf>,
    model: RwLock<Arc<GroupModel>>,
}

impl ModelGroupResolver {
    /// A resolver over a fixed model; [`Self::reload`] keeps it as is.
    pub fn new(prefix: impl Into<String>, model: GroupModel) -> Self {
        Self {
            prefix: prefix.into(),
            model_path: None,
            model: RwLock::new(Arc::new(model)),
        }
    }

    /// Load the model from `path`; later reloads read the same file.
    pub async fn from_file(
        prefix: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, ModelError> {
        let path = path.into();
        let model = GroupModel::load(&path).await?;
        Ok(Self {
            prefix: prefix.into(),
            model_path: Some(path),
            model: RwLock::new(Arc::new(model)),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn model(&self) -> Arc<GroupModel> {
        Arc::clone(&rw_read(&self.model, SOURCE, "model"))
    }

    /// Re-read the model file and swap it in. On error the previous model
    /// stays active. Returns the number of groups now loaded.
    pub async fn reload(&self) -> Result<usize, ModelError> {
        let Some(path) = &self.model_path else {
            return Ok(self.model().len());
        };
        let model = GroupModel::load(path).await?;
        let groups = model.len();
        *rw_write(&self.model, SOURCE, "reload") = Arc::new(model);
        Ok(groups)
    }
}

#[async_trait]
impl GroupResolver for ModelGroupResolver {
    async fn resolve(&self, request: &ResourceRequest) -> Result<ResolvedGroup, ResolveError> {
        let path = request.path();
        let malformed = || ResolveError::MalformedPath {
            path: path.to_string(),
        };

        let file = path
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|file| !file.is_empty() && !file.contains('/'))
            .ok_or_else(malformed)?;
        let (name, extension) = file.rsplit_once('.').ok_or_else(malformed)?;
        let resource_type = extension
            .parse::<ResourceType>()
            .map_err(|_| ResolveError::UnsupportedType {
                extension: extension.to_string(),
            })?;

        let model = self.model();
        let members = model
            .group(name)
            .ok_or_else(|| ResolveError::GroupNotFound {
                name: name.to_string(),
            })?;

        Ok(ResolvedGroup {
            id: GroupId::new(name, resource_type),
            resources: members
                .iter()
                .filter(|resource| resource.resource_type == resource_type)
                .cloned()
                .collect(),
        })
    }
}

/// Reloads a [`ModelGroupResolver`] on every scheduler tick.
pub struct ModelReloadTask {
    resolver: Arc<ModelGroupResolver>,
}

impl ModelReloadTask {
    pub fn new(resolver: Arc<ModelGroupResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl PeriodicTask for ModelReloadTask {
    fn name(&self) -> &'static str {
        "model-reload"
    }

    async fn run(&self) {
        match self.resolver.reload().await {
            Ok(groups) => {
                counter!(METRIC_MODEL_RELOAD_TOTAL, "result" => "ok").increment(1);
                info!(target = "fascio::model", groups, "group model reloaded");
            }
            Err(err) => {
                counter!(METRIC_MODEL_RELOAD_TOTAL, "result" => "error").increment(1);
                warn!(
                    target = "fascio::model",
                    error = %err,
                    "group model reload failed; keeping previous model"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"
[[groups]]
name = "all"
resources = ["css/reset.css", "js/app.js", "css/site.css"]

[[groups]]
name = "empty"
"#;

    fn resolver() -> ModelGroupResolver {
        ModelGroupResolver::new("/wro", GroupModel::parse(MODEL).unwrap())
    }

    async fn resolve(resolver: &ModelGroupResolver, uri: &str) -> Result<ResolvedGroup, ResolveError> {
        resolver
            .resolve(&ResourceRequest::from_uri(uri).unwrap())
            .await
    }

    #[test]
    fn model_parses_groups_in_order() {
        let model = GroupModel::parse(MODEL).unwrap();
        assert_eq!(model.group_names().collect::<Vec<_>>(), vec!["all", "empty"]);
        let uris: Vec<&str> = model
            .group("all")
            .unwrap()
            .iter()
            .map(|resource| resource.uri.as_str())
            .collect();
        assert_eq!(uris, vec!["css/reset.css", "js/app.js", "css/site.css"]);
        assert!(model.group("empty").unwrap().is_empty());
    }

    #[test]
    fn model_rejects_bad_definitions() {
        let duplicate = "[[groups]]\nname = \"a\"\n[[groups]]\nname = \"a\"\n";
        assert!(matches!(
            GroupModel::parse(duplicate),
            Err(ModelError::DuplicateGroup { name }) if name == "a"
        ));

        let image = "[[groups]]\nname = \"a\"\nresources = [\"logo.png\"]\n";
        assert!(matches!(
            GroupModel::parse(image),
            Err(ModelError::UnsupportedResource { .. })
        ));

        let slash = "[[groups]]\nname = \"a/b\"\n";
        assert!(matches!(
            GroupModel::parse(slash),
            Err(ModelError::InvalidGroupName { .. })
        ));

        assert!(matches!(
            GroupModel::parse("groups = 3"),
            Err(ModelError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn resolves_members_of_requested_type() {
        let resolver = resolver();
        let group = resolve(&resolver, "/wro/all.css").await.unwrap();
        assert_eq!(group.id, GroupId::new("all", ResourceType::Css));
        let uris: Vec<&str> = group.resources.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(uris, vec!["css/reset.css", "css/site.css"]);

        let group = resolve(&resolver, "/wro/all.js?minimize=false").await.unwrap();
        assert_eq!(group.resources.len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_paths_are_classified() {
        let resolver = resolver();
        assert!(matches!(
            resolve(&resolver, "/wro/missing.js").await,
            Err(ResolveError::GroupNotFound { .. })
        ));
        assert!(matches!(
            resolve(&resolver, "/wro/all.png").await,
            Err(ResolveError::UnsupportedType { extension }) if extension == "png"
        ));
        for uri in ["/wro/all", "/wro/", "/other/all.js", "/wro/a/all.js", "/wrox/all.js"] {
            assert!(
                matches!(resolve(&resolver, uri).await, Err(ResolveError::MalformedPath { .. })),
                "{uri} should be malformed"
            );
        }
    }

    #[tokio::test]
    async fn reload_picks_up_new_groups_and_survives_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.toml");
        std::fs::write(&path, MODEL).unwrap();

        let resolver = Arc::new(ModelGroupResolver::from_file("/wro", &path).await.unwrap());
        assert!(resolve(&resolver, "/wro/extra.js").await.is_err());

        std::fs::write(
            &path,
            format!("{MODEL}\n[[groups]]\nname = \"extra\"\nresources = [\"js/x.js\"]\n"),
        )
        .unwrap();
        ModelReloadTask::new(Arc::clone(&resolver)).run().await;
        assert_eq!(resolve(&resolver, "/wro/extra.js").await.unwrap().resources.len(), 1);

        std::fs::write(&path, "not [valid").unwrap();
        assert!(resolver.reload().await.is_err());
        assert_eq!(resolver.model().len(), 3);
    }
}
