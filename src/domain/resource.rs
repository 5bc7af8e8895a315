//! Resource model: what a group is made of and how it is addressed.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Kind of content a resource carries.
///
/// A group is always served for exactly one type; a request for `all.css`
/// only sees the stylesheet members of the `all` group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Js,
    Css,
}

impl ResourceType {
    pub fn extension(self) -> &'static str {
        match self {
            ResourceType::Js => "js",
            ResourceType::Css => "css",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ResourceType::Js => "application/javascript",
            ResourceType::Css => "text/css",
        }
    }

    /// Infer the type of a resource from the extension of its uri.
    pub fn from_uri(uri: &str) -> Option<Self> {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        let (_, extension) = path.rsplit_once('.')?;
        extension.parse().ok()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported resource type `{0}`")]
pub struct UnsupportedResourceType(pub String);

impl FromStr for ResourceType {
    type Err = UnsupportedResourceType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "js" => Ok(ResourceType::Js),
            "css" => Ok(ResourceType::Css),
            other => Err(UnsupportedResourceType(other.to_string())),
        }
    }
}

/// A single source resource, identified by a uri relative to the resource root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    pub uri: String,
    pub resource_type: ResourceType,
}

impl Resource {
    pub fn new(uri: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            uri: uri.into(),
            resource_type,
        }
    }
}

/// Identifies the artifact a request asks for: a group name served as one type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId {
    pub name: String,
    pub resource_type: ResourceType,
}

impl GroupId {
    pub fn new(name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            name: name.into(),
            resource_type,
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.resource_type)
    }
}

/// A group resolved for one request: its identifier and ordered members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGroup {
    pub id: GroupId,
    pub resources: Vec<Resource>,
}
