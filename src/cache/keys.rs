use std::fmt;

use crate::domain::resource::GroupId;

/// Identifies one processed artifact.
///
/// `fingerprint` is the digest of the group's sources, each framed by its uri
/// and length, not of the output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub group: GroupId,
    pub minimize: bool,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(group: GroupId, minimize: bool, fingerprint: impl Into<String>) -> Self {
        Self {
            group,
            minimize,
            fingerprint: fingerprint.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[minimize={}]@{}",
            self.group, self.minimize, self.fingerprint
        )
    }
}
