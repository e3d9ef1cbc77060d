use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// Identity of one version of one content item.
///
/// Only `item` and `version` take part in the on-disk cache name; `collection`
/// and `sub` locate the content at the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub collection: Uuid,
    pub sub: Uuid,
    pub item: Uuid,
    pub version: i32,
}

impl CacheKey {
    pub fn new(collection: Uuid, sub: Uuid, item: Uuid, version: i32) -> Self {
        Self { collection, sub, item, version }
    }

    /// Same content item, different version.
    #[must_use]
    pub fn with_version(self, version: i32) -> Self {
        Self { version, ..self }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}/{}@{}", self.collection, self.sub, self.item, self.version)
    }
}
