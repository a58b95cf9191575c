//! Surrogate key resolution

use crate::errors::{Result, WarehouseError};
use crate::model::EntityKind;
use std::collections::HashMap;

/// Map a parent business key to the surrogate key of its open version
///
/// Parents are always keyed by a single integer id.
#[allow(clippy::result_large_err)]
pub trait KeyResolver {
    /// # Errors
    ///
    /// Returns `ExErrorKind::UnresolvedReference` if the key has no open
    /// version.
    fn resolve(&self, kind: EntityKind, business_key: i64) -> Result<i64>;
}

/// Resolver over a fixed in-memory table
#[derive(Debug, Clone, Default)]
pub struct MapResolver {
    keys: HashMap<(EntityKind, i64), i64>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: EntityKind, business_key: i64, surrogate_key: i64) {
        self.keys.insert((kind, business_key), surrogate_key);
    }
}

impl KeyResolver for MapResolver {
    fn resolve(&self, kind: EntityKind, business_key: i64) -> Result<i64> {
        self.keys.get(&(kind, business_key)).copied().ok_or_else(|| {
            WarehouseError::UnresolvedReference {
                entity: kind,
                business_key: business_key.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExErrorKind;

    #[test]
    fn test_map_resolver_is_keyed_by_kind() {
        let mut resolver = MapResolver::new();
        resolver.insert(EntityKind::User, 1, 10);

        assert_eq!(resolver.resolve(EntityKind::User, 1).unwrap(), 10);
        let err = resolver.resolve(EntityKind::Course, 1).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::UnresolvedReference);
        assert_eq!(err.entity(), Some("course"));
    }
}
