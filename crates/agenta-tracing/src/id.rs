//! Trace and span identifiers.
//!
//! Identifiers are time-ordered UUIDv7 values rendered as 32 lowercase hex
//! characters without hyphens. The same source serves both traces and spans.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for a trace or span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Borrow the hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_shape() {
        let id = Id::next();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id.as_str(), id.as_str().to_lowercase());

        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<Id> = (0..10_000).map(|_| Id::next()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..1_000).map(|_| Id::next()).collect::<Vec<_>>()))
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 4_000);
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let first = Id::next();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = Id::next();
        assert!(first < second);
    }
}
