//! Existence seams.
//!
//! [`NameSource`] is the authoritative bulk source of canonical names.
//! [`ExistenceCheck`] is the read side used by the resolver; the SQLite
//! backed index in `pkgmirage` implements it, and so does a plain
//! `HashSet` for tests.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::MirageResult;
use crate::query::canonical_name;

/// Bulk interface returning the complete current set of names in one pass.
#[async_trait]
pub trait NameSource: Send + Sync {
    /// Short label for logs (usually a URL).
    fn describe(&self) -> String;

    async fn fetch_all(&self) -> MirageResult<Vec<String>>;
}

/// Membership test against the ground-truth names.
pub trait ExistenceCheck: Send + Sync {
    /// Canonicalizes `name` before lookup.
    fn exists(&self, name: &str) -> bool;
}

/// Entries are expected to be canonical already.
impl ExistenceCheck for HashSet<String> {
    fn exists(&self, name: &str) -> bool {
        self.contains(&canonical_name(name))
    }
}
