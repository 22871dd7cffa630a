//! Instance lifetimes.
//!
//! A lifetime decides how long a resolved instance is reused:
//! - [`Lifetime::Singleton`]: one instance for the whole container
//! - [`Lifetime::Scoped`]: one instance per [`Scope`](crate::scope::Scope)
//! - [`Lifetime::Transient`]: a new instance on every resolve
//!
//! # Ordering
//! Lifetimes are ordered by how long they live:
//! `Singleton > Scoped > Transient`.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Defines how long a resolved instance is reused.
///
/// # Examples
/// ```
/// use rabt_container::lifetime::Lifetime;
///
/// assert!(Lifetime::Singleton > Lifetime::Scoped);
/// assert!(Lifetime::Scoped > Lifetime::Transient);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifetime {
    /// One instance shared by the entire container.
    ///
    /// Created on first resolve and kept until the container is disposed.
    /// Always constructed against the root, never against a scope.
    Singleton,

    /// One instance per scope.
    ///
    /// Requires an active scope; resolving it from the bare container fails.
    Scoped,

    /// A new instance on every resolve. Never cached.
    Transient,
}

impl Lifetime {
    /// Returns `true` if this lifetime caches instances.
    #[inline]
    pub fn is_cached(&self) -> bool {
        matches!(self, Lifetime::Singleton | Lifetime::Scoped)
    }

    /// Returns `true` if resolving this lifetime needs an active scope.
    #[inline]
    pub fn requires_scope(&self) -> bool {
        matches!(self, Lifetime::Scoped)
    }

    #[inline]
    fn ordering(&self) -> u8 {
        match self {
            Lifetime::Singleton => 2,
            Lifetime::Scoped => 1,
            Lifetime::Transient => 0,
        }
    }
}

impl PartialOrd for Lifetime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Lifetime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ordering().cmp(&other.ordering())
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Singleton => write!(f, "Singleton"),
            Lifetime::Scoped => write!(f, "Scoped"),
            Lifetime::Transient => write!(f, "Transient"),
        }
    }
}
