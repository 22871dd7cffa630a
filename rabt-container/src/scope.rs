//! Resolution scopes.
//!
//! A [`Scope`] caches one instance per Scoped registration and owns the
//! disposable Scoped and Transient instances built through it. Dropping or
//! disposing the scope releases them, newest first.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::mapref::entry::Entry;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::debug;

use crate::container::ContainerInner;
use crate::error::{DisposedTarget, RabtError, Result};
use crate::lifecycle::DisposeBag;
use crate::registration::{Instance, Registration};
use crate::resolver::{Resolver, ResolverApi};

/// Identifies a scope within its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

pub(crate) struct ScopeInner {
    id: ScopeId,
    container: Arc<ContainerInner>,
    disposed: AtomicBool,
    /// Registrations holding a cache slot for this scope.
    attached: Mutex<Vec<Arc<Registration>>>,
    pub(crate) disposables: DisposeBag,
}

impl ScopeInner {
    pub(crate) fn new(id: ScopeId, container: Arc<ContainerInner>) -> Self {
        Self {
            id,
            container,
            disposed: AtomicBool::new(false),
            attached: Mutex::new(Vec::new()),
            disposables: DisposeBag::default(),
        }
    }

    pub(crate) fn id(&self) -> ScopeId {
        self.id
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RabtError::Disposed(DisposedTarget::Scope));
        }
        self.container.ensure_alive()
    }

    /// The cache slot of `record` in this scope, created on first use.
    ///
    /// The map entry is released before the caller initializes the slot.
    pub(crate) fn slot(&self, record: &Arc<Registration>) -> Arc<OnceCell<Instance>> {
        match record.scoped.entry(self.id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let cell = Arc::new(OnceCell::new());
                entry.insert(cell.clone());
                self.attached.lock().push(record.clone());
                cell
            }
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Disposes tracked instances, drops cached ones and leaves the
    /// container's live set. Only the first call has any effect.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let disposed = self.disposables.dispose_all();
        let attached = std::mem::take(&mut *self.attached.lock());
        for record in &attached {
            record.scoped.remove(&self.id);
        }
        self.container.scopes.remove(&self.id);

        debug!(scope = %self.id, disposed, cached = attached.len(), "Scope disposed");
    }
}

/// A unit of work with its own Scoped instances.
///
/// ```
/// use std::sync::Arc;
/// use rabt_container::prelude::*;
///
/// struct RequestId(u32);
///
/// let container = Container::new();
/// container
///     .register_factory::<RequestId, _>(Lifetime::Scoped, |_| Ok(Arc::new(RequestId(7))))
///     .unwrap();
///
/// let scope = container.create_scope().unwrap();
/// let a = scope.resolve::<RequestId>().unwrap();
/// let b = scope.resolve::<RequestId>().unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
///
/// assert!(container.resolve::<RequestId>().is_err());
/// ```
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(inner: Arc<ScopeInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Disposes the scope now instead of on drop.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Number of disposables waiting for this scope to end.
    pub fn tracked_disposables(&self) -> usize {
        self.inner.disposables.len()
    }
}

impl ResolverApi for Scope {
    fn with_resolver<R>(&self, f: impl FnOnce(&Resolver<'_>) -> Result<R>) -> Result<R> {
        Resolver::run(&self.inner.container, Some(&self.inner), f)
    }

    fn explain(&self, error: RabtError) -> RabtError {
        self.inner.container.explain(error)
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("disposed", &self.inner.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::lifetime::Lifetime;

    #[derive(Debug)]
    struct Session;

    fn container() -> Container {
        let container = Container::new();
        container
            .register_factory::<Session, _>(Lifetime::Scoped, |_| Ok(Arc::new(Session)))
            .unwrap();
        container
    }

    #[test]
    fn scope_ids_are_distinct() {
        let container = container();
        let a = container.create_scope().unwrap();
        let b = container.create_scope().unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("scope-"));
    }

    #[test]
    fn instances_are_per_scope() {
        let container = container();
        let a = container.create_scope().unwrap();
        let b = container.create_scope().unwrap();

        let from_a = a.resolve::<Session>().unwrap();
        assert!(Arc::ptr_eq(&from_a, &a.resolve::<Session>().unwrap()));
        assert!(!Arc::ptr_eq(&from_a, &b.resolve::<Session>().unwrap()));
    }

    #[test]
    fn dispose_clears_cache_slots() {
        let container = container();
        let scope = container.create_scope().unwrap();
        scope.resolve::<Session>().unwrap();

        let record = container.inner().registry.find_first(&crate::key::ServiceKey::of::<Session>()).unwrap();
        assert_eq!(record.scoped.len(), 1);

        scope.dispose();
        assert!(scope.is_disposed());
        assert_eq!(record.scoped.len(), 0);
        assert!(scope.resolve::<Session>().unwrap_err().is_disposed());
    }

    #[test]
    fn drop_leaves_live_set() {
        let container = container();
        let scope = container.create_scope().unwrap();
        assert_eq!(container.live_scopes(), 1);
        drop(scope);
        assert_eq!(container.live_scopes(), 0);
    }
}
