//! Deferred dependencies: [`Lazy<T>`] and [`Producer<T>`].
//!
//! Both hold only weak references to the container (and scope) they were
//! created in, so injecting them never keeps a disposed container alive.
//! Each access starts a fresh resolution path, which is what lets them break
//! construction cycles.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;

use crate::container::ContainerInner;
use crate::descriptor::{Dependency, Requirement};
use crate::error::{DisposedTarget, RabtError, Result};
use crate::key::{Selector, ServiceKey};
use crate::resolver::Resolver;
use crate::scope::ScopeInner;

/// A resolver that outlives the resolution it was created in.
#[derive(Clone)]
pub(crate) struct OwnedResolver {
    container: Weak<ContainerInner>,
    scope: Option<Weak<ScopeInner>>,
}

impl OwnedResolver {
    pub(crate) fn new(container: &Arc<ContainerInner>, scope: Option<&Arc<ScopeInner>>) -> Self {
        Self {
            container: Arc::downgrade(container),
            scope: scope.map(Arc::downgrade),
        }
    }

    pub(crate) fn run<R>(&self, f: impl FnOnce(&Resolver<'_>) -> Result<R>) -> Result<R> {
        let container = self
            .container
            .upgrade()
            .ok_or(RabtError::Disposed(DisposedTarget::Container))?;

        let resolved = match &self.scope {
            None => Resolver::run(&container, None, f),
            Some(scope) => {
                let scope = scope
                    .upgrade()
                    .ok_or(RabtError::Disposed(DisposedTarget::Scope))?;
                Resolver::run(&container, Some(&scope), f)
            }
        };
        resolved.map_err(|error| container.explain(error))
    }
}

// ═══════════════════════════════════════════
// Lazy
// ═══════════════════════════════════════════

/// A dependency resolved on first [`get`](Lazy::get) and cached afterwards.
///
/// Clones share the cached value.
pub struct Lazy<T: ?Sized> {
    inner: Arc<LazyInner<T>>,
}

struct LazyInner<T: ?Sized> {
    resolver: OwnedResolver,
    selector: Selector,
    cell: OnceCell<Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Lazy<T> {
    /// Resolves the service, or returns the cached instance.
    ///
    /// A failed resolution is not cached; the next call tries again.
    pub fn get(&self) -> Result<Arc<T>> {
        self.inner
            .cell
            .get_or_try_init(|| {
                self.inner
                    .resolver
                    .run(|r| r.resolve_selected::<T>(&self.inner.selector))
            })
            .cloned()
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.cell.get().is_some()
    }
}

impl<T: ?Sized> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("service", &std::any::type_name::<T>())
            .field("resolved", &self.inner.cell.get().is_some())
            .finish()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Dependency for Lazy<T> {
    fn requirement() -> Requirement {
        Requirement::Deferred(ServiceKey::of::<T>())
    }

    fn resolve(resolver: &Resolver<'_>, selector: &Selector) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(LazyInner {
                resolver: resolver.owned(),
                selector: selector.clone(),
                cell: OnceCell::new(),
            }),
        })
    }
}

// ═══════════════════════════════════════════
// Producer
// ═══════════════════════════════════════════

/// Resolves the service again on every [`produce`](Producer::produce).
///
/// The service's own lifetime still applies: a Singleton producer keeps
/// returning the same instance.
pub struct Producer<T: ?Sized> {
    resolver: OwnedResolver,
    selector: Selector,
    _service: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Producer<T> {
    pub fn produce(&self) -> Result<Arc<T>> {
        self.resolver
            .run(|r| r.resolve_selected::<T>(&self.selector))
    }
}

impl<T: ?Sized> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            selector: self.selector.clone(),
            _service: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("service", &std::any::type_name::<T>())
            .field("selector", &self.selector)
            .finish()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Dependency for Producer<T> {
    fn requirement() -> Requirement {
        Requirement::Deferred(ServiceKey::of::<T>())
    }

    fn resolve(resolver: &Resolver<'_>, selector: &Selector) -> Result<Self> {
        Ok(Self {
            resolver: resolver.owned(),
            selector: selector.clone(),
            _service: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::container::Container;
    use crate::lifetime::Lifetime;
    use crate::resolver::ResolverApi;

    #[derive(Debug)]
    struct Token(usize);

    fn counting_container(lifetime: Lifetime) -> (Container, Arc<AtomicUsize>) {
        let container = Container::new();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        container
            .register_factory::<Token, _>(lifetime, move |_| {
                Ok(Arc::new(Token(counter.fetch_add(1, Ordering::SeqCst))))
            })
            .unwrap();
        (container, built)
    }

    #[test]
    fn lazy_defers_and_caches() {
        let (container, built) = counting_container(Lifetime::Transient);
        let lazy: Lazy<Token> = container.get().unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(!lazy.is_resolved());

        let first = lazy.get().unwrap();
        let second = lazy.clone().get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(lazy.is_resolved());
    }

    #[test]
    fn producer_resolves_every_time() {
        let (container, _) = counting_container(Lifetime::Transient);
        let producer: Producer<Token> = container.get().unwrap();
        assert_eq!(producer.produce().unwrap().0, 0);
        assert_eq!(producer.produce().unwrap().0, 1);
    }

    #[test]
    fn producer_respects_singleton() {
        let (container, built) = counting_container(Lifetime::Singleton);
        let producer: Producer<Token> = container.get().unwrap();
        assert!(Arc::ptr_eq(&producer.produce().unwrap(), &producer.produce().unwrap()));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unresolvable_lazy_fails_on_access_only() {
        let container = Container::new();
        let lazy: Lazy<Token> = container.get().unwrap();
        assert!(lazy.get().unwrap_err().is_unresolved_for(&ServiceKey::of::<Token>()));
    }

    #[test]
    fn deferred_after_container_dropped() {
        let (container, _) = counting_container(Lifetime::Transient);
        let producer: Producer<Token> = container.get().unwrap();
        drop(container);
        assert!(producer.produce().unwrap_err().is_disposed());
    }
}
