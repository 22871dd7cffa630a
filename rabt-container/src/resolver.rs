//! The resolution engine.
//!
//! A [`Resolver`] is a short-lived view used during one top-level
//! resolution. It carries the path of services being built (for cycle
//! detection and conditions) and the scope that scoped services are cached
//! in. Factories, conditions and activation hooks receive it to resolve
//! further dependencies on the same path.
//!
//! ```text
//! resolve::<T>()
//!   └─ resolve_instance(T)          push T, cycle + depth check
//!        ├─ select registration     condition, name or key
//!        └─ activate(record)        lifetime cache
//!             └─ construct(record)  strategy, disposal tracking, hooks
//! ```

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::container::ContainerInner;
use crate::deferred::OwnedResolver;
use crate::descriptor::Dependency;
use crate::error::{CircularDependencyError, DisposedTarget, RabtError, Result};
use crate::key::{KeyValue, Selector, ServiceKey};
use crate::lifecycle::Dispose;
use crate::lifetime::Lifetime;
use crate::registration::{Activated, Instance, Registration, Strategy, unwrap};
use crate::scope::ScopeInner;

/// The path of the resolution in progress.
#[derive(Default)]
pub(crate) struct ResolutionContext {
    stack: RefCell<Vec<ServiceKey>>,
}

/// Pops the service it was created for when dropped.
struct Frame<'c> {
    context: &'c ResolutionContext,
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        self.context.stack.borrow_mut().pop();
    }
}

/// Resolves services on behalf of one resolution path.
pub struct Resolver<'a> {
    container: &'a Arc<ContainerInner>,
    context: &'a ResolutionContext,
    scope: Option<&'a Arc<ScopeInner>>,
}

impl<'a> Resolver<'a> {
    /// Runs `f` with a resolver on a fresh path.
    pub(crate) fn run<R>(
        container: &Arc<ContainerInner>,
        scope: Option<&Arc<ScopeInner>>,
        f: impl FnOnce(&Resolver<'_>) -> Result<R>,
    ) -> Result<R> {
        container.ensure_alive()?;
        if let Some(scope) = scope {
            scope.ensure_alive()?;
        }

        let context = ResolutionContext::default();
        let resolver = Resolver {
            container,
            context: &context,
            scope,
        };
        f(&resolver)
    }

    /// The same path, detached from the scope. Singletons are built through
    /// it so they never capture scoped instances.
    fn rooted(&self) -> Resolver<'a> {
        Resolver {
            container: self.container,
            context: self.context,
            scope: None,
        }
    }

    /// The service currently being resolved.
    pub fn requested(&self) -> Option<ServiceKey> {
        self.context.stack.borrow().last().copied()
    }

    /// The service whose construction asked for the current one.
    pub fn parent(&self) -> Option<ServiceKey> {
        let stack = self.context.stack.borrow();
        stack
            .len()
            .checked_sub(2)
            .and_then(|index| stack.get(index).copied())
    }

    /// The full resolution path, outermost first.
    pub fn path(&self) -> Vec<ServiceKey> {
        self.context.stack.borrow().clone()
    }

    /// Whether scoped services can be resolved here.
    pub fn has_scope(&self) -> bool {
        self.scope.is_some()
    }

    pub(crate) fn owned(&self) -> OwnedResolver {
        OwnedResolver::new(self.container, self.scope)
    }

    fn enter(&self, key: ServiceKey) -> Result<Frame<'a>> {
        let mut stack = self.context.stack.borrow_mut();

        if stack.contains(&key) {
            let mut chain = stack.clone();
            chain.push(key);
            trace!(service = %key, depth = stack.len(), "Cycle detected");
            return Err(RabtError::CircularDependency(CircularDependencyError { chain }));
        }

        let limit = self.container.options.max_depth;
        if stack.len() >= limit {
            return Err(RabtError::DepthExceeded { key, limit });
        }

        stack.push(key);
        Ok(Frame {
            context: self.context,
        })
    }

    // ── Selection ──

    pub(crate) fn resolve_instance(&self, key: ServiceKey, selector: &Selector) -> Result<Instance> {
        let _frame = self.enter(key)?;
        let registry = &self.container.registry;

        if !selector.is_default() {
            let record = registry
                .find_selected(&key, selector)
                .ok_or_else(|| self.unresolved(key, selector, 0))?;
            if !record.accepts(self) {
                return Err(self.unresolved(key, selector, 1));
            }
            return self.activate(&record);
        }

        let mut rejected = 0;
        for record in registry.find_all(&key) {
            if record.accepts(self) {
                trace!(service = %key, sequence = record.sequence, "Resolving");
                return self.activate(&record);
            }
            trace!(service = %key, sequence = record.sequence, "Condition rejected registration");
            rejected += 1;
        }
        Err(self.unresolved(key, selector, rejected))
    }

    /// Instances of every accepting registration of `key`, in order.
    ///
    /// A registration that fails to build is logged and skipped. Cycles and
    /// disposal still abort the whole collection.
    pub(crate) fn resolve_all_instances(&self, key: ServiceKey) -> Result<Vec<Instance>> {
        let _frame = self.enter(key)?;
        let records = self.container.registry.find_all(&key);
        let mut instances = Vec::with_capacity(records.len());

        for record in records {
            if !record.accepts(self) {
                continue;
            }
            match self.activate(&record) {
                Ok(instance) => instances.push(instance),
                Err(error) if error.is_disposed() || error.is_circular() => return Err(error),
                Err(error) => {
                    warn!(service = %key, sequence = record.sequence, error = %error, "Skipping registration that failed to build")
                }
            }
        }

        trace!(service = %key, count = instances.len(), "Resolved collection");
        Ok(instances)
    }

    pub(crate) fn resolve_selected<T>(&self, selector: &Selector) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = ServiceKey::of::<T>();
        let instance = self.resolve_instance(key, selector)?;
        downcast::<T>(key, &instance)
    }

    pub(crate) fn resolve_all_of<T>(&self) -> Result<Vec<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = ServiceKey::of::<T>();
        self.resolve_all_instances(key)?
            .iter()
            .map(|instance| downcast::<T>(key, instance))
            .collect()
    }

    // ── Lifetimes ──

    pub(crate) fn activate(&self, record: &Arc<Registration>) -> Result<Instance> {
        match record.lifetime {
            Lifetime::Transient => self.construct(record),
            Lifetime::Singleton => {
                if let Some(instance) = record.singleton.get() {
                    trace!(service = %record.service, "Singleton cache hit");
                    return Ok(instance.clone());
                }
                let builds = &self.container.builds;
                let _waiting = builds
                    .wait_on(record)
                    .map_err(|services| self.cross_thread_cycle(record.service, services))?;
                let root = self.rooted();
                record
                    .singleton
                    .get_or_try_init(|| {
                        let _building = builds.build(record);
                        root.construct(record)
                    })
                    .cloned()
            }
            Lifetime::Scoped => {
                let scope = self.scope.ok_or(RabtError::MissingScope {
                    key: record.service,
                })?;
                scope.ensure_alive()?;

                let cell = scope.slot(record);
                if let Some(instance) = cell.get() {
                    trace!(service = %record.service, scope = %scope.id(), "Scoped cache hit");
                    return Ok(instance.clone());
                }
                let instance = cell.get_or_try_init(|| self.construct(record)).cloned()?;

                // The scope may have been disposed while the instance was built.
                if let Err(error) = scope.ensure_alive() {
                    record.scoped.remove(&scope.id());
                    return Err(error);
                }
                Ok(instance)
            }
        }
    }

    fn construct(&self, record: &Registration) -> Result<Instance> {
        let Activated {
            instance,
            disposable,
        } = match &record.strategy {
            Strategy::Instance(instance) => Activated {
                instance: instance.clone(),
                disposable: None,
            },
            Strategy::Factory(factory) => Activated {
                instance: factory(self).map_err(|e| RabtError::from_boxed(record.service, e))?,
                disposable: None,
            },
            Strategy::Type(activator) => (activator.activate)(self, &record.overrides())?,
        };

        if let Some(disposable) = disposable.or_else(|| record.disposable(&instance)) {
            self.track(record, disposable)?;
        }
        record.run_hooks(&instance, self);

        trace!(service = %record.service, lifetime = %record.lifetime, "Constructed");
        Ok(instance)
    }

    /// Hands a disposable to its owner: the scope for scoped and transient
    /// instances built inside one, the container otherwise.
    ///
    /// An owner disposed in the meantime releases the instance at once and
    /// the build fails.
    fn track(&self, record: &Registration, disposable: Arc<dyn Dispose>) -> Result<()> {
        let (tracked, owner) = match (record.lifetime, self.scope) {
            (Lifetime::Singleton, _) | (_, None) => (
                self.container.disposables.push(record.service, disposable),
                DisposedTarget::Container,
            ),
            (_, Some(scope)) => (
                scope.disposables.push(record.service, disposable),
                DisposedTarget::Scope,
            ),
        };
        if tracked {
            Ok(())
        } else {
            Err(RabtError::Disposed(owner))
        }
    }

    /// The cycle closed by waiting on `service`, which another thread is
    /// building: this path, then what each blocked builder waits on.
    fn cross_thread_cycle(&self, service: ServiceKey, services: Vec<ServiceKey>) -> RabtError {
        let mut chain = self.path();
        if services.is_empty() {
            chain.push(service);
        }
        chain.extend(services);
        RabtError::CircularDependency(CircularDependencyError { chain })
    }

    fn unresolved(&self, key: ServiceKey, selector: &Selector, rejected: usize) -> RabtError {
        self.container
            .unresolved(key, selector.clone(), rejected, self.parent())
    }
}

impl fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("path", &self.path())
            .field("scoped", &self.scope.is_some())
            .finish()
    }
}

fn downcast<T: ?Sized + Send + Sync + 'static>(key: ServiceKey, instance: &Instance) -> Result<Arc<T>> {
    unwrap::<T>(instance).ok_or_else(|| RabtError::ConstructionFailed {
        key,
        source: format!("Type mismatch: expected Arc<{}>", key.type_name()).into(),
    })
}

// ═══════════════════════════════════════════
// ResolverApi
// ═══════════════════════════════════════════

/// Resolution methods shared by [`Container`](crate::container::Container),
/// [`Scope`](crate::scope::Scope) and [`Resolver`].
pub trait ResolverApi {
    /// Runs `f` with a resolver bound to this entry point.
    #[doc(hidden)]
    fn with_resolver<R>(&self, f: impl FnOnce(&Resolver<'_>) -> Result<R>) -> Result<R>;

    /// Completes an error about to reach the caller. Nested resolvers leave
    /// that to the outermost entry point.
    #[doc(hidden)]
    fn explain(&self, error: RabtError) -> RabtError {
        error
    }

    /// Resolves the first registration of `T` whose condition holds.
    fn resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.with_resolver(|r| r.resolve_selected::<T>(&Selector::Default))
            .map_err(|e| self.explain(e))
    }

    /// Resolves the registration of `T` bound to `name`.
    fn resolve_named<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let selector = Selector::named(name);
        self.with_resolver(|r| r.resolve_selected::<T>(&selector))
            .map_err(|e| self.explain(e))
    }

    /// Resolves the registration of `T` bound to `key`.
    fn resolve_keyed<T, K>(&self, key: K) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
        K: KeyValue,
    {
        let selector = Selector::keyed(key);
        self.with_resolver(|r| r.resolve_selected::<T>(&selector))
            .map_err(|e| self.explain(e))
    }

    /// Resolves every registration of `T`, in registration order.
    ///
    /// Registrations whose condition fails are left out. So are those that
    /// fail to build; the failure is logged at `warn` level.
    fn resolve_all<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        self.with_resolver(|r| r.resolve_all_of::<T>())
            .map_err(|e| self.explain(e))
    }

    /// Like [`resolve`](ResolverApi::resolve) but turns every error into `None`.
    fn try_resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.with_resolver(|r| r.resolve_selected::<T>(&Selector::Default))
            .ok()
    }

    /// `Ok(None)` when `T` itself has no usable registration; other errors,
    /// including missing dependencies of `T`, are returned.
    fn resolve_optional<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        match self.with_resolver(|r| r.resolve_selected::<T>(&Selector::Default)) {
            Ok(service) => Ok(Some(service)),
            Err(e) if e.is_unresolved_for(&ServiceKey::of::<T>()) => Ok(None),
            Err(e) => Err(self.explain(e)),
        }
    }

    /// Resolves any [`Dependency`] wrapper, e.g. `Lazy<T>` or `Vec<Arc<T>>`.
    fn get<D: Dependency>(&self) -> Result<D> {
        self.with_resolver(|r| D::resolve(r, &Selector::Default))
            .map_err(|e| self.explain(e))
    }

    fn is_registered<T: ?Sized + 'static>(&self) -> bool {
        self.with_resolver(|r| Ok(r.container.registry.contains(&ServiceKey::of::<T>())))
            .unwrap_or(false)
    }

    fn is_registered_named<T: ?Sized + 'static>(&self, name: &str) -> bool {
        let selector = Selector::named(name);
        self.with_resolver(|r| {
            Ok(r.container
                .registry
                .contains_selected(&ServiceKey::of::<T>(), &selector))
        })
        .unwrap_or(false)
    }
}

impl ResolverApi for Resolver<'_> {
    fn with_resolver<R>(&self, f: impl FnOnce(&Resolver<'_>) -> Result<R>) -> Result<R> {
        f(self)
    }
}
