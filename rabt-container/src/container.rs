//! # The Container
//!
//! Owns the registry, the singleton instances and every live scope, and is
//! the root entry point for resolution.
//!
//! ```text
//! Container ──create_scope()──> Scope ──drop/dispose──> scoped instances released
//!     │
//!     └──dispose()──> live scopes, then container-owned instances, released
//! ```
//!
//! # Examples
//! ```rust
//! use std::sync::Arc;
//! use rabt_container::prelude::*;
//!
//! trait Logger: Send + Sync {
//!     fn log(&self, msg: &str) -> String;
//! }
//!
//! struct ConsoleLogger;
//! impl Logger for ConsoleLogger {
//!     fn log(&self, msg: &str) -> String { format!("[console] {msg}") }
//! }
//! impl Injectable for ConsoleLogger {
//!     fn descriptor() -> Descriptor<Self> {
//!         Descriptor::new().constructor(Constructor::new(|_| Ok(ConsoleLogger)))
//!     }
//! }
//! rabt_container::implements!(ConsoleLogger => dyn Logger);
//!
//! struct UserService {
//!     logger: Arc<dyn Logger>,
//! }
//! impl Injectable for UserService {
//!     fn descriptor() -> Descriptor<Self> {
//!         Descriptor::new().constructor(
//!             Constructor::new(|args| Ok(UserService { logger: args.take()? }))
//!                 .param::<Arc<dyn Logger>>("logger"),
//!         )
//!     }
//! }
//!
//! let container = Container::new();
//! container.register::<dyn Logger, ConsoleLogger>(Lifetime::Singleton).unwrap();
//! container.register_type::<UserService>(Lifetime::Transient).unwrap();
//!
//! let service = container.resolve::<UserService>().unwrap();
//! assert_eq!(service.logger.log("hi"), "[console] hi");
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use rabt_support::rendering::suggest_similar;
use tracing::{debug, info, instrument};

use crate::config::ContainerOptions;
use crate::decoration;
use crate::descriptor::{Implements, Injectable};
use crate::error::{BoxError, DisposedTarget, RabtError, Result, UnresolvedError};
use crate::graph::GraphValidator;
use crate::inflight::SingletonBuilds;
use crate::key::{Selector, ServiceKey};
use crate::lifecycle::DisposeBag;
use crate::lifetime::Lifetime;
use crate::provider::Provider;
use crate::registration::{FactoryFn, Registration, RegistrationHandle, Strategy, wrap};
use crate::registry::Registry;
use crate::resolver::{Resolver, ResolverApi};
use crate::scope::{Scope, ScopeId, ScopeInner};

// ═══════════════════════════════════════════
// ContainerInner
// ═══════════════════════════════════════════

/// State shared by the container, its scopes, registration handles and
/// deferred dependencies.
pub(crate) struct ContainerInner {
    pub(crate) registry: Registry,
    pub(crate) options: ContainerOptions,
    pub(crate) scopes: DashMap<ScopeId, Weak<ScopeInner>>,
    pub(crate) disposables: DisposeBag,
    pub(crate) builds: SingletonBuilds,
    disposed: AtomicBool,
    next_scope: AtomicU64,
}

impl ContainerInner {
    fn new(options: ContainerOptions) -> Self {
        Self {
            registry: Registry::new(),
            options,
            scopes: DashMap::new(),
            disposables: DisposeBag::default(),
            builds: SingletonBuilds::default(),
            disposed: AtomicBool::new(false),
            next_scope: AtomicU64::new(1),
        }
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RabtError::Disposed(DisposedTarget::Container));
        }
        Ok(())
    }

    /// Builds the error for a request nothing could satisfy.
    ///
    /// Suggestions are left out; [`explain`](Self::explain) adds them once
    /// the error leaves the container.
    pub(crate) fn unresolved(
        &self,
        key: ServiceKey,
        selector: Selector,
        rejected_by_condition: usize,
        required_by: Option<ServiceKey>,
    ) -> RabtError {
        RabtError::Unresolved(UnresolvedError {
            requested: key,
            selector,
            required_by,
            rejected_by_condition,
            suggestions: Vec::new(),
        })
    }

    /// Adds similar registered names to an unresolved error, including one
    /// wrapped in construction failures.
    ///
    /// Suggestions are only offered when no registration was tried at all.
    pub(crate) fn explain(&self, mut error: RabtError) -> RabtError {
        self.suggest(&mut error);
        error
    }

    fn suggest(&self, error: &mut RabtError) {
        match error {
            RabtError::Unresolved(e) if e.rejected_by_condition == 0 && e.suggestions.is_empty() => {
                let names = self.registry.registered_names();
                e.suggestions = suggest_similar(e.requested.type_name(), &names, self.options.suggestion_limit);
            }
            RabtError::ConstructionFailed { source, .. } => {
                if let Some(inner) = source.downcast_mut::<RabtError>() {
                    self.suggest(inner);
                }
            }
            _ => {}
        }
    }

    #[instrument(skip(self), name = "container_dispose")]
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let live: Vec<Arc<ScopeInner>> = self
            .scopes
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        for scope in &live {
            scope.dispose();
        }
        self.scopes.clear();

        let disposed = self.disposables.dispose_all();
        self.registry.clear();

        info!(scopes = live.len(), disposed, "Container disposed");
    }
}

// ═══════════════════════════════════════════
// Container
// ═══════════════════════════════════════════

/// Thread-safe dependency injection container.
///
/// Registrations can be added at any time. Resolution goes through the
/// [`ResolverApi`] methods, on the container itself for Singleton and
/// Transient services, or on a [`Scope`] for Scoped ones.
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    pub fn new() -> Self {
        Self::with_options(ContainerOptions::default())
    }

    pub fn with_options(options: ContainerOptions) -> Self {
        debug!(?options, "Creating container");
        Self {
            inner: Arc::new(ContainerInner::new(options)),
        }
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.inner.options
    }

    pub(crate) fn inner(&self) -> &Arc<ContainerInner> {
        &self.inner
    }

    // ── Registration ──

    /// Registers implementation `I` for service `S`.
    ///
    /// ```rust,ignore
    /// container.register::<dyn Repository, PostgresRepository>(Lifetime::Scoped)?;
    /// ```
    pub fn register<S, I>(&self, lifetime: Lifetime) -> Result<RegistrationHandle<S>>
    where
        S: ?Sized + Send + Sync + 'static,
        I: Injectable + Implements<S>,
    {
        self.add::<S>(Strategy::of_type::<S, I>(None), lifetime)
    }

    /// Registers `I` as its own service.
    pub fn register_type<I: Injectable>(&self, lifetime: Lifetime) -> Result<RegistrationHandle<I>> {
        self.register::<I, I>(lifetime)
    }

    /// Registers a pre-built instance. It behaves as a Singleton and is
    /// never disposed by the container unless marked
    /// [`disposable`](RegistrationHandle::disposable).
    pub fn register_instance<S>(&self, instance: Arc<S>) -> Result<RegistrationHandle<S>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.add::<S>(Strategy::Instance(wrap(instance)), Lifetime::Singleton)
    }

    /// Registers a factory called with the current [`Resolver`].
    ///
    /// Returning a [`RabtError`] from the factory (for example through `?`
    /// on a nested resolve) keeps cycle and disposal errors intact.
    pub fn register_factory<S, F>(&self, lifetime: Lifetime, factory: F) -> Result<RegistrationHandle<S>>
    where
        S: ?Sized + Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> std::result::Result<Arc<S>, BoxError> + Send + Sync + 'static,
    {
        let factory: FactoryFn = Arc::new(move |resolver| factory(resolver).map(wrap::<S>));
        self.add::<S>(Strategy::Factory(factory), lifetime)
    }

    /// Wraps every current registration of `S` with decorator `D`.
    ///
    /// Returns how many registrations were wrapped.
    ///
    /// # Errors
    /// [`RabtError::Unresolved`] when `S` has no registrations yet.
    pub fn register_decorator<S, D>(&self) -> Result<usize>
    where
        S: ?Sized + Send + Sync + 'static,
        D: Injectable + Implements<S>,
    {
        decoration::decorate::<S, D>(&self.inner)
    }

    /// Lets a [`Provider`] module register its services.
    pub fn add_provider(&self, provider: &dyn Provider) -> Result<&Self> {
        debug!(provider = provider.name(), "Adding provider");
        provider.register(self)?;
        Ok(self)
    }

    fn add<S: ?Sized + Send + Sync + 'static>(
        &self,
        strategy: Strategy,
        lifetime: Lifetime,
    ) -> Result<RegistrationHandle<S>> {
        self.inner.ensure_alive()?;

        let record = Arc::new(Registration::new(
            ServiceKey::of::<S>(),
            strategy,
            lifetime,
            self.inner.registry.next_sequence(),
        ));
        self.inner.registry.add(record.clone());
        Ok(RegistrationHandle::new(self.inner.clone(), record))
    }

    // ── Scopes ──

    pub fn create_scope(&self) -> Result<Scope> {
        self.inner.ensure_alive()?;

        let id = ScopeId::new(self.inner.next_scope.fetch_add(1, Ordering::Relaxed));
        let scope = Arc::new(ScopeInner::new(id, self.inner.clone()));
        self.inner.scopes.insert(id, Arc::downgrade(&scope));

        debug!(scope = %id, "Created scope");
        Ok(Scope::new(scope))
    }

    /// Number of scopes created and not yet disposed.
    pub fn live_scopes(&self) -> usize {
        self.inner.scopes.len()
    }

    // ── Validation ──

    /// Checks the registered graph without building anything.
    ///
    /// Reports, in this order of discovery, missing dependencies, cycles
    /// through hard dependencies, and Singletons that depend on Scoped
    /// services. Factory and instance registrations are opaque and never
    /// contribute edges.
    #[instrument(skip(self), name = "container_validate")]
    pub fn validate(&self) -> Result<()> {
        self.inner.ensure_alive()?;
        let mut validator = GraphValidator::from_registry(&self.inner.registry, self.inner.options.suggestion_limit);
        validator.validate()
    }

    // ── Disposal ──

    /// Disposes every live scope, then every container-owned instance in
    /// reverse creation order, and empties the registry. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.ensure_alive().is_err()
    }

    /// Number of registrations across all services.
    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverApi for Container {
    fn with_resolver<R>(&self, f: impl FnOnce(&Resolver<'_>) -> Result<R>) -> Result<R> {
        Resolver::run(&self.inner, None, f)
    }

    fn explain(&self, error: RabtError) -> RabtError {
        self.inner.explain(error)
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.inner.options.dispose_on_drop {
            self.inner.dispose();
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("registered", &self.inner.registry.len())
            .field("live_scopes", &self.inner.scopes.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ═══════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════

pub mod prelude {
    pub use super::Container;
    pub use crate::config::ContainerOptions;
    pub use crate::deferred::{Lazy, Producer};
    pub use crate::descriptor::{
        Arguments, Constructor, Dependency, Descriptor, Implements, Injectable, Member, Parameter,
    };
    pub use crate::error::{BoxError, RabtError, Result};
    pub use crate::key::{Selector, ServiceKey};
    pub use crate::lifecycle::Dispose;
    pub use crate::lifetime::Lifetime;
    pub use crate::provider::Provider;
    pub use crate::registration::RegistrationHandle;
    pub use crate::resolver::{Resolver, ResolverApi};
    pub use crate::scope::Scope;
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
