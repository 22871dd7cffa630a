//! Registration records and the handle returned by `register*` calls.

use std::any::{Any, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::debug;

use crate::container::ContainerInner;
use crate::descriptor::{DeclaredDependency, Implements, Injectable, Requirement};
use crate::error::{BoxError, Result};
use crate::key::{BindingKey, KeyValue, Selector, ServiceKey};
use crate::lifecycle::Dispose;
use crate::lifetime::Lifetime;
use crate::resolver::Resolver;
use crate::scope::ScopeId;
use crate::selector::{self, Inner};

/// A built service, type-erased. Always wraps an `Arc<S>` for its service `S`.
pub(crate) type Instance = Arc<dyn Any + Send + Sync>;

pub(crate) fn wrap<S: ?Sized + Send + Sync + 'static>(service: Arc<S>) -> Instance {
    Arc::new(service)
}

pub(crate) fn unwrap<S: ?Sized + Send + Sync + 'static>(instance: &Instance) -> Option<Arc<S>> {
    instance.downcast_ref::<Arc<S>>().cloned()
}

pub(crate) type Condition = Arc<dyn Fn(&Resolver<'_>) -> bool + Send + Sync>;
pub(crate) type Hook = Arc<dyn Fn(&Instance, &Resolver<'_>) + Send + Sync>;
pub(crate) type FactoryFn =
    Arc<dyn Fn(&Resolver<'_>) -> std::result::Result<Instance, BoxError> + Send + Sync>;
pub(crate) type Disposer = Arc<dyn Fn(&Instance) -> Option<Arc<dyn Dispose>> + Send + Sync>;
pub(crate) type ActivateFn =
    Arc<dyn Fn(&Resolver<'_>, &Overrides) -> Result<Activated> + Send + Sync>;

/// Output of a type activator.
pub(crate) struct Activated {
    pub instance: Instance,
    pub disposable: Option<Arc<dyn Dispose>>,
}

/// Builds an implementation type through its descriptor.
pub(crate) struct Activator {
    pub implementation: ServiceKey,
    /// The record this one wraps, when it is a decorator.
    pub decorates: Option<Arc<Registration>>,
    pub dependencies: Vec<DeclaredDependency>,
    pub activate: ActivateFn,
}

pub(crate) enum Strategy {
    Type(Activator),
    Instance(Instance),
    Factory(FactoryFn),
}

impl Strategy {
    /// Activator for implementation `I` exposed as service `S`.
    ///
    /// When `decorates` is set, the wrapped record is activated first and
    /// its instance is offered to the first parameter that asks for `S`.
    pub(crate) fn of_type<S, I>(decorates: Option<Arc<Registration>>) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
        I: Injectable + Implements<S>,
    {
        let descriptor = I::descriptor();
        let implementation = ServiceKey::of::<I>();
        let dependencies = descriptor.dependencies();
        let inner_record = decorates.clone();

        let activate: ActivateFn = Arc::new(move |resolver, overrides| {
            let inner_instance = inner_record
                .as_ref()
                .map(|record| resolver.activate(record))
                .transpose()?;
            let inner = inner_instance.as_ref().map(|instance| Inner {
                service: ServiceKey::of::<S>(),
                instance,
            });

            let built = selector::instantiate(resolver, implementation, &descriptor, overrides, inner)?;
            let built = Arc::new(built);
            let disposable = descriptor.disposer.map(|disposer| disposer(&built));

            Ok(Activated {
                instance: wrap(<I as Implements<S>>::upcast(built)),
                disposable,
            })
        });

        Strategy::Type(Activator {
            implementation,
            decorates,
            dependencies,
            activate,
        })
    }

    fn describe(&self) -> String {
        match self {
            Strategy::Type(activator) => match activator.decorates {
                Some(_) => format!("decorator {}", activator.implementation),
                None => format!("type {}", activator.implementation),
            },
            Strategy::Instance(_) => "instance".to_string(),
            Strategy::Factory(_) => "factory".to_string(),
        }
    }
}

/// Explicit values attached to a registration, by parameter or member name.
#[derive(Clone, Default)]
pub(crate) struct Overrides {
    pub parameters: Vec<(String, Instance)>,
    pub members: Vec<(String, Instance)>,
}

// ═══════════════════════════════════════════
// Registration
// ═══════════════════════════════════════════

/// One binding of a service.
///
/// Name, key, condition and the rest are set after the record is already in
/// the registry, so they sit behind locks.
pub(crate) struct Registration {
    pub service: ServiceKey,
    pub strategy: Strategy,
    pub lifetime: Lifetime,
    pub sequence: u64,
    name: RwLock<Option<Arc<str>>>,
    key: RwLock<Option<BindingKey>>,
    condition: RwLock<Option<Condition>>,
    overrides: RwLock<Overrides>,
    hooks: RwLock<Vec<Hook>>,
    disposer: RwLock<Option<Disposer>>,
    pub singleton: OnceCell<Instance>,
    pub scoped: DashMap<ScopeId, Arc<OnceCell<Instance>>>,
    /// The decorator record that took this one's place in the registry.
    superseded_by: OnceCell<Weak<Registration>>,
}

impl Registration {
    pub(crate) fn new(service: ServiceKey, strategy: Strategy, lifetime: Lifetime, sequence: u64) -> Self {
        Self {
            service,
            strategy,
            lifetime,
            sequence,
            name: RwLock::new(None),
            key: RwLock::new(None),
            condition: RwLock::new(None),
            overrides: RwLock::new(Overrides::default()),
            hooks: RwLock::new(Vec::new()),
            disposer: RwLock::new(None),
            singleton: OnceCell::new(),
            scoped: DashMap::new(),
            superseded_by: OnceCell::new(),
        }
    }

    /// A record that wraps `inner`, taking over its lifetime, name, key
    /// and condition.
    pub(crate) fn decorating(inner: &Registration, strategy: Strategy, sequence: u64) -> Self {
        let record = Self::new(inner.service, strategy, inner.lifetime, sequence);
        *record.name.write() = inner.name();
        *record.key.write() = inner.key();
        *record.condition.write() = inner.condition.read().clone();
        record
    }

    pub(crate) fn supersede(&self, by: &Arc<Registration>) {
        let _ = self.superseded_by.set(Arc::downgrade(by));
    }

    /// The record registered in place of this one, after any decoration.
    pub(crate) fn current(self: &Arc<Self>) -> Arc<Registration> {
        let mut record = self.clone();
        while let Some(next) = record.superseded_by.get().and_then(Weak::upgrade) {
            record = next;
        }
        record
    }

    pub(crate) fn name(&self) -> Option<Arc<str>> {
        self.name.read().clone()
    }

    pub(crate) fn key(&self) -> Option<BindingKey> {
        self.key.read().clone()
    }

    /// Sets the name and returns the previous one.
    pub(crate) fn replace_name(&self, name: Arc<str>) -> Option<Arc<str>> {
        self.name.write().replace(name)
    }

    pub(crate) fn replace_key(&self, key: BindingKey) -> Option<BindingKey> {
        self.key.write().replace(key)
    }

    pub(crate) fn set_condition(&self, condition: Condition) {
        *self.condition.write() = Some(condition);
    }

    /// Evaluates the condition without holding the lock.
    pub(crate) fn accepts(&self, resolver: &Resolver<'_>) -> bool {
        let condition = self.condition.read().clone();
        condition.is_none_or(|condition| condition(resolver))
    }

    pub(crate) fn overrides(&self) -> Overrides {
        self.overrides.read().clone()
    }

    pub(crate) fn push_parameter(&self, name: String, value: Instance) {
        self.overrides.write().parameters.push((name, value));
    }

    pub(crate) fn push_member(&self, name: String, value: Instance) {
        self.overrides.write().members.push((name, value));
    }

    pub(crate) fn push_hook(&self, hook: Hook) {
        self.hooks.write().push(hook);
    }

    pub(crate) fn set_disposer(&self, disposer: Disposer) {
        *self.disposer.write() = Some(disposer);
    }

    pub(crate) fn run_hooks(&self, instance: &Instance, resolver: &Resolver<'_>) {
        let hooks = self.hooks.read().clone();
        for hook in hooks {
            hook(instance, resolver);
        }
    }

    /// The disposable view of `instance` set through
    /// [`RegistrationHandle::disposable`], if any.
    pub(crate) fn disposable(&self, instance: &Instance) -> Option<Arc<dyn Dispose>> {
        let disposer = self.disposer.read().clone();
        disposer.and_then(|disposer| disposer(instance))
    }

    pub(crate) fn selector(&self) -> Selector {
        if let Some(name) = self.name() {
            return Selector::Named(name);
        }
        self.key().map(Selector::Keyed).unwrap_or_default()
    }

    /// Declared edges, including those of any decorated records.
    ///
    /// A decorator's own edge to the service it wraps is left out.
    pub(crate) fn dependencies(&self) -> Vec<DeclaredDependency> {
        let Strategy::Type(activator) = &self.strategy else {
            return Vec::new();
        };

        match &activator.decorates {
            None => activator.dependencies.clone(),
            Some(inner) => {
                let mut dependencies: Vec<DeclaredDependency> = activator
                    .dependencies
                    .iter()
                    .filter(|dep| {
                        !(dep.requirement == Requirement::Service(self.service)
                            && dep.selector.is_default())
                    })
                    .cloned()
                    .collect();
                dependencies.extend(inner.dependencies());
                dependencies
            }
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("service", &self.service)
            .field("strategy", &self.strategy.describe())
            .field("lifetime", &self.lifetime)
            .field("sequence", &self.sequence)
            .field("name", &self.name())
            .field("key", &self.key())
            .finish()
    }
}

// ═══════════════════════════════════════════
// RegistrationHandle
// ═══════════════════════════════════════════

/// Refines a registration after it was added.
///
/// Once the service is decorated, [`named`](Self::named),
/// [`keyed`](Self::keyed) and [`when`](Self::when) apply to the decorated
/// binding. The other refinements stay with the implementation this handle
/// registered.
///
/// ```
/// use std::sync::Arc;
/// use rabt_container::prelude::*;
///
/// trait Store: Send + Sync {}
/// struct Memory;
/// impl Store for Memory {}
///
/// let container = Container::new();
/// container
///     .register_instance::<dyn Store>(Arc::new(Memory))
///     .unwrap()
///     .named("cache");
///
/// assert!(container.resolve_named::<dyn Store>("cache").is_ok());
/// ```
pub struct RegistrationHandle<S: ?Sized> {
    container: Arc<ContainerInner>,
    record: Arc<Registration>,
    _service: PhantomData<fn() -> Arc<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> RegistrationHandle<S> {
    pub(crate) fn new(container: Arc<ContainerInner>, record: Arc<Registration>) -> Self {
        Self {
            container,
            record,
            _service: PhantomData,
        }
    }

    /// Makes the binding reachable by name. A later binding with the same
    /// name replaces this one in the name index.
    pub fn named(self, name: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        let record = self.record.current();
        let previous = record.replace_name(name.clone());
        self.container.registry.index_named(&record, name, previous);
        self
    }

    /// Makes the binding reachable by key.
    pub fn keyed<K: KeyValue>(self, key: K) -> Self {
        let key = BindingKey::new(key);
        let record = self.record.current();
        let previous = record.replace_key(key.clone());
        self.container.registry.index_keyed(&record, key, previous);
        self
    }

    /// Only use this binding when `condition` holds for the current
    /// resolution. Other bindings of the service are tried otherwise.
    pub fn when<F>(self, condition: F) -> Self
    where
        F: Fn(&Resolver<'_>) -> bool + Send + Sync + 'static,
    {
        self.record.current().set_condition(Arc::new(condition));
        self
    }

    /// Supplies a constructor parameter by name instead of resolving it.
    ///
    /// `value` must have the parameter's declared type, for example
    /// `Arc<dyn Store>` rather than `Arc<Memory>`.
    pub fn with_parameter<V: Any + Send + Sync>(self, name: impl Into<String>, value: V) -> Self {
        self.record.push_parameter(name.into(), Arc::new(value));
        self
    }

    /// Sets a member by name after construction.
    pub fn with_member<V: Any + Send + Sync>(self, name: impl Into<String>, value: V) -> Self {
        self.record.push_member(name.into(), Arc::new(value));
        self
    }

    /// Runs `hook` once for every newly built instance.
    pub fn on_activated<F>(self, hook: F) -> Self
    where
        F: Fn(&Arc<S>, &Resolver<'_>) + Send + Sync + 'static,
    {
        self.record.push_hook(Arc::new(move |instance, resolver| {
            if let Some(service) = unwrap::<S>(instance) {
                hook(&service, resolver);
            }
        }));
        self
    }

    /// Disposes built instances through the service's [`Dispose`] impl.
    pub fn disposable(self) -> Self
    where
        S: Dispose,
    {
        self.record.set_disposer(Arc::new(|instance| {
            unwrap::<S>(instance).map(|service| Arc::new(service) as Arc<dyn Dispose>)
        }));
        self
    }

    pub fn service(&self) -> ServiceKey {
        self.record.service
    }

    pub fn lifetime(&self) -> Lifetime {
        self.record.lifetime
    }
}

impl<S: ?Sized> fmt::Debug for RegistrationHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationHandle")
            .field("service", &type_name::<S>())
            .field("record", &self.record)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Codec: Send + Sync {
        fn id(&self) -> u8;
    }

    struct Json;
    impl Codec for Json {
        fn id(&self) -> u8 {
            1
        }
    }

    fn instance_record() -> Registration {
        let codec: Arc<dyn Codec> = Arc::new(Json);
        Registration::new(
            ServiceKey::of::<dyn Codec>(),
            Strategy::Instance(wrap(codec)),
            Lifetime::Singleton,
            0,
        )
    }

    #[test]
    fn wrap_and_unwrap_trait_object() {
        let codec: Arc<dyn Codec> = Arc::new(Json);
        let instance = wrap(codec);
        let back = unwrap::<dyn Codec>(&instance).unwrap();
        assert_eq!(back.id(), 1);
        assert!(unwrap::<Json>(&instance).is_none());
    }

    #[test]
    fn name_and_key_replacement() {
        let record = instance_record();
        assert_eq!(record.replace_name(Arc::from("a")), None);
        assert_eq!(record.replace_name(Arc::from("b")).as_deref(), Some("a"));
        assert_eq!(record.selector(), Selector::named("b"));

        let record = instance_record();
        record.replace_key(BindingKey::new(3u8));
        assert_eq!(record.selector(), Selector::keyed(3u8));
    }

    #[test]
    fn decorating_copies_binding_metadata() {
        let inner = instance_record();
        inner.replace_name(Arc::from("fast"));
        let outer = Registration::decorating(&inner, Strategy::Instance(wrap(Arc::new(Json))), 1);
        assert_eq!(outer.name().as_deref(), Some("fast"));
        assert_eq!(outer.lifetime, Lifetime::Singleton);
        assert_eq!(outer.service, inner.service);
    }

    #[test]
    fn overrides_are_collected() {
        let record = instance_record();
        record.push_parameter("level".into(), Arc::new(3u8));
        record.push_member("label".into(), Arc::new("x"));
        let overrides = record.overrides();
        assert_eq!(overrides.parameters.len(), 1);
        assert_eq!(overrides.members[0].0, "label");
    }

    #[test]
    fn instance_records_have_no_dependencies() {
        assert!(instance_record().dependencies().is_empty());
    }
}
