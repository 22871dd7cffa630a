//! How an implementation type is built.
//!
//! A [`Descriptor`] lists the constructors and settable members of a type,
//! each with the dependencies it needs. The container reads it to pick a
//! constructor and to fill members after construction. Descriptors are
//! usually generated by `#[derive(Injectable)]` but can be written by hand:
//!
//! ```
//! use std::sync::Arc;
//! use rabt_container::descriptor::{Constructor, Descriptor, Injectable};
//!
//! struct Clock;
//! impl Injectable for Clock {
//!     fn descriptor() -> Descriptor<Self> {
//!         Descriptor::new().constructor(Constructor::new(|_| Ok(Clock)))
//!     }
//! }
//!
//! struct Scheduler {
//!     clock: Arc<Clock>,
//! }
//!
//! impl Injectable for Scheduler {
//!     fn descriptor() -> Descriptor<Self> {
//!         Descriptor::new().constructor(
//!             Constructor::new(|args| Ok(Scheduler { clock: args.take()? }))
//!                 .param::<Arc<Clock>>("clock"),
//!         )
//!     }
//! }
//! ```

use std::any::{Any, type_name};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::error::{BoxError, RabtError, Result};
use crate::key::{KeyValue, Selector, ServiceKey};
use crate::lifecycle::Dispose;
use crate::resolver::Resolver;

/// A type-erased argument or member value.
pub(crate) type AnyValue = Box<dyn Any + Send + Sync>;

type ResolveFn = fn(&Resolver<'_>, &Selector) -> Result<AnyValue>;
type AdoptFn = fn(&(dyn Any + Send + Sync)) -> Option<AnyValue>;
type BuildFn<T> = Box<dyn Fn(&mut Arguments) -> std::result::Result<T, BoxError> + Send + Sync>;
type SetFn<T> = Box<dyn Fn(&mut T, AnyValue) -> bool + Send + Sync>;

// ═══════════════════════════════════════════
// Injectable / Implements
// ═══════════════════════════════════════════

/// A type the container can construct.
pub trait Injectable: Sized + Send + Sync + 'static {
    fn descriptor() -> Descriptor<Self>;
}

/// Declares that `Self` can be handed out as service `S`.
///
/// Every type implements itself. For trait objects use the
/// [`implements!`](crate::implements) macro:
///
/// ```
/// use rabt_container::implements;
///
/// trait Greeter: Send + Sync {}
/// struct English;
/// impl Greeter for English {}
///
/// implements!(English => dyn Greeter);
/// ```
pub trait Implements<S: ?Sized>: Send + Sync + 'static {
    fn upcast(self: Arc<Self>) -> Arc<S>;
}

impl<T: Send + Sync + 'static> Implements<T> for T {
    fn upcast(self: Arc<Self>) -> Arc<T> {
        self
    }
}

/// Implements [`Implements`] for one type and several trait-object services.
#[macro_export]
macro_rules! implements {
    ($ty:ty => $($service:ty),+ $(,)?) => {
        $(
            impl $crate::descriptor::Implements<$service> for $ty {
                fn upcast(self: ::std::sync::Arc<Self>) -> ::std::sync::Arc<$service> {
                    self
                }
            }
        )+
    };
}

// ═══════════════════════════════════════════
// Dependency
// ═══════════════════════════════════════════

/// What kind of edge a parameter or member adds to the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Must resolve now.
    Service(ServiceKey),
    /// Resolves to nothing when not registered.
    Optional(ServiceKey),
    /// Every registration of the service.
    Collection(ServiceKey),
    /// Resolved later through [`Lazy`](crate::deferred::Lazy) or
    /// [`Producer`](crate::deferred::Producer).
    Deferred(ServiceKey),
}

impl Requirement {
    pub fn service(&self) -> ServiceKey {
        match *self {
            Requirement::Service(key)
            | Requirement::Optional(key)
            | Requirement::Collection(key)
            | Requirement::Deferred(key) => key,
        }
    }

    /// Only hard edges can form cycles or be missing.
    pub fn is_hard(&self) -> bool {
        matches!(self, Requirement::Service(_))
    }
}

/// A value the container can supply as a constructor argument or member.
///
/// Implemented for `Arc<T>`, `Option<Arc<T>>`, `Vec<Arc<T>>`,
/// [`Lazy<T>`](crate::deferred::Lazy) and
/// [`Producer<T>`](crate::deferred::Producer).
pub trait Dependency: Clone + Send + Sync + 'static {
    fn requirement() -> Requirement;

    fn resolve(resolver: &Resolver<'_>, selector: &Selector) -> Result<Self>;
}

impl<T: ?Sized + Send + Sync + 'static> Dependency for Arc<T> {
    fn requirement() -> Requirement {
        Requirement::Service(ServiceKey::of::<T>())
    }

    fn resolve(resolver: &Resolver<'_>, selector: &Selector) -> Result<Self> {
        resolver.resolve_selected::<T>(selector)
    }
}

impl<T: ?Sized + Send + Sync + 'static> Dependency for Option<Arc<T>> {
    fn requirement() -> Requirement {
        Requirement::Optional(ServiceKey::of::<T>())
    }

    fn resolve(resolver: &Resolver<'_>, selector: &Selector) -> Result<Self> {
        match resolver.resolve_selected::<T>(selector) {
            Ok(service) => Ok(Some(service)),
            Err(e) if e.is_unresolved_for(&ServiceKey::of::<T>()) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// The selector is ignored: a collection always holds every binding.
impl<T: ?Sized + Send + Sync + 'static> Dependency for Vec<Arc<T>> {
    fn requirement() -> Requirement {
        Requirement::Collection(ServiceKey::of::<T>())
    }

    fn resolve(resolver: &Resolver<'_>, _selector: &Selector) -> Result<Self> {
        resolver.resolve_all_of::<T>()
    }
}

fn resolve_any<D: Dependency>(resolver: &Resolver<'_>, selector: &Selector) -> Result<AnyValue> {
    D::resolve(resolver, selector).map(|value| Box::new(value) as AnyValue)
}

fn adopt_any<D: Dependency>(value: &(dyn Any + Send + Sync)) -> Option<AnyValue> {
    value
        .downcast_ref::<D>()
        .map(|value| Box::new(value.clone()) as AnyValue)
}

/// A dependency edge as seen by graph validation.
#[derive(Debug, Clone)]
pub(crate) struct DeclaredDependency {
    pub requirement: Requirement,
    pub selector: Selector,
    pub has_default: bool,
}

// ═══════════════════════════════════════════
// Parameter
// ═══════════════════════════════════════════

/// One constructor parameter.
pub struct Parameter {
    pub(crate) name: &'static str,
    pub(crate) requirement: Requirement,
    pub(crate) selector: Selector,
    pub(crate) default: Option<Arc<dyn Fn() -> AnyValue + Send + Sync>>,
    pub(crate) resolve: ResolveFn,
    pub(crate) adopt: AdoptFn,
}

impl Parameter {
    pub fn new<D: Dependency>(name: &'static str) -> Self {
        Self {
            name,
            requirement: D::requirement(),
            selector: Selector::Default,
            default: None,
            resolve: resolve_any::<D>,
            adopt: adopt_any::<D>,
        }
    }

    /// Resolve through the named binding instead of the default one.
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.selector = Selector::named(name);
        self
    }

    /// Resolve through the keyed binding instead of the default one.
    pub fn keyed<K: KeyValue>(mut self, key: K) -> Self {
        self.selector = Selector::keyed(key);
        self
    }

    /// Value used when the dependency cannot be resolved.
    ///
    /// `D` must be the same type the parameter was declared with, otherwise
    /// the constructor fails when it takes the argument.
    pub fn with_default<D, F>(mut self, default: F) -> Self
    where
        D: Send + Sync + 'static,
        F: Fn() -> D + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(move || Box::new(default()) as AnyValue));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn requirement(&self) -> Requirement {
        self.requirement
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("requirement", &self.requirement)
            .field("selector", &self.selector)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════
// Constructor
// ═══════════════════════════════════════════

/// One way to build `T` from resolved arguments.
pub struct Constructor<T> {
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) preferred: bool,
    pub(crate) build: BuildFn<T>,
}

impl<T: 'static> Constructor<T> {
    /// `build` receives the arguments in parameter order.
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(&mut Arguments) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            parameters: Vec::new(),
            preferred: false,
            build: Box::new(build),
        }
    }

    /// Appends a parameter resolved through the default binding.
    pub fn param<D: Dependency>(self, name: &'static str) -> Self {
        self.with(Parameter::new::<D>(name))
    }

    /// Appends a fully configured parameter.
    pub fn with(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Tries this constructor before all others.
    pub fn preferred(mut self) -> Self {
        self.preferred = true;
        self
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }
}

/// Arguments handed to a constructor's build function.
pub struct Arguments {
    implementation: ServiceKey,
    values: VecDeque<(&'static str, AnyValue)>,
}

impl Arguments {
    pub(crate) fn new(implementation: ServiceKey, capacity: usize) -> Self {
        Self {
            implementation,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, name: &'static str, value: AnyValue) {
        self.values.push_back((name, value));
    }

    /// Takes the next argument.
    ///
    /// # Errors
    /// Fails when no arguments are left or the next one is not a `D`.
    pub fn take<D: Any>(&mut self) -> Result<D> {
        let (name, value) = self.values.pop_front().ok_or_else(|| {
            RabtError::ConstructionFailed {
                key: self.implementation,
                source: "constructor took more arguments than it declares".into(),
            }
        })?;

        value
            .downcast::<D>()
            .map(|value| *value)
            .map_err(|_| RabtError::ConstructionFailed {
                key: self.implementation,
                source: format!("argument `{name}` is not a {}", type_name::<D>()).into(),
            })
    }

    pub fn remaining(&self) -> usize {
        self.values.len()
    }
}

// ═══════════════════════════════════════════
// Member
// ═══════════════════════════════════════════

/// A settable member of `T`, filled after construction.
pub struct Member<T> {
    pub(crate) name: &'static str,
    pub(crate) required: bool,
    pub(crate) injectable: bool,
    pub(crate) selector: Selector,
    pub(crate) requirement: Requirement,
    pub(crate) resolve: ResolveFn,
    pub(crate) adopt: AdoptFn,
    pub(crate) set: SetFn<T>,
}

impl<T: 'static> Member<T> {
    pub fn new<D, F>(name: &'static str, setter: F) -> Self
    where
        D: Dependency,
        F: Fn(&mut T, D) + Send + Sync + 'static,
    {
        Self {
            name,
            required: false,
            injectable: true,
            selector: Selector::Default,
            requirement: D::requirement(),
            resolve: resolve_any::<D>,
            adopt: adopt_any::<D>,
            set: Box::new(move |target, value| match value.downcast::<D>() {
                Ok(value) => {
                    setter(target, *value);
                    true
                }
                Err(_) => false,
            }),
        }
    }

    /// Construction fails when this member cannot be resolved.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.selector = Selector::named(name);
        self
    }

    pub fn keyed<K: KeyValue>(mut self, key: K) -> Self {
        self.selector = Selector::keyed(key);
        self
    }

    /// Only set through an explicit registration value, never resolved.
    pub fn explicit_only(mut self) -> Self {
        self.injectable = false;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

// ═══════════════════════════════════════════
// Descriptor
// ═══════════════════════════════════════════

/// Constructors and members of an implementation type.
pub struct Descriptor<T> {
    pub(crate) constructors: Vec<Constructor<T>>,
    pub(crate) members: Vec<Member<T>>,
    pub(crate) disposer: Option<fn(&Arc<T>) -> Arc<dyn Dispose>>,
}

impl<T: Send + Sync + 'static> Descriptor<T> {
    pub fn new() -> Self {
        Self {
            constructors: Vec::new(),
            members: Vec::new(),
            disposer: None,
        }
    }

    pub fn constructor(mut self, constructor: Constructor<T>) -> Self {
        self.constructors.push(constructor);
        self
    }

    pub fn member(mut self, member: Member<T>) -> Self {
        self.members.push(member);
        self
    }

    /// Instances are disposed by their owner when it is disposed.
    pub fn disposable(mut self) -> Self
    where
        T: Dispose,
    {
        self.disposer = Some(as_disposable::<T>);
        self
    }

    /// Constructors in the order the selector tries them: the preferred
    /// one first, then by descending arity, declaration order on ties.
    pub(crate) fn candidates(&self) -> Vec<&Constructor<T>> {
        let mut candidates: Vec<&Constructor<T>> = self.constructors.iter().collect();
        candidates.sort_by(|a, b| {
            b.preferred
                .cmp(&a.preferred)
                .then_with(|| b.arity().cmp(&a.arity()))
        });
        candidates
    }

    /// Edges of the first candidate plus every injectable member.
    pub(crate) fn dependencies(&self) -> Vec<DeclaredDependency> {
        let parameters = self
            .candidates()
            .first()
            .map(|constructor| {
                constructor
                    .parameters
                    .iter()
                    .map(|parameter| DeclaredDependency {
                        requirement: parameter.requirement,
                        selector: parameter.selector.clone(),
                        has_default: parameter.default.is_some(),
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let members = self
            .members
            .iter()
            .filter(|member| member.injectable && member.required)
            .map(|member| DeclaredDependency {
                requirement: member.requirement,
                selector: member.selector.clone(),
                has_default: false,
            });

        parameters.into_iter().chain(members).collect()
    }
}

impl<T: Send + Sync + 'static> Default for Descriptor<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn as_disposable<T: Dispose + 'static>(value: &Arc<T>) -> Arc<dyn Dispose> {
    value.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sink;

    struct Pipeline;

    fn pipeline() -> Descriptor<Pipeline> {
        Descriptor::new()
            .constructor(Constructor::new(|_| Ok(Pipeline)))
            .constructor(
                Constructor::new(|_| Ok(Pipeline))
                    .param::<Arc<Sink>>("sink")
                    .param::<Option<Arc<Sink>>>("fallback"),
            )
            .constructor(Constructor::new(|_| Ok(Pipeline)).param::<Arc<Sink>>("sink"))
    }

    #[test]
    fn candidates_by_descending_arity() {
        let descriptor = pipeline();
        let arities: Vec<usize> = descriptor.candidates().iter().map(|c| c.arity()).collect();
        assert_eq!(arities, vec![2, 1, 0]);
    }

    #[test]
    fn preferred_constructor_goes_first() {
        let descriptor = pipeline().constructor(Constructor::new(|_| Ok(Pipeline)).preferred());
        let first = descriptor.candidates()[0];
        assert!(first.preferred);
        assert_eq!(first.arity(), 0);
    }

    #[test]
    fn requirements_follow_wrapper_type() {
        let key = ServiceKey::of::<Sink>();
        assert_eq!(<Arc<Sink>>::requirement(), Requirement::Service(key));
        assert_eq!(<Option<Arc<Sink>>>::requirement(), Requirement::Optional(key));
        assert_eq!(<Vec<Arc<Sink>>>::requirement(), Requirement::Collection(key));
        assert!(<Arc<Sink>>::requirement().is_hard());
        assert!(!<Vec<Arc<Sink>>>::requirement().is_hard());
    }

    #[test]
    fn dependencies_of_first_candidate() {
        let deps = pipeline().dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps[0].requirement.is_hard());
        assert_eq!(deps[1].requirement, Requirement::Optional(ServiceKey::of::<Sink>()));
    }

    #[test]
    fn arguments_take_in_order() {
        let mut args = Arguments::new(ServiceKey::of::<Pipeline>(), 2);
        args.push("retries", Box::new(3u32));
        args.push("label", Box::new(String::from("ingest")));

        assert_eq!(args.take::<u32>().unwrap(), 3);
        assert_eq!(args.take::<String>().unwrap(), "ingest");
        assert!(args.take::<u32>().is_err());
    }

    #[test]
    fn arguments_take_wrong_type() {
        let mut args = Arguments::new(ServiceKey::of::<Pipeline>(), 1);
        args.push("retries", Box::new(3u32));

        let err = args.take::<String>().unwrap_err();
        assert!(err.to_string().contains("`retries`"));
    }

    #[test]
    fn parameter_configuration() {
        let parameter = Parameter::new::<Arc<Sink>>("sink")
            .named("audit")
            .with_default(|| Arc::new(Sink));
        assert_eq!(parameter.name(), "sink");
        assert_eq!(parameter.selector, Selector::named("audit"));
        assert!(parameter.has_default());
    }

    #[test]
    fn adopt_checks_type() {
        let value: Arc<dyn Any + Send + Sync> = Arc::new(Arc::new(Sink));
        assert!(adopt_any::<Arc<Sink>>(&*value).is_some());
        assert!(adopt_any::<Option<Arc<Sink>>>(&*value).is_none());
    }

    #[test]
    fn member_setter_downcasts() {
        #[derive(Default)]
        struct Report {
            title: Option<Arc<String>>,
        }

        let member = Member::<Report>::new::<Arc<String>, _>("title", |report, title| {
            report.title = Some(title)
        });
        let mut report = Report::default();

        assert!((member.set)(&mut report, Box::new(Arc::new(String::from("Q3")))));
        assert_eq!(report.title.as_deref().map(String::as_str), Some("Q3"));
        assert!(!(member.set)(&mut report, Box::new(5u8)));
    }
}
