//! Service identification keys.
//!
//! [`ServiceKey`] identifies the contract a caller requests (a concrete type
//! or a trait object). [`BindingKey`] is an opaque, hashable value used to
//! disambiguate several bindings of the same service, and [`Selector`] picks
//! which registry index a lookup goes through.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rabt_support::rendering::shorten_type_name;

/// Uniquely identifies a service contract in the container.
///
/// # Examples
/// ```
/// use rabt_container::key::ServiceKey;
///
/// trait Clock: Send + Sync {}
///
/// let key = ServiceKey::of::<dyn Clock>();
/// assert!(key.type_name().contains("Clock"));
/// assert_eq!(key, ServiceKey::of::<dyn Clock>());
/// assert_ne!(key, ServiceKey::of::<String>());
/// ```
#[derive(Clone, Copy)]
pub struct ServiceKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl ServiceKey {
    /// Creates a key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Returns the [`TypeId`] of the service.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the fully qualified type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the type name with module paths stripped.
    pub fn short_name(&self) -> String {
        shorten_type_name(self.type_name)
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKey({})", self.type_name)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Object-safe equality and hashing for values stored in a [`BindingKey`].
///
/// Blanket-implemented for every `Eq + Hash + Debug + Send + Sync + 'static`
/// type; there is no reason to implement it by hand.
pub trait KeyValue: Any + Send + Sync + fmt::Debug {
    #[doc(hidden)]
    fn as_any(&self) -> &dyn Any;
    #[doc(hidden)]
    fn dyn_eq(&self, other: &dyn KeyValue) -> bool;
    #[doc(hidden)]
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T> KeyValue for T
where
    T: Any + Eq + Hash + fmt::Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn KeyValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

/// An opaque key attached to a keyed registration.
///
/// Keys of different Rust types never compare equal, even if their debug
/// output matches.
///
/// ```
/// use rabt_container::key::BindingKey;
///
/// assert_eq!(BindingKey::new(7u8), BindingKey::new(7u8));
/// assert_ne!(BindingKey::new(7u8), BindingKey::new(7u16));
/// ```
#[derive(Clone)]
pub struct BindingKey(Arc<dyn KeyValue>);

impl BindingKey {
    /// Wraps a value as a binding key.
    pub fn new<K: KeyValue>(value: K) -> Self {
        Self(Arc::new(value))
    }

    /// Returns the wrapped value if it has type `K`.
    pub fn downcast_ref<K: KeyValue>(&self) -> Option<&K> {
        self.0.as_any().downcast_ref::<K>()
    }
}

impl PartialEq for BindingKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(&*other.0)
    }
}

impl Eq for BindingKey {}

impl Hash for BindingKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

impl fmt::Debug for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Which registration index a lookup goes through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Selector {
    /// Every binding of the service, first registered wins.
    #[default]
    Default,
    /// The binding registered under a name.
    Named(Arc<str>),
    /// The binding registered under a key.
    Keyed(BindingKey),
}

impl Selector {
    /// Shorthand for [`Selector::Named`].
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::Named(name.into())
    }

    /// Shorthand for [`Selector::Keyed`].
    pub fn keyed<K: KeyValue>(key: K) -> Self {
        Self::Keyed(BindingKey::new(key))
    }

    #[inline]
    pub fn is_default(&self) -> bool {
        matches!(self, Selector::Default)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Default => Ok(()),
            Selector::Named(name) => write!(f, " (name={name:?})"),
            Selector::Keyed(key) => write!(f, " (key={key:?})"),
        }
    }
}
