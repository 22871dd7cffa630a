//! Error types for rabt container operations.
//!
//! Every error names the service involved and, where it helps, a hint
//! about how to fix the registration.

use std::fmt;

use rabt_support::rendering::render_chain;

use crate::key::{Selector, ServiceKey};
use crate::lifetime::Lifetime;

/// Error type returned by factories and constructors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for all rabt operations.
#[derive(Debug, thiserror::Error)]
pub enum RabtError {
    /// No usable registration for the requested service.
    #[error("{}", .0)]
    Unresolved(UnresolvedError),

    /// A service reappeared on its own resolution path.
    #[error("{}", .0)]
    CircularDependency(CircularDependencyError),

    /// A long-lived service requires a shorter-lived one (found by validation).
    #[error("{}", .0)]
    LifetimeMismatch(LifetimeMismatchError),

    /// No constructor was viable, or a constructor/factory returned an error.
    #[error("Failed to construct {key}: {source}")]
    ConstructionFailed {
        key: ServiceKey,
        #[source]
        source: BoxError,
    },

    /// A Scoped service was requested outside of any scope.
    #[error(
        "Scoped service requested with no active scope: {key}\n  Hint: resolve it through a scope created with Container::create_scope()"
    )]
    MissingScope { key: ServiceKey },

    /// The container or scope was already disposed.
    #[error("Cannot use a disposed {0}")]
    Disposed(DisposedTarget),

    /// Resolution nested deeper than the configured limit.
    #[error("Resolution depth limit of {limit} exceeded while resolving {key}")]
    DepthExceeded { key: ServiceKey, limit: usize },
}

impl RabtError {
    /// Wraps any error as a construction failure of `key`.
    ///
    /// Cycle and disposed-state errors are kept as they are so callers can
    /// still match on them.
    pub(crate) fn construction(key: ServiceKey, source: RabtError) -> Self {
        match source {
            RabtError::CircularDependency(_) | RabtError::Disposed(_) => source,
            other => RabtError::ConstructionFailed {
                key,
                source: Box::new(other),
            },
        }
    }

    /// Converts a factory or constructor error into a construction failure,
    /// unwrapping it first when it already is a [`RabtError`].
    pub(crate) fn from_boxed(key: ServiceKey, source: BoxError) -> Self {
        match source.downcast::<RabtError>() {
            Ok(inner) => match *inner {
                failure @ RabtError::ConstructionFailed { key: failed, .. } if failed == key => failure,
                other => RabtError::construction(key, other),
            },
            Err(source) => RabtError::ConstructionFailed { key, source },
        }
    }

    /// Returns `true` if this is an [`RabtError::Unresolved`] for `key` itself
    /// (not for one of its dependencies).
    pub fn is_unresolved_for(&self, key: &ServiceKey) -> bool {
        matches!(self, RabtError::Unresolved(e) if &e.requested == key)
    }

    /// Returns `true` for circular dependency errors.
    pub fn is_circular(&self) -> bool {
        matches!(self, RabtError::CircularDependency(_))
    }

    /// Returns `true` for disposed-state errors.
    pub fn is_disposed(&self) -> bool {
        matches!(self, RabtError::Disposed(_))
    }
}

/// Error when no registration could satisfy a request.
///
/// Covers both "never registered" and "every candidate was rejected by its
/// condition".
#[derive(Debug)]
pub struct UnresolvedError {
    /// The service that was requested
    pub requested: ServiceKey,
    /// Name or key used for the lookup
    pub selector: Selector,
    /// The service whose construction needed it, if any
    pub required_by: Option<ServiceKey>,
    /// How many registrations existed but failed their condition
    pub rejected_by_condition: usize,
    /// Registered services with similar names
    pub suggestions: Vec<String>,
}

impl fmt::Display for UnresolvedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rejected_by_condition > 0 {
            write!(
                f,
                "Dependency not resolvable: {}{}\n  {} registration(s) rejected by their condition",
                self.requested, self.selector, self.rejected_by_condition
            )?;
            return write!(
                f,
                "\n  Hint: check the .when(...) predicates registered for this service"
            );
        }

        write!(f, "Dependency not registered: {}{}", self.requested, self.selector)?;

        if let Some(ref parent) = self.required_by {
            write!(f, "\n  Required by: {parent}")?;
        }

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }

        write!(
            f,
            "\n  Hint: Did you forget to register {}?",
            self.requested.short_name()
        )
    }
}

/// Error when a circular dependency is detected.
///
/// The chain lists services in the order they were entered, ending with the
/// service that closed the loop.
#[derive(Debug)]
pub struct CircularDependencyError {
    pub chain: Vec<ServiceKey>,
}

impl fmt::Display for CircularDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.chain.iter().map(ServiceKey::short_name).collect();
        write!(f, "Circular dependency detected:\n  {}", render_chain(&names))?;
        write!(
            f,
            "\n  Hint: Consider injecting Lazy<T> or Producer<T>, or restructuring your dependencies"
        )
    }
}

/// Error when a long-lived consumer captures a shorter-lived dependency.
#[derive(Debug)]
pub struct LifetimeMismatchError {
    pub consumer: ServiceKey,
    pub consumer_lifetime: Lifetime,
    pub dependency: ServiceKey,
    pub dependency_lifetime: Lifetime,
}

impl fmt::Display for LifetimeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lifetime mismatch: {} ({}) depends on {} ({})",
            self.consumer, self.consumer_lifetime, self.dependency, self.dependency_lifetime,
        )?;
        write!(
            f,
            "\n  Hint: make {} {} or inject Lazy<T>/Producer<T> instead",
            self.dependency.short_name(),
            self.consumer_lifetime,
        )
    }
}

/// What was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposedTarget {
    Container,
    Scope,
}

impl fmt::Display for DisposedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisposedTarget::Container => write!(f, "container"),
            DisposedTarget::Scope => write!(f, "scope"),
        }
    }
}

/// One constructor the selector had to skip.
#[derive(Debug)]
pub struct RejectedConstructor {
    /// Number of parameters of the rejected constructor
    pub arity: usize,
    /// The first parameter that could not be satisfied
    pub parameter: &'static str,
    pub reason: RabtError,
}

/// Source of a [`RabtError::ConstructionFailed`] when no constructor worked.
#[derive(Debug)]
pub struct NoViableConstructor {
    pub implementation: ServiceKey,
    pub attempts: Vec<RejectedConstructor>,
}

impl fmt::Display for NoViableConstructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(
                f,
                "{} declares no constructors",
                self.implementation.short_name()
            );
        }

        write!(
            f,
            "no viable constructor for {}",
            self.implementation.short_name()
        )?;
        for attempt in &self.attempts {
            write!(
                f,
                "\n    - {}-parameter constructor: `{}` unavailable: {}",
                attempt.arity, attempt.parameter, attempt.reason
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for NoViableConstructor {}

/// Source of a [`RabtError::ConstructionFailed`] when member injection fails.
#[derive(Debug, thiserror::Error)]
pub enum MemberError {
    #[error("required member `{member}` could not be resolved: {source}")]
    Required {
        member: &'static str,
        #[source]
        source: Box<RabtError>,
    },

    #[error("no settable member named `{0}`")]
    Unknown(String),

    #[error("explicit value for member `{0}` has the wrong type")]
    WrongType(String),
}

/// Convenient Result type for rabt operations.
pub type Result<T> = std::result::Result<T, RabtError>;
