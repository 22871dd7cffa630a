//! Constructor selection and member injection.
//!
//! Constructors are tried in descriptor order (preferred first, then the
//! widest). The first one whose parameters can all be supplied is used.
//! A parameter is supplied, in order, from an explicit registration value,
//! from the instance being decorated, or by resolving it; a parameter with
//! a default falls back to it when none of those work.

use std::any::Any;

use tracing::trace;

use crate::descriptor::{AnyValue, Arguments, Descriptor, Parameter, Requirement};
use crate::error::{MemberError, NoViableConstructor, RabtError, RejectedConstructor, Result};
use crate::key::ServiceKey;
use crate::registration::{Instance, Overrides};
use crate::resolver::Resolver;

/// The wrapped instance handed to a decorator.
pub(crate) struct Inner<'i> {
    pub service: ServiceKey,
    pub instance: &'i Instance,
}

/// Builds a `T` and fills its members.
pub(crate) fn instantiate<T: Send + Sync + 'static>(
    resolver: &Resolver<'_>,
    implementation: ServiceKey,
    descriptor: &Descriptor<T>,
    overrides: &Overrides,
    inner: Option<Inner<'_>>,
) -> Result<T> {
    let mut value = construct(resolver, implementation, descriptor, overrides, inner.as_ref())?;
    inject_members(resolver, implementation, descriptor, overrides, &mut value)?;
    Ok(value)
}

fn construct<T: Send + Sync + 'static>(
    resolver: &Resolver<'_>,
    implementation: ServiceKey,
    descriptor: &Descriptor<T>,
    overrides: &Overrides,
    inner: Option<&Inner<'_>>,
) -> Result<T> {
    let mut attempts = Vec::new();

    'candidates: for constructor in descriptor.candidates() {
        let mut arguments = Arguments::new(implementation, constructor.arity());

        for parameter in &constructor.parameters {
            match supply(resolver, implementation, parameter, overrides, inner) {
                Ok(value) => arguments.push(parameter.name, value),
                Err(error) if error.is_disposed() => return Err(error),
                Err(error) => match &parameter.default {
                    Some(default) => {
                        trace!(implementation = %implementation, parameter = parameter.name, "Using parameter default");
                        arguments.push(parameter.name, default());
                    }
                    None => {
                        trace!(
                            implementation = %implementation,
                            arity = constructor.arity(),
                            parameter = parameter.name,
                            "Constructor rejected"
                        );
                        attempts.push(RejectedConstructor {
                            arity: constructor.arity(),
                            parameter: parameter.name,
                            reason: error,
                        });
                        continue 'candidates;
                    }
                },
            }
        }

        trace!(implementation = %implementation, arity = constructor.arity(), "Selected constructor");
        return (constructor.build)(&mut arguments)
            .map_err(|source| RabtError::from_boxed(implementation, source));
    }

    // A cycle explains the failure better than the generic report.
    if let Some(position) = attempts.iter().position(|attempt| attempt.reason.is_circular()) {
        return Err(attempts.swap_remove(position).reason);
    }

    Err(RabtError::ConstructionFailed {
        key: implementation,
        source: Box::new(NoViableConstructor {
            implementation,
            attempts,
        }),
    })
}

fn supply(
    resolver: &Resolver<'_>,
    implementation: ServiceKey,
    parameter: &Parameter,
    overrides: &Overrides,
    inner: Option<&Inner<'_>>,
) -> Result<AnyValue> {
    if let Some((_, value)) = overrides
        .parameters
        .iter()
        .find(|(name, _)| name.as_str() == parameter.name)
    {
        return adopt(implementation, parameter, &**value);
    }

    if let Some(inner) = inner {
        if parameter.selector.is_default() && parameter.requirement == Requirement::Service(inner.service) {
            if let Some(value) = (parameter.adopt)(&**inner.instance) {
                return Ok(value);
            }
        }
    }

    (parameter.resolve)(resolver, &parameter.selector)
}

fn adopt(implementation: ServiceKey, parameter: &Parameter, value: &(dyn Any + Send + Sync)) -> Result<AnyValue> {
    (parameter.adopt)(value).ok_or_else(|| RabtError::ConstructionFailed {
        key: implementation,
        source: format!(
            "explicit value for parameter `{}` has the wrong type",
            parameter.name
        )
        .into(),
    })
}

fn inject_members<T>(
    resolver: &Resolver<'_>,
    implementation: ServiceKey,
    descriptor: &Descriptor<T>,
    overrides: &Overrides,
    target: &mut T,
) -> Result<()> {
    let member_error = |error: MemberError| RabtError::ConstructionFailed {
        key: implementation,
        source: Box::new(error),
    };

    let mut explicit = Vec::with_capacity(overrides.members.len());
    for (name, value) in &overrides.members {
        let member = descriptor
            .members
            .iter()
            .find(|member| member.name == name.as_str())
            .ok_or_else(|| member_error(MemberError::Unknown(name.clone())))?;
        let value = (member.adopt)(&**value).ok_or_else(|| member_error(MemberError::WrongType(name.clone())))?;
        if !(member.set)(target, value) {
            return Err(member_error(MemberError::WrongType(name.clone())));
        }
        explicit.push(member.name);
    }

    for member in descriptor
        .members
        .iter()
        .filter(|member| member.injectable && !explicit.contains(&member.name))
    {
        match (member.resolve)(resolver, &member.selector) {
            Ok(value) => {
                (member.set)(target, value);
            }
            Err(error) if error.is_circular() || error.is_disposed() => return Err(error),
            Err(error) if member.required => {
                return Err(member_error(MemberError::Required {
                    member: member.name,
                    source: Box::new(error),
                }));
            }
            Err(error) => {
                trace!(implementation = %implementation, member = member.name, error = %error, "Optional member left unset")
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::container::Container;
    use crate::descriptor::{Constructor, Member};
    use crate::resolver::ResolverApi;

    #[derive(Debug)]
    struct Engine;

    #[derive(Debug, PartialEq)]
    enum Built {
        Bare,
        WithEngine,
        Defaulted(u32),
    }

    fn descriptor() -> Descriptor<Built> {
        Descriptor::new()
            .constructor(Constructor::new(|_| Ok(Built::Bare)))
            .constructor(
                Constructor::new(|args| {
                    let _engine: Arc<Engine> = args.take()?;
                    Ok(Built::WithEngine)
                })
                .param::<Arc<Engine>>("engine"),
            )
    }

    fn build(container: &Container, descriptor: &Descriptor<Built>, overrides: &Overrides) -> Result<Built> {
        container.with_resolver(|r| instantiate(r, ServiceKey::of::<Built>(), descriptor, overrides, None))
    }

    #[test]
    fn widest_satisfiable_constructor_wins() {
        let container = Container::new();
        let overrides = Overrides::default();
        assert_eq!(build(&container, &descriptor(), &overrides).unwrap(), Built::Bare);

        container.register_instance(Arc::new(Engine)).unwrap();
        assert_eq!(build(&container, &descriptor(), &overrides).unwrap(), Built::WithEngine);
    }

    #[test]
    fn default_value_keeps_constructor_viable() {
        let container = Container::new();
        let descriptor = Descriptor::new().constructor(
            Constructor::new(|args| Ok(Built::Defaulted(*args.take::<Arc<u32>>()?)))
                .with(Parameter::new::<Arc<u32>>("retries").with_default(|| Arc::new(7u32))),
        );
        assert_eq!(
            build(&container, &descriptor, &Overrides::default()).unwrap(),
            Built::Defaulted(7)
        );
    }

    #[test]
    fn explicit_parameter_beats_resolution() {
        let container = Container::new();
        let overrides = Overrides {
            parameters: vec![("engine".into(), Arc::new(Arc::new(Engine)) as Instance)],
            members: vec![],
        };
        assert_eq!(build(&container, &descriptor(), &overrides).unwrap(), Built::WithEngine);
    }

    #[test]
    fn no_viable_constructor_reports_attempts() {
        let container = Container::new();
        let descriptor = Descriptor::new()
            .constructor(Constructor::new(|_| Ok(Built::WithEngine)).param::<Arc<Engine>>("engine"));

        let err = build(&container, &descriptor, &Overrides::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("no viable constructor"));
        assert!(message.contains("`engine`"));
    }

    #[test]
    fn build_errors_are_not_retried() {
        let container = Container::new();
        let descriptor = Descriptor::new()
            .constructor(Constructor::new(|_| Ok(Built::Bare)))
            .constructor(Constructor::new(|_| Err("disk full".into())).param::<Option<Arc<Engine>>>("engine"));

        let err = build(&container, &descriptor, &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[derive(Default, Debug)]
    struct Gauge {
        engine: Option<Arc<Engine>>,
        label: Option<Arc<str>>,
    }

    fn gauge(required: bool) -> Descriptor<Gauge> {
        let engine = Member::new::<Arc<Engine>, _>("engine", |gauge: &mut Gauge, engine| {
            gauge.engine = Some(engine)
        });
        let engine = if required { engine.required() } else { engine };
        Descriptor::new()
            .constructor(Constructor::new(|_| Ok(Gauge::default())))
            .member(engine)
            .member(
                Member::new::<Arc<str>, _>("label", |gauge: &mut Gauge, label| gauge.label = Some(label))
                    .explicit_only(),
            )
    }

    fn build_gauge(container: &Container, descriptor: &Descriptor<Gauge>, overrides: &Overrides) -> Result<Gauge> {
        container.with_resolver(|r| instantiate(r, ServiceKey::of::<Gauge>(), descriptor, overrides, None))
    }

    #[test]
    fn optional_member_left_unset() {
        let container = Container::new();
        let gauge = build_gauge(&container, &gauge(false), &Overrides::default()).unwrap();
        assert!(gauge.engine.is_none());
        assert!(gauge.label.is_none());
    }

    #[test]
    fn required_member_failure() {
        let container = Container::new();
        let err = build_gauge(&container, &gauge(true), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("required member `engine`"));
    }

    #[test]
    fn explicit_member_values() {
        let container = Container::new();
        container.register_instance(Arc::new(Engine)).unwrap();
        let label: Arc<str> = Arc::from("rpm");
        let overrides = Overrides {
            parameters: vec![],
            members: vec![("label".into(), Arc::new(label) as Instance)],
        };

        let gauge = build_gauge(&container, &gauge(true), &overrides).unwrap();
        assert!(gauge.engine.is_some());
        assert_eq!(gauge.label.as_deref(), Some("rpm"));
    }

    #[test]
    fn unknown_or_mistyped_member() {
        let container = Container::new();
        let unknown = Overrides {
            parameters: vec![],
            members: vec![("colour".into(), Arc::new(1u8) as Instance)],
        };
        let err = build_gauge(&container, &gauge(false), &unknown).unwrap_err();
        assert!(err.to_string().contains("no settable member named `colour`"));

        let mistyped = Overrides {
            parameters: vec![],
            members: vec![("label".into(), Arc::new(1u8) as Instance)],
        };
        let err = build_gauge(&container, &gauge(false), &mistyped).unwrap_err();
        assert!(err.to_string().contains("wrong type"));
    }
}
