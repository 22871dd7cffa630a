mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Log, Tracked};
use rabt_container::prelude::*;

#[derive(Debug)]
struct Session {
    id: usize,
}

fn counting_sessions(container: &Container, lifetime: Lifetime) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    container
        .register_factory::<Session, _>(lifetime, {
            let counter = counter.clone();
            move |_| {
                Ok(Arc::new(Session {
                    id: counter.fetch_add(1, Ordering::SeqCst),
                }))
            }
        })
        .unwrap();
    counter
}

// ── Lifetimes ──

#[test]
fn singleton_is_shared_across_scopes() {
    common::init_tracing();
    let container = Container::new();
    let built = counting_sessions(&container, Lifetime::Singleton);

    let root = container.resolve::<Session>().unwrap();
    let scope = container.create_scope().unwrap();
    let scoped = scope.resolve::<Session>().unwrap();

    assert!(Arc::ptr_eq(&root, &scoped));
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn scoped_is_shared_within_a_scope_only() {
    let container = Container::new();
    counting_sessions(&container, Lifetime::Scoped);

    let first = container.create_scope().unwrap();
    let second = container.create_scope().unwrap();

    let a = first.resolve::<Session>().unwrap();
    let b = first.resolve::<Session>().unwrap();
    let c = second.resolve::<Session>().unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_ne!(a.id, c.id);
}

#[test]
fn scoped_without_scope_fails() {
    let container = Container::new();
    counting_sessions(&container, Lifetime::Scoped);

    let err = container.resolve::<Session>().unwrap_err();
    assert!(matches!(err, RabtError::MissingScope { key } if key == ServiceKey::of::<Session>()));
    assert!(err.to_string().contains("create_scope"));
}

#[test]
fn transient_inside_scope_is_not_cached() {
    let container = Container::new();
    counting_sessions(&container, Lifetime::Transient);

    let scope = container.create_scope().unwrap();
    let a = scope.resolve::<Session>().unwrap();
    let b = scope.resolve::<Session>().unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
}

#[derive(Debug)]
struct Cache {
    session: Arc<Session>,
}

impl Injectable for Cache {
    fn descriptor() -> Descriptor<Self> {
        Descriptor::new().constructor(
            Constructor::new(|args| Ok(Cache { session: args.take()? })).param::<Arc<Session>>("session"),
        )
    }
}

#[test]
fn singleton_never_captures_a_scoped_dependency() {
    let container = Container::new();
    counting_sessions(&container, Lifetime::Scoped);
    container.register_type::<Cache>(Lifetime::Singleton).unwrap();

    let scope = container.create_scope().unwrap();
    let err = scope.resolve::<Cache>().unwrap_err();
    assert!(matches!(err, RabtError::ConstructionFailed { .. }));
    assert!(err.to_string().contains("no active scope"));

    assert!(matches!(container.validate(), Err(RabtError::LifetimeMismatch(_))));
}

#[test]
fn scoped_consumer_shares_the_scope_instance() {
    let container = Container::new();
    counting_sessions(&container, Lifetime::Scoped);
    container.register_type::<Cache>(Lifetime::Scoped).unwrap();

    let scope = container.create_scope().unwrap();
    let cache = scope.resolve::<Cache>().unwrap();
    let session = scope.resolve::<Session>().unwrap();
    assert!(Arc::ptr_eq(&cache.session, &session));
}

#[test]
fn lazy_inside_scope_resolves_in_that_scope() {
    let container = Container::new();
    counting_sessions(&container, Lifetime::Scoped);

    let scope = container.create_scope().unwrap();
    let lazy = scope.get::<Lazy<Session>>().unwrap();
    let direct = scope.resolve::<Session>().unwrap();
    assert!(Arc::ptr_eq(&lazy.get().unwrap(), &direct));

    drop(scope);
    let orphan = container.create_scope().unwrap().get::<Lazy<Session>>().unwrap();
    assert!(orphan.get().unwrap_err().is_disposed());
}

// ── Scopes ──

#[test]
fn scopes_track_their_lifetime() {
    let container = Container::new();
    let scope = container.create_scope().unwrap();
    let other = container.create_scope().unwrap();
    assert_ne!(scope.id(), other.id());
    assert_eq!(container.live_scopes(), 2);

    scope.dispose();
    assert!(scope.is_disposed());
    assert_eq!(container.live_scopes(), 1);
    assert!(matches!(
        scope.resolve::<Session>(),
        Err(RabtError::Disposed(rabt_container::error::DisposedTarget::Scope))
    ));

    drop(other);
    assert_eq!(container.live_scopes(), 0);
}

// ── Disposal ──

fn tracked(container: &Container, label: &'static str, lifetime: Lifetime, log: &Log) {
    let log = log.clone();
    container
        .register_factory::<Tracked, _>(lifetime, move |_| Ok(Tracked::new(label, &log)))
        .unwrap()
        .named(label)
        .disposable();
}

#[test]
fn scope_disposes_its_instances_once_in_reverse_order() {
    common::init_tracing();
    let log = common::log();
    let container = Container::new();
    tracked(&container, "first", Lifetime::Scoped, &log);
    tracked(&container, "second", Lifetime::Scoped, &log);
    tracked(&container, "temp", Lifetime::Transient, &log);
    tracked(&container, "shared", Lifetime::Singleton, &log);

    let scope = container.create_scope().unwrap();
    let other = container.create_scope().unwrap();
    for label in ["first", "second", "temp", "shared", "first"] {
        scope.resolve_named::<Tracked>(label).unwrap();
    }
    other.resolve_named::<Tracked>("first").unwrap();
    assert_eq!(scope.tracked_disposables(), 3);

    scope.dispose();
    scope.dispose();
    assert_eq!(*log.lock(), ["temp", "second", "first"]);

    drop(other);
    assert_eq!(*log.lock(), ["temp", "second", "first", "first"]);

    container.dispose();
    assert_eq!(*log.lock(), ["temp", "second", "first", "first", "shared"]);
}

#[test]
fn container_disposes_live_scopes_then_its_own_instances() {
    let log = common::log();
    let container = Container::new();
    tracked(&container, "session", Lifetime::Scoped, &log);
    tracked(&container, "pool", Lifetime::Singleton, &log);
    tracked(&container, "job", Lifetime::Transient, &log);

    container.resolve_named::<Tracked>("pool").unwrap();
    container.resolve_named::<Tracked>("job").unwrap();

    let scope = container.create_scope().unwrap();
    scope.resolve_named::<Tracked>("session").unwrap();

    container.dispose();
    assert!(scope.is_disposed());
    assert_eq!(*log.lock(), ["session", "job", "pool"]);

    container.dispose();
    drop(scope);
    assert_eq!(log.lock().len(), 3);
}

struct Faulty;

impl Dispose for Faulty {
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        Err("socket already closed".into())
    }
}

struct Panicky;

impl Dispose for Panicky {
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        panic!("dispose exploded")
    }
}

#[test]
fn failing_disposals_do_not_stop_the_sweep() {
    let log = common::log();
    let container = Container::new();
    tracked(&container, "before", Lifetime::Singleton, &log);
    container
        .register_factory::<Faulty, _>(Lifetime::Singleton, |_| Ok(Arc::new(Faulty)))
        .unwrap()
        .disposable();
    container
        .register_factory::<Panicky, _>(Lifetime::Singleton, |_| Ok(Arc::new(Panicky)))
        .unwrap()
        .disposable();

    container.resolve_named::<Tracked>("before").unwrap();
    container.resolve::<Faulty>().unwrap();
    container.resolve::<Panicky>().unwrap();

    container.dispose();
    assert_eq!(*log.lock(), ["before"]);
}

#[test]
fn instances_are_only_disposed_when_marked() {
    let log = common::log();
    let container = Container::new();
    container.register_instance(Tracked::new("plain", &log)).unwrap();
    container
        .register_instance(Tracked::new("owned", &log))
        .unwrap()
        .named("owned")
        .disposable();

    container.resolve::<Tracked>().unwrap();
    container.resolve_named::<Tracked>("owned").unwrap();

    container.dispose();
    assert_eq!(*log.lock(), ["owned"]);
}

#[test]
fn unresolved_instances_are_not_disposed() {
    let log = common::log();
    let container = Container::new();
    tracked(&container, "never", Lifetime::Singleton, &log);

    container.dispose();
    assert!(log.lock().is_empty());
}

#[test]
fn drop_disposes_unless_disabled() {
    let log = common::log();
    {
        let container = Container::new();
        tracked(&container, "dropped", Lifetime::Singleton, &log);
        container.resolve_named::<Tracked>("dropped").unwrap();
    }
    assert_eq!(*log.lock(), ["dropped"]);

    {
        let container = Container::with_options(ContainerOptions::default().dispose_on_drop(false));
        tracked(&container, "kept", Lifetime::Singleton, &log);
        container.resolve_named::<Tracked>("kept").unwrap();
    }
    assert_eq!(*log.lock(), ["dropped"]);
}

#[test]
fn disposed_container_rejects_use() {
    let container = Container::new();
    counting_sessions(&container, Lifetime::Singleton);
    let scope = container.create_scope().unwrap();
    container.dispose();

    assert!(container.is_disposed());
    assert!(container.resolve::<Session>().unwrap_err().is_disposed());
    assert!(scope.resolve::<Session>().unwrap_err().is_disposed());
    assert!(container.create_scope().unwrap_err().is_disposed());
    assert!(
        container
            .register_factory::<Session, _>(Lifetime::Transient, |_| Ok(Arc::new(Session { id: 0 })))
            .unwrap_err()
            .is_disposed()
    );
    assert!(container.validate().unwrap_err().is_disposed());
}
