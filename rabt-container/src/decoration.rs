//! Decorators.
//!
//! Registering decorator `D` for service `S` replaces every current
//! registration of `S` with one that builds `D`, handing it the instance the
//! original registration would have produced. Each replacement keeps the
//! original's position, lifetime, name, key and condition, so decorating
//! twice nests the second decorator around the first.

use std::any::type_name;
use std::sync::Arc;

use tracing::debug;

use crate::container::ContainerInner;
use crate::descriptor::{Implements, Injectable};
use crate::error::Result;
use crate::key::{Selector, ServiceKey};
use crate::registration::{Registration, Strategy};

pub(crate) fn decorate<S, D>(container: &ContainerInner) -> Result<usize>
where
    S: ?Sized + Send + Sync + 'static,
    D: Injectable + Implements<S>,
{
    container.ensure_alive()?;

    let service = ServiceKey::of::<S>();
    let targets = container.registry.find_all(&service);
    if targets.is_empty() {
        return Err(container.explain(container.unresolved(service, Selector::Default, 0, None)));
    }

    let mut wrapped = 0;
    for inner in &targets {
        let record = Arc::new(Registration::decorating(
            inner,
            Strategy::of_type::<S, D>(Some(inner.clone())),
            container.registry.next_sequence(),
        ));
        if container.registry.replace(inner, record) {
            wrapped += 1;
        }
    }

    debug!(service = %service, decorator = type_name::<D>(), wrapped, "Registered decorator");
    Ok(wrapped)
}
