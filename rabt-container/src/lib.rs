//! Core container implementation for Rabt DI.
//!
//! The [`prelude`] brings in everything needed to register and resolve
//! services. Implementation types describe how they are built through
//! [`Injectable`](descriptor::Injectable), usually derived with
//! `#[derive(Injectable)]` from the `rabt` facade crate.

pub mod config;
pub mod container;
mod decoration;
pub mod deferred;
pub mod descriptor;
pub mod error;
mod graph;
mod inflight;
pub mod key;
pub mod lifecycle;
pub mod lifetime;
pub mod provider;
pub mod registration;
mod registry;
pub mod resolver;
pub mod scope;
mod selector;

pub use container::{Container, prelude};
pub use error::{RabtError, Result};
pub use key::ServiceKey;
pub use lifetime::Lifetime;
