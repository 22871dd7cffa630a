//! # Rabt: an inversion-of-control container for Rust
//!
//! Register services by contract, let the container pick constructors and
//! wire dependencies, and get lifetimes, scopes, decorators and disposal
//! handled for you.
//!
//! ```
//! use std::sync::Arc;
//! use rabt::prelude::*;
//!
//! trait Clock: Send + Sync {
//!     fn now(&self) -> u64;
//! }
//!
//! #[derive(Injectable)]
//! #[injectable(provides = "dyn Clock")]
//! struct FixedClock;
//!
//! impl Clock for FixedClock {
//!     fn now(&self) -> u64 { 42 }
//! }
//!
//! #[derive(Injectable)]
//! struct Scheduler {
//!     clock: Arc<dyn Clock>,
//! }
//!
//! let container = Container::new();
//! container.register::<dyn Clock, FixedClock>(Lifetime::Singleton)?;
//! container.register_type::<Scheduler>(Lifetime::Transient)?;
//!
//! assert_eq!(container.resolve::<Scheduler>()?.clock.now(), 42);
//! # Ok::<(), rabt::RabtError>(())
//! ```

pub use rabt_container::*;
pub use rabt_derive::*;
pub use rabt_support::*;

pub mod prelude {
    pub use rabt_container::prelude::*;
    pub use rabt_derive::Injectable;
}
