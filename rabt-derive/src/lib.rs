//! Derive macros for Rabt.
//!
//! See [`Injectable`] for the supported attributes.

pub use rabt_macros::Injectable;
