//! # Rabt Support
//!
//! Shared utilities for the rabt crates.
//!
//! This crate provides:
//! - Text rendering for diagnostics (dependency chains, type names)
//! - "Did you mean?" suggestions for unresolved services

pub mod rendering;
