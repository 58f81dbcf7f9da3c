//! Type system utilities and aliases.
//!
//! This module provides type aliases and utilities for commonly used
//! complex types throughout the codebase.
//!
//! ## Modules
//!
//! - [`aliases`]: Type aliases for `Arc<RwLock<T>>` and progress callbacks

pub mod aliases;

pub use aliases::*;
