#![deny(clippy::all)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(clippy::module_name_repetitions)]
//!
//! The [`osdep`](crate) crate provides the host operating system services a plugin host needs to load third-party modules and call into them:
//! dynamic module loading ([`dso`]), detached threads ([`thread`]), mutexes and condition variables ([`sync`]),
//! and calls into foreign code that survive a crash in the callee ([`fault`]).
//!
//! Each service has exactly one native backing per target, chosen at build time. Callers only see the types in this crate.

///
/// Interfaces to load and access dynamic libraries on the host, used for binding to plugin entry points
pub mod dso;
/// The error type shared by every service in this crate
pub mod error;
/// Calling foreign function pointers inside a fault boundary
pub mod fault;
/// Build-time identity of the host platform
pub mod platform;
/// Mutual exclusion and condition variables over the native primitives
pub mod sync;
/// Detached native threads
pub mod thread;

#[cfg(test)]
mod test_util;

pub use error::{Error, Result};
