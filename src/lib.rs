//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `strm-reconcile-workspace`
//! and enable `desktop-shims` to get the reqwest/tokio adapters wired into
//! `core-service` without listing each crate.

pub use core_service::*;
