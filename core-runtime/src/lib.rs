//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the reconciliation crates:
//! - Configuration and validation
//! - Path mapping between the proxy, remote and library path spaces
//! - Logging and tracing bootstrap
//! - Event bus for scan, repair and refresh notifications

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
pub use paths::PathMapper;
