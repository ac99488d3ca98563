//! # Emby Provider
//!
//! Media-library connector for an Emby server.
//!
//! ## Overview
//!
//! - Item lookup by library path
//! - Title search restricted to movies and series
//! - Season and episode listing for a series
//! - Full metadata and image refresh of one item (`200`/`204` is success)

pub mod connector;
pub mod error;
pub mod types;

pub use connector::EmbyConnector;
pub use error::{EmbyError, Result};
