//! # AList Provider
//!
//! Remote source connector for an AList server.
//!
//! ## Overview
//!
//! - Paginated directory listing (`POST /api/fs/list`)
//! - Existence probes (`POST /api/fs/get`); "not found" is `false`, not an error
//! - Change hints from the `modified` time of top-level directories
//! - Raw token in the `Authorization` header

pub mod connector;
pub mod error;
pub mod types;

pub use connector::AlistConnector;
pub use error::{AlistError, Result};
