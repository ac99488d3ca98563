//! # Desktop Bridge Implementations
//!
//! Default implementations of the bridge traits for a host with direct
//! filesystem and network access.
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`, with retry on 5xx/429
//! - `ProxyTree` over a local directory of `.strm` files using `tokio::fs`
//! - `ProxyGenerator` writing `.strm` files that mirror the remote layout
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{LocalProxyTree, ReqwestHttpClient, StrmProxyGenerator};
//!
//! let http_client = ReqwestHttpClient::new();
//! let tree = LocalProxyTree::new("/mnt/strm", "http://alist.local:5244");
//! let generator = StrmProxyGenerator::new("/mnt/strm", "/media", "http://alist.local:5244");
//! ```

mod generator;
mod http;
mod proxy_tree;

pub use generator::StrmProxyGenerator;
pub use http::ReqwestHttpClient;
pub use proxy_tree::LocalProxyTree;
