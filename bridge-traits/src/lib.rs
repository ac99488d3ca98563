//! # Bridge Traits
//!
//! Collaborator contracts between the reconciliation core and the outside world.
//!
//! ## Overview
//!
//! The core never talks to a filesystem, a remote drive or a media server
//! directly. Each of those is a trait here, implemented by `bridge-desktop`
//! (local filesystem, reqwest) and the `provider-*` crates (HTTP APIs):
//!
//! - [`RemoteLister`](remote::RemoteLister) / [`ChangeHintSource`](remote::ChangeHintSource) - remote source tree
//! - [`ProxyTree`](proxy::ProxyTree) / [`ProxyGenerator`](proxy::ProxyGenerator) - local proxy files
//! - [`MediaLibrary`](library::MediaLibrary) - downstream catalog server
//! - [`HttpClient`](http::HttpClient) - transport used by the providers
//! - [`Clock`](time::Clock) - time source, swappable for [`ManualClock`](time::ManualClock) in tests
//!
//! ## Error Handling
//!
//! Every trait returns [`BridgeError`](error::BridgeError). Implementations map
//! connection failures to `Unreachable` so callers can tell transient failures
//! from real absence.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; the scanner and the refresh worker share
//! them across tasks behind `Arc`.

pub mod error;
pub mod http;
pub mod library;
pub mod proxy;
pub mod remote;
pub mod time;

pub use error::{BridgeError, Result};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use library::{LibraryItem, LibraryItemKind, MediaLibrary};
pub use proxy::{ProxyFile, ProxyGenerator, ProxyTree};
pub use remote::{ChangeHintSource, RemoteEntry, RemoteLister};
pub use time::{Clock, ManualClock, SystemClock};
