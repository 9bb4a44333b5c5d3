//! Client-side download and HTTP subsystem for a digital asset
//! management portal.
//!
//! The pieces, leaf to root: a [`RequestRegistry`] of cancellable
//! in-flight requests, a [`FetchClient`] with interceptor chains for
//! auth and error normalization, a session store and a streaming
//! [`DownloadEngine`] covering single files, ZIP batches and converted
//! image variants. [`Portal`] wires them all together.

pub mod api;
pub mod application;
pub mod domain;
pub mod utils;

mod portal;

pub use api::{ClientError, FetchClient, PortalApi, PortalConfig, RequestRegistry};
pub use application::{DownloadEngine, DownloadTracker, SessionStore};
pub use domain::{DownloadError, ZipOutcome};
pub use portal::{Portal, PortalBuilder};
