pub mod client;
pub mod endpoints;
pub mod interceptor;
pub mod models;
pub mod registry;

pub use client::{ClientError, FetchClient, Result};
pub use endpoints::PortalApi;
pub use interceptor::{AdmissionGate, AuthProvider, RequestInterceptor, ResponseInterceptor};
pub use models::{FetchConfig, FetchResponse, Payload, PortalConfig};
pub use registry::{RequestHandle, RequestRegistry};
