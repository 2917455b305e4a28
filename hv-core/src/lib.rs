//! hv-core: shared plumbing for the hv-rs health-record service client.
//!
//! Everything here is transport glue that the blob and auth crates build on:
//! the error taxonomy, configuration snapshots, the retry policy for transient
//! failures, a small HTTP client wrapper and the [`AuthorizedSender`] seam
//! through which signed service calls are made.

pub mod config;
pub mod errors;
pub mod http;
#[cfg(feature = "tracing-basic")]
pub mod logging;
pub mod request;
pub mod retry;

pub use config::{ConfigSnapshot, ConnectionConfig};
pub use errors::{HvError, HvResult};
pub use http::{check_status, HttpClient};
pub use request::{AuthorizedSender, ServiceRequest, ServiceResponse};
pub use retry::RetryPolicy;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AuthorizedSender, ConnectionConfig, HvError, HvResult, RetryPolicy, ServiceRequest,
        ServiceResponse,
    };
}
