//! Task server client
//!
//! - transport: raw HTTP capability (reqwest by default)
//! - client: retry envelope and typed endpoint wrappers

mod client;
mod transport;

pub use client::{ApiClient, RetryPolicy, TaskQuery, MAX_RETRIES, RETRY_BASE_DELAY};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
