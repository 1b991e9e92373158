//! Adapters for the remote record-management API.

mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use guard_types::{RecordApi, RemoteError};
pub use http::HttpRecordApi;

#[cfg(any(test, feature = "test-util"))]
pub use mock::{Capability, MockRecordApi, RemoteCall};
