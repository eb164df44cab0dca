use std::time::Duration;

use thiserror::Error;

use super::client::Endpoint;

/// Failure to get a usable body from one endpoint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{endpoint}: transport error: {cause}")]
    Transport { endpoint: Endpoint, cause: String },

    #[error("{endpoint}: HTTP status {status}")]
    Status { endpoint: Endpoint, status: u16 },

    #[error("{endpoint}: malformed payload: {cause}")]
    Malformed { endpoint: Endpoint, cause: String },

    #[error("{endpoint}: no response within {after:?}")]
    Timeout { endpoint: Endpoint, after: Duration },
}

/// Neither endpoint produced any data in a refresh cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("legacy fetch failed and no status data available: {0}")]
    Unavailable(#[source] FetchError),
}
