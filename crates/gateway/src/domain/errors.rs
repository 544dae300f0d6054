use thiserror::Error;

/// Errors from the wire-level feed connection
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Connection closed")]
    Closed,
}

/// Errors from snapshot acquisition
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error {code}: {message}")]
    Api { code: i32, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}
