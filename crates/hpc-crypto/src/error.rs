use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("key file has insecure permissions (expected 0600): {0}")]
    InsecurePermissions(String),

    #[error("key material malformed: {0}")]
    Malformed(String),

    #[error("key has been revoked")]
    KeyRevoked,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
