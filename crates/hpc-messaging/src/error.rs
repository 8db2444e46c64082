use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("inbox is full")]
    InboxFull,

    #[error("response type did not match the request's expected response type")]
    UnexpectedResponseType,

    #[error("request timed out waiting for a response")]
    Timeout,

    #[error("request was cancelled")]
    Cancelled,

    #[error("envelope invalid: {0}")]
    InvalidEnvelope(#[from] hpc_types::ModelError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
