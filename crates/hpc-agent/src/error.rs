use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent is already running")]
    AlreadyRunning,

    #[error("key service error: {0}")]
    Key(#[from] hpc_crypto::KeyError),

    #[error("messaging error: {0}")]
    Messaging(#[from] hpc_messaging::MessagingError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
