use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("failed to read {source_path}: {detail}")]
    SourceUnavailable { source_path: String, detail: String },

    #[error("latency probe to {target} timed out")]
    ProbeTimeout { target: String },
}
