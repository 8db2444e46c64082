use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeteringError {
    #[error("workload {0} is already metered")]
    AlreadyMetered(String),

    #[error("workload {0} is not metered")]
    NotFound(String),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("driver unavailable for workload {0}")]
    Unavailable(String),
}
