pub mod driver;
pub mod error;
pub mod meter;
pub mod state;

pub use driver::{MeteringDriver, NullDriver};
pub use error::{DriverError, MeteringError};
pub use meter::UsageMeter;
