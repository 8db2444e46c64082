//! Full-duplex peer message delivery, response correlation, and handoff
//! admission evaluation.

pub mod admission;
pub mod error;
pub mod handler;
pub mod pending;

pub use admission::{evaluate_admission, AdmissionSource};
pub use error::MessagingError;
pub use handler::MessageHandler;
