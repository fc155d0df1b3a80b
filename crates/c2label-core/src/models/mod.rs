//! Data models for c2label

mod alert;
mod envelope;
mod mutation;

pub use alert::*;
pub use envelope::*;
pub use mutation::*;
