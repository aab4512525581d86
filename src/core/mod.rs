//! Core engine systems

pub mod bits;
pub mod error;
pub mod types;
pub mod logging;
pub mod progress;

pub use error::Error;
pub use types::Result;
pub use progress::{CancelFlag, TaskCtx};
