//! Mask editing: tool catalog, edit commands, undo/redo.

pub mod command;
pub mod history;
pub mod session;
pub mod tools;

pub use command::EditCommand;
pub use history::EditHistory;
pub use session::EditSession;
pub use tools::{BoxRegion, ProjectedLoop, ScissorsMode, SmartDeleteOptions};
