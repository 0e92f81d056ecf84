pub mod commands;
pub mod dispatcher;
pub mod window;

pub use commands::Command;
pub use dispatcher::{Cadence, CadenceKind, Dispatcher, TickOutcome};
pub use window::ActiveWindow;
