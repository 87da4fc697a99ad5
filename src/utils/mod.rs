pub mod command;
pub mod fs;
pub mod locker;

// Trait-based abstraction for testability
pub mod executor;

pub use command::{tool_available, ToolEnv, DEFAULT_COMMAND_TIMEOUT};
pub use executor::{CommandExecutor, RealExecutor};
pub use locker::OperationLock;
