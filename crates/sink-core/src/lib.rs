pub mod cli;
pub mod error;

pub use cli::{parse_args, AddArgs, Cli, Command, DedupeArgs, QuarantineArgs};
pub use error::{SinkError, SinkResult};
