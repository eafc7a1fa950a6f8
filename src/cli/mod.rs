mod command;
mod runner;

pub use command::Command;
pub use runner::{execute, run, run_with_format, OutputMode, RunContext};
