//! Command-line interface for the `dirwatch` binary.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands};
