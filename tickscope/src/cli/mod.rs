//! Command-line interface for tickscope
//!
//! - `args`: clap argument definitions
//! - `commands`: one runner per subcommand

pub mod args;
pub mod commands;

pub use args::{Args, Command, SessionArgs};
