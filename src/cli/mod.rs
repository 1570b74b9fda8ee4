//! Command line interface module
//!
//! Argument parsing, the runner that drives one listing command, and the
//! printers for its results.

pub mod args;
pub mod output;
pub mod runner;

pub use args::{Args, Command, ListArgs, OutputFormat};
pub use output::Printer;
pub use runner::Runner;
