//! Command line interface.

mod commands;
mod display;

pub use commands::{is_verbose, run};
