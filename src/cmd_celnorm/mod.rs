//! Subcommand modules for the `celnorm` binary.

pub mod info;
pub mod norm;
