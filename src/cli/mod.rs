//! Command-line interface
//!
//! Argument definitions and command handlers for the `mayhem` binary.

pub mod args;
pub mod commands;
