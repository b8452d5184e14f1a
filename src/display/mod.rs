// src/display/mod.rs
//! Display modules for the command line interface

pub mod terminal;

pub use terminal::{SessionEnd, TerminalDisplay};
