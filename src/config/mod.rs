//! Configuration module
//!
//! Server and hub settings, optionally loaded from a TOML file and overridden
//! from the command line.

mod settings;

pub use settings::*;
