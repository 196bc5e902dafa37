//! Configuration module for deltapager
//!
//! Provides the enumeration settings, loadable from a JSON file and
//! overridable from the command line.

mod settings;

pub use settings::*;
