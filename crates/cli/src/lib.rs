//! Personalizer check CLI
//!
//! Runs the rank-vs-DOM suite and the console audit from the command line and
//! prints their results.

pub mod commands;
pub mod output;
pub mod settings;
