//! Personalizer Common Library
//!
//! Shared data model and configuration for the personalizer regression suite.

pub mod config;
pub mod error;
pub mod types;

pub use config::SuiteConfig;
pub use error::{Error, Result};
pub use types::*;
