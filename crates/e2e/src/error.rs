//! Error types for the personalizer checks

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Playwright not found. Install with: npm install playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Input not found: {0}")]
    InputNotFound(String),

    #[error("Unsupported input format: {0}")]
    UnsupportedInput(String),

    #[error("Section '{0}' not found in input")]
    MissingSection(String),

    #[error("Navigation to {url} did not settle within {timeout_ms} ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("No elements matched '{selector}'")]
    EmptyDomOrder { selector: String },

    #[error("No clickable elements under '{selector}'")]
    NoClickableElements { selector: String },

    #[error("Recommendation not loaded: rank API response for '{0}' was never observed")]
    RecommendationNotLoaded(String),

    #[error("Rank mismatch: {reason} (dom: {dom_order:?}, rank: {rank_order:?})")]
    RankMismatch {
        reason: String,
        dom_order: Vec<String>,
        rank_order: Vec<String>,
    },

    #[error("Console errors found on {url}: {count} message(s) mention {experiment_id}")]
    ConsoleErrors {
        url: String,
        experiment_id: String,
        count: usize,
    },

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] personalizer_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Workbook read error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Report write error: {0}")]
    Report(#[from] rust_xlsxwriter::XlsxError),
}

pub type E2eResult<T> = Result<T, E2eError>;
