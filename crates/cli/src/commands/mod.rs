//! CLI Commands

pub mod config;
pub mod console;
pub mod items;
pub mod rank;

use personalizer_common::SuiteConfig;
use personalizer_e2e::PlaywrightConfig;

/// Bridge settings for a configured suite; rank and reward traffic is captured
pub fn playwright_config(config: &SuiteConfig) -> PlaywrightConfig {
    PlaywrightConfig {
        browser: config.browser.clone(),
        capture_patterns: vec![
            config.endpoints.rank_path.clone(),
            config.endpoints.reward_path.clone(),
        ],
        start_timeout: config.timing.bridge_start_timeout(),
    }
}
