//! Resolving the suite configuration from file, environment and flags

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use personalizer_common::SuiteConfig;
use tracing::{debug, warn};

/// Flags shared by every subcommand
#[derive(Debug, Clone, Args)]
pub struct GlobalOpts {
    /// Configuration file (TOML); defaults apply when it does not exist
    #[arg(short, long, global = true, env = "PERSONALIZER_CONFIG", default_value = "personalizer.toml")]
    pub config: PathBuf,

    /// Input workbook or JSON/YAML item file
    #[arg(short, long, global = true)]
    pub input: Option<PathBuf>,

    /// Browser to drive (chrome, edge, chromium, firefox, webkit)
    #[arg(long, global = true)]
    pub browser: Option<String>,

    /// Show the browser window (ignored in CI)
    #[arg(long, global = true)]
    pub headed: bool,

    /// Directory whose node_modules provides Playwright
    #[arg(long, global = true)]
    pub node_workdir: Option<PathBuf>,
}

impl GlobalOpts {
    /// Resolve against the process environment
    pub fn resolve(&self) -> Result<SuiteConfig> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// File first, then environment toggles, then flags
    pub fn resolve_with<F>(&self, lookup: F) -> Result<SuiteConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SuiteConfig::load(&self.config)
            .with_context(|| format!("loading configuration from {}", self.config.display()))?;
        config.browser.apply_env_with(&lookup);

        if let Some(input) = &self.input {
            config.input.path = input.clone();
        }
        if let Some(browser) = &self.browser {
            config
                .browser
                .apply_env_with(|key| (key == "BROWSER").then(|| browser.clone()));
        }
        if self.headed {
            if config.browser.ci {
                warn!("--headed ignored in CI");
            } else {
                config.browser.headless = false;
            }
        }
        if let Some(dir) = &self.node_workdir {
            config.browser.node_workdir = dir.clone();
        }

        config.validate()?;
        debug!("Resolved configuration: {:?}", config);
        Ok(config)
    }
}
