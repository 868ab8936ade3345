//! Suite configuration
//!
//! Loaded from an optional TOML file, then adjusted by the process environment
//! (`HEADLESS`, `BROWSER`, `GITHUB_ACTIONS`, `CI`). Environment toggles only ever
//! touch the browser launch section.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level suite configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub browser: BrowserConfig,
    pub timing: TimingConfig,
    pub retry: RetryConfig,
    pub endpoints: EndpointConfig,
    pub dom: DomConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
}

/// Browser engine driven through Playwright
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: BrowserKind,
    /// Branded Chromium channel (`chrome`, `msedge`)
    pub channel: Option<String>,
    pub headless: bool,
    /// Use the hardened CI launch profile
    pub ci: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub executable_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
    /// Directory node resolves the `playwright` package from
    pub node_workdir: PathBuf,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: BrowserKind::Chromium,
            channel: None,
            headless: true,
            ci: false,
            viewport_width: 1920,
            viewport_height: 1080,
            executable_path: None,
            extra_args: Vec::new(),
            node_workdir: PathBuf::from("."),
        }
    }
}

const CI_CHROMIUM_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--no-first-run",
    "--no-zygote",
    "--disable-gpu",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-renderer-backgrounding",
    "--disable-backgrounding-occluded-windows",
    "--disable-client-side-phishing-detection",
    "--disable-crash-reporter",
    "--no-crash-upload",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--hide-scrollbars",
    "--metrics-recording-only",
    "--mute-audio",
    "--no-default-browser-check",
    "--no-pings",
    "--password-store=basic",
    "--use-gl=swiftshader",
    "--use-mock-keychain",
];

impl BrowserConfig {
    /// Apply `HEADLESS`, `BROWSER`, `GITHUB_ACTIONS` and `CI` from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment toggles read through `lookup`
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let truthy = |key: &str| {
            lookup(key)
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false)
        };

        if truthy("GITHUB_ACTIONS") || truthy("CI") {
            self.ci = true;
        }

        if let Some(headless) = lookup("HEADLESS") {
            self.headless = !headless.eq_ignore_ascii_case("false") && headless != "0";
        }
        if self.ci {
            self.headless = true;
        }

        if let Some(browser) = lookup("BROWSER") {
            match browser.to_ascii_lowercase().as_str() {
                "chrome" => {
                    self.kind = BrowserKind::Chromium;
                    self.channel = Some("chrome".to_string());
                }
                "edge" | "msedge" => {
                    self.kind = BrowserKind::Chromium;
                    self.channel = Some("msedge".to_string());
                }
                "firefox" => {
                    self.kind = BrowserKind::Firefox;
                    self.channel = None;
                }
                "webkit" => {
                    self.kind = BrowserKind::Webkit;
                    self.channel = None;
                }
                "chromium" => {
                    self.kind = BrowserKind::Chromium;
                    self.channel = None;
                }
                other => {
                    tracing::warn!("Unknown BROWSER value '{}', keeping {}", other, self.kind.as_str());
                }
            }
        }
    }

    /// Command-line arguments handed to the browser at launch
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.kind == BrowserKind::Chromium {
            if self.ci {
                args.extend(CI_CHROMIUM_ARGS.iter().map(|a| a.to_string()));
            } else {
                args.push("--no-sandbox".to_string());
                args.push("--disable-setuid-sandbox".to_string());
            }
            args.push(format!(
                "--window-size={},{}",
                self.viewport_width, self.viewport_height
            ));
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Timeouts and settle delays, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub navigation_timeout_ms: u64,
    pub selector_timeout_ms: u64,
    pub click_navigation_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub console_navigation_timeout_ms: u64,
    pub console_settle_delay_ms: u64,
    pub bridge_start_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 40_000,
            selector_timeout_ms: 40_000,
            click_navigation_timeout_ms: 90_000,
            settle_delay_ms: 10_000,
            console_navigation_timeout_ms: 20_000,
            console_settle_delay_ms: 5_000,
            bridge_start_timeout_ms: 30_000,
        }
    }
}

impl TimingConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    pub fn click_navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.click_navigation_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn console_navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.console_navigation_timeout_ms)
    }

    pub fn console_settle_delay(&self) -> Duration {
        Duration::from_millis(self.console_settle_delay_ms)
    }

    pub fn bridge_start_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_start_timeout_ms)
    }
}

/// Batching and retry policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    /// Items run concurrently inside one batch
    pub concurrency: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_retries: 2,
            concurrency: 1,
        }
    }
}

/// URL fragments identifying the personalizer APIs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub rank_path: String,
    pub reward_path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            rank_path: "/personalizerwrapperapi/v01/rank".to_string(),
            reward_path: "/reward".to_string(),
        }
    }
}

/// How recommended items are found on the page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomConfig {
    pub primary_attribute: String,
    pub secondary_attribute: String,
    /// Descendant of the item selector that gets clicked; a single selector, applied
    /// under each comma-separated part of the item selector
    pub click_target: String,
    pub modal_selectors: Vec<String>,
    /// Longest ranking prefix compared against the DOM
    pub rank_prefix: usize,
}

impl Default for DomConfig {
    fn default() -> Self {
        Self {
            primary_attribute: "data-offerid".to_string(),
            secondary_attribute: "data-offerkey".to_string(),
            click_target: "a".to_string(),
            modal_selectors: vec![
                ".modal-backdrop".to_string(),
                ".modal".to_string(),
                "#modalsRenderedAfterPageLoad".to_string(),
            ],
            rank_prefix: 4,
        }
    }
}

impl DomConfig {
    pub fn id_attributes(&self) -> Vec<String> {
        vec![self.primary_attribute.clone(), self.secondary_attribute.clone()]
    }
}

/// Input workbook location and section names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub path: PathBuf,
    pub items_section: String,
    pub console_section: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("filesToCheckPersonalizer.xlsx"),
            items_section: "PersonalizerItems".to_string(),
            console_section: "consoleError".to_string(),
        }
    }
}

/// Output directories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub reports_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("report"),
            screenshots_dir: PathBuf::from("screenshots"),
            results_dir: PathBuf::from("test-results"),
        }
    }
}

impl SuiteConfig {
    /// Load configuration from file, falling back to defaults when it is absent
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.batch_size == 0 {
            return Err(Error::InvalidConfig("retry.batch_size must be at least 1".into()));
        }
        if self.retry.concurrency == 0 {
            return Err(Error::InvalidConfig("retry.concurrency must be at least 1".into()));
        }
        if self.dom.rank_prefix == 0 {
            return Err(Error::InvalidConfig("dom.rank_prefix must be at least 1".into()));
        }
        if self.endpoints.rank_path.is_empty() || self.endpoints.reward_path.is_empty() {
            return Err(Error::InvalidConfig("endpoint paths must not be empty".into()));
        }
        Ok(())
    }
}
