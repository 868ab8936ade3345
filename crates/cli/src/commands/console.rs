//! Console-error audit

use anyhow::Result;
use clap::Args;
use personalizer_common::{ConsoleTarget, SuiteConfig};
use personalizer_e2e::loader::load_console_targets_or_fixture;
use personalizer_e2e::{ConsoleAuditor, ConsoleCheck, PlaywrightDriver};

use super::playwright_config;
use crate::output::{mark, print_info, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Debug, Clone, Default, Args)]
pub struct ConsoleArgs {
    /// Worksheet (or document key) holding the console targets
    #[arg(long)]
    pub section: Option<String>,
}

impl TableDisplay for ConsoleCheck {
    fn headers() -> Vec<&'static str> {
        vec!["URL", "Experiment", "Messages", "Mentions", "Passed", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.url.clone(),
            self.experiment_id.clone(),
            self.messages.len().to_string(),
            self.matching.to_string(),
            mark(self.passed()),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

impl TableDisplay for ConsoleTarget {
    fn headers() -> Vec<&'static str> {
        vec!["URL", "Experiment", "Types"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.url.clone(), self.experiment_id.clone(), self.error_types.join(",")]
    }
}

/// Audit every target; `Ok(false)` when any page logged its experiment id
pub async fn execute(args: ConsoleArgs, mut config: SuiteConfig, format: OutputFormat) -> Result<bool> {
    if let Some(section) = args.section {
        config.input.console_section = section;
    }

    let targets = load_console_targets_or_fixture(&config.input.path, &config.input.console_section);
    print_info(&format!("Auditing console output on {} page(s)", targets.len()));

    let driver = PlaywrightDriver::new(playwright_config(&config))?;
    let auditor = ConsoleAuditor::new(driver, config);
    let checks = auditor.run(&targets).await;

    if let Some(path) = auditor.persist_report(&checks) {
        print_success(&format!("Report written to {}", path.display()));
    }

    print_list(&checks, format);
    Ok(checks.iter().all(ConsoleCheck::passed))
}
