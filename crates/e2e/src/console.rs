//! Console-error audit
//!
//! Loads each target page, collects console output, page errors and failed
//! requests, and fails the target when any collected message mentions its
//! experiment id.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local, SecondsFormat, Utc};
use parking_lot::Mutex;
use personalizer_common::config::SuiteConfig;
use personalizer_common::{ConsoleMessage, ConsoleMessageKind, ConsoleTarget};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::driver::{BrowserDriver, PageSession, WaitUntil};
use crate::error::{E2eError, E2eResult};
use crate::report::ReportWriter;

/// `consoleLogs_<YYYY-MM-DD>`
pub fn console_report_label(at: &DateTime<Local>) -> String {
    format!("consoleLogs_{}", at.format("%Y-%m-%d"))
}

/// Outcome of auditing one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleCheck {
    pub url: String,
    pub experiment_id: String,
    pub messages: Vec<ConsoleMessage>,
    /// Collected messages mentioning the experiment id
    pub matching: usize,
    pub error: Option<String>,
}

impl ConsoleCheck {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

type Collected = Arc<Mutex<Vec<ConsoleMessage>>>;

fn collect(sink: &Collected, kind: ConsoleMessageKind, level: &str, message: &str, url: &str) {
    sink.lock().push(ConsoleMessage {
        kind,
        level: level.to_string(),
        message: message.to_string(),
        url: url.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    });
}

pub struct ConsoleAuditor<D> {
    driver: D,
    config: SuiteConfig,
}

impl<D: BrowserDriver> ConsoleAuditor<D> {
    pub fn new(driver: D, config: SuiteConfig) -> Self {
        Self { driver, config }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Audit every target in order
    pub async fn run(&self, targets: &[ConsoleTarget]) -> Vec<ConsoleCheck> {
        let mut checks = Vec::with_capacity(targets.len());
        for target in targets {
            checks.push(self.check_target(target).await);
        }

        let failed = checks.iter().filter(|c| !c.passed()).count();
        info!(
            "Console audit: {} target(s), {} failed, {} message(s) collected",
            checks.len(),
            failed,
            checks.iter().map(|c| c.messages.len()).sum::<usize>()
        );
        checks
    }

    pub async fn check_target(&self, target: &ConsoleTarget) -> ConsoleCheck {
        info!("Checking console output on {}", target.url);

        let collected: Collected = Arc::new(Mutex::new(Vec::new()));
        let outcome = match self.driver.new_page().await {
            Ok(mut page) => {
                let outcome = self.visit(&mut *page, target, &collected).await;
                if let Err(e) = page.close().await {
                    warn!("Failed to close page for {}: {}", target.url, e);
                }
                outcome
            }
            Err(e) => Err(e),
        };

        let messages = std::mem::take(&mut *collected.lock());
        let matching = messages
            .iter()
            .filter(|m| m.message.contains(&target.experiment_id))
            .count();

        let error = match outcome {
            Err(e) => Some(e.to_string()),
            Ok(()) if matching > 0 => Some(
                E2eError::ConsoleErrors {
                    url: target.url.clone(),
                    experiment_id: target.experiment_id.clone(),
                    count: matching,
                }
                .to_string(),
            ),
            Ok(()) => None,
        };

        match &error {
            Some(e) => error!("✗ {} - {}", target.url, e),
            None => info!("✓ {} ({} message(s))", target.url, messages.len()),
        }

        ConsoleCheck {
            url: target.url.clone(),
            experiment_id: target.experiment_id.clone(),
            messages,
            matching,
            error,
        }
    }

    async fn visit(&self, page: &mut dyn PageSession, target: &ConsoleTarget, collected: &Collected) -> E2eResult<()> {
        let observers = page.observers();

        let (sink, t) = (collected.clone(), target.clone());
        observers.on_console(move |entry| {
            if t.watches("log") || entry.text.contains(&t.experiment_id) {
                collect(&sink, ConsoleMessageKind::Console, &entry.level, &entry.text, &t.url);
            }
        });

        let (sink, t) = (collected.clone(), target.clone());
        observers.on_page_error(move |message| {
            if t.watches("pageerror") || message.contains(&t.experiment_id) {
                collect(&sink, ConsoleMessageKind::PageError, "PAGE ERROR", message, &t.url);
            }
        });

        let (sink, t) = (collected.clone(), target.clone());
        observers.on_request_failed(move |failed| {
            if failed.error_text.is_empty() {
                return;
            }
            if t.watches("requestfailed") || failed.error_text.contains(&t.experiment_id) {
                collect(&sink, ConsoleMessageKind::RequestFailed, "REQUEST FAILED", &failed.error_text, &t.url);
            }
        });

        let timing = &self.config.timing;
        page.navigate(&target.url, WaitUntil::NetworkIdle, timing.console_navigation_timeout())
            .await?;
        tokio::time::sleep(timing.console_settle_delay()).await;
        Ok(())
    }

    /// Write every collected message into one report; failures are logged only
    pub fn persist_report(&self, checks: &[ConsoleCheck]) -> Option<PathBuf> {
        let messages: Vec<ConsoleMessage> = checks.iter().flat_map(|c| c.messages.iter().cloned()).collect();
        info!("Total console messages collected: {}", messages.len());
        ReportWriter::new(&self.config.output.reports_dir).persist(&messages, &console_report_label(&Local::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_report_label_is_dated() {
        let at = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(console_report_label(&at), "consoleLogs_2026-03-04");
    }

    #[test]
    fn test_collect_stamps_message() {
        let sink: Collected = Arc::new(Mutex::new(Vec::new()));
        collect(&sink, ConsoleMessageKind::PageError, "PAGE ERROR", "boom exp-1", "https://ex.com");

        let messages = sink.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, ConsoleMessageKind::PageError);
        assert!(messages[0].timestamp.ends_with('Z'));
    }
}
