//! Batch and retry orchestration for the rank-vs-DOM checks

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use personalizer_common::config::{RetryConfig, SuiteConfig};
use personalizer_common::{ObservedResult, TestItem};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::comparator::{compare, id_text, RankResponse};
use crate::driver::{BrowserDriver, NetworkResponse, PageSession, WaitUntil};
use crate::error::{E2eError, E2eResult};
use crate::report::{timestamped_file_name, ReportWriter};

/// Label of the rank-vs-DOM spreadsheet report
pub const REPORT_LABEL: &str = "personalizer_report";

/// File name of the JSON run summary
pub const SUMMARY_FILE: &str = "personalizer-summary.json";

/// Batching and bounded retry rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub batch_size: usize,
    pub max_retries: u32,
    /// Items run at once within a batch or retry round
    pub concurrency: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Upper bound on attempts per item
    pub fn max_attempts(&self) -> u32 {
        1 + self.max_retries
    }

    /// An item takes part in retry round `round` when it failed at least `round` times
    pub fn is_retry_eligible(&self, failures: u32, round: u32) -> bool {
        round >= 1 && round <= self.max_retries && failures >= round
    }

    /// Items split into batches, numbered from 1
    pub fn batches<'a, T>(&self, items: &'a [T]) -> impl Iterator<Item = (usize, &'a [T])> {
        items
            .chunks(self.batch_size.max(1))
            .enumerate()
            .map(|(index, batch)| (index + 1, batch))
    }
}

/// Failure count per item identifier
#[derive(Debug, Clone, Default)]
pub struct FailureTracker {
    counts: HashMap<String, u32>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure, returning the new total
    pub fn record_failure(&mut self, identifier: &str) -> u32 {
        let count = self.counts.entry(identifier.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn failures(&self, identifier: &str) -> u32 {
        self.counts.get(identifier).copied().unwrap_or(0)
    }

    /// Number of items that failed at least once
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Where an item stands across the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Running,
    Passed,
    Failed { count: u32 },
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Passed | ItemState::Failed { .. })
    }
}

/// Accumulated state of one run, owned by the runner
#[derive(Debug, Default)]
pub struct RunContext {
    order: Vec<String>,
    states: HashMap<String, ItemState>,
    failures: FailureTracker,
    results: Vec<ObservedResult>,
}

impl RunContext {
    pub fn new(items: &[TestItem]) -> Self {
        let mut context = Self::default();
        for item in items {
            if !context.states.contains_key(&item.identifier) {
                context.order.push(item.identifier.clone());
                context.states.insert(item.identifier.clone(), ItemState::Pending);
            }
        }
        context
    }

    fn start(&mut self, identifier: &str) {
        self.states.insert(identifier.to_string(), ItemState::Running);
    }

    /// Append one attempt and move its item to the matching state
    pub fn record(&mut self, result: ObservedResult) {
        let state = if result.passed() {
            ItemState::Passed
        } else {
            ItemState::Failed {
                count: self.failures.record_failure(&result.identifier),
            }
        };
        if !self.states.contains_key(&result.identifier) {
            self.order.push(result.identifier.clone());
        }
        self.states.insert(result.identifier.clone(), state);
        self.results.push(result);
    }

    /// Every attempt, in the order attempts completed their round
    pub fn results(&self) -> &[ObservedResult] {
        &self.results
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    pub fn state(&self, identifier: &str) -> Option<ItemState> {
        self.states.get(identifier).copied()
    }

    pub fn attempts(&self, identifier: &str) -> usize {
        self.results.iter().filter(|r| r.identifier == identifier).count()
    }

    pub fn summary(&self, duration: Duration) -> RunSummary {
        let outcomes: Vec<ItemOutcome> = self
            .order
            .iter()
            .map(|identifier| ItemOutcome {
                identifier: identifier.clone(),
                state: self.states.get(identifier).copied().unwrap_or(ItemState::Pending),
                attempts: self.attempts(identifier),
            })
            .collect();

        RunSummary {
            items: outcomes.len(),
            attempts: self.results.len(),
            passed: outcomes.iter().filter(|o| o.state == ItemState::Passed).count(),
            failed: outcomes
                .iter()
                .filter(|o| matches!(o.state, ItemState::Failed { .. }))
                .count(),
            retried: outcomes.iter().filter(|o| o.attempts > 1).count(),
            duration_ms: duration.as_millis() as u64,
            outcomes,
        }
    }

    pub fn into_results(self) -> Vec<ObservedResult> {
        self.results
    }
}

/// Terminal state of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub identifier: String,
    #[serde(flatten)]
    pub state: ItemState,
    pub attempts: usize,
}

/// Result of a whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub items: usize,
    pub attempts: usize,
    pub passed: usize,
    pub failed: usize,
    /// Items attempted more than once
    pub retried: usize,
    pub duration_ms: u64,
    pub outcomes: Vec<ItemOutcome>,
}

impl RunSummary {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Scope `target` under every top-level part of a comma-separated `scope`.
///
/// Commas nested in parentheses or attribute brackets do not split the scope.
pub fn descendant_selector(scope: &str, target: &str) -> String {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in scope.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&scope[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&scope[start..]);

    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| format!("{part} {target}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Observations gathered by the page observers during one attempt
#[derive(Debug, Default)]
struct AttemptCapture {
    rank: Option<RankResponse>,
    rank_observed: bool,
    rank_event_id: Option<String>,
    reward_observed: bool,
    reward_event_id: Option<String>,
    reward_weight: Option<f64>,
    page_errors: Vec<String>,
}

/// Request body posted to the reward endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewardPayload {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    weight: Option<serde_json::Value>,
}

impl AttemptCapture {
    fn record_rank(&mut self, response: &NetworkResponse) {
        let Some(body) = response.body.clone() else {
            error!("Rank response from {} carried no JSON body", response.url);
            return;
        };
        self.rank_observed = true;
        self.rank_event_id = body.get("eventId").and_then(id_text);
        match serde_json::from_value::<RankResponse>(body) {
            Ok(rank) => self.rank = Some(rank),
            Err(e) => error!("Failed to decode ranking from {}: {}", response.url, e),
        }
    }

    fn record_reward(&mut self, response: &NetworkResponse) {
        let payload = response
            .request_body
            .as_deref()
            .ok_or_else(|| "no request body".to_string())
            .and_then(|body| serde_json::from_str::<RewardPayload>(body).map_err(|e| e.to_string()));

        match payload {
            Ok(payload) => {
                self.reward_observed = response.status == 200;
                if self.reward_observed {
                    self.reward_event_id = payload.event_id;
                    self.reward_weight = payload.weight.and_then(|w| {
                        w.as_f64().or_else(|| w.as_str().and_then(|s| s.trim().parse().ok()))
                    });
                }
            }
            Err(e) => error!("Failed to parse reward request to {}: {}", response.url, e),
        }
    }

    fn apply_to(&self, result: &mut ObservedResult) {
        result.rank_api_observed = self.rank_observed;
        result.rank_event_id = self.rank_event_id.clone();
        result.reward_api_observed = self.reward_observed;
        result.reward_event_id = self.reward_event_id.clone();
        result.reward_weight = self.reward_weight;
        result.page_errors = self.page_errors.clone();
    }
}

/// Runs items in batches, then bounded retry rounds for the failures
pub struct SuiteRunner<D> {
    driver: D,
    config: SuiteConfig,
    policy: RetryPolicy,
}

impl<D: BrowserDriver> SuiteRunner<D> {
    pub fn new(driver: D, config: SuiteConfig) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);
        Self { driver, config, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Run every item once per batch, then the retry rounds
    pub async fn run(&self, items: &[TestItem]) -> RunContext {
        let mut context = RunContext::new(items);
        if items.is_empty() {
            warn!("No personalizer items to run");
            return context;
        }

        info!(
            "Running {} item(s) in batches of {} (max {} retries)",
            items.len(),
            self.policy.batch_size,
            self.policy.max_retries
        );

        let mut batch_of: HashMap<&str, usize> = HashMap::new();
        for (batch_number, batch) in self.policy.batches(items) {
            info!("Batch {}: {} item(s)", batch_number, batch.len());
            let work: Vec<_> = batch
                .iter()
                .map(|item| {
                    batch_of.entry(item.identifier.as_str()).or_insert(batch_number);
                    (item, batch_number)
                })
                .collect();
            self.run_round(&mut context, work, 0).await;
        }

        for round in 1..=self.policy.max_retries {
            let work: Vec<_> = items
                .iter()
                .filter(|item| {
                    self.policy
                        .is_retry_eligible(context.failures().failures(&item.identifier), round)
                })
                .map(|item| (item, batch_of.get(item.identifier.as_str()).copied().unwrap_or(1)))
                .collect();

            if work.is_empty() {
                debug!("Nothing left to retry after round {}", round - 1);
                break;
            }

            info!("Scheduling retry {} for {} item(s)", round, work.len());
            self.run_round(&mut context, work, round).await;
        }

        context
    }

    async fn run_round(&self, context: &mut RunContext, work: Vec<(&TestItem, usize)>, retry: u32) {
        for (item, _) in &work {
            context.start(&item.identifier);
        }

        let results: Vec<ObservedResult> = stream::iter(
            work.into_iter()
                .map(|(item, batch_number)| self.run_item(item, batch_number, retry)),
        )
        .buffered(self.policy.concurrency)
        .collect()
        .await;

        for result in results {
            context.record(result);
        }
    }

    /// One attempt at one item; failures are recorded in the returned result
    pub async fn run_item(&self, item: &TestItem, batch_number: usize, retry_attempt: u32) -> ObservedResult {
        let label = if retry_attempt == 0 {
            format!("Batch {}", batch_number)
        } else {
            format!("Retry {} | Batch {}", retry_attempt, batch_number)
        };
        info!("{} | {} - {}", label, item.title(), item.url);

        let start = Instant::now();
        let mut result = ObservedResult::new(item, batch_number, retry_attempt);

        let mut page = match self.driver.new_page().await {
            Ok(page) => page,
            Err(e) => {
                error!("✗ {} - could not open page: {}", item.identifier, e);
                result.error = Some(e.to_string());
                return result;
            }
        };

        let capture = Arc::new(Mutex::new(AttemptCapture::default()));
        self.observe(&*page, item, &capture);

        let outcome = self.exercise(&mut *page, item, &capture, &mut result).await;
        capture.lock().apply_to(&mut result);

        match outcome {
            Ok(()) => info!("✓ {} ({} ms)", item.identifier, start.elapsed().as_millis()),
            Err(e) => {
                error!("✗ {} - {}", item.identifier, e);
                result.error = Some(e.to_string());
                result.screenshot_path = self.capture_screenshot(&mut *page, item, retry_attempt).await;
            }
        }

        if let Err(e) = page.close().await {
            warn!("Failed to close page for {}: {}", item.identifier, e);
        }
        result
    }

    /// Register observers; must happen before navigation
    fn observe(&self, page: &dyn PageSession, item: &TestItem, capture: &Arc<Mutex<AttemptCapture>>) {
        let observers = page.observers();

        let identifier = item.identifier.clone();
        let rank_path = self.config.endpoints.rank_path.clone();
        let reward_path = self.config.endpoints.reward_path.clone();
        let sink = capture.clone();
        observers.on_response(move |response| {
            if !response.url.contains(&identifier) {
                return;
            }
            if response.url.contains(&rank_path) {
                sink.lock().record_rank(response);
            } else if response.url.contains(&reward_path) {
                sink.lock().record_reward(response);
            }
        });

        let sink = capture.clone();
        observers.on_page_error(move |message| sink.lock().page_errors.push(message.clone()));

        let sink = capture.clone();
        observers.on_request_failed(move |failed| {
            sink.lock()
                .page_errors
                .push(format!("request failed: {} ({})", failed.url, failed.error_text));
        });
    }

    async fn exercise(
        &self,
        page: &mut dyn PageSession,
        item: &TestItem,
        capture: &Mutex<AttemptCapture>,
        result: &mut ObservedResult,
    ) -> E2eResult<()> {
        let timing = &self.config.timing;
        let dom = &self.config.dom;

        page.navigate(&item.url, WaitUntil::DomContentLoaded, timing.navigation_timeout())
            .await?;

        match page.dismiss_modals(&dom.modal_selectors).await {
            Ok(0) => {}
            Ok(removed) => debug!("Dismissed {} modal overlay(s)", removed),
            Err(e) => warn!("Could not dismiss modals on {}: {}", item.url, e),
        }
        tokio::time::sleep(timing.settle_delay()).await;

        if let Err(e) = page
            .wait_for_selector(&item.element_selector, timing.selector_timeout())
            .await
        {
            debug!("Selector '{}' never appeared: {}", item.element_selector, e);
            return Err(E2eError::EmptyDomOrder {
                selector: item.element_selector.clone(),
            });
        }

        let dom_order = page.dom_order(&item.element_selector, &dom.id_attributes()).await?;
        if dom_order.is_empty() {
            return Err(E2eError::EmptyDomOrder {
                selector: item.element_selector.clone(),
            });
        }
        result.first_dom_id = dom_order.first().cloned();
        result.dom_order = dom_order;

        let rank = capture.lock().rank.clone();
        let Some(rank) = rank.filter(RankResponse::has_ranking) else {
            result.recommendation_not_loaded = true;
            return Err(E2eError::RecommendationNotLoaded(item.identifier.clone()));
        };
        result.rank_order = rank.rank_order(dom.rank_prefix);
        result.first_ranked_id = result.rank_order.first().cloned();

        let click_selector = descendant_selector(&item.element_selector, &dom.click_target);
        page.click_first(&click_selector, WaitUntil::DomContentLoaded, timing.click_navigation_timeout())
            .await?;
        tokio::time::sleep(timing.settle_delay()).await;

        compare(
            &result.dom_order,
            &result.rank_order,
            rank.reward_action_id.as_deref(),
            dom.rank_prefix,
        )?;
        result.order_matches = true;
        Ok(())
    }

    async fn capture_screenshot(&self, page: &mut dyn PageSession, item: &TestItem, retry: u32) -> Option<String> {
        let dir = &self.config.output.screenshots_dir;
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Cannot create screenshot directory {}: {}", dir.display(), e);
            return None;
        }

        let base = format!("{}_retry{}", file_safe(&item.identifier), retry);
        let path = dir.join(timestamped_file_name(&base, "png", &Local::now()));
        match page.screenshot(&path).await {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!("Screenshot for {} failed: {}", item.identifier, e);
                None
            }
        }
    }

    /// Write the spreadsheet report for every attempt; failures are logged only
    pub fn persist_report(&self, context: &RunContext) -> Option<PathBuf> {
        ReportWriter::new(&self.config.output.reports_dir).persist(context.results(), REPORT_LABEL)
    }

    /// Write the run summary as JSON into the results directory
    pub fn write_summary(&self, summary: &RunSummary) -> E2eResult<PathBuf> {
        write_summary(summary, &self.config.output.results_dir)
    }
}

/// Write `summary` to `<dir>/personalizer-summary.json`
pub fn write_summary(summary: &RunSummary, dir: &Path) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let path = dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json)?;

    info!("Summary written to: {}", path.display());
    Ok(path)
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
