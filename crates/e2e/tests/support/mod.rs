//! In-memory browser used by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use personalizer_common::config::SuiteConfig;
use personalizer_common::TestItem;
use personalizer_e2e::driver::{ConsoleEntry, FailedRequest, NetworkResponse};
use personalizer_e2e::{BrowserDriver, E2eError, E2eResult, Observers, PageEvent, PageSession, WaitUntil};
use serde_json::json;

/// What a page does when visited
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub on_navigate: Vec<PageEvent>,
    pub on_click: Vec<PageEvent>,
    pub dom_order: Vec<String>,
    pub clickable: bool,
    pub navigate_timeout: bool,
    pub selector_missing: bool,
    /// How long navigation takes before the page's events fire
    pub load_delay: Duration,
}

impl PageScript {
    /// Page that serves `ranking` from the rank API and renders `dom`
    pub fn ranked(identifier: &str, dom: &[&str], ranking: &[&str], reward_action: &str) -> Self {
        Self {
            on_navigate: vec![rank_event(identifier, ranking, reward_action)],
            on_click: vec![reward_event(identifier, "evt-1", 1.0)],
            dom_order: ids(dom),
            clickable: true,
            ..Default::default()
        }
    }

    /// Page that renders cards but never calls the rank API
    pub fn without_rank(dom: &[&str]) -> Self {
        Self {
            dom_order: ids(dom),
            clickable: true,
            ..Default::default()
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_events(mut self, events: Vec<PageEvent>) -> Self {
        self.on_navigate.extend(events);
        self
    }
}

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn rank_event(identifier: &str, ranking: &[&str], reward_action: &str) -> PageEvent {
    let ranking: Vec<_> = ranking.iter().map(|id| json!({ "id": id, "probability": 0.5 })).collect();
    PageEvent::Response(NetworkResponse {
        url: format!("https://api.ex.com/personalizerwrapperapi/v01/rank?personalizerId={}", identifier),
        status: 200,
        method: "POST".to_string(),
        body: Some(json!({
            "eventId": format!("rank-{}", identifier),
            "ranking": ranking,
            "rewardActionId": reward_action,
        })),
        request_body: None,
    })
}

pub fn reward_event(identifier: &str, event_id: &str, weight: f64) -> PageEvent {
    PageEvent::Response(NetworkResponse {
        url: format!("https://api.ex.com/reward?personalizerId={}", identifier),
        status: 200,
        method: "POST".to_string(),
        body: None,
        request_body: Some(json!({ "eventId": event_id, "weight": weight }).to_string()),
    })
}

pub fn console_event(level: &str, text: &str) -> PageEvent {
    PageEvent::Console(ConsoleEntry {
        level: level.to_string(),
        text: text.to_string(),
    })
}

pub fn request_failed_event(url: &str, error_text: &str) -> PageEvent {
    PageEvent::RequestFailed(FailedRequest {
        url: url.to_string(),
        error_text: error_text.to_string(),
    })
}

pub fn item(identifier: &str) -> TestItem {
    TestItem {
        url: format!("https://ex.com/en-us/{}", identifier),
        identifier: identifier.to_string(),
        element_selector: ".card".to_string(),
        recommendation: true,
        expected_weights: vec![1.0],
    }
}

/// Configuration with no settle delays, writing into `dir`
pub fn fast_config(dir: &Path) -> SuiteConfig {
    let mut config = SuiteConfig::default();
    config.timing.settle_delay_ms = 0;
    config.timing.console_settle_delay_ms = 0;
    config.timing.navigation_timeout_ms = 1_000;
    config.timing.selector_timeout_ms = 1_000;
    config.timing.click_navigation_timeout_ms = 1_000;
    config.output.reports_dir = dir.join("report");
    config.output.screenshots_dir = dir.join("screenshots");
    config.output.results_dir = dir.join("test-results");
    config
}

#[derive(Default)]
struct FakeState {
    scripts: HashMap<String, VecDeque<PageScript>>,
    opened: usize,
    closed: usize,
    visits: Vec<String>,
    screenshots: Vec<PathBuf>,
    /// Most pages open at the same time
    peak_open: usize,
}

impl FakeState {
    /// Next script for `url`; the last one queued keeps being served
    fn next_script(&mut self, url: &str) -> Option<PageScript> {
        let queue = self.scripts.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, script: PageScript) -> &Self {
        self.state
            .lock()
            .scripts
            .entry(url.to_string())
            .or_default()
            .push_back(script);
        self
    }

    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }

    pub fn peak_open(&self) -> usize {
        self.state.lock().peak_open
    }

    pub fn visits(&self) -> Vec<String> {
        self.state.lock().visits.clone()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.state.lock().screenshots.clone()
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn new_page(&self) -> E2eResult<Box<dyn PageSession>> {
        {
            let mut state = self.state.lock();
            state.opened += 1;
            state.peak_open = state.peak_open.max(state.opened - state.closed);
        }
        Ok(Box::new(FakePage {
            state: self.state.clone(),
            observers: Observers::new(),
            script: None,
            closed: false,
        }))
    }
}

pub struct FakePage {
    state: Arc<Mutex<FakeState>>,
    observers: Observers,
    script: Option<PageScript>,
    closed: bool,
}

#[async_trait]
impl PageSession for FakePage {
    fn observers(&self) -> &Observers {
        &self.observers
    }

    async fn navigate(&mut self, url: &str, _wait_until: WaitUntil, timeout: Duration) -> E2eResult<()> {
        let script = {
            let mut state = self.state.lock();
            state.visits.push(url.to_string());
            state.next_script(url)
        };
        let script = script.unwrap_or_default();
        if !script.load_delay.is_zero() {
            tokio::time::sleep(script.load_delay).await;
        }

        if script.navigate_timeout {
            return Err(E2eError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        for event in &script.on_navigate {
            self.observers.dispatch(event);
        }
        self.script = Some(script);
        Ok(())
    }

    async fn dismiss_modals(&mut self, _selectors: &[String]) -> E2eResult<usize> {
        Ok(0)
    }

    async fn wait_for_selector(&mut self, selector: &str, _timeout: Duration) -> E2eResult<()> {
        match &self.script {
            Some(script) if !script.selector_missing && !script.dom_order.is_empty() => Ok(()),
            _ => Err(E2eError::Timeout(format!("selector '{}'", selector))),
        }
    }

    async fn dom_order(&mut self, _selector: &str, _attributes: &[String]) -> E2eResult<Vec<String>> {
        Ok(self.script.as_ref().map(|s| s.dom_order.clone()).unwrap_or_default())
    }

    async fn click_first(&mut self, selector: &str, _wait_until: WaitUntil, _timeout: Duration) -> E2eResult<()> {
        let script = self.script.clone().unwrap_or_default();
        if !script.clickable {
            return Err(E2eError::NoClickableElements {
                selector: selector.to_string(),
            });
        }
        for event in &script.on_click {
            self.observers.dispatch(event);
        }
        Ok(())
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()> {
        self.state.lock().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn close(&mut self) -> E2eResult<()> {
        if !self.closed {
            self.closed = true;
            self.observers.close();
            self.state.lock().closed += 1;
        }
        Ok(())
    }
}
