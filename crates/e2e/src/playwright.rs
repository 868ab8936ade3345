//! Playwright browser automation
//!
//! Every page runs in its own `node` process executing a small bridge script. The
//! script owns one browser, one context and one page; it reads JSON commands on
//! stdin and writes JSON lines on stdout: replies to commands, plus page events
//! (watched responses, page errors, failed requests, console messages) that are
//! fed into the page's [`Observers`] as they arrive.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use personalizer_common::config::BrowserConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::driver::{
    BrowserDriver, ConsoleEntry, FailedRequest, NetworkResponse, Observers, PageEvent, PageSession,
    WaitUntil,
};
use crate::error::{E2eError, E2eResult};

const BRIDGE_SCRIPT: &str = r##"
const readline = require('readline');
const playwright = require(require.resolve('playwright', { paths: [process.cwd()] }));

const launch = JSON.parse(process.argv[2]);
const emit = (message) => process.stdout.write(JSON.stringify(message) + '\n');
const watched = (url) => launch.capturePatterns.some((pattern) => url.includes(pattern));

(async () => {
  const browser = await playwright[launch.browser].launch({
    headless: launch.headless,
    args: launch.args,
    channel: launch.channel || undefined,
    executablePath: launch.executablePath || undefined,
  });
  const context = await browser.newContext({
    viewport: { width: launch.viewportWidth, height: launch.viewportHeight },
  });
  const page = await context.newPage();

  page.on('response', async (response) => {
    const url = response.url();
    if (!watched(url)) return;
    let body = null;
    try { body = await response.json(); } catch (_) { body = null; }
    const request = response.request();
    emit({ type: 'response', url, status: response.status(), method: request.method(), body, requestBody: request.postData() });
  });
  page.on('pageerror', (error) => emit({ type: 'page_error', message: error.message }));
  page.on('requestfailed', (request) => {
    const failure = request.failure();
    emit({ type: 'request_failed', url: request.url(), errorText: failure ? failure.errorText : '' });
  });
  page.on('console', (message) => emit({ type: 'console', level: message.type(), text: message.text() }));

  const ops = {
    navigate: async (cmd) => {
      await page.goto(cmd.url, { waitUntil: cmd.waitUntil, timeout: cmd.timeoutMs });
      return null;
    },
    dismiss_modals: async (cmd) => page.evaluate((selectors) => {
      let removed = 0;
      for (const selector of selectors) {
        const element = document.querySelector(selector);
        if (element) { element.remove(); removed += 1; }
      }
      return removed;
    }, cmd.selectors),
    wait_for_selector: async (cmd) => {
      await page.waitForSelector(cmd.selector, { state: 'attached', timeout: cmd.timeoutMs });
      return null;
    },
    dom_order: async (cmd) => page.$$eval(cmd.selector, (elements, attributes) => elements.map((element) => {
      for (const attribute of attributes) {
        const value = element.getAttribute(attribute);
        if (value) return value;
      }
      return '';
    }), cmd.attributes),
    click_first: async (cmd) => {
      const targets = await page.$$(cmd.selector);
      if (targets.length === 0) return { clicked: false };
      await Promise.all([
        page.waitForNavigation({ waitUntil: cmd.waitUntil, timeout: cmd.timeoutMs }),
        targets[0].click(),
      ]);
      return { clicked: true };
    },
    screenshot: async (cmd) => {
      await page.screenshot({ path: cmd.path });
      return null;
    },
  };

  emit({ type: 'ready' });
  const lines = readline.createInterface({ input: process.stdin });
  for await (const line of lines) {
    if (!line.trim()) continue;
    const cmd = JSON.parse(line);
    if (cmd.op === 'close') break;
    try {
      const value = await ops[cmd.op](cmd);
      emit({ type: 'reply', id: cmd.id, ok: true, value });
    } catch (error) {
      emit({ type: 'reply', id: cmd.id, ok: false, timeout: error.name === 'TimeoutError', error: error.message });
    }
  }
  await browser.close();
  emit({ type: 'closed' });
})().catch((error) => {
  emit({ type: 'fatal', error: error.message });
  process.exit(1);
});
"##;

/// Extra time allowed on top of a command's own timeout before the bridge is presumed stuck
const REPLY_GRACE: Duration = Duration::from_secs(5);

/// How long `close` waits for the browser to shut down
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Line written by the bridge script
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeMessage {
    Ready,
    Reply {
        id: u64,
        ok: bool,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        timeout: bool,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Response {
        url: String,
        status: u16,
        #[serde(default)]
        method: String,
        #[serde(default)]
        body: Option<Value>,
        #[serde(default)]
        request_body: Option<String>,
    },
    PageError {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    RequestFailed {
        url: String,
        #[serde(default)]
        error_text: String,
    },
    Console {
        level: String,
        text: String,
    },
    Closed,
    Fatal {
        error: String,
    },
}

impl BridgeMessage {
    /// Page events go to observers; everything else is control traffic
    fn into_event(self) -> Result<PageEvent, BridgeMessage> {
        match self {
            BridgeMessage::Response { url, status, method, body, request_body } => {
                Ok(PageEvent::Response(NetworkResponse { url, status, method, body, request_body }))
            }
            BridgeMessage::PageError { message } => Ok(PageEvent::PageError(message)),
            BridgeMessage::RequestFailed { url, error_text } => {
                Ok(PageEvent::RequestFailed(FailedRequest { url, error_text }))
            }
            BridgeMessage::Console { level, text } => Ok(PageEvent::Console(ConsoleEntry { level, text })),
            other => Err(other),
        }
    }
}

/// Launch parameters handed to the bridge script
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct LaunchOptions {
    browser: &'static str,
    headless: bool,
    args: Vec<String>,
    channel: Option<String>,
    executable_path: Option<PathBuf>,
    viewport_width: u32,
    viewport_height: u32,
    capture_patterns: Vec<String>,
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: BrowserConfig,
    /// URL fragments whose responses are forwarded with their bodies
    pub capture_patterns: Vec<String>,
    pub start_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: BrowserConfig::default(),
            capture_patterns: Vec::new(),
            start_timeout: Duration::from_secs(30),
        }
    }
}

impl PlaywrightConfig {
    fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            browser: self.browser.kind.as_str(),
            headless: self.browser.headless,
            args: self.browser.launch_args(),
            channel: self.browser.channel.clone(),
            executable_path: self.browser.executable_path.clone(),
            viewport_width: self.browser.viewport_width,
            viewport_height: self.browser.viewport_height,
            capture_patterns: self.capture_patterns.clone(),
        }
    }
}

/// Hands out one bridge process per page
pub struct PlaywrightDriver {
    config: PlaywrightConfig,
    script_dir: tempfile::TempDir,
}

impl PlaywrightDriver {
    /// Create a driver, verifying Playwright is available
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed(&config.browser.node_workdir)?;

        let script_dir = tempfile::tempdir()?;
        std::fs::write(script_dir.path().join("bridge.js"), BRIDGE_SCRIPT)?;

        info!(
            "Playwright driver ready ({}, headless: {}, ci: {})",
            config.browser.kind.as_str(),
            config.browser.headless,
            config.browser.ci
        );
        Ok(Self { config, script_dir })
    }

    /// Check if Playwright is installed
    fn check_playwright_installed(workdir: &Path) -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .current_dir(workdir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    fn script_path(&self) -> PathBuf {
        self.script_dir.path().join("bridge.js")
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    async fn new_page(&self) -> E2eResult<Box<dyn PageSession>> {
        let page = PlaywrightPage::spawn(&self.script_path(), &self.config).await?;
        Ok(Box::new(page))
    }
}

/// A page backed by a running bridge process
pub struct PlaywrightPage {
    child: Child,
    stdin: ChildStdin,
    control: mpsc::UnboundedReceiver<BridgeMessage>,
    observers: Observers,
    reader: JoinHandle<()>,
    next_id: u64,
    closed: bool,
}

impl PlaywrightPage {
    async fn spawn(script: &Path, config: &PlaywrightConfig) -> E2eResult<Self> {
        let launch = serde_json::to_string(&config.launch_options())?;

        let mut child = TokioCommand::new("node")
            .arg(script)
            .arg(&launch)
            .current_dir(&config.browser.node_workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Playwright(format!("Failed to spawn node: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdout unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[bridge stderr] {}", line);
                }
            });
        }

        let observers = Observers::new();
        let (tx, control) = mpsc::unbounded_channel();
        let reader = tokio::spawn(pump_bridge_output(BufReader::new(stdout), observers.clone(), tx));

        let mut page = Self {
            child,
            stdin,
            control,
            observers,
            reader,
            next_id: 0,
            closed: false,
        };

        match tokio::time::timeout(config.start_timeout, page.control.recv()).await {
            Ok(Some(BridgeMessage::Ready)) => Ok(page),
            Ok(Some(BridgeMessage::Fatal { error })) => {
                page.shutdown().await;
                Err(E2eError::Playwright(format!("Browser launch failed: {}", error)))
            }
            Ok(other) => {
                page.shutdown().await;
                Err(E2eError::Playwright(format!("Unexpected bridge start: {:?}", other)))
            }
            Err(_) => {
                page.shutdown().await;
                Err(E2eError::Timeout("browser launch".into()))
            }
        }
    }

    /// Send a command and wait for its reply value
    async fn call(&mut self, op: &str, mut args: Value, timeout: Duration) -> E2eResult<BridgeReply> {
        if self.closed {
            return Err(E2eError::Playwright("page already closed".into()));
        }

        self.next_id += 1;
        let id = self.next_id;
        args["id"] = json!(id);
        args["op"] = json!(op);

        let mut line = serde_json::to_string(&args)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let deadline = tokio::time::Instant::now() + timeout + REPLY_GRACE;
        loop {
            let message = tokio::time::timeout_at(deadline, self.control.recv())
                .await
                .map_err(|_| E2eError::Timeout(format!("bridge reply to '{}'", op)))?;

            match message {
                Some(BridgeMessage::Reply { id: reply_id, ok, value, timeout, error }) if reply_id == id => {
                    return Ok(BridgeReply { ok, value, timeout, error });
                }
                Some(BridgeMessage::Reply { id: stale, .. }) => {
                    debug!("Ignoring stale bridge reply {}", stale);
                }
                Some(BridgeMessage::Fatal { error }) => {
                    return Err(E2eError::Playwright(error));
                }
                Some(other) => debug!("Ignoring bridge message {:?}", other),
                None => return Err(E2eError::Playwright("bridge exited".into())),
            }
        }
    }

    /// Stop the bridge process, gracefully first
    async fn shutdown(&mut self) {
        self.closed = true;
        self.observers.close();

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(Duration::from_millis(500), self.child.wait()).await.is_ok()
            {
                self.reader.abort();
                return;
            }
        }

        let _ = self.child.kill().await;
        self.reader.abort();
    }
}

/// Reply to one bridge command
#[derive(Debug, Clone)]
struct BridgeReply {
    ok: bool,
    value: Option<Value>,
    timeout: bool,
    error: Option<String>,
}

impl BridgeReply {
    fn into_result(self, op: &str) -> E2eResult<Option<Value>> {
        if self.ok {
            Ok(self.value)
        } else {
            Err(E2eError::Playwright(format!(
                "{} failed: {}",
                op,
                self.error.unwrap_or_else(|| "unknown error".into())
            )))
        }
    }
}

/// Route bridge stdout: events to observers, control messages to the page
async fn pump_bridge_output<R>(
    reader: BufReader<R>,
    observers: Observers,
    control: mpsc::UnboundedSender<BridgeMessage>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BridgeMessage>(&line) {
            Ok(message) => match message.into_event() {
                Ok(event) => observers.dispatch(&event),
                Err(control_message) => {
                    if control.send(control_message).is_err() {
                        break;
                    }
                }
            },
            Err(_) => debug!("[bridge] {}", line),
        }
    }
}

#[async_trait]
impl PageSession for PlaywrightPage {
    fn observers(&self) -> &Observers {
        &self.observers
    }

    async fn navigate(&mut self, url: &str, wait_until: WaitUntil, timeout: Duration) -> E2eResult<()> {
        let args = json!({
            "url": url,
            "waitUntil": wait_until.as_str(),
            "timeoutMs": timeout.as_millis() as u64,
        });
        let reply = self.call("navigate", args, timeout).await?;
        if reply.timeout {
            return Err(E2eError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        reply.into_result("navigate").map(|_| ())
    }

    async fn dismiss_modals(&mut self, selectors: &[String]) -> E2eResult<usize> {
        let reply = self
            .call("dismiss_modals", json!({ "selectors": selectors }), Duration::from_secs(5))
            .await?;
        let removed = reply.into_result("dismiss_modals")?;
        Ok(removed.and_then(|v| v.as_u64()).unwrap_or(0) as usize)
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> E2eResult<()> {
        let args = json!({ "selector": selector, "timeoutMs": timeout.as_millis() as u64 });
        let reply = self.call("wait_for_selector", args, timeout).await?;
        if reply.timeout {
            return Err(E2eError::Timeout(format!("selector '{}'", selector)));
        }
        reply.into_result("wait_for_selector").map(|_| ())
    }

    async fn dom_order(&mut self, selector: &str, attributes: &[String]) -> E2eResult<Vec<String>> {
        let args = json!({ "selector": selector, "attributes": attributes });
        let reply = self.call("dom_order", args, Duration::from_secs(10)).await?;
        match reply.into_result("dom_order")? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn click_first(&mut self, selector: &str, wait_until: WaitUntil, timeout: Duration) -> E2eResult<()> {
        let args = json!({
            "selector": selector,
            "waitUntil": wait_until.as_str(),
            "timeoutMs": timeout.as_millis() as u64,
        });
        let reply = self.call("click_first", args, timeout).await?;
        if reply.timeout {
            return Err(E2eError::NavigationTimeout {
                url: format!("click on {}", selector),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        let clicked = reply
            .into_result("click_first")?
            .and_then(|v| v.get("clicked").and_then(Value::as_bool))
            .unwrap_or(false);
        if clicked {
            Ok(())
        } else {
            Err(E2eError::NoClickableElements {
                selector: selector.to_string(),
            })
        }
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()> {
        let args = json!({ "path": path.to_string_lossy() });
        let reply = self.call("screenshot", args, Duration::from_secs(30)).await?;
        reply.into_result("screenshot").map(|_| ())
    }

    async fn close(&mut self) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        self.observers.close();

        let sent = self.stdin.write_all(b"{\"op\":\"close\"}\n").await.is_ok();
        if sent {
            let closed = tokio::time::timeout(CLOSE_TIMEOUT, async {
                while let Some(message) = self.control.recv().await {
                    if message == BridgeMessage::Closed {
                        break;
                    }
                }
            })
            .await;
            if closed.is_err() {
                warn!("Browser did not close within {:?}, terminating", CLOSE_TIMEOUT);
            }
        }

        self.shutdown().await;
        Ok(())
    }
}
