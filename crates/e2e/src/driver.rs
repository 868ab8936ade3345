//! Browser capability seen by the checks
//!
//! A [`BrowserDriver`] hands out isolated [`PageSession`]s. Each session owns an
//! [`Observers`] registry; callbacks registered there receive the page's network
//! responses, page errors, failed requests and console messages, and are dropped
//! when the session closes.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::E2eResult;

/// When a navigation counts as settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    #[default]
    DomContentLoaded,
    Load,
    NetworkIdle,
}

impl WaitUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::DomContentLoaded => "domcontentloaded",
            WaitUntil::Load => "load",
            WaitUntil::NetworkIdle => "networkidle",
        }
    }
}

/// A network response seen by the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkResponse {
    pub url: String,
    pub status: u16,
    pub method: String,
    /// Decoded JSON body, when the body was JSON
    pub body: Option<serde_json::Value>,
    /// Raw request post data
    pub request_body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRequest {
    pub url: String,
    pub error_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub level: String,
    pub text: String,
}

/// Anything a page reports asynchronously
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Response(NetworkResponse),
    PageError(String),
    RequestFailed(FailedRequest),
    Console(ConsoleEntry),
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObserverKind {
    Response,
    PageError,
    RequestFailed,
    Console,
}

#[derive(Default)]
struct ObserverSet {
    next_id: u64,
    closed: bool,
    response: Vec<(u64, Callback<NetworkResponse>)>,
    page_error: Vec<(u64, Callback<String>)>,
    request_failed: Vec<(u64, Callback<FailedRequest>)>,
    console: Vec<(u64, Callback<ConsoleEntry>)>,
}

impl ObserverSet {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, kind: ObserverKind, id: u64) -> bool {
        fn drop_id<T: ?Sized>(list: &mut Vec<(u64, Arc<T>)>, id: u64) -> bool {
            let before = list.len();
            list.retain(|(existing, _)| *existing != id);
            list.len() != before
        }
        match kind {
            ObserverKind::Response => drop_id(&mut self.response, id),
            ObserverKind::PageError => drop_id(&mut self.page_error, id),
            ObserverKind::RequestFailed => drop_id(&mut self.request_failed, id),
            ObserverKind::Console => drop_id(&mut self.console, id),
        }
    }

    fn contains(&self, kind: ObserverKind, id: u64) -> bool {
        match kind {
            ObserverKind::Response => self.response.iter().any(|(i, _)| *i == id),
            ObserverKind::PageError => self.page_error.iter().any(|(i, _)| *i == id),
            ObserverKind::RequestFailed => self.request_failed.iter().any(|(i, _)| *i == id),
            ObserverKind::Console => self.console.iter().any(|(i, _)| *i == id),
        }
    }

    fn len(&self) -> usize {
        self.response.len() + self.page_error.len() + self.request_failed.len() + self.console.len()
    }
}

/// Per-page observer registry
#[derive(Clone, Default)]
pub struct Observers {
    inner: Arc<Mutex<ObserverSet>>,
}

/// Registration returned by [`Observers`]; inert once removed or once the page closed
pub struct ObserverHandle {
    id: u64,
    kind: ObserverKind,
    set: Weak<Mutex<ObserverSet>>,
}

impl ObserverHandle {
    pub fn is_active(&self) -> bool {
        self.set
            .upgrade()
            .map(|set| set.lock().contains(self.kind, self.id))
            .unwrap_or(false)
    }

    pub fn remove(self) {
        if let Some(set) = self.set.upgrade() {
            set.lock().remove(self.kind, self.id);
        }
    }
}

macro_rules! register {
    ($self:ident, $field:ident, $kind:expr, $ty:ty, $callback:expr) => {{
        let callback: Callback<$ty> = Arc::new($callback);
        let mut set = $self.inner.lock();
        let id = set.next_id();
        if !set.closed {
            set.$field.push((id, callback));
        }
        ObserverHandle {
            id,
            kind: $kind,
            set: Arc::downgrade(&$self.inner),
        }
    }};
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_response<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&NetworkResponse) + Send + Sync + 'static,
    {
        register!(self, response, ObserverKind::Response, NetworkResponse, callback)
    }

    pub fn on_page_error<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        register!(self, page_error, ObserverKind::PageError, String, callback)
    }

    pub fn on_request_failed<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&FailedRequest) + Send + Sync + 'static,
    {
        register!(self, request_failed, ObserverKind::RequestFailed, FailedRequest, callback)
    }

    pub fn on_console<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&ConsoleEntry) + Send + Sync + 'static,
    {
        register!(self, console, ObserverKind::Console, ConsoleEntry, callback)
    }

    /// Deliver an event to every matching callback.
    ///
    /// Callbacks run outside the registry lock so they may register or remove observers.
    pub fn dispatch(&self, event: &PageEvent) {
        let set = self.inner.lock();
        if set.closed {
            return;
        }
        match event {
            PageEvent::Response(response) => {
                let callbacks: Vec<_> = set.response.iter().map(|(_, cb)| cb.clone()).collect();
                drop(set);
                callbacks.iter().for_each(|cb| cb(response));
            }
            PageEvent::PageError(message) => {
                let callbacks: Vec<_> = set.page_error.iter().map(|(_, cb)| cb.clone()).collect();
                drop(set);
                callbacks.iter().for_each(|cb| cb(message));
            }
            PageEvent::RequestFailed(failed) => {
                let callbacks: Vec<_> = set.request_failed.iter().map(|(_, cb)| cb.clone()).collect();
                drop(set);
                callbacks.iter().for_each(|cb| cb(failed));
            }
            PageEvent::Console(entry) => {
                let callbacks: Vec<_> = set.console.iter().map(|(_, cb)| cb.clone()).collect();
                drop(set);
                callbacks.iter().for_each(|cb| cb(entry));
            }
        }
    }

    /// Drop every callback; later registrations and events are ignored
    pub fn close(&self) {
        let mut set = self.inner.lock();
        set.closed = true;
        set.response.clear();
        set.page_error.clear();
        set.request_failed.clear();
        set.console.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of live callbacks
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of isolated browsing contexts
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_page(&self) -> E2eResult<Box<dyn PageSession>>;
}

/// One isolated browsing context with a single page
#[async_trait]
pub trait PageSession: Send {
    /// Observer registry; register before navigating to catch early responses
    fn observers(&self) -> &Observers;

    /// Fails with `NavigationTimeout` when the page does not settle in time
    async fn navigate(&mut self, url: &str, wait_until: WaitUntil, timeout: Duration) -> E2eResult<()>;

    /// Remove overlay elements; returns how many were removed
    async fn dismiss_modals(&mut self, selectors: &[String]) -> E2eResult<usize>;

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> E2eResult<()>;

    /// Identifier of every element matching `selector`, in document order.
    ///
    /// Each element yields the first non-empty attribute from `attributes`, or an
    /// empty string when it carries none of them.
    async fn dom_order(&mut self, selector: &str, attributes: &[String]) -> E2eResult<Vec<String>>;

    /// Click the first element matching `selector` and wait for the resulting navigation.
    ///
    /// Fails with `NoClickableElements` when nothing matches.
    async fn click_first(&mut self, selector: &str, wait_until: WaitUntil, timeout: Duration) -> E2eResult<()>;

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()>;

    /// Release the context; also closes the observer registry
    async fn close(&mut self) -> E2eResult<()>;
}
