//! [`PageDriver`] over the Chrome DevTools Protocol.
//!
//! Attaches to an already running Chrome started with
//! `--remote-debugging-port`, picks the first page target and drives it
//! with `Runtime.evaluate`. Weekly search responses are paused at the
//! response stage with the `Fetch` domain, so their bodies reach the
//! classifier before the page sees them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use super::{Control, FormField, InterceptedResponse, PageDriver, PageEvent, PageRegion};
use crate::classifier::CLASSIFIED_URLS;
use crate::config::BrowserConfig;
use crate::error::{Result, SlotwatchError};

/// Binding the in-page mutation observer reports through.
const DOM_BINDING: &str = "slotwatchDomChanged";

/// Installed in every document; reports DOM changes through the binding.
const DOM_OBSERVER_SCRIPT: &str = r#"
(() => {
  if (window.__slotwatchObserver || typeof window.slotwatchDomChanged !== 'function') return;
  const start = () => {
    window.__slotwatchObserver = new MutationObserver(() => window.slotwatchDomChanged(''));
    window.__slotwatchObserver.observe(document.body, { childList: true, subtree: true });
  };
  if (document.body) start(); else document.addEventListener('DOMContentLoaded', start);
})();
"#;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type Listeners = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

// ============================================================================
// CDP client
// ============================================================================

/// A CDP WebSocket client that sends commands and dispatches events.
pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    pending: Pending,
    next_id: AtomicU64,
    event_listeners: Listeners,
    command_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            SlotwatchError::browser(format!("failed to connect to CDP endpoint {ws_url}: {e}"))
        })?;
        let (mut ws_sink, mut ws_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let event_listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        let pending_reader = Arc::clone(&pending);
        let listeners_reader = Arc::clone(&event_listeners);
        let reader_handle = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(Value::as_u64) {
                            if let Some(tx) = pending_reader.lock().await.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(Value::as_str) {
                            let listeners = listeners_reader.lock().await;
                            if let Some(senders) = listeners.get(method) {
                                let params = val.get("params").cloned().unwrap_or(Value::Null);
                                for tx in senders {
                                    let _ = tx.try_send(params.clone());
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by browser");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            command_timeout,
            reader_handle,
            writer_handle,
        })
    }

    /// Send a command and wait for its result.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({ "id": id, "method": method, "params": params });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| SlotwatchError::browser(format!("CDP socket closed: {e}")))?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => match response.get("error") {
                Some(error) => Err(cdp_error(method, error)),
                None => Ok(response.get("result").cloned().unwrap_or(Value::Null)),
            },
            Ok(Err(_)) => Err(SlotwatchError::browser("CDP response channel closed")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(SlotwatchError::not_ready(format!(
                    "CDP command '{method}' timed out after {:?}",
                    self.command_timeout
                )))
            }
        }
    }

    /// Subscribe to an event; the receiver gets each event's params.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        self.event_listeners
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Evaluate an expression and return its value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script exception");
            return Err(SlotwatchError::not_ready(text.to_string()));
        }
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

/// Errors raised while the page navigates are transient.
fn cdp_error(method: &str, error: &Value) -> SlotwatchError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    if message.contains("context") || message.contains("navigat") || message.contains("Target closed") {
        SlotwatchError::not_ready(format!("{method}: {message}"))
    } else {
        SlotwatchError::browser(format!("{method}: {message}"))
    }
}

/// WebSocket URL of the first page target listed by `/json/list`.
pub async fn page_ws_url(browser: &BrowserConfig) -> Result<String> {
    let url = format!("http://{}:{}/json/list", browser.debug_host, browser.debug_port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };
        let found = targets.iter().find_map(|target| {
            (target.get("type").and_then(Value::as_str) == Some("page"))
                .then(|| target.get("webSocketDebuggerUrl").and_then(Value::as_str))
                .flatten()
        });
        if let Some(ws_url) = found {
            return Ok(ws_url.to_string());
        }
    }

    Err(SlotwatchError::browser(format!(
        "no page target at {url}; start Chrome with --remote-debugging-port={}",
        browser.debug_port
    )))
}

// ============================================================================
// Page driver
// ============================================================================

/// Drives the booking page in a running Chrome.
pub struct CdpPageDriver {
    client: Arc<CdpClient>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<PageEvent>>>>,
    pump_handle: tokio::task::JoinHandle<()>,
}

impl CdpPageDriver {
    /// Attach to the browser and install interception.
    pub async fn connect(browser: &BrowserConfig, command_timeout: Duration) -> Result<Self> {
        let ws_url = page_ws_url(browser).await?;
        info!("Attaching to page target {}", ws_url);
        let client = Arc::new(CdpClient::connect(&ws_url, command_timeout).await?);

        let paused = client.subscribe_event("Fetch.requestPaused").await;
        let loaded = client.subscribe_event("Page.loadEventFired").await;
        let bindings = client.subscribe_event("Runtime.bindingCalled").await;

        client.send_command("Page.enable", json!({})).await?;
        client.send_command("Runtime.enable", json!({})).await?;
        client
            .send_command("Runtime.addBinding", json!({ "name": DOM_BINDING }))
            .await?;
        client
            .send_command(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": DOM_OBSERVER_SCRIPT }),
            )
            .await?;
        let patterns: Vec<Value> = CLASSIFIED_URLS
            .iter()
            .map(|fragment| json!({ "urlPattern": format!("*{fragment}*"), "requestStage": "Response" }))
            .collect();
        client
            .send_command("Fetch.enable", json!({ "patterns": patterns }))
            .await?;
        if let Err(e) = client.evaluate(DOM_OBSERVER_SCRIPT).await {
            debug!("DOM observer not installed in current document: {}", e);
        }

        let subscribers = Arc::new(Mutex::new(Vec::new()));
        let pump_handle = tokio::spawn(pump_events(
            Arc::clone(&client),
            Arc::clone(&subscribers),
            paused,
            loaded,
            bindings,
        ));

        Ok(Self {
            client,
            subscribers,
            pump_handle,
        })
    }

    async fn eval_with(&self, selector_json: String, body: &str) -> Result<Value> {
        let expression = format!("((sel) => {{ {body} }})({selector_json})");
        self.client.evaluate(&expression).await
    }

    async fn eval_region(&self, region: PageRegion, body: &str) -> Result<Value> {
        self.eval_with(js_string(region.selector()), body).await
    }
}

impl Drop for CdpPageDriver {
    fn drop(&mut self) {
        self.pump_handle.abort();
    }
}

/// JSON string literal, safe to splice into a script.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

async fn broadcast(subscribers: &Mutex<Vec<mpsc::Sender<PageEvent>>>, event: PageEvent) {
    let mut subs = subscribers.lock().await;
    subs.retain(|tx| !tx.is_closed());
    for tx in subs.iter() {
        if tx.try_send(event.clone()).is_err() {
            debug!("page event subscriber lagging, event dropped");
        }
    }
}

async fn pump_events(
    client: Arc<CdpClient>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<PageEvent>>>>,
    mut paused: mpsc::Receiver<Value>,
    mut loaded: mpsc::Receiver<Value>,
    mut bindings: mpsc::Receiver<Value>,
) {
    loop {
        tokio::select! {
            Some(params) = paused.recv() => {
                let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
                    continue;
                };
                // Subscribers get the body while the page is still waiting for it.
                if let Some(response) = capture_paused(&client, request_id, &params).await {
                    broadcast(&subscribers, PageEvent::Response(response)).await;
                }
                release_paused(&client, request_id).await;
            }
            Some(_) = loaded.recv() => {
                let url = client
                    .evaluate("window.location.href")
                    .await
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                broadcast(&subscribers, PageEvent::Loaded { url }).await;
            }
            Some(params) = bindings.recv() => {
                if params.get("name").and_then(Value::as_str) == Some(DOM_BINDING) {
                    broadcast(&subscribers, PageEvent::DomChanged).await;
                }
            }
            else => break,
        }
    }
}

/// Read the body of a paused response. The request stays paused.
async fn capture_paused(
    client: &CdpClient,
    request_id: &str,
    params: &Value,
) -> Option<InterceptedResponse> {
    let url = params
        .pointer("/request/url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let status = params
        .get("responseStatusCode")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(0);

    let body = match client
        .send_command("Fetch.getResponseBody", json!({ "requestId": request_id }))
        .await
    {
        Ok(result) => decode_body(&result)?,
        Err(e) => {
            warn!(%url, "could not read intercepted body: {}", e);
            return None;
        }
    };

    Some(InterceptedResponse { url, status, body })
}

/// Let the page have a paused response.
async fn release_paused(client: &CdpClient, request_id: &str) {
    if let Err(e) = client
        .send_command("Fetch.continueRequest", json!({ "requestId": request_id }))
        .await
    {
        warn!(request_id, "failed to release intercepted request: {}", e);
    }
}

fn decode_body(result: &Value) -> Option<String> {
    let body = result.get("body").and_then(Value::as_str)?;
    if result.get("base64Encoded").and_then(Value::as_bool) == Some(true) {
        let bytes = base64::engine::general_purpose::STANDARD.decode(body).ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Some(body.to_string())
    }
}

#[async_trait]
impl PageDriver for CdpPageDriver {
    async fn read_region(&self, region: PageRegion) -> Result<Option<String>> {
        let body = match region.attribute() {
            Some(attr) => format!(
                "const el = document.querySelector(sel); return el ? el.getAttribute({}) : null;",
                js_string(attr)
            ),
            None => {
                "const el = document.querySelector(sel); return el ? el.textContent.trim() : null;"
                    .to_string()
            }
        };
        let value = self.eval_region(region, &body).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn read_all(&self, region: PageRegion) -> Result<Vec<String>> {
        let value = self
            .eval_region(
                region,
                "return Array.from(document.querySelectorAll(sel)).map(el => el.textContent.trim());",
            )
            .await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    async fn count(&self, region: PageRegion) -> Result<usize> {
        let value = self
            .eval_region(region, "return document.querySelectorAll(sel).length;")
            .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn is_visible(&self, region: PageRegion) -> Result<bool> {
        let value = self
            .eval_region(
                region,
                "const el = document.querySelector(sel); if (!el) return false; \
                 const s = window.getComputedStyle(el); \
                 return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';",
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn trigger(&self, control: Control) -> Result<()> {
        let selectors = serde_json::to_string(control.selectors())?;
        let clicked = self
            .eval_with(
                selectors,
                "for (const s of sel) { const el = document.querySelector(s); \
                 if (el) { el.click(); return true; } } return false;",
            )
            .await?;
        if clicked.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(SlotwatchError::ControlNotFound {
                control: control.name().to_string(),
            })
        }
    }

    async fn fill(&self, field: FormField, value: &str) -> Result<()> {
        let args = json!({ "selectors": field.selectors(), "value": value }).to_string();
        let filled = self
            .eval_with(
                args,
                "for (const s of sel.selectors) { const el = document.querySelector(s); \
                 if (el) { el.value = sel.value; \
                 el.dispatchEvent(new Event('input', { bubbles: true })); \
                 el.dispatchEvent(new Event('change', { bubbles: true })); \
                 return el.value === sel.value; } } return null;",
            )
            .await?;
        match filled.as_bool() {
            Some(true) => Ok(()),
            Some(false) => Err(SlotwatchError::browser(format!(
                "{} did not keep the filled value",
                field.name()
            ))),
            None => Err(SlotwatchError::ControlNotFound {
                control: field.name().to_string(),
            }),
        }
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.eval_with(js_string(url), "window.location.replace(sel); return true;")
            .await?;
        Ok(())
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let value = self
            .eval_with(
                js_string(url),
                "return fetch(sel, { method: 'GET', credentials: 'include', headers: { \
                 'Accept': 'text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8', \
                 'Cache-Control': 'no-cache', 'Pragma': 'no-cache' } }).then(r => r.text());",
            )
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SlotwatchError::browser(format!("fetch of {url} returned no text")))
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.client.evaluate("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<PageEvent>> {
        let (tx, rx) = mpsc::channel(128);
        self.subscribers.lock().await.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a[href*="x"]"#), r#""a[href*=\"x\"]""#);
    }

    #[test]
    fn test_decode_plain_body() {
        let result = json!({ "body": "<html></html>", "base64Encoded": false });
        assert_eq!(decode_body(&result).as_deref(), Some("<html></html>"));
    }

    #[test]
    fn test_decode_base64_body() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("Pardon Our Interruption");
        let result = json!({ "body": encoded, "base64Encoded": true });
        assert_eq!(decode_body(&result).as_deref(), Some("Pardon Our Interruption"));
    }

    #[tokio::test]
    async fn test_response_reaches_subscribers_before_release() {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let subscribers = Arc::new(Mutex::new(Vec::new()));
        let (sub_tx, mut sub_rx) = mpsc::channel(4);
        subscribers.lock().await.push(sub_tx);

        // Browser side: on release, look at what the subscriber already holds.
        let (released_tx, released_rx) = oneshot::channel();
        let browser = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut released_tx = Some(released_tx);
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let request: Value = serde_json::from_str(&text).unwrap();
                let result = match request["method"].as_str() {
                    Some("Fetch.getResponseBody") => {
                        json!({ "body": "Pardon Our Interruption", "base64Encoded": false })
                    }
                    Some("Fetch.continueRequest") => {
                        if let Some(tx) = released_tx.take() {
                            let _ = tx.send(sub_rx.try_recv().ok());
                        }
                        json!({})
                    }
                    _ => json!({}),
                };
                let reply = json!({ "id": request["id"], "result": result });
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
        });

        let client = Arc::new(
            CdpClient::connect(&format!("ws://{addr}"), Duration::from_secs(5))
                .await
                .unwrap(),
        );
        let (paused_tx, paused) = mpsc::channel(1);
        let (_loaded_tx, loaded) = mpsc::channel(1);
        let (_bindings_tx, bindings) = mpsc::channel(1);
        let pump = tokio::spawn(pump_events(
            Arc::clone(&client),
            Arc::clone(&subscribers),
            paused,
            loaded,
            bindings,
        ));

        paused_tx
            .send(json!({
                "requestId": "interception-1",
                "request": { "url": "https://site.test/obs?_eventId=searchForWeeklySlotsNextAvailable" },
                "responseStatusCode": 200,
            }))
            .await
            .unwrap();

        match released_rx.await.unwrap() {
            Some(PageEvent::Response(response)) => {
                assert_eq!(response.body, "Pardon Our Interruption");
                assert_eq!(response.status, 200);
            }
            other => panic!("response not delivered before release: {other:?}"),
        }

        pump.abort();
        browser.abort();
    }

    #[test]
    fn test_cdp_error_classification() {
        let err = cdp_error("Runtime.evaluate", &json!({"message": "Execution context was destroyed."}));
        assert!(err.is_soft_failure());
        let err = cdp_error("Page.enable", &json!({"message": "Method not found"}));
        assert!(matches!(err, SlotwatchError::Browser { .. }));
    }
}
