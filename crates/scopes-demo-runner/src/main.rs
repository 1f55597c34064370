use anyhow::{Context as _, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use scopes_core::client::{ActivationListener, ListenerBase, PreviewListener, SearchListener};
use scopes_core::completion::CompletionDetails;
use scopes_core::config::RuntimeConfig;
use scopes_core::provider::{
    ActivationQueryBase, PreviewQueryBase, QueryBase, ScopeBase, SearchQueryBase,
};
use scopes_core::query::{
    ActionMetadata, ActivationResponse, ActivationStatus, CannedQuery, ScopeResult,
    SearchMetadata,
};
use scopes_core::registry::{RegistryObject, ScopeMetadata};
use scopes_core::reply::{PreviewReplyProxy, SearchReplyProxy};
use scopes_core::runtime::Runtime;
use scopes_core::value::VariantMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const SCOPE_ID: &str = "demo";

struct PendingQuery {
    text: String,
    cancelled: Arc<AtomicBool>,
    reply: SearchReplyProxy,
}

struct DemoScope {
    delay: Duration,
    fail: bool,
    queue: Mutex<Option<Sender<PendingQuery>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
}

impl DemoScope {
    fn new(delay: Duration, fail: bool) -> Self {
        Self {
            delay,
            fail,
            queue: Mutex::new(None),
            worker: Mutex::new(None),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }
}

fn serve_queue(rx: Receiver<PendingQuery>, delay: Duration, stopping: Arc<AtomicBool>) {
    // Live queries hold senders too, so disconnection alone cannot end the loop.
    while !stopping.load(Ordering::SeqCst) {
        let pending = match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(pending) => pending,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        thread::sleep(delay);
        if pending.cancelled.load(Ordering::SeqCst) {
            debug!(query = %pending.text, "dropping cancelled query");
            continue;
        }
        for ix in 0..3 {
            let mut result = ScopeResult::new(
                format!("demo:{}:{ix}", pending.text),
                format!("{} #{ix}", pending.text),
            );
            result.category_id = "demo".to_string();
            if !pending.reply.push(&result) {
                break;
            }
        }
    }
}

impl ScopeBase for DemoScope {
    fn start(&self, scope_id: &str) -> Result<()> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let delay = self.delay;
        let stopping = Arc::clone(&self.stopping);
        let worker = thread::Builder::new()
            .name(format!("{scope_id}-worker"))
            .spawn(move || serve_queue(rx, delay, stopping))
            .context("spawn demo worker")?;
        *self.queue.lock().map_err(|_| anyhow::anyhow!("queue lock poisoned"))? = Some(tx);
        *self
            .worker
            .lock()
            .map_err(|_| anyhow::anyhow!("worker lock poisoned"))? = Some(worker);
        Ok(())
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Ok(mut queue) = self.queue.lock() {
            queue.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }

    fn search(
        &self,
        query: &CannedQuery,
        _metadata: &SearchMetadata,
    ) -> Result<Arc<dyn SearchQueryBase>> {
        let queue = self
            .queue
            .lock()
            .map_err(|_| anyhow::anyhow!("queue lock poisoned"))?
            .clone()
            .context("demo scope is not started")?;
        Ok(Arc::new(DemoQuery {
            text: query.query_string.clone(),
            fail: self.fail,
            queue,
            cancelled: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn preview(
        &self,
        result: &ScopeResult,
        _metadata: &ActionMetadata,
    ) -> Result<Arc<dyn PreviewQueryBase>> {
        Ok(Arc::new(DemoPreview {
            result: result.clone(),
        }))
    }

    fn activate(
        &self,
        result: &ScopeResult,
        _metadata: &ActionMetadata,
    ) -> Result<Arc<dyn ActivationQueryBase>> {
        Ok(Arc::new(DemoActivation {
            uri: result.uri.clone(),
        }))
    }
}

struct DemoQuery {
    text: String,
    fail: bool,
    queue: Sender<PendingQuery>,
    cancelled: Arc<AtomicBool>,
}

impl QueryBase for DemoQuery {
    fn cancelled(&self) -> Result<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        info!(query = %self.text, "demo query cancelled");
        Ok(())
    }
}

impl SearchQueryBase for DemoQuery {
    fn run(&self, reply: SearchReplyProxy) -> Result<()> {
        if self.fail {
            anyhow::bail!("demo failure requested for {}", self.text);
        }
        self.queue
            .send(PendingQuery {
                text: self.text.clone(),
                cancelled: Arc::clone(&self.cancelled),
                reply,
            })
            .context("demo worker is gone")
    }
}

struct DemoPreview {
    result: ScopeResult,
}

impl QueryBase for DemoPreview {}

impl PreviewQueryBase for DemoPreview {
    fn run(&self, reply: PreviewReplyProxy) -> Result<()> {
        let mut header = VariantMap::new();
        header.insert("type".to_string(), serde_json::json!("header"));
        header.insert("title".to_string(), serde_json::json!(self.result.title));
        reply.push_widgets(&[header]);
        reply.push_attribute("uri", serde_json::json!(self.result.uri));
        Ok(())
    }
}

struct DemoActivation {
    uri: String,
}

impl QueryBase for DemoActivation {}

impl ActivationQueryBase for DemoActivation {
    fn activate(&self) -> Result<ActivationResponse> {
        let mut response = ActivationResponse::new(ActivationStatus::ShowPreview)?;
        let mut hints = VariantMap::new();
        hints.insert("uri".to_string(), serde_json::json!(self.uri));
        response.set_hints(hints);
        Ok(response)
    }
}

struct PrintingListener {
    label: &'static str,
    done: Sender<CompletionDetails>,
}

impl PrintingListener {
    fn emit(&self, event: serde_json::Value) {
        let mut line = serde_json::json!({ "query": self.label });
        if let (Some(line), serde_json::Value::Object(event)) = (line.as_object_mut(), event) {
            line.extend(event);
        }
        println!("{line}");
    }
}

impl ListenerBase for PrintingListener {
    fn finished(&self, details: CompletionDetails) {
        self.emit(serde_json::json!({
            "event": "finished",
            "status": details.status.as_tag(),
            "message": details.message,
        }));
        let _ = self.done.send(details);
    }
}

impl SearchListener for PrintingListener {
    fn push(&self, result: ScopeResult) {
        self.emit(serde_json::json!({ "event": "push", "uri": result.uri }));
    }
}

impl PreviewListener for PrintingListener {
    fn push_widgets(&self, widgets: Vec<VariantMap>) {
        self.emit(serde_json::json!({ "event": "widgets", "count": widgets.len() }));
    }

    fn push_attribute(&self, key: &str, value: serde_json::Value) {
        self.emit(serde_json::json!({ "event": "attribute", "key": key, "value": value }));
    }
}

impl ActivationListener for PrintingListener {
    fn activated(&self, response: ActivationResponse) {
        self.emit(serde_json::json!({
            "event": "activated",
            "status": response.status(),
        }));
    }
}

fn listener(label: &'static str) -> (Arc<PrintingListener>, Receiver<CompletionDetails>) {
    let (done, rx) = crossbeam_channel::bounded(1);
    (Arc::new(PrintingListener { label, done }), rx)
}

fn wait(rx: &Receiver<CompletionDetails>, label: &str) -> Result<CompletionDetails> {
    rx.recv_timeout(Duration::from_secs(10))
        .with_context(|| format!("{label} did not finish"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let kind = std::env::var("SCOPES_DEMO_KIND").unwrap_or_else(|_| "queue".to_string());
    let delay_ms = std::env::var("SCOPES_DEMO_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(20);
    let fail = std::env::var("SCOPES_DEMO_FAIL")
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    let endpoint_dir = std::env::temp_dir()
        .join(format!("scopes-demo-{}", std::process::id()))
        .display()
        .to_string();
    let config = RuntimeConfig {
        default_middleware: kind,
        ..RuntimeConfig::with_endpoint_dir(endpoint_dir)
    };

    let registry_runtime = Runtime::with_config(&config.registry_server, config.clone())?;
    let registry = Arc::new(RegistryObject::new());
    registry_runtime.serve_registry(Arc::clone(&registry))?;

    let scope_runtime = Runtime::with_config("demo-scopes", config)?;
    let scope = Arc::new(DemoScope::new(Duration::from_millis(delay_ms), fail));
    let proxy = scope_runtime.run_scope(SCOPE_ID, scope)?;
    let mut metadata = ScopeMetadata::new(SCOPE_ID, proxy.addr().clone());
    metadata.display_name = "Demo scope".to_string();
    registry.add(metadata);

    let demo = scope_runtime.registry()?.locate(SCOPE_ID)?;

    let (search, done) = listener("search");
    demo.search("rust", SearchMetadata::default(), search)?;
    wait(&done, "search")?;

    let first = ScopeResult::new("demo:rust:0", "rust #0");
    let (preview, done) = listener("preview");
    demo.preview(first.clone(), ActionMetadata::default(), preview)?;
    wait(&done, "preview")?;

    let (activation, done) = listener("activate");
    demo.activate(first, ActionMetadata::default(), activation)?;
    wait(&done, "activate")?;

    let (cancelled, done) = listener("cancelled");
    let ctrl = demo.search("slow", SearchMetadata::default(), cancelled)?;
    ctrl.cancel();
    wait(&done, "cancelled")?;

    scope_runtime.destroy();
    registry_runtime.destroy();
    Ok(())
}
