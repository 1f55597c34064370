use crate::completion::CompletionDetails;
use crate::error::ScopesError;
use crate::middleware::{Current, Middleware, Servant, ServantHandle};
use crate::protocol::{Invocation, ProxyAddr, Response};
use crate::proxy::{MwQueryCtrlProxy, MwScopeProxy};
use crate::query::{
    ActionMetadata, ActivationResponse, CannedQuery, ScopeResult, SearchMetadata,
};
use crate::reply::{ATTRIBUTES_KEY, RESULT_KEY, WIDGETS_KEY};
use crate::util::{lock, panic_message};
use crate::value::{from_variant_map, VariantMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

pub trait ListenerBase: Send + Sync {
    /// Called exactly once per query.
    fn finished(&self, details: CompletionDetails);
}

pub trait SearchListener: ListenerBase {
    fn push(&self, result: ScopeResult);
}

pub trait PreviewListener: ListenerBase {
    fn push_widgets(&self, widgets: Vec<VariantMap>);
    fn push_attribute(&self, key: &str, value: serde_json::Value);
}

pub trait ActivationListener: ListenerBase {
    fn activated(&self, response: ActivationResponse);
}

enum Listener {
    Search(Arc<dyn SearchListener>),
    Preview(Arc<dyn PreviewListener>),
    Activation(Arc<dyn ActivationListener>),
}

impl Listener {
    fn finished(&self, details: CompletionDetails) {
        match self {
            Self::Search(listener) => listener.finished(details),
            Self::Preview(listener) => listener.finished(details),
            Self::Activation(listener) => listener.finished(details),
        }
    }

    fn deliver(&self, mut payload: VariantMap) -> Result<(), ScopesError> {
        match self {
            Self::Search(listener) => {
                let Some(raw) = payload.remove(RESULT_KEY) else {
                    return Err(ScopesError::logic("search push without a result"));
                };
                let result: ScopeResult = serde_json::from_value(raw).map_err(|err| {
                    ScopesError::logic(format!("invalid result in push: {err}"))
                })?;
                listener.push(result);
            }
            Self::Preview(listener) => {
                if let Some(raw) = payload.remove(WIDGETS_KEY) {
                    let widgets: Vec<VariantMap> = serde_json::from_value(raw).map_err(|err| {
                        ScopesError::logic(format!("invalid widgets in push: {err}"))
                    })?;
                    listener.push_widgets(widgets);
                }
                if let Some(raw) = payload.remove(ATTRIBUTES_KEY) {
                    let attributes: VariantMap = serde_json::from_value(raw).map_err(|err| {
                        ScopesError::logic(format!("invalid attributes in push: {err}"))
                    })?;
                    for (key, value) in attributes {
                        listener.push_attribute(&key, value);
                    }
                }
            }
            Self::Activation(listener) => {
                listener.activated(from_variant_map(payload)?);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct ReplyState {
    // A terminal status was chosen; later pushes and completions are dropped.
    closed: bool,
    received: u64,
    in_flight: u32,
    pending: Option<(CompletionDetails, u64)>,
    chosen: Option<CompletionDetails>,
}

impl ReplyState {
    fn close(&mut self, details: CompletionDetails) {
        self.closed = true;
        self.pending = None;
        self.chosen = Some(details);
    }

    fn ready(&mut self) -> Option<CompletionDetails> {
        if self.closed && self.in_flight == 0 {
            self.chosen.take()
        } else {
            None
        }
    }
}

pub struct ReplyObject {
    listener: Listener,
    state: Mutex<ReplyState>,
    servant: Mutex<Option<ServantHandle>>,
}

impl ReplyObject {
    fn new(listener: Listener) -> Self {
        Self {
            listener,
            state: Mutex::new(ReplyState::default()),
            servant: Mutex::new(None),
        }
    }

    fn attach(&self, handle: ServantHandle) {
        *lock(&self.servant) = Some(handle);
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.state).closed
    }

    fn push(&self, payload: VariantMap) {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.in_flight += 1;
        }
        let delivered = catch_unwind(AssertUnwindSafe(|| self.listener.deliver(payload)))
            .unwrap_or_else(|payload| {
                Err(ScopesError::logic(format!(
                    "listener push panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        let ready = {
            let mut state = lock(&self.state);
            state.in_flight -= 1;
            state.received += 1;
            if let Err(err) = &delivered {
                warn!(error = %err, "reply push could not be delivered");
                if !state.closed {
                    let details = CompletionDetails::error(err.detail.clone());
                    state.close(details);
                }
            } else if !state.closed {
                match state.pending.take() {
                    Some((details, expected)) if state.received >= expected => {
                        state.close(details);
                    }
                    other => state.pending = other,
                }
            }
            state.ready()
        };
        if let Some(details) = ready {
            self.deliver_finished(details);
        }
    }

    fn finished(&self, details: CompletionDetails, pushed: u64) {
        let ready = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            if state.received < pushed {
                state.pending = Some((details, pushed));
                return;
            }
            state.close(details);
            state.ready()
        };
        if let Some(details) = ready {
            self.deliver_finished(details);
        }
    }

    fn finish_now(&self, details: CompletionDetails) {
        let ready = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            // A push already inside the listener is delivered first.
            state.close(details);
            state.ready()
        };
        if let Some(details) = ready {
            self.deliver_finished(details);
        }
    }

    fn deliver_finished(&self, details: CompletionDetails) {
        if let Err(payload) =
            catch_unwind(AssertUnwindSafe(|| self.listener.finished(details)))
        {
            warn!(
                error = %panic_message(payload.as_ref()),
                "listener finished() panicked"
            );
        }
        let handle = lock(&self.servant).take();
        if let Some(handle) = handle {
            handle.disconnect();
        }
    }
}

impl Servant for ReplyObject {
    fn dispatch(&self, invocation: Invocation, _current: &Current) -> Result<Response, ScopesError> {
        match invocation {
            Invocation::Push { payload } => self.push(payload),
            Invocation::Finished { details, pushed } => self.finished(details, pushed),
            other => {
                return Err(ScopesError::logic(format!(
                    "reply object does not handle {}()",
                    other.op_name()
                )))
            }
        }
        Ok(Response::Done)
    }

    fn deactivate(&self) {
        self.finish_now(CompletionDetails::error(
            "middleware stopped before the query finished",
        ));
    }
}

#[derive(Clone, Debug)]
pub struct QueryCtrlProxy {
    proxy: MwQueryCtrlProxy,
    reply: Weak<ReplyObject>,
}

impl QueryCtrlProxy {
    pub fn addr(&self) -> &ProxyAddr {
        self.proxy.addr()
    }

    pub fn cancel(&self) {
        let Some(reply) = self.reply.upgrade() else {
            return;
        };
        if reply.is_finished() {
            return;
        }
        self.proxy.cancel();
        reply.finish_now(CompletionDetails::cancelled());
    }

    pub fn destroy(&self) {
        self.proxy.destroy();
    }
}

impl std::fmt::Debug for ReplyObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyObject")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct ScopeProxy {
    middleware: Middleware,
    proxy: MwScopeProxy,
}

impl ScopeProxy {
    pub fn new(middleware: Middleware, addr: ProxyAddr) -> Self {
        let proxy = middleware.create_scope_proxy(addr);
        Self { middleware, proxy }
    }

    pub fn addr(&self) -> &ProxyAddr {
        self.proxy.addr()
    }

    pub fn search(
        &self,
        query_string: &str,
        metadata: SearchMetadata,
        listener: Arc<dyn SearchListener>,
    ) -> Result<QueryCtrlProxy, ScopesError> {
        let query = CannedQuery::new(self.addr().identity.clone()).with_query_string(query_string);
        self.search_query(query, metadata, listener)
    }

    pub fn search_query(
        &self,
        query: CannedQuery,
        metadata: SearchMetadata,
        listener: Arc<dyn SearchListener>,
    ) -> Result<QueryCtrlProxy, ScopesError> {
        self.start(Listener::Search(listener), |reply| {
            self.proxy.search(query, metadata, reply)
        })
    }

    pub fn preview(
        &self,
        result: ScopeResult,
        metadata: ActionMetadata,
        listener: Arc<dyn PreviewListener>,
    ) -> Result<QueryCtrlProxy, ScopesError> {
        self.start(Listener::Preview(listener), |reply| {
            self.proxy.preview(result, metadata, reply)
        })
    }

    pub fn activate(
        &self,
        result: ScopeResult,
        metadata: ActionMetadata,
        listener: Arc<dyn ActivationListener>,
    ) -> Result<QueryCtrlProxy, ScopesError> {
        self.start(Listener::Activation(listener), |reply| {
            self.proxy.activate(result, metadata, reply)
        })
    }

    pub fn perform_action(
        &self,
        result: ScopeResult,
        metadata: ActionMetadata,
        widget_id: &str,
        action_id: &str,
        listener: Arc<dyn ActivationListener>,
    ) -> Result<QueryCtrlProxy, ScopesError> {
        self.start(Listener::Activation(listener), |reply| {
            self.proxy
                .perform_action(result, metadata, widget_id, action_id, reply)
        })
    }

    pub fn activate_result_action(
        &self,
        result: ScopeResult,
        metadata: ActionMetadata,
        action_id: &str,
        listener: Arc<dyn ActivationListener>,
    ) -> Result<QueryCtrlProxy, ScopesError> {
        self.start(Listener::Activation(listener), |reply| {
            self.proxy
                .activate_result_action(result, metadata, action_id, reply)
        })
    }

    fn start(
        &self,
        listener: Listener,
        call: impl FnOnce(ProxyAddr) -> Result<ProxyAddr, ScopesError>,
    ) -> Result<QueryCtrlProxy, ScopesError> {
        let reply = Arc::new(ReplyObject::new(listener));
        let (reply_addr, handle) = match self
            .middleware
            .add_anonymous_servant("reply", reply.clone())
        {
            Ok(registered) => registered,
            Err(err) => {
                reply.finish_now(CompletionDetails::error(err.to_string()));
                return Err(err);
            }
        };
        reply.attach(handle);

        match call(reply_addr) {
            Ok(ctrl_addr) => Ok(QueryCtrlProxy {
                proxy: self.middleware.create_query_control_proxy(ctrl_addr),
                reply: Arc::downgrade(&reply),
            }),
            Err(err) => {
                reply.finish_now(CompletionDetails::error(err.to_string()));
                Err(err)
            }
        }
    }
}
