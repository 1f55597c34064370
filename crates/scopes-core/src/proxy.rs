use crate::completion::CompletionDetails;
use crate::error::ScopesError;
use crate::protocol::{Invocation, ProxyAddr, Response};
use crate::query::{ActionMetadata, CannedQuery, ScopeResult, SearchMetadata};
use crate::registry::{MetadataMap, ScopeMetadata};
use crate::transport::Transport;
use crate::value::VariantMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct ObjectProxy {
    addr: ProxyAddr,
    transport: Arc<dyn Transport>,
}

impl ObjectProxy {
    pub fn new(addr: ProxyAddr, transport: Arc<dyn Transport>) -> Self {
        Self { addr, transport }
    }

    pub fn addr(&self) -> &ProxyAddr {
        &self.addr
    }

    fn twoway(&self, invocation: Invocation) -> Result<Response, ScopesError> {
        self.transport.twoway(&self.addr, invocation)
    }

    fn oneway(&self, invocation: Invocation) {
        let op = invocation.op_name();
        if let Err(err) = self.try_oneway(invocation) {
            warn!(target_addr = %self.addr, op, error = %err, "oneway call failed");
        }
    }

    // Still non-blocking; only a failed hand-off to the endpoint is reported.
    fn try_oneway(&self, invocation: Invocation) -> Result<(), ScopesError> {
        self.transport.oneway(&self.addr, invocation)
    }
}

impl std::fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectProxy({})", self.addr)
    }
}

fn unexpected(op: &str, response: Response) -> ScopesError {
    ScopesError::logic(format!("unexpected response to {op}(): {response:?}"))
}

fn expect_query_ctrl(op: &str, response: Response) -> Result<ProxyAddr, ScopesError> {
    match response {
        Response::QueryCtrl { proxy } => Ok(proxy),
        other => Err(unexpected(op, other)),
    }
}

#[derive(Clone, Debug)]
pub struct MwScopeProxy {
    proxy: ObjectProxy,
}

impl MwScopeProxy {
    pub fn new(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    pub fn addr(&self) -> &ProxyAddr {
        self.proxy.addr()
    }

    pub fn search(
        &self,
        query: CannedQuery,
        metadata: SearchMetadata,
        reply: ProxyAddr,
    ) -> Result<ProxyAddr, ScopesError> {
        let response = self.proxy.twoway(Invocation::Search {
            query,
            metadata,
            reply,
        })?;
        expect_query_ctrl("search", response)
    }

    pub fn preview(
        &self,
        result: ScopeResult,
        metadata: ActionMetadata,
        reply: ProxyAddr,
    ) -> Result<ProxyAddr, ScopesError> {
        let response = self.proxy.twoway(Invocation::Preview {
            result,
            metadata,
            reply,
        })?;
        expect_query_ctrl("preview", response)
    }

    pub fn activate(
        &self,
        result: ScopeResult,
        metadata: ActionMetadata,
        reply: ProxyAddr,
    ) -> Result<ProxyAddr, ScopesError> {
        let response = self.proxy.twoway(Invocation::Activate {
            result,
            metadata,
            reply,
        })?;
        expect_query_ctrl("activate", response)
    }

    pub fn perform_action(
        &self,
        result: ScopeResult,
        metadata: ActionMetadata,
        widget_id: &str,
        action_id: &str,
        reply: ProxyAddr,
    ) -> Result<ProxyAddr, ScopesError> {
        let response = self.proxy.twoway(Invocation::PerformAction {
            result,
            metadata,
            widget_id: widget_id.to_string(),
            action_id: action_id.to_string(),
            reply,
        })?;
        expect_query_ctrl("perform_action", response)
    }

    pub fn activate_result_action(
        &self,
        result: ScopeResult,
        metadata: ActionMetadata,
        action_id: &str,
        reply: ProxyAddr,
    ) -> Result<ProxyAddr, ScopesError> {
        let response = self.proxy.twoway(Invocation::ActivateResultAction {
            result,
            metadata,
            action_id: action_id.to_string(),
            reply,
        })?;
        expect_query_ctrl("activate_result_action", response)
    }
}

#[derive(Clone, Debug)]
pub struct MwQueryProxy {
    proxy: ObjectProxy,
}

impl MwQueryProxy {
    pub fn new(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    pub fn run(&self, reply: ProxyAddr) -> Result<(), ScopesError> {
        self.proxy.try_oneway(Invocation::Run { reply })
    }
}

#[derive(Clone, Debug)]
pub struct MwQueryCtrlProxy {
    proxy: ObjectProxy,
}

impl MwQueryCtrlProxy {
    pub fn new(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    pub fn addr(&self) -> &ProxyAddr {
        self.proxy.addr()
    }

    pub fn cancel(&self) {
        self.proxy.oneway(Invocation::Cancel);
    }

    pub fn destroy(&self) {
        self.proxy.oneway(Invocation::Destroy);
    }
}

#[derive(Clone, Debug)]
pub struct MwReplyProxy {
    proxy: ObjectProxy,
}

impl MwReplyProxy {
    pub fn new(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    pub fn addr(&self) -> &ProxyAddr {
        self.proxy.addr()
    }

    pub fn push(&self, payload: VariantMap) {
        self.proxy.oneway(Invocation::Push { payload });
    }

    pub fn finished(&self, details: CompletionDetails, pushed: u64) {
        self.proxy.oneway(Invocation::Finished { details, pushed });
    }
}

#[derive(Clone, Debug)]
pub struct MwRegistryProxy {
    proxy: ObjectProxy,
}

impl MwRegistryProxy {
    pub fn new(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    pub fn addr(&self) -> &ProxyAddr {
        self.proxy.addr()
    }

    pub fn get_metadata(&self, scope_id: &str) -> Result<ScopeMetadata, ScopesError> {
        match self.proxy.twoway(Invocation::GetMetadata {
            scope_id: scope_id.to_string(),
        })? {
            Response::Metadata { metadata } => Ok(metadata),
            other => Err(unexpected("get_metadata", other)),
        }
    }

    pub fn list(&self) -> Result<MetadataMap, ScopesError> {
        match self.proxy.twoway(Invocation::List)? {
            Response::MetadataMap { entries } => Ok(entries),
            other => Err(unexpected("list", other)),
        }
    }

    pub fn locate(&self, scope_id: &str) -> Result<ProxyAddr, ScopesError> {
        match self.proxy.twoway(Invocation::Locate {
            scope_id: scope_id.to_string(),
        })? {
            Response::Scope { proxy } => Ok(proxy),
            other => Err(unexpected("locate", other)),
        }
    }
}
