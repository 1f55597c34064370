use crate::error::{ErrorCode, ScopesError};
use crate::protocol::{Adapter, Invocation, ProxyAddr, Response};
use crate::proxy::{
    MwQueryCtrlProxy, MwQueryProxy, MwRegistryProxy, MwReplyProxy, MwScopeProxy, ObjectProxy,
};
use crate::transport::{bind_endpoint, endpoint_address, unbind_endpoint, Endpoint, Envelope};
use crate::transport::{Transport, TransportKind};
use crate::util::{lock, panic_message};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};

pub trait Servant: Send + Sync {
    fn dispatch(&self, invocation: Invocation, current: &Current)
        -> Result<Response, ScopesError>;

    fn deactivate(&self) {}
}

pub struct Current {
    pub middleware: Middleware,
    pub identity: String,
    pub adapter: Adapter,
}

#[derive(Default)]
pub(crate) struct ServantTable {
    entries: Mutex<HashMap<String, Arc<dyn Servant>>>,
}

impl ServantTable {
    fn add(&self, identity: &str, servant: Arc<dyn Servant>) -> Result<(), ScopesError> {
        let mut entries = lock(&self.entries);
        if entries.contains_key(identity) {
            return Err(ScopesError::logic(format!(
                "identity already registered: {identity}"
            )));
        }
        entries.insert(identity.to_string(), servant);
        Ok(())
    }

    fn find(&self, identity: &str) -> Option<Arc<dyn Servant>> {
        lock(&self.entries).get(identity).cloned()
    }

    fn remove(&self, identity: &str) -> Option<Arc<dyn Servant>> {
        lock(&self.entries).remove(identity)
    }

    fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    fn drain(&self) -> Vec<Arc<dyn Servant>> {
        lock(&self.entries).drain().map(|(_, servant)| servant).collect()
    }
}

pub struct ServantHandle {
    table: Weak<ServantTable>,
    identity: String,
}

impl ServantHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn disconnect(&self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        // Dropped outside the table lock: a servant's Drop may send oneway messages.
        let removed = table.remove(&self.identity);
        drop(removed);
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    servants: Arc<ServantTable>,
    middleware: Weak<MiddlewareInner>,
}

impl Dispatcher {
    pub fn dispatch(&self, envelope: Envelope) {
        let Envelope {
            identity,
            invocation,
            reply_to,
        } = envelope;
        let op = invocation.op_name();
        let adapter = invocation.adapter();

        let result = match (self.servants.find(&identity), self.middleware.upgrade()) {
            (Some(servant), Some(inner)) => {
                let current = Current {
                    middleware: Middleware { inner },
                    identity: identity.clone(),
                    adapter,
                };
                catch_unwind(AssertUnwindSafe(|| servant.dispatch(invocation, &current)))
                    .unwrap_or_else(|payload| {
                        Err(ScopesError::logic(format!(
                            "{op}() on {identity} panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    })
            }
            (None, _) => Err(ScopesError::new(
                ErrorCode::ObjectNotExist,
                format!("no servant registered for {identity}"),
            )),
            (_, None) => Err(ScopesError::new(
                ErrorCode::MiddlewareStopped,
                format!("middleware stopped before {op}() on {identity}"),
            )),
        };

        match reply_to {
            Some(reply_to) => {
                let _ = reply_to.send(result);
            }
            None => {
                if let Err(err) = result {
                    warn!(%identity, op, error = %err, "oneway dispatch failed");
                }
            }
        }
    }
}

pub(crate) struct MiddlewareInner {
    server_name: String,
    kind: TransportKind,
    address: String,
    transport: Arc<dyn Transport>,
    servants: Arc<ServantTable>,
    endpoint: Mutex<Option<Arc<dyn Endpoint>>>,
    registry: Mutex<Option<ProxyAddr>>,
    next_id: AtomicU64,
}

impl MiddlewareInner {
    fn stop(&self) {
        let endpoint = lock(&self.endpoint).take();
        let Some(endpoint) = endpoint else {
            return;
        };
        unbind_endpoint(&self.address);
        endpoint.shutdown();
        let servants = self.servants.drain();
        debug!(
            endpoint = %self.address,
            released = servants.len(),
            "middleware stopped"
        );
        for servant in servants {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| servant.deactivate())) {
                warn!(
                    endpoint = %self.address,
                    error = %panic_message(payload.as_ref()),
                    "servant deactivate panicked"
                );
            }
        }
    }
}

impl Drop for MiddlewareInner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Clone)]
pub struct Middleware {
    inner: Arc<MiddlewareInner>,
}

impl Middleware {
    pub fn new(
        server_name: &str,
        transport: Arc<dyn Transport>,
        endpoint_dir: &str,
    ) -> Result<Self, ScopesError> {
        let kind = transport.kind();
        let address = endpoint_address(endpoint_dir, server_name, kind);
        let inner = Arc::new(MiddlewareInner {
            server_name: server_name.to_string(),
            kind,
            address: address.clone(),
            transport,
            servants: Arc::new(ServantTable::default()),
            endpoint: Mutex::new(None),
            registry: Mutex::new(None),
            next_id: AtomicU64::new(0),
        });

        let dispatcher = Dispatcher {
            servants: Arc::clone(&inner.servants),
            middleware: Arc::downgrade(&inner),
        };
        let endpoint = inner.transport.listen(&address, dispatcher)?;
        if let Err(err) = bind_endpoint(Arc::clone(&endpoint)) {
            endpoint.shutdown();
            return Err(err);
        }
        *lock(&inner.endpoint) = Some(endpoint);
        info!(endpoint = %address, kind = kind.as_tag(), "middleware listening");
        Ok(Self { inner })
    }

    pub fn server_name(&self) -> &str {
        &self.inner.server_name
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.address
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.endpoint).is_some()
    }

    pub fn ptr_eq(&self, other: &Middleware) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn servant_count(&self) -> usize {
        self.inner.servants.len()
    }

    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn add_servant(
        &self,
        identity: &str,
        servant: Arc<dyn Servant>,
    ) -> Result<(ProxyAddr, ServantHandle), ScopesError> {
        if !self.is_running() {
            return Err(ScopesError::new(
                ErrorCode::MiddlewareStopped,
                format!("cannot add {identity}: {} is stopped", self.inner.address),
            ));
        }
        self.inner.servants.add(identity, servant)?;
        Ok((
            ProxyAddr::new(self.inner.address.clone(), identity),
            ServantHandle {
                table: Arc::downgrade(&self.inner.servants),
                identity: identity.to_string(),
            },
        ))
    }

    pub fn add_anonymous_servant(
        &self,
        prefix: &str,
        servant: Arc<dyn Servant>,
    ) -> Result<(ProxyAddr, ServantHandle), ScopesError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.add_servant(&format!("{prefix}-{id}"), servant)
    }

    pub fn set_registry(&self, registry: ProxyAddr) {
        *lock(&self.inner.registry) = Some(registry);
    }

    pub fn registry_addr(&self) -> Option<ProxyAddr> {
        lock(&self.inner.registry).clone()
    }

    fn object_proxy(&self, target: ProxyAddr) -> ObjectProxy {
        ObjectProxy::new(target, Arc::clone(&self.inner.transport))
    }

    pub fn create_scope_proxy(&self, target: ProxyAddr) -> MwScopeProxy {
        MwScopeProxy::new(self.object_proxy(target))
    }

    pub fn create_reply_proxy(&self, target: ProxyAddr) -> MwReplyProxy {
        MwReplyProxy::new(self.object_proxy(target))
    }

    pub fn create_query_control_proxy(&self, target: ProxyAddr) -> MwQueryCtrlProxy {
        MwQueryCtrlProxy::new(self.object_proxy(target))
    }

    pub fn create_query_proxy(&self, target: ProxyAddr) -> MwQueryProxy {
        MwQueryProxy::new(self.object_proxy(target))
    }

    pub fn create_registry_proxy(&self, target: ProxyAddr) -> MwRegistryProxy {
        MwRegistryProxy::new(self.object_proxy(target))
    }

    pub fn locate(&self, scope_id: &str) -> Result<MwScopeProxy, ScopesError> {
        let Some(registry) = self.registry_addr() else {
            return Err(ScopesError::config(format!(
                "no registry configured for {}",
                self.inner.address
            )));
        };
        let target = self.create_registry_proxy(registry).locate(scope_id)?;
        Ok(self.create_scope_proxy(target))
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("server_name", &self.inner.server_name)
            .field("kind", &self.inner.kind)
            .field("endpoint", &self.inner.address)
            .finish()
    }
}
