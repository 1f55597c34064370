use crate::client::ScopeProxy;
use crate::error::ScopesError;
use crate::middleware::{Current, Middleware, Servant};
use crate::protocol::{Invocation, ProxyAddr, Response};
use crate::proxy::MwRegistryProxy;
use crate::util::lock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScopeMetadata {
    pub scope_id: String,
    pub proxy: ProxyAddr,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub art: String,
    #[serde(default)]
    pub search_hint: String,
    #[serde(default)]
    pub hot_key: String,
    #[serde(default)]
    pub invisible: bool,
}

impl ScopeMetadata {
    pub fn new(scope_id: impl Into<String>, proxy: ProxyAddr) -> Self {
        let scope_id = scope_id.into();
        Self {
            display_name: scope_id.clone(),
            scope_id,
            proxy,
            description: String::new(),
            art: String::new(),
            search_hint: String::new(),
            hot_key: String::new(),
            invisible: false,
        }
    }
}

pub type MetadataMap = BTreeMap<String, ScopeMetadata>;

#[derive(Default)]
pub struct RegistryObject {
    scopes: Mutex<MetadataMap>,
}

impl RegistryObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, metadata: ScopeMetadata) -> bool {
        lock(&self.scopes)
            .insert(metadata.scope_id.clone(), metadata)
            .is_none()
    }

    pub fn remove(&self, scope_id: &str) -> bool {
        lock(&self.scopes).remove(scope_id).is_some()
    }

    pub fn get_metadata(&self, scope_id: &str) -> Result<ScopeMetadata, ScopesError> {
        lock(&self.scopes)
            .get(scope_id)
            .cloned()
            .ok_or_else(|| ScopesError::not_found(format!("unknown scope: {scope_id}")))
    }

    pub fn list(&self) -> MetadataMap {
        lock(&self.scopes).clone()
    }

    pub fn locate(&self, scope_id: &str) -> Result<ProxyAddr, ScopesError> {
        self.get_metadata(scope_id).map(|metadata| metadata.proxy)
    }
}

impl Servant for RegistryObject {
    fn dispatch(&self, invocation: Invocation, _current: &Current) -> Result<Response, ScopesError> {
        match invocation {
            Invocation::GetMetadata { scope_id } => Ok(Response::Metadata {
                metadata: self.get_metadata(&scope_id)?,
            }),
            Invocation::List => Ok(Response::MetadataMap {
                entries: self.list(),
            }),
            Invocation::Locate { scope_id } => Ok(Response::Scope {
                proxy: self.locate(&scope_id)?,
            }),
            other => Err(ScopesError::logic(format!(
                "registry does not handle {}()",
                other.op_name()
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RegistryProxy {
    middleware: Middleware,
    proxy: MwRegistryProxy,
}

impl RegistryProxy {
    pub fn new(middleware: Middleware, addr: ProxyAddr) -> Self {
        let proxy = middleware.create_registry_proxy(addr);
        Self { middleware, proxy }
    }

    pub fn addr(&self) -> &ProxyAddr {
        self.proxy.addr()
    }

    pub fn get_metadata(&self, scope_id: &str) -> Result<ScopeMetadata, ScopesError> {
        self.proxy.get_metadata(scope_id)
    }

    pub fn list(&self) -> Result<MetadataMap, ScopesError> {
        self.proxy.list()
    }

    pub fn list_if(
        &self,
        predicate: impl Fn(&ScopeMetadata) -> bool,
    ) -> Result<MetadataMap, ScopesError> {
        let mut entries = self.proxy.list()?;
        entries.retain(|_, metadata| predicate(metadata));
        Ok(entries)
    }

    pub fn locate(&self, scope_id: &str) -> Result<ScopeProxy, ScopesError> {
        let addr = self.proxy.locate(scope_id)?;
        Ok(ScopeProxy::new(self.middleware.clone(), addr))
    }
}
