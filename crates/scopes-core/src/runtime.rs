use crate::client::ScopeProxy;
use crate::config::RuntimeConfig;
use crate::error::{ErrorCode, ScopesError};
use crate::middleware::{Middleware, ServantHandle};
use crate::middleware_factory::MiddlewareFactory;
use crate::protocol::ProxyAddr;
use crate::provider::{invoke_provider, ScopeBase};
use crate::registry::{RegistryObject, RegistryProxy};
use crate::scope_object::ScopeObject;
use crate::transport::{endpoint_address, TransportKind};
use crate::util::lock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

struct HostedScope {
    scope_id: String,
    scope: Arc<dyn ScopeBase>,
    _servant: ServantHandle,
}

pub struct Runtime {
    factory: MiddlewareFactory,
    middleware: Middleware,
    scopes: Mutex<Vec<HostedScope>>,
    registry_servant: Mutex<Option<ServantHandle>>,
    destroyed: AtomicBool,
}

impl Runtime {
    pub fn create(server_name: &str, configfile: &Path) -> Result<Self, ScopesError> {
        Self::from_factory(server_name, MiddlewareFactory::new(configfile)?)
    }

    pub fn with_config(server_name: &str, config: RuntimeConfig) -> Result<Self, ScopesError> {
        config
            .validate()
            .map_err(|err| ScopesError::config(format!("{err:#}")))?;
        Self::from_factory(server_name, MiddlewareFactory::with_config(config))
    }

    fn from_factory(server_name: &str, factory: MiddlewareFactory) -> Result<Self, ScopesError> {
        let config = factory.config().clone();
        let middleware = factory.create(
            server_name,
            &config.default_middleware,
            &config.middleware_configfile,
        )?;
        let kind = TransportKind::from_tag(&config.default_middleware)?;
        middleware.set_registry(ProxyAddr::new(
            endpoint_address(&config.endpoint_dir, &config.registry_server, kind),
            config.registry_identity.clone(),
        ));
        Ok(Self {
            factory,
            middleware,
            scopes: Mutex::new(Vec::new()),
            registry_servant: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn factory(&self) -> &MiddlewareFactory {
        &self.factory
    }

    pub fn middleware(&self) -> &Middleware {
        &self.middleware
    }

    pub fn registry(&self) -> Result<RegistryProxy, ScopesError> {
        let Some(addr) = self.middleware.registry_addr() else {
            return Err(ScopesError::config("no registry configured"));
        };
        Ok(RegistryProxy::new(self.middleware.clone(), addr))
    }

    pub fn serve_registry(&self, registry: Arc<RegistryObject>) -> Result<ProxyAddr, ScopesError> {
        let config = self.factory.config();
        if self.middleware.server_name() != config.registry_server {
            return Err(ScopesError::config(format!(
                "runtime {} cannot serve registry {}",
                self.middleware.server_name(),
                config.registry_server
            )));
        }
        let (addr, handle) = self
            .middleware
            .add_servant(&config.registry_identity, registry)?;
        *lock(&self.registry_servant) = Some(handle);
        info!(registry = %addr, "registry served");
        Ok(addr)
    }

    pub fn run_scope(
        &self,
        scope_id: &str,
        scope: Arc<dyn ScopeBase>,
    ) -> Result<ScopeProxy, ScopesError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ScopesError::new(
                ErrorCode::MiddlewareStopped,
                "runtime already destroyed",
            ));
        }
        invoke_provider(|| scope.start(scope_id)).map_err(|message| {
            ScopesError::new(
                ErrorCode::Provider,
                format!("{scope_id}: start(): {message}"),
            )
        })?;

        let servant = Arc::new(ScopeObject::new(scope_id, Arc::clone(&scope)));
        let (addr, handle) = match self.middleware.add_servant(scope_id, servant) {
            Ok(registered) => registered,
            Err(err) => {
                scope.stop();
                return Err(err);
            }
        };
        lock(&self.scopes).push(HostedScope {
            scope_id: scope_id.to_string(),
            scope,
            _servant: handle,
        });
        info!(scope = scope_id, proxy = %addr, "scope running");
        Ok(ScopeProxy::new(self.middleware.clone(), addr))
    }

    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let hosted = std::mem::take(&mut *lock(&self.scopes));
        for entry in hosted {
            if let Err(message) = invoke_provider(|| {
                entry.scope.stop();
                Ok(())
            }) {
                warn!(scope = %entry.scope_id, error = %message, "scope stop() failed");
            }
        }
        lock(&self.registry_servant).take();
        self.factory.shutdown();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.destroy();
    }
}
