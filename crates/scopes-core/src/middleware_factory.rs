use crate::config::{load_middleware_config, load_runtime_config, MiddlewareConfig, RuntimeConfig};
use crate::error::ScopesError;
use crate::middleware::Middleware;
use crate::queue_transport::QueueTransport;
use crate::thread_transport::ThreadTransport;
use crate::transport::{Transport, TransportKind};
use crate::util::lock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct MiddlewareFactory {
    config: RuntimeConfig,
    cache: Mutex<HashMap<(String, TransportKind), Middleware>>,
}

impl MiddlewareFactory {
    pub fn new(configfile: &Path) -> Result<Self, ScopesError> {
        let config = load_runtime_config(configfile).map_err(|err| {
            ScopesError::config(format!(
                "cannot instantiate MiddlewareFactory: config file: {}: {err:#}",
                configfile.display()
            ))
        })?;
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the cached instance for the key or builds one. The cache lock is
    /// held for the whole construction so a key is never built twice.
    pub fn create(
        &self,
        server_name: &str,
        kind: &str,
        configfile: &str,
    ) -> Result<Middleware, ScopesError> {
        let kind = TransportKind::from_tag(kind)?;
        let mut cache = lock(&self.cache);
        let key = (server_name.to_string(), kind);
        if let Some(existing) = cache.get(&key) {
            return Ok(existing.clone());
        }

        let config = if configfile.is_empty() {
            MiddlewareConfig::default()
        } else {
            load_middleware_config(Path::new(configfile))
                .map_err(|err| ScopesError::config(format!("{err:#}")))?
        };
        let transport: Arc<dyn Transport> = match kind {
            TransportKind::Queue => Arc::new(QueueTransport::new(config)),
            TransportKind::Thread => Arc::new(ThreadTransport::new(config)),
        };
        let middleware = Middleware::new(server_name, transport, &self.config.endpoint_dir)?;
        info!(
            server = server_name,
            kind = kind.as_tag(),
            endpoint = middleware.endpoint(),
            "middleware created"
        );
        cache.insert(key, middleware.clone());
        Ok(middleware)
    }

    pub fn find(&self, server_name: &str, kind: &str) -> Option<Middleware> {
        let kind = TransportKind::from_tag(kind).ok()?;
        lock(&self.cache)
            .get(&(server_name.to_string(), kind))
            .cloned()
    }

    pub fn cached_count(&self) -> usize {
        lock(&self.cache).len()
    }

    pub fn shutdown(&self) {
        let cached: Vec<Middleware> = lock(&self.cache).drain().map(|(_, mw)| mw).collect();
        for middleware in cached {
            middleware.stop();
        }
    }
}
