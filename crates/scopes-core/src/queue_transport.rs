use crate::config::MiddlewareConfig;
use crate::error::{ErrorCode, ScopesError};
use crate::middleware::Dispatcher;
use crate::protocol::Adapter;
use crate::transport::{Endpoint, Envelope, Transport, TransportKind};
use crate::util::lock;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Pool-per-adapter backend: every endpoint gets one queue and a fixed set of
/// workers for each call kind, so a blocking `run` never starves `cancel`.
pub struct QueueTransport {
    config: MiddlewareConfig,
}

impl QueueTransport {
    pub fn new(config: MiddlewareConfig) -> Self {
        Self { config }
    }
}

impl Transport for QueueTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Queue
    }

    fn twoway_timeout(&self) -> Duration {
        self.config.twoway_timeout()
    }

    fn listen(
        &self,
        address: &str,
        dispatcher: Dispatcher,
    ) -> Result<Arc<dyn Endpoint>, ScopesError> {
        let endpoint = QueueEndpoint::start(address, &self.config, dispatcher)?;
        Ok(Arc::new(endpoint))
    }
}

pub struct QueueEndpoint {
    address: String,
    queues: Mutex<Option<HashMap<Adapter, Sender<Envelope>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueEndpoint {
    fn start(
        address: &str,
        config: &MiddlewareConfig,
        dispatcher: Dispatcher,
    ) -> Result<Self, ScopesError> {
        let endpoint = Self {
            address: address.to_string(),
            queues: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        };

        let mut queues = HashMap::new();
        for adapter in Adapter::ALL {
            let (tx, rx) = crossbeam_channel::unbounded::<Envelope>();
            for ix in 0..config.pools.threads_for(adapter) {
                let name = format!("{address}-{}-{ix}", adapter.as_tag());
                match spawn_worker(name, rx.clone(), dispatcher.clone()) {
                    Ok(handle) => lock(&endpoint.workers).push(handle),
                    Err(err) => {
                        // Workers already started exit once their queues are dropped.
                        drop(tx);
                        drop(queues);
                        endpoint.join_workers();
                        return Err(err);
                    }
                }
            }
            queues.insert(adapter, tx);
        }

        *lock(&endpoint.queues) = Some(queues);
        debug!(
            endpoint = %endpoint.address,
            workers = lock(&endpoint.workers).len(),
            "queue endpoint started"
        );
        Ok(endpoint)
    }

    fn join_workers(&self) {
        let workers = std::mem::take(&mut *lock(&self.workers));
        let current = thread::current().id();
        for worker in workers {
            // Shutdown may be triggered from one of our own workers.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!(endpoint = %self.address, "queue worker exited with a panic");
            }
        }
    }
}

impl Endpoint for QueueEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    fn deliver(&self, envelope: Envelope) -> Result<(), ScopesError> {
        let adapter = envelope.invocation.adapter();
        let queues = lock(&self.queues);
        let Some(tx) = queues.as_ref().and_then(|queues| queues.get(&adapter)) else {
            return Err(ScopesError::new(
                ErrorCode::MiddlewareStopped,
                format!("{} is shut down", self.address),
            ));
        };
        tx.send(envelope).map_err(|_| {
            ScopesError::new(
                ErrorCode::MiddlewareStopped,
                format!("{} queue for {} is closed", self.address, adapter.as_tag()),
            )
        })
    }

    fn shutdown(&self) {
        let queues = lock(&self.queues).take();
        if queues.is_none() {
            return;
        }
        drop(queues);
        self.join_workers();
        debug!(endpoint = %self.address, "queue endpoint shut down");
    }
}

impl Drop for QueueEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(
    name: String,
    rx: Receiver<Envelope>,
    dispatcher: Dispatcher,
) -> Result<JoinHandle<()>, ScopesError> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            for envelope in rx.iter() {
                dispatcher.dispatch(envelope);
            }
        })
        .map_err(|err| {
            ScopesError::new(
                ErrorCode::Transport,
                format!("spawn worker {name} failed: {err}"),
            )
        })
}
