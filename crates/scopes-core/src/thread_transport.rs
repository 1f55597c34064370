use crate::config::MiddlewareConfig;
use crate::error::{ErrorCode, ScopesError};
use crate::middleware::Dispatcher;
use crate::transport::{Endpoint, Envelope, Transport, TransportKind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct ThreadTransport {
    config: MiddlewareConfig,
}

impl ThreadTransport {
    pub fn new(config: MiddlewareConfig) -> Self {
        Self { config }
    }
}

impl Transport for ThreadTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Thread
    }

    fn twoway_timeout(&self) -> Duration {
        self.config.twoway_timeout()
    }

    fn listen(
        &self,
        address: &str,
        dispatcher: Dispatcher,
    ) -> Result<Arc<dyn Endpoint>, ScopesError> {
        Ok(Arc::new(ThreadEndpoint {
            address: address.to_string(),
            dispatcher,
            closed: AtomicBool::new(false),
            spawned: AtomicU64::new(0),
        }))
    }
}

pub struct ThreadEndpoint {
    address: String,
    dispatcher: Dispatcher,
    closed: AtomicBool,
    spawned: AtomicU64,
}

impl Endpoint for ThreadEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    fn deliver(&self, envelope: Envelope) -> Result<(), ScopesError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScopesError::new(
                ErrorCode::MiddlewareStopped,
                format!("{} is shut down", self.address),
            ));
        }

        let ix = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}-{ix}", self.address, envelope.invocation.op_name());
        let dispatcher = self.dispatcher.clone();
        thread::Builder::new()
            .name(name)
            .spawn(move || dispatcher.dispatch(envelope))
            .map(|_| ())
            .map_err(|err| {
                ScopesError::new(
                    ErrorCode::Transport,
                    format!("spawn dispatch thread for {} failed: {err}", self.address),
                )
            })
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Current, Middleware, Servant};
    use crate::protocol::{Invocation, Response};

    struct ThreadName;

    impl Servant for ThreadName {
        fn dispatch(
            &self,
            _invocation: Invocation,
            _current: &Current,
        ) -> Result<Response, ScopesError> {
            let name = thread::current().name().unwrap_or_default().to_string();
            Err(ScopesError::not_found(name))
        }
    }

    #[test]
    fn every_invocation_runs_on_its_own_thread() {
        let dir = format!("/tmp/scopes-thread-test-{}", std::process::id());
        let mw = Middleware::new(
            "spawner",
            Arc::new(ThreadTransport::new(MiddlewareConfig::default())),
            &dir,
        )
        .expect("create middleware");
        assert_eq!(mw.kind(), TransportKind::Thread);
        let (addr, _handle) = mw
            .add_servant("names", Arc::new(ThreadName))
            .expect("add servant");
        let proxy = mw.create_registry_proxy(addr);

        let first = proxy.list().expect_err("servant reports thread name");
        let second = proxy.list().expect_err("servant reports thread name");
        assert!(first.detail.ends_with("-list-0"), "{}", first.detail);
        assert!(second.detail.ends_with("-list-1"), "{}", second.detail);
        mw.stop();
    }
}
