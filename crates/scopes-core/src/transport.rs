use crate::error::{ErrorCode, ScopesError};
use crate::middleware::Dispatcher;
use crate::protocol::{CallMode, Invocation, ProxyAddr, Response};
use crate::util::lock;
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Queue,
    Thread,
}

impl TransportKind {
    pub const ALL: [TransportKind; 2] = [Self::Queue, Self::Thread];

    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Thread => "thread",
        }
    }

    pub fn from_tag(input: &str) -> Result<Self, ScopesError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_tag() == input)
            .ok_or_else(|| ScopesError::config(format!("Invalid middleware kind: {input}")))
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

pub type ReplySender = Sender<Result<Response, ScopesError>>;

pub struct Envelope {
    pub identity: String,
    pub invocation: Invocation,
    pub reply_to: Option<ReplySender>,
}

impl Envelope {
    pub fn mode(&self) -> CallMode {
        if self.reply_to.is_some() {
            CallMode::Twoway
        } else {
            CallMode::Oneway
        }
    }
}

pub trait Endpoint: Send + Sync {
    fn address(&self) -> &str;
    fn deliver(&self, envelope: Envelope) -> Result<(), ScopesError>;
    fn shutdown(&self);
}

pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;
    fn twoway_timeout(&self) -> Duration;
    fn listen(&self, address: &str, dispatcher: Dispatcher)
        -> Result<Arc<dyn Endpoint>, ScopesError>;

    fn twoway(&self, target: &ProxyAddr, invocation: Invocation) -> Result<Response, ScopesError> {
        let endpoint = resolve_endpoint(&target.endpoint)?;
        let op = invocation.op_name();
        let (tx, rx) = crossbeam_channel::bounded(1);
        endpoint.deliver(Envelope {
            identity: target.identity.clone(),
            invocation,
            reply_to: Some(tx),
        })?;

        let timeout = self.twoway_timeout();
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ScopesError::new(
                ErrorCode::Timeout,
                format!(
                    "twoway {op} to {target} timed out after {}ms",
                    timeout.as_millis()
                ),
            )),
            Err(RecvTimeoutError::Disconnected) => Err(ScopesError::new(
                ErrorCode::MiddlewareStopped,
                format!("twoway {op} to {target} was dropped without a reply"),
            )),
        }
    }

    fn oneway(&self, target: &ProxyAddr, invocation: Invocation) -> Result<(), ScopesError> {
        let endpoint = resolve_endpoint(&target.endpoint)?;
        endpoint.deliver(Envelope {
            identity: target.identity.clone(),
            invocation,
            reply_to: None,
        })
    }
}

fn directory() -> &'static Mutex<HashMap<String, Arc<dyn Endpoint>>> {
    static DIRECTORY: OnceLock<Mutex<HashMap<String, Arc<dyn Endpoint>>>> = OnceLock::new();
    DIRECTORY.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn bind_endpoint(endpoint: Arc<dyn Endpoint>) -> Result<(), ScopesError> {
    let mut entries = lock(directory());
    let address = endpoint.address().to_string();
    if entries.contains_key(&address) {
        return Err(ScopesError::new(
            ErrorCode::Transport,
            format!("endpoint address already in use: {address}"),
        ));
    }
    entries.insert(address, endpoint);
    Ok(())
}

pub(crate) fn unbind_endpoint(address: &str) -> Option<Arc<dyn Endpoint>> {
    lock(directory()).remove(address)
}

fn resolve_endpoint(address: &str) -> Result<Arc<dyn Endpoint>, ScopesError> {
    lock(directory()).get(address).cloned().ok_or_else(|| {
        ScopesError::new(
            ErrorCode::ObjectNotExist,
            format!("no endpoint bound at {address}"),
        )
    })
}

pub fn endpoint_address(endpoint_dir: &str, server_name: &str, kind: TransportKind) -> String {
    format!(
        "{}/{}:{}",
        endpoint_dir.trim_end_matches('/'),
        server_name,
        kind.as_tag()
    )
}
