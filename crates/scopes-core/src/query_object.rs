use crate::completion::{CompletionDetails, CompletionStatus};
use crate::error::ScopesError;
use crate::middleware::{Current, Servant, ServantHandle};
use crate::protocol::{Invocation, Response};
use crate::provider::{invoke_provider, ActivationQueryBase, PreviewQueryBase, SearchQueryBase};
use crate::proxy::{MwQueryCtrlProxy, MwReplyProxy};
use crate::reply::{PreviewReply, ReplyImpl, SearchReply};
use crate::util::lock;
use crate::value::VariantMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub enum QueryBody {
    Search(Arc<dyn SearchQueryBase>),
    Preview(Arc<dyn PreviewQueryBase>),
    Activation(Arc<dyn ActivationQueryBase>),
}

impl QueryBody {
    fn kind(&self) -> &'static str {
        match self {
            Self::Search(_) => "search",
            Self::Preview(_) => "preview",
            Self::Activation(_) => "activation",
        }
    }

    fn cancelled(&self) -> anyhow::Result<()> {
        match self {
            Self::Search(query) => query.cancelled(),
            Self::Preview(query) => query.cancelled(),
            Self::Activation(query) => query.cancelled(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryState {
    Created,
    Running,
    CompletedOk,
    CompletedError,
    CompletedCancelled,
}

impl QueryState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created | Self::Running)
    }

    fn from_completion(status: CompletionStatus) -> Self {
        match status {
            CompletionStatus::Completed => Self::CompletedOk,
            CompletionStatus::Error => Self::CompletedError,
            CompletionStatus::Cancelled => Self::CompletedCancelled,
        }
    }
}

struct QueryInner {
    state: QueryState,
    pushable: bool,
    pushed: u64,
    cardinality: u32,
    self_ref: Option<Arc<QueryObject>>,
    servant: Option<ServantHandle>,
    reply: Option<MwReplyProxy>,
    reply_target: Option<MwReplyProxy>,
}

/// Coordinates one in-flight query between the run path and the cancel path.
///
/// Both paths test-and-set `pushable` under the same lock before doing anything
/// externally visible, so exactly one terminal status is sent. The lock is never
/// held while provider code runs.
pub struct QueryObject {
    body: QueryBody,
    ctrl: MwQueryCtrlProxy,
    inner: Mutex<QueryInner>,
}

impl QueryObject {
    pub fn new(body: QueryBody, cardinality: u32, ctrl: MwQueryCtrlProxy) -> Self {
        Self {
            body,
            ctrl,
            inner: Mutex::new(QueryInner {
                state: QueryState::Created,
                pushable: true,
                pushed: 0,
                cardinality,
                self_ref: None,
                servant: None,
                reply: None,
                reply_target: None,
            }),
        }
    }

    pub fn set_self(self: &Arc<Self>) -> Result<(), ScopesError> {
        let mut inner = lock(&self.inner);
        if inner.self_ref.is_some() {
            return Err(ScopesError::logic("set_self() called twice on one query"));
        }
        inner.self_ref = Some(Arc::clone(self));
        Ok(())
    }

    pub fn attach(&self, handle: ServantHandle) {
        lock(&self.inner).servant = Some(handle);
    }

    pub fn set_reply_target(&self, reply: MwReplyProxy) {
        lock(&self.inner).reply_target = Some(reply);
    }

    pub(crate) fn abandon(&self) {
        let (self_ref, servant, target) = {
            let mut inner = lock(&self.inner);
            let Some(self_ref) = inner.self_ref.take() else {
                return;
            };
            let target = if inner.pushable {
                inner.pushable = false;
                inner.state = QueryState::CompletedError;
                inner.reply_target.take()
            } else {
                None
            };
            (self_ref, inner.servant.take(), target)
        };
        if let Some(servant) = servant {
            servant.disconnect();
        }
        if let Some(target) = target {
            target.finished(CompletionDetails::error("query abandoned before run"), 0);
        }
        debug!(query = self.body.kind(), "query abandoned before run");
        drop(self_ref);
    }

    pub(crate) fn begin_run(
        &self,
        reply: MwReplyProxy,
    ) -> Result<Option<Arc<QueryObject>>, ScopesError> {
        let (self_ref, servant, pushable) = {
            let mut inner = lock(&self.inner);
            let self_ref = inner.self_ref.take();
            let servant = inner.servant.take();
            inner.reply_target = None;
            if inner.pushable && self_ref.is_some() {
                inner.reply = Some(reply);
                inner.state = QueryState::Running;
            }
            (self_ref, servant, inner.pushable)
        };
        if let Some(servant) = servant {
            servant.disconnect();
        }

        if !pushable {
            debug!(query = self.body.kind(), "run() skipped, query already cancelled");
            return Ok(None);
        }
        match self_ref {
            Some(this) => Ok(Some(this)),
            None => Err(ScopesError::logic(
                "run() on a query without a self reference",
            )),
        }
    }

    pub fn run(&self, reply: MwReplyProxy) -> Result<(), ScopesError> {
        if let QueryBody::Activation(_) = self.body {
            return Err(ScopesError::logic(
                "activation queries run through ActivationQueryObject",
            ));
        }
        let Some(this) = self.begin_run(reply)? else {
            return Ok(());
        };

        let reply = ReplyImpl::new(this);
        let outcome = match &self.body {
            QueryBody::Search(query) => {
                let proxy = Arc::new(SearchReply::new(reply, self.cardinality()));
                // Held across the call so a failing run reports after an early drop.
                let guard = Arc::clone(&proxy);
                let outcome = invoke_provider(|| query.run(proxy));
                if let Err(message) = &outcome {
                    guard.error(format!("run(): {message}"));
                }
                outcome
            }
            QueryBody::Preview(query) => {
                let proxy = Arc::new(PreviewReply::new(reply));
                let guard = Arc::clone(&proxy);
                let outcome = invoke_provider(|| query.run(proxy));
                if let Err(message) = &outcome {
                    guard.error(format!("run(): {message}"));
                }
                outcome
            }
            QueryBody::Activation(_) => Ok(()),
        };
        if let Err(message) = outcome {
            warn!(query = self.body.kind(), error = %message, "provider run() failed");
        }
        Ok(())
    }

    pub fn cancel(&self) {
        let (reply, pushed) = {
            let mut inner = lock(&self.inner);
            if !inner.pushable {
                return;
            }
            inner.pushable = false;
            inner.state = QueryState::CompletedCancelled;
            (inner.reply.clone(), inner.pushed)
        };

        if let Err(message) = invoke_provider(|| self.body.cancelled()) {
            warn!(query = self.body.kind(), error = %message, "provider cancelled() failed");
        }
        if let Some(reply) = reply {
            reply.finished(CompletionDetails::cancelled(), pushed);
        }
    }

    pub fn complete(&self, details: CompletionDetails) -> bool {
        let (reply, pushed) = {
            let mut inner = lock(&self.inner);
            if !inner.pushable {
                return false;
            }
            inner.pushable = false;
            inner.state = QueryState::from_completion(details.status);
            (inner.reply.clone(), inner.pushed)
        };
        if let Some(reply) = reply {
            reply.finished(details, pushed);
        }
        true
    }

    pub(crate) fn push(&self, payload: VariantMap) -> bool {
        let reply = {
            let mut inner = lock(&self.inner);
            if !inner.pushable {
                return false;
            }
            let Some(reply) = inner.reply.clone() else {
                return false;
            };
            inner.pushed += 1;
            reply
        };
        // Sent outside the lock. A completion that overtakes this push still
        // counts it, and the caller holds the completion until it arrives.
        reply.push(payload);
        true
    }

    pub fn pushable(&self) -> bool {
        lock(&self.inner).pushable
    }

    pub fn cardinality(&self) -> u32 {
        lock(&self.inner).cardinality
    }

    pub fn state(&self) -> QueryState {
        lock(&self.inner).state
    }
}

impl Servant for QueryObject {
    fn dispatch(&self, invocation: Invocation, current: &Current) -> Result<Response, ScopesError> {
        match invocation {
            Invocation::Run { reply } => {
                self.run(current.middleware.create_reply_proxy(reply))?;
                Ok(Response::Done)
            }
            other => Err(ScopesError::logic(format!(
                "query object does not handle {}()",
                other.op_name()
            ))),
        }
    }

    fn deactivate(&self) {
        self.abandon();
    }
}

impl Drop for QueryObject {
    fn drop(&mut self) {
        self.ctrl.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MiddlewareConfig;
    use crate::middleware::Middleware;
    use crate::provider::QueryBase;
    use crate::queue_transport::QueueTransport;
    use crate::reply::SearchReplyProxy;
    use crossbeam_channel::{Receiver, Sender};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingQuery {
        runs: AtomicUsize,
        cancels: AtomicUsize,
        fail_cancel: bool,
    }

    impl QueryBase for CountingQuery {
        fn cancelled(&self) -> anyhow::Result<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            if self.fail_cancel {
                anyhow::bail!("cancel hook broke");
            }
            Ok(())
        }
    }

    impl SearchQueryBase for CountingQuery {
        fn run(&self, reply: SearchReplyProxy) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            reply.push(&crate::query::ScopeResult::new("uri:a", "a"));
            Ok(())
        }
    }

    struct Sink {
        events: Sender<Invocation>,
    }

    impl Servant for Sink {
        fn dispatch(
            &self,
            invocation: Invocation,
            _current: &Current,
        ) -> Result<Response, ScopesError> {
            let _ = self.events.send(invocation);
            Ok(Response::Done)
        }
    }

    struct TaggedSink {
        events: Sender<(String, Invocation)>,
    }

    impl Servant for TaggedSink {
        fn dispatch(
            &self,
            invocation: Invocation,
            current: &Current,
        ) -> Result<Response, ScopesError> {
            let _ = self.events.send((current.identity.clone(), invocation));
            Ok(Response::Done)
        }
    }

    struct Fixture {
        mw: Middleware,
        reply: MwReplyProxy,
        ctrl: MwQueryCtrlProxy,
        reply_events: Receiver<Invocation>,
        ctrl_events: Receiver<Invocation>,
        _handles: Vec<ServantHandle>,
    }

    fn fixture(name: &str) -> Fixture {
        let dir = format!("/tmp/scopes-query-test-{}", std::process::id());
        let mw = Middleware::new(
            name,
            Arc::new(QueueTransport::new(MiddlewareConfig::default())),
            &dir,
        )
        .expect("create middleware");
        let (reply_tx, reply_events) = crossbeam_channel::unbounded();
        let (ctrl_tx, ctrl_events) = crossbeam_channel::unbounded();
        let (reply_addr, reply_handle) = mw
            .add_servant("reply", Arc::new(Sink { events: reply_tx }))
            .expect("add reply sink");
        let (ctrl_addr, ctrl_handle) = mw
            .add_servant("ctrl", Arc::new(Sink { events: ctrl_tx }))
            .expect("add ctrl sink");
        Fixture {
            reply: mw.create_reply_proxy(reply_addr),
            ctrl: mw.create_query_control_proxy(ctrl_addr),
            mw,
            reply_events,
            ctrl_events,
            _handles: vec![reply_handle, ctrl_handle],
        }
    }

    fn next(events: &Receiver<Invocation>) -> Invocation {
        events
            .recv_timeout(Duration::from_secs(2))
            .expect("event arrives")
    }

    #[test]
    fn set_self_twice_is_a_logic_error() {
        let fx = fixture("set_self");
        let provider = Arc::new(CountingQuery::default());
        let query = Arc::new(QueryObject::new(
            QueryBody::Search(provider),
            0,
            fx.ctrl.clone(),
        ));
        query.set_self().expect("first set_self");
        assert!(query.set_self().is_err());
        query.abandon();
        drop(query);
        assert_eq!(next(&fx.ctrl_events), Invocation::Destroy);
        fx.mw.stop();
    }

    #[test]
    fn cancel_before_run_skips_provider() {
        let fx = fixture("cancel_first");
        let provider = Arc::new(CountingQuery::default());
        let query = Arc::new(QueryObject::new(
            QueryBody::Search(provider.clone()),
            0,
            fx.ctrl.clone(),
        ));
        query.set_self().expect("set_self");

        query.cancel();
        query.cancel();
        query.run(fx.reply.clone()).expect("run after cancel");

        assert_eq!(provider.runs.load(Ordering::SeqCst), 0);
        assert_eq!(provider.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(query.state(), QueryState::CompletedCancelled);
        drop(query);
        assert_eq!(next(&fx.ctrl_events), Invocation::Destroy);
        assert!(fx
            .reply_events
            .recv_timeout(Duration::from_millis(100))
            .is_err());
        fx.mw.stop();
    }

    #[test]
    fn natural_completion_then_cancel_is_a_no_op() {
        let fx = fixture("run_first");
        let provider = Arc::new(CountingQuery {
            fail_cancel: true,
            ..CountingQuery::default()
        });
        let query = Arc::new(QueryObject::new(
            QueryBody::Search(provider.clone()),
            0,
            fx.ctrl.clone(),
        ));
        query.set_self().expect("set_self");
        query.run(fx.reply.clone()).expect("run");

        assert!(matches!(next(&fx.reply_events), Invocation::Push { .. }));
        assert_eq!(
            next(&fx.reply_events),
            Invocation::Finished {
                details: CompletionDetails::completed(),
                pushed: 1,
            }
        );
        assert_eq!(query.state(), QueryState::CompletedOk);

        query.cancel();
        assert_eq!(provider.cancels.load(Ordering::SeqCst), 0);
        assert!(fx
            .reply_events
            .recv_timeout(Duration::from_millis(100))
            .is_err());
        fx.mw.stop();
    }

    #[test]
    fn failing_cancel_hook_still_sends_cancelled() {
        let fx = fixture("cancel_hook");
        let provider = Arc::new(CountingQuery {
            fail_cancel: true,
            ..CountingQuery::default()
        });
        let query = Arc::new(QueryObject::new(
            QueryBody::Search(provider.clone()),
            0,
            fx.ctrl.clone(),
        ));
        query.set_self().expect("set_self");
        let owner = query
            .begin_run(fx.reply.clone())
            .expect("begin_run")
            .expect("query still pushable");
        assert_eq!(query.state(), QueryState::Running);

        query.cancel();
        assert_eq!(provider.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(
            next(&fx.reply_events),
            Invocation::Finished {
                details: CompletionDetails::cancelled(),
                pushed: 0,
            }
        );
        assert!(!query.complete(CompletionDetails::completed()));
        assert!(!query.push(VariantMap::new()));
        drop(owner);
        fx.mw.stop();
    }

    #[test]
    fn run_twice_reports_missing_self_reference() {
        let fx = fixture("run_twice");
        let provider = Arc::new(CountingQuery::default());
        let query = Arc::new(QueryObject::new(
            QueryBody::Search(provider.clone()),
            0,
            fx.ctrl.clone(),
        ));
        query.set_self().expect("set_self");
        let owner = query.begin_run(fx.reply.clone()).expect("first begin_run");
        assert!(owner.is_some());

        let err = query
            .begin_run(fx.reply.clone())
            .err()
            .expect("second run has no self reference");
        assert!(err.detail.contains("self reference"));
        drop(owner);
        fx.mw.stop();
    }

    #[test]
    fn stopping_middleware_releases_undispatched_query() {
        let fx = fixture("undispatched");
        let server = Middleware::new(
            "undispatched_server",
            Arc::new(QueueTransport::new(MiddlewareConfig::default())),
            &format!("/tmp/scopes-query-test-{}", std::process::id()),
        )
        .expect("create server middleware");
        let provider = Arc::new(CountingQuery::default());
        let query = Arc::new(QueryObject::new(
            QueryBody::Search(provider.clone()),
            0,
            fx.ctrl.clone(),
        ));
        query.set_reply_target(fx.reply.clone());
        query.set_self().expect("set_self");
        let (_addr, handle) = server
            .add_anonymous_servant("query", query.clone())
            .expect("register query");
        query.attach(handle);
        let weak = Arc::downgrade(&query);
        drop(query);

        server.stop();
        assert!(weak.upgrade().is_none(), "query outlived its middleware");
        assert_eq!(next(&fx.ctrl_events), Invocation::Destroy);
        match next(&fx.reply_events) {
            Invocation::Finished { details, pushed } => {
                assert_eq!(details.status, CompletionStatus::Error);
                assert_eq!(pushed, 0);
            }
            other => panic!("unexpected reply event: {other:?}"),
        }
        assert_eq!(provider.runs.load(Ordering::SeqCst), 0);
        fx.mw.stop();
    }

    #[test]
    fn abandon_after_run_started_is_a_no_op() {
        let fx = fixture("abandon_running");
        let provider = Arc::new(CountingQuery::default());
        let query = Arc::new(QueryObject::new(
            QueryBody::Search(provider),
            0,
            fx.ctrl.clone(),
        ));
        query.set_reply_target(fx.reply.clone());
        query.set_self().expect("set_self");
        let owner = query
            .begin_run(fx.reply.clone())
            .expect("begin_run")
            .expect("query still pushable");

        query.abandon();
        assert!(query.pushable());
        assert_eq!(query.state(), QueryState::Running);
        drop(owner);
        fx.mw.stop();
    }

    #[test]
    fn run_and_cancel_send_at_most_one_completion() {
        let fx = fixture("race");
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut handles = Vec::new();
        let mut outcomes = Vec::new();

        for ix in 0..120 {
            let (reply_addr, handle) = fx
                .mw
                .add_anonymous_servant("race-reply", Arc::new(TaggedSink { events: tx.clone() }))
                .expect("add reply sink");
            handles.push(handle);
            let provider = Arc::new(CountingQuery::default());
            let query = Arc::new(QueryObject::new(
                QueryBody::Search(provider.clone()),
                0,
                fx.ctrl.clone(),
            ));
            query.set_self().expect("set_self");
            let reply = fx.mw.create_reply_proxy(reply_addr.clone());

            match ix % 3 {
                0 => {
                    query.cancel();
                    query.run(reply).expect("run after cancel");
                }
                1 => {
                    query.run(reply).expect("run");
                    query.cancel();
                }
                _ => {
                    let barrier = Arc::new(Barrier::new(2));
                    let runner = {
                        let query = Arc::clone(&query);
                        let barrier = Arc::clone(&barrier);
                        thread::spawn(move || {
                            barrier.wait();
                            query.run(reply)
                        })
                    };
                    barrier.wait();
                    query.cancel();
                    runner.join().expect("join runner").expect("racing run");
                }
            }
            outcomes.push((ix, reply_addr.identity, provider.runs.load(Ordering::SeqCst)));
        }

        let mut finished: HashMap<String, usize> = HashMap::new();
        while let Ok((identity, invocation)) = rx.recv_timeout(Duration::from_millis(300)) {
            if matches!(invocation, Invocation::Finished { .. }) {
                *finished.entry(identity).or_default() += 1;
            }
        }
        for (ix, identity, runs) in outcomes {
            let count = finished.get(&identity).copied().unwrap_or(0);
            assert!(count <= 1, "iteration {ix} finished {count} times");
            if runs == 1 {
                assert_eq!(count, 1, "iteration {ix} ran without a completion");
            }
            match ix % 3 {
                0 => assert_eq!(runs, 0, "cancel-first iteration {ix} reached the provider"),
                1 => assert_eq!(runs, 1, "run-first iteration {ix} skipped the provider"),
                _ => {}
            }
        }
        fx.mw.stop();
    }
}
