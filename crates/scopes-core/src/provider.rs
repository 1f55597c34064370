use crate::query::{ActionMetadata, ActivationResponse, CannedQuery, ScopeResult, SearchMetadata};
use crate::reply::{PreviewReplyProxy, SearchReplyProxy};
use crate::util::panic_message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub trait QueryBase: Send + Sync {
    /// Invoked at most once, from the cancellation pool, possibly while `run` is
    /// still executing on another thread.
    fn cancelled(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub trait SearchQueryBase: QueryBase {
    fn run(&self, reply: SearchReplyProxy) -> anyhow::Result<()>;
}

pub trait PreviewQueryBase: QueryBase {
    fn run(&self, reply: PreviewReplyProxy) -> anyhow::Result<()>;
}

pub trait ActivationQueryBase: QueryBase {
    fn activate(&self) -> anyhow::Result<ActivationResponse>;
}

pub struct NotHandledActivation;

impl QueryBase for NotHandledActivation {}

impl ActivationQueryBase for NotHandledActivation {
    fn activate(&self) -> anyhow::Result<ActivationResponse> {
        Ok(ActivationResponse::not_handled())
    }
}

pub trait ScopeBase: Send + Sync {
    fn start(&self, _scope_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self) {}

    fn search(
        &self,
        query: &CannedQuery,
        metadata: &SearchMetadata,
    ) -> anyhow::Result<Arc<dyn SearchQueryBase>>;

    fn preview(
        &self,
        result: &ScopeResult,
        metadata: &ActionMetadata,
    ) -> anyhow::Result<Arc<dyn PreviewQueryBase>>;

    fn activate(
        &self,
        _result: &ScopeResult,
        _metadata: &ActionMetadata,
    ) -> anyhow::Result<Arc<dyn ActivationQueryBase>> {
        Ok(Arc::new(NotHandledActivation))
    }

    fn perform_action(
        &self,
        _result: &ScopeResult,
        _metadata: &ActionMetadata,
        _widget_id: &str,
        _action_id: &str,
    ) -> anyhow::Result<Arc<dyn ActivationQueryBase>> {
        Ok(Arc::new(NotHandledActivation))
    }

    fn activate_result_action(
        &self,
        _result: &ScopeResult,
        _metadata: &ActionMetadata,
        _action_id: &str,
    ) -> anyhow::Result<Arc<dyn ActivationQueryBase>> {
        Ok(Arc::new(NotHandledActivation))
    }
}

pub(crate) fn invoke_provider<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn invoke_provider_flattens_error_chain() {
        let err = invoke_provider(|| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("boom")).context("fetch forecast")
        })
        .expect_err("error is reported");
        assert_eq!(err, "fetch forecast: boom");
    }

    #[test]
    fn invoke_provider_catches_panics() {
        let err = invoke_provider(|| -> anyhow::Result<()> { panic!("provider bug") })
            .expect_err("panic is reported");
        assert_eq!(err, "provider bug");
        assert_eq!(invoke_provider(|| Ok(7)), Ok(7));
    }

    #[test]
    fn default_activation_is_not_handled() {
        let response = NotHandledActivation.activate().expect("activate");
        assert_eq!(response, ActivationResponse::not_handled());
        assert!(NotHandledActivation.cancelled().is_ok());
    }
}
