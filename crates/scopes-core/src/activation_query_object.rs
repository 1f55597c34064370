use crate::completion::CompletionDetails;
use crate::error::ScopesError;
use crate::middleware::{Current, Servant};
use crate::protocol::{Invocation, Response};
use crate::provider::{invoke_provider, ActivationQueryBase};
use crate::proxy::MwReplyProxy;
use crate::query_object::QueryObject;
use crate::reply::ReplyImpl;
use std::sync::Arc;
use tracing::warn;

pub struct ActivationQueryObject {
    query: Arc<QueryObject>,
    activation: Arc<dyn ActivationQueryBase>,
}

impl ActivationQueryObject {
    pub fn new(query: Arc<QueryObject>, activation: Arc<dyn ActivationQueryBase>) -> Self {
        Self { query, activation }
    }

    pub fn query(&self) -> &Arc<QueryObject> {
        &self.query
    }

    pub fn run(&self, reply: MwReplyProxy) -> Result<(), ScopesError> {
        let Some(this) = self.query.begin_run(reply)? else {
            return Ok(());
        };
        let reply = ReplyImpl::new(this);

        let details = match invoke_provider(|| self.activation.activate()) {
            Ok(response) => match response.serialize() {
                Ok(payload) => {
                    reply.push(payload);
                    CompletionDetails::completed()
                }
                Err(err) => CompletionDetails::error(format!("activate(): {err}")),
            },
            Err(message) => {
                warn!(error = %message, "provider activate() failed");
                CompletionDetails::error(format!("activate(): {message}"))
            }
        };
        reply.finished(details);
        Ok(())
    }
}

impl Servant for ActivationQueryObject {
    fn dispatch(&self, invocation: Invocation, current: &Current) -> Result<Response, ScopesError> {
        match invocation {
            Invocation::Run { reply } => {
                self.run(current.middleware.create_reply_proxy(reply))?;
                Ok(Response::Done)
            }
            other => Err(ScopesError::logic(format!(
                "activation query does not handle {}()",
                other.op_name()
            ))),
        }
    }

    fn deactivate(&self) {
        self.query.abandon();
    }
}
