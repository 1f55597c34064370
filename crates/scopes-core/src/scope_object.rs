use crate::activation_query_object::ActivationQueryObject;
use crate::error::{ErrorCode, ScopesError};
use crate::middleware::{Current, Servant};
use crate::protocol::{Invocation, ProxyAddr, Response};
use crate::provider::{invoke_provider, ScopeBase};
use crate::query_ctrl::QueryCtrlObject;
use crate::query_object::{QueryBody, QueryObject};
use std::sync::Arc;
use tracing::debug;

pub struct ScopeObject {
    scope_id: String,
    scope: Arc<dyn ScopeBase>,
}

impl ScopeObject {
    pub fn new(scope_id: impl Into<String>, scope: Arc<dyn ScopeBase>) -> Self {
        Self {
            scope_id: scope_id.into(),
            scope,
        }
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    fn start_query(
        &self,
        current: &Current,
        body: QueryBody,
        cardinality: u32,
        reply: ProxyAddr,
    ) -> Result<Response, ScopesError> {
        let mw = &current.middleware;
        let ctrl = Arc::new(QueryCtrlObject::new());
        let (ctrl_addr, ctrl_handle) = mw.add_anonymous_servant("ctrl", ctrl.clone())?;
        ctrl.attach(ctrl_handle);

        let activation = match &body {
            QueryBody::Activation(activation) => Some(Arc::clone(activation)),
            _ => None,
        };
        let query = Arc::new(QueryObject::new(
            body,
            cardinality,
            mw.create_query_control_proxy(ctrl_addr.clone()),
        ));
        ctrl.set_query(&query);
        query.set_reply_target(mw.create_reply_proxy(reply.clone()));
        query.set_self()?;

        let servant: Arc<dyn Servant> = match activation {
            Some(activation) => Arc::new(ActivationQueryObject::new(query.clone(), activation)),
            None => query.clone(),
        };
        let (query_addr, query_handle) = match mw.add_anonymous_servant("query", servant) {
            Ok(registered) => registered,
            Err(err) => {
                query.abandon();
                return Err(err);
            }
        };
        query.attach(query_handle);

        debug!(
            scope = %self.scope_id,
            query = %query_addr.identity,
            ctrl = %ctrl_addr.identity,
            "query created"
        );
        if let Err(err) = mw.create_query_proxy(query_addr).run(reply) {
            query.abandon();
            return Err(err);
        }
        Ok(Response::QueryCtrl { proxy: ctrl_addr })
    }

    fn provider_error(&self, op: &str, message: String) -> ScopesError {
        ScopesError::new(
            ErrorCode::Provider,
            format!("{}: {op}(): {message}", self.scope_id),
        )
    }
}

impl Servant for ScopeObject {
    fn dispatch(&self, invocation: Invocation, current: &Current) -> Result<Response, ScopesError> {
        let op = invocation.op_name();
        match invocation {
            Invocation::Search {
                query,
                metadata,
                reply,
            } => {
                let search = invoke_provider(|| self.scope.search(&query, &metadata))
                    .map_err(|message| self.provider_error(op, message))?;
                self.start_query(current, QueryBody::Search(search), metadata.cardinality, reply)
            }
            Invocation::Preview {
                result,
                metadata,
                reply,
            } => {
                let preview = invoke_provider(|| self.scope.preview(&result, &metadata))
                    .map_err(|message| self.provider_error(op, message))?;
                self.start_query(current, QueryBody::Preview(preview), 0, reply)
            }
            Invocation::Activate {
                result,
                metadata,
                reply,
            } => {
                let activation = invoke_provider(|| self.scope.activate(&result, &metadata))
                    .map_err(|message| self.provider_error(op, message))?;
                self.start_query(current, QueryBody::Activation(activation), 0, reply)
            }
            Invocation::PerformAction {
                result,
                metadata,
                widget_id,
                action_id,
                reply,
            } => {
                let activation = invoke_provider(|| {
                    self.scope
                        .perform_action(&result, &metadata, &widget_id, &action_id)
                })
                .map_err(|message| self.provider_error(op, message))?;
                self.start_query(current, QueryBody::Activation(activation), 0, reply)
            }
            Invocation::ActivateResultAction {
                result,
                metadata,
                action_id,
                reply,
            } => {
                let activation = invoke_provider(|| {
                    self.scope
                        .activate_result_action(&result, &metadata, &action_id)
                })
                .map_err(|message| self.provider_error(op, message))?;
                self.start_query(current, QueryBody::Activation(activation), 0, reply)
            }
            _ => Err(ScopesError::logic(format!(
                "scope {} does not handle {op}()",
                self.scope_id
            ))),
        }
    }
}
