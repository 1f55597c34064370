use crate::error::ScopesError;
use crate::middleware::{Current, Servant, ServantHandle};
use crate::protocol::{Invocation, Response};
use crate::query_object::QueryObject;
use crate::util::lock;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

#[derive(Default)]
pub struct QueryCtrlObject {
    query: Mutex<Weak<QueryObject>>,
    servant: Mutex<Option<ServantHandle>>,
}

impl QueryCtrlObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_query(&self, query: &Arc<QueryObject>) {
        *lock(&self.query) = Arc::downgrade(query);
    }

    pub fn attach(&self, handle: ServantHandle) {
        *lock(&self.servant) = Some(handle);
    }

    pub fn cancel(&self) {
        let query = lock(&self.query).upgrade();
        match query {
            Some(query) => query.cancel(),
            None => debug!("cancel() after query was released"),
        }
    }

    pub fn destroy(&self) {
        let handle = lock(&self.servant).take();
        if let Some(handle) = handle {
            handle.disconnect();
        }
    }
}

impl Servant for QueryCtrlObject {
    fn dispatch(&self, invocation: Invocation, _current: &Current) -> Result<Response, ScopesError> {
        match invocation {
            Invocation::Cancel => self.cancel(),
            Invocation::Destroy => self.destroy(),
            other => {
                return Err(ScopesError::logic(format!(
                    "query control does not handle {}()",
                    other.op_name()
                )))
            }
        }
        Ok(Response::Done)
    }
}
