use crate::completion::CompletionDetails;
use crate::query::ScopeResult;
use crate::query_object::QueryObject;
use crate::value::VariantMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::warn;

pub(crate) const RESULT_KEY: &str = "result";
pub(crate) const WIDGETS_KEY: &str = "widgets";
pub(crate) const ATTRIBUTES_KEY: &str = "attributes";

/// Server-side reply handle. Owns its query; dropping the last handle
/// finishes the query with `Completed` unless something finished it first.
pub(crate) struct ReplyImpl {
    query: Arc<QueryObject>,
}

impl ReplyImpl {
    pub(crate) fn new(query: Arc<QueryObject>) -> Self {
        Self { query }
    }

    pub(crate) fn push(&self, payload: VariantMap) -> bool {
        self.query.push(payload)
    }

    pub(crate) fn pushable(&self) -> bool {
        self.query.pushable()
    }

    pub(crate) fn finished(&self, details: CompletionDetails) -> bool {
        self.query.complete(details)
    }
}

impl Drop for ReplyImpl {
    fn drop(&mut self) {
        self.query.complete(CompletionDetails::completed());
    }
}

pub type SearchReplyProxy = Arc<SearchReply>;
pub type PreviewReplyProxy = Arc<PreviewReply>;

pub struct SearchReply {
    base: ReplyImpl,
    cardinality: u32,
    pushed: AtomicU32,
}

impl SearchReply {
    pub(crate) fn new(base: ReplyImpl, cardinality: u32) -> Self {
        Self {
            base,
            cardinality,
            pushed: AtomicU32::new(0),
        }
    }

    pub fn push(&self, result: &ScopeResult) -> bool {
        if !self.base.pushable() {
            return false;
        }
        let count = self.pushed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.cardinality != 0 && count > self.cardinality {
            return false;
        }

        let serialized = match result.serialize() {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!(uri = %result.uri, error = %err, "dropping unserializable result");
                return false;
            }
        };
        let mut payload = VariantMap::new();
        payload.insert(
            RESULT_KEY.to_string(),
            serde_json::Value::Object(serialized.into_iter().collect()),
        );
        let sent = self.base.push(payload);
        if self.cardinality != 0 && count == self.cardinality {
            self.base.finished(CompletionDetails::completed());
        }
        sent
    }

    pub fn pushable(&self) -> bool {
        self.base.pushable()
    }

    pub fn cardinality(&self) -> u32 {
        self.cardinality
    }

    pub fn finished(&self) -> bool {
        self.base.finished(CompletionDetails::completed())
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.base.finished(CompletionDetails::error(message))
    }
}

pub struct PreviewReply {
    base: ReplyImpl,
}

impl PreviewReply {
    pub(crate) fn new(base: ReplyImpl) -> Self {
        Self { base }
    }

    pub fn push_widgets(&self, widgets: &[VariantMap]) -> bool {
        let list = widgets
            .iter()
            .map(|widget| serde_json::Value::Object(widget.clone().into_iter().collect()))
            .collect();
        let mut payload = VariantMap::new();
        payload.insert(WIDGETS_KEY.to_string(), serde_json::Value::Array(list));
        self.base.push(payload)
    }

    pub fn push_attribute(&self, key: &str, value: serde_json::Value) -> bool {
        let mut attributes = serde_json::Map::new();
        attributes.insert(key.to_string(), value);
        let mut payload = VariantMap::new();
        payload.insert(
            ATTRIBUTES_KEY.to_string(),
            serde_json::Value::Object(attributes),
        );
        self.base.push(payload)
    }

    pub fn pushable(&self) -> bool {
        self.base.pushable()
    }

    pub fn finished(&self) -> bool {
        self.base.finished(CompletionDetails::completed())
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.base.finished(CompletionDetails::error(message))
    }
}
