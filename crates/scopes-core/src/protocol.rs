use crate::completion::CompletionDetails;
use crate::query::{ActionMetadata, CannedQuery, ScopeResult, SearchMetadata};
use crate::registry::{MetadataMap, ScopeMetadata};
use crate::value::VariantMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyAddr {
    pub endpoint: String,
    pub identity: String,
}

impl ProxyAddr {
    pub fn new(endpoint: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            identity: identity.into(),
        }
    }
}

impl std::fmt::Display for ProxyAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.identity, self.endpoint)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Adapter {
    Scope,
    Query,
    Ctrl,
    Reply,
}

impl Adapter {
    pub const ALL: [Adapter; 4] = [Self::Scope, Self::Query, Self::Ctrl, Self::Reply];

    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Scope => "scope",
            Self::Query => "query",
            Self::Ctrl => "ctrl",
            Self::Reply => "reply",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallMode {
    Twoway,
    Oneway,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Invocation {
    Search {
        query: CannedQuery,
        metadata: SearchMetadata,
        reply: ProxyAddr,
    },
    Preview {
        result: ScopeResult,
        metadata: ActionMetadata,
        reply: ProxyAddr,
    },
    Activate {
        result: ScopeResult,
        metadata: ActionMetadata,
        reply: ProxyAddr,
    },
    PerformAction {
        result: ScopeResult,
        metadata: ActionMetadata,
        widget_id: String,
        action_id: String,
        reply: ProxyAddr,
    },
    ActivateResultAction {
        result: ScopeResult,
        metadata: ActionMetadata,
        action_id: String,
        reply: ProxyAddr,
    },
    Run {
        reply: ProxyAddr,
    },
    Cancel,
    Destroy,
    Push {
        payload: VariantMap,
    },
    Finished {
        details: CompletionDetails,
        /// Number of pushes sent before this completion.
        #[serde(default)]
        pushed: u64,
    },
    GetMetadata {
        scope_id: String,
    },
    List,
    Locate {
        scope_id: String,
    },
}

impl Invocation {
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Search { .. } => "search",
            Self::Preview { .. } => "preview",
            Self::Activate { .. } => "activate",
            Self::PerformAction { .. } => "perform_action",
            Self::ActivateResultAction { .. } => "activate_result_action",
            Self::Run { .. } => "run",
            Self::Cancel => "cancel",
            Self::Destroy => "destroy",
            Self::Push { .. } => "push",
            Self::Finished { .. } => "finished",
            Self::GetMetadata { .. } => "get_metadata",
            Self::List => "list",
            Self::Locate { .. } => "locate",
        }
    }

    pub fn adapter(&self) -> Adapter {
        match self {
            Self::Search { .. }
            | Self::Preview { .. }
            | Self::Activate { .. }
            | Self::PerformAction { .. }
            | Self::ActivateResultAction { .. }
            | Self::GetMetadata { .. }
            | Self::List
            | Self::Locate { .. } => Adapter::Scope,
            Self::Run { .. } => Adapter::Query,
            Self::Cancel | Self::Destroy => Adapter::Ctrl,
            Self::Push { .. } | Self::Finished { .. } => Adapter::Reply,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Done,
    QueryCtrl { proxy: ProxyAddr },
    Metadata { metadata: ScopeMetadata },
    MetadataMap { entries: MetadataMap },
    Scope { proxy: ProxyAddr },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_uses_op_tag() {
        let message = Invocation::Run {
            reply: ProxyAddr::new("/tmp/ep/client:queue", "reply-1"),
        };
        let json = serde_json::to_string(&message).expect("serialize run");
        assert!(json.starts_with(r#"{"op":"run""#));

        let parsed: Invocation = serde_json::from_str(&json).expect("deserialize run");
        assert_eq!(parsed, message);
    }

    #[test]
    fn unit_invocations_parse_from_bare_tag() {
        let parsed: Invocation =
            serde_json::from_str(r#"{"op":"cancel"}"#).expect("deserialize cancel");
        assert_eq!(parsed, Invocation::Cancel);
        assert_eq!(parsed.adapter(), Adapter::Ctrl);
    }

    #[test]
    fn run_and_cancel_never_share_an_adapter() {
        let run = Invocation::Run {
            reply: ProxyAddr::new("ep", "r"),
        };
        assert_eq!(run.adapter(), Adapter::Query);
        assert_ne!(run.adapter(), Invocation::Cancel.adapter());
        assert_eq!(
            Invocation::Finished {
                details: CompletionDetails::completed(),
                pushed: 0,
            }
            .adapter(),
            Adapter::Reply
        );
        assert_eq!(Invocation::List.adapter(), Adapter::Scope);
    }

    #[test]
    fn search_message_fills_metadata_defaults() {
        let json = r#"{"op":"search","query":{"scope_id":"weather","query_string":"rain"},"metadata":{},"reply":{"endpoint":"ep","identity":"r"}}"#;
        match serde_json::from_str::<Invocation>(json).expect("deserialize search") {
            Invocation::Search {
                query, metadata, ..
            } => {
                assert_eq!(query.query_string, "rain");
                assert!(query.department_id.is_empty());
                assert_eq!(metadata.cardinality, 0);
            }
            _ => panic!("unexpected message kind"),
        }
    }
}
