pub mod activation_query_object;
pub mod client;
pub mod completion;
pub mod config;
pub mod error;
pub mod middleware;
pub mod middleware_factory;
pub mod protocol;
pub mod provider;
pub mod proxy;
pub mod query;
pub mod query_ctrl;
pub mod query_object;
pub mod queue_transport;
pub mod registry;
pub mod reply;
pub mod runtime;
pub mod scope_object;
pub mod thread_transport;
pub mod transport;
mod util;
pub mod value;
