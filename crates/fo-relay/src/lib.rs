//! Fanout Relay
//!
//! Broadcasts one inbound HTTP request to every live instance of a service
//! and answers with a single selected response:
//! - Relay: one outbound call per endpoint (method, path and body verbatim)
//! - WorkerPool: per-request bounded set of workers
//! - Dispatcher: builds the jobs, collects every result, applies the selection policy
//! - API: catch-all relay router and management router (probes, metrics)

pub mod api;
pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod relay;
pub mod relay_metrics;
pub mod selection;

pub use api::{create_management_router, create_relay_router, ManagementApiDoc, RelayState};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, FanoutError, RelayError};
pub use pool::{WorkerPool, DEFAULT_POOL_SIZE};
pub use relay::{HttpRelay, HttpRelayConfig, Relay, RelayResponse};
pub use selection::select;
