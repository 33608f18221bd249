//! Request admission and dispatch core for inference API clients.
//!
//! Every resource client (chat, completion, embedding, and friends) funnels
//! its outbound traffic through this crate: a queries-per-second
//! [`RateLimiter`], a rolling tokens-per-minute [`TokenBudgetLimiter`], a
//! [`RetryExecutor`] that refreshes expired credentials and retries
//! transient failures, and a batch dispatcher that fans independent
//! requests across a bounded worker pool or a set of concurrent tasks.
//!
//! Both blocking (threaded) and cooperative (tokio) callers are supported
//! side by side with the same observable contracts; the two fronts of each
//! component share a single state machine and differ only in their suspend
//! primitive. The network transport itself is injected through the
//! [`Transport`]/[`BlockingTransport`] seams -- this crate never interprets
//! payloads and never persists state.
//!
//! ```no_run
//! use inflight::{BatchOptions, DispatchConfig, DispatchResult, Dispatcher,
//!                RequestContext, Transport};
//!
//! struct EchoTransport;
//!
//! #[async_trait::async_trait]
//! impl Transport for EchoTransport {
//!     type Request = String;
//!     type Response = String;
//!
//!     async fn call(&self, request: &String, _ctx: &RequestContext) -> DispatchResult<String> {
//!         Ok(request.clone())
//!     }
//! }
//!
//! # async fn run() -> DispatchResult<()> {
//! let config = DispatchConfig::default()
//!     .with_query_per_second(10.0)
//!     .with_max_attempts(3);
//! let dispatcher = Dispatcher::new(EchoTransport, &config)?;
//!
//! let response = dispatcher.attempt("hello".to_string()).await?;
//!
//! let handle = dispatcher.batch(
//!     (0..10).map(|i| format!("item {i}")).collect(),
//!     BatchOptions::new(4),
//! );
//! let results = handle.results().await;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod budget;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod retry;

// Re-export commonly used types
pub use batch::{BatchHandle, BatchOptions, BatchState, BlockingBatchHandle};
pub use budget::TokenBudgetLimiter;
pub use config::DispatchConfig;
pub use dispatch::{BlockingDispatcher, BlockingTransport, Dispatcher, Transport};
pub use error::{DispatchError, DispatchResult};
pub use limiter::RateLimiter;
pub use middleware::{HeaderStamp, Middleware, MiddlewareChain, RequestContext};
pub use retry::{
    BlockingCredentialSource, CredentialSource, ErrorClass, RetryExecutor, RetryPolicy,
};
