//! The two call shapes exposed to resource clients: `attempt` (one request)
//! and `batch` (many independent requests).
//!
//! A dispatcher composes, per request: RateLimiter admission -> token budget
//! debit (when an estimate is supplied and a budget is configured) ->
//! middleware preparation -> retry-executed transport call. The limiters are
//! shared between the single-item path and every batch item, so batches
//! draw from the same admission state as everything else on the client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::batch::{self, BatchHandle, BatchOptions, BlockingBatchHandle};
use crate::budget::TokenBudgetLimiter;
use crate::config::DispatchConfig;
use crate::error::DispatchResult;
use crate::limiter::RateLimiter;
use crate::middleware::{Middleware, MiddlewareChain, RequestContext};
use crate::retry::{BlockingCredentialSource, CredentialSource, RetryExecutor};

/// The injected network transport, cooperative form.
///
/// The core never interprets payloads; `Request` and `Response` are opaque
/// to it.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Request: Send + Sync + 'static;
    type Response: Send + Clone + 'static;

    /// Perform one attempt. Transient failures should surface as
    /// [`crate::error::DispatchError::Transport`] or a `Service` error with
    /// a retryable code.
    async fn call(
        &self,
        request: &Self::Request,
        context: &RequestContext,
    ) -> DispatchResult<Self::Response>;
}

/// The injected network transport, blocking form.
///
/// Expected to enforce its own per-call deadline and surface
/// [`crate::error::DispatchError::Timeout`] when it trips.
pub trait BlockingTransport: Send + Sync + 'static {
    type Request: Send + Sync + 'static;
    type Response: Send + Clone + 'static;

    fn call(
        &self,
        request: &Self::Request,
        context: &RequestContext,
    ) -> DispatchResult<Self::Response>;
}

/// Cooperative-mode request dispatcher.
///
/// Cloning is cheap and shares all admission state: clones coordinate rate
/// limiting, token budgeting, and retry policy together.
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    rate: Arc<RateLimiter>,
    budget: Option<Arc<TokenBudgetLimiter>>,
    retry: RetryExecutor,
    middleware: Arc<MiddlewareChain>,
    credentials: Option<Arc<dyn CredentialSource>>,
}

impl<T: Transport> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            rate: self.rate.clone(),
            budget: self.budget.clone(),
            retry: self.retry.clone(),
            middleware: self.middleware.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

impl<T: Transport> Dispatcher<T> {
    /// Build a dispatcher around `transport` from a validated config.
    pub fn new(transport: T, config: &DispatchConfig) -> DispatchResult<Self> {
        config.validate()?;
        let budget = if config.tokens_per_minute > 0 {
            Some(Arc::new(TokenBudgetLimiter::new(config.tokens_per_minute)?))
        } else {
            None
        };
        Ok(Self {
            transport: Arc::new(transport),
            rate: Arc::new(RateLimiter::new(config.query_per_second)),
            budget,
            retry: RetryExecutor::new(config.retry_policy()),
            middleware: Arc::new(MiddlewareChain::default()),
            credentials: None,
        })
    }

    /// Attach a credential source for refresh-and-retry on auth expiry.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Append a middleware layer; layers run in insertion order.
    pub fn with_middleware(mut self, layer: Arc<dyn Middleware>) -> Self {
        Arc::make_mut(&mut self.middleware).push(layer);
        self
    }

    /// The shared rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate
    }

    /// The shared token budget, when one is configured.
    pub fn token_budget(&self) -> Option<&TokenBudgetLimiter> {
        self.budget.as_deref()
    }

    /// Dispatch one request through the full admission chain.
    pub async fn attempt(&self, request: T::Request) -> DispatchResult<T::Response> {
        self.attempt_with_budget(request, None).await
    }

    /// Dispatch one request, debiting `estimated_tokens` from the shared
    /// budget first when both an estimate and a budget are present.
    pub async fn attempt_with_budget(
        &self,
        request: T::Request,
        estimated_tokens: Option<u64>,
    ) -> DispatchResult<T::Response> {
        self.rate.acquire().await;
        if let (Some(budget), Some(tokens)) = (self.budget.as_ref(), estimated_tokens) {
            budget.debit(tokens).await?;
        }

        let attempt_no = AtomicU32::new(0);
        let transport = &self.transport;
        let middleware = &self.middleware;
        let request = &request;
        self.retry
            .execute(self.credentials.as_deref(), || {
                let attempt = attempt_no.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    let context = middleware.prepare(attempt)?;
                    transport.call(request, &context).await
                }
            })
            .await
    }

    /// Fan `items` out across concurrent tasks, each running the full
    /// single-item chain against the shared limiters. Returns a handle
    /// immediately.
    pub fn batch(&self, items: Vec<T::Request>, options: BatchOptions) -> BatchHandle<T::Response> {
        let this = self.clone();
        let estimate = options.estimated_tokens_per_item;
        batch::submit(items, &options, move |_index, item| {
            let this = this.clone();
            async move { this.attempt_with_budget(item, estimate).await }
        })
    }
}

/// Blocking-mode request dispatcher: the same surface as [`Dispatcher`] for
/// threaded callers.
pub struct BlockingDispatcher<T: BlockingTransport> {
    transport: Arc<T>,
    rate: Arc<RateLimiter>,
    budget: Option<Arc<TokenBudgetLimiter>>,
    retry: RetryExecutor,
    middleware: Arc<MiddlewareChain>,
    credentials: Option<Arc<dyn BlockingCredentialSource>>,
}

impl<T: BlockingTransport> Clone for BlockingDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            rate: self.rate.clone(),
            budget: self.budget.clone(),
            retry: self.retry.clone(),
            middleware: self.middleware.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

impl<T: BlockingTransport> BlockingDispatcher<T> {
    /// Build a dispatcher around `transport` from a validated config.
    pub fn new(transport: T, config: &DispatchConfig) -> DispatchResult<Self> {
        config.validate()?;
        let budget = if config.tokens_per_minute > 0 {
            Some(Arc::new(TokenBudgetLimiter::new(config.tokens_per_minute)?))
        } else {
            None
        };
        Ok(Self {
            transport: Arc::new(transport),
            rate: Arc::new(RateLimiter::new(config.query_per_second)),
            budget,
            retry: RetryExecutor::new(config.retry_policy()),
            middleware: Arc::new(MiddlewareChain::default()),
            credentials: None,
        })
    }

    /// Attach a credential source for refresh-and-retry on auth expiry.
    pub fn with_credentials(mut self, credentials: Arc<dyn BlockingCredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Append a middleware layer; layers run in insertion order.
    pub fn with_middleware(mut self, layer: Arc<dyn Middleware>) -> Self {
        Arc::make_mut(&mut self.middleware).push(layer);
        self
    }

    /// The shared rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate
    }

    /// The shared token budget, when one is configured.
    pub fn token_budget(&self) -> Option<&TokenBudgetLimiter> {
        self.budget.as_deref()
    }

    /// Dispatch one request through the full admission chain, blocking the
    /// calling thread while pacing or retrying.
    pub fn attempt(&self, request: T::Request) -> DispatchResult<T::Response> {
        self.attempt_with_budget(&request, None)
    }

    fn attempt_with_budget(
        &self,
        request: &T::Request,
        estimated_tokens: Option<u64>,
    ) -> DispatchResult<T::Response> {
        self.rate.acquire_blocking();
        if let (Some(budget), Some(tokens)) = (self.budget.as_ref(), estimated_tokens) {
            budget.debit_blocking(tokens)?;
        }

        let attempt_no = AtomicU32::new(0);
        self.retry
            .execute_blocking(self.credentials.as_deref(), || {
                let attempt = attempt_no.fetch_add(1, Ordering::SeqCst) + 1;
                let context = self.middleware.prepare(attempt)?;
                self.transport.call(request, &context)
            })
    }

    /// Fan `items` out across worker threads, each running the full
    /// single-item chain against the shared limiters. Returns a handle
    /// immediately.
    pub fn batch(
        &self,
        items: Vec<T::Request>,
        options: BatchOptions,
    ) -> BlockingBatchHandle<T::Response> {
        let this = self.clone();
        let estimate = options.estimated_tokens_per_item;
        batch::submit_blocking(items, &options, move |_index, item| {
            this.attempt_with_budget(item, estimate)
        })
    }
}
