//! End-to-end tests of the admission and dispatch chain: rate limiting,
//! token budgeting, middleware, retry with reauthentication, and batch
//! fan-out against a mock transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use inflight::{
    BatchOptions, BlockingCredentialSource, BlockingDispatcher, BlockingTransport,
    CredentialSource, DispatchConfig, DispatchError, DispatchResult, Dispatcher, HeaderStamp,
    RequestContext, Transport,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Mock transport that fails a configurable number of times per request
/// before succeeding, and records the contexts it saw. Clones share the
/// counters, so a test can hand one clone to a dispatcher and keep another
/// for assertions.
#[derive(Clone)]
struct FlakyTransport {
    failures_before_success: u32,
    calls: Arc<AtomicU32>,
    seen_headers: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl FlakyTransport {
    fn new(failures_before_success: u32) -> Self {
        Self {
            failures_before_success,
            calls: Arc::new(AtomicU32::new(0)),
            seen_headers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, request: &str, context: &RequestContext) -> DispatchResult<String> {
        self.seen_headers.lock().push(context.headers.clone());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            Err(DispatchError::service(503, "overloaded"))
        } else {
            Ok(format!("ok: {request}"))
        }
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    type Request = String;
    type Response = String;

    async fn call(&self, request: &String, context: &RequestContext) -> DispatchResult<String> {
        self.respond(request, context)
    }
}

impl BlockingTransport for FlakyTransport {
    type Request = String;
    type Response = String;

    fn call(&self, request: &String, context: &RequestContext) -> DispatchResult<String> {
        self.respond(request, context)
    }
}

fn quick_config() -> DispatchConfig {
    DispatchConfig::default()
        .with_max_attempts(3)
        .with_backoff_factor(0.001)
        .with_timeout_per_attempt(None)
}

#[tokio::test]
async fn attempt_recovers_from_transient_failures() {
    init_tracing();
    let transport = FlakyTransport::new(2);
    let dispatcher = Dispatcher::new(transport.clone(), &quick_config()).unwrap();

    let response = dispatcher.attempt("ping".to_string()).await.unwrap();
    assert_eq!(response, "ok: ping");
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn attempt_surfaces_retry_exhaustion() {
    init_tracing();
    let transport = FlakyTransport::new(u32::MAX);
    let dispatcher = Dispatcher::new(transport.clone(), &quick_config()).unwrap();

    let error = dispatcher.attempt("ping".to_string()).await.unwrap_err();
    assert!(error.is_retry_exhausted());
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn middleware_headers_reach_the_transport_on_every_attempt() {
    init_tracing();
    let transport = FlakyTransport::new(1);
    let dispatcher = Dispatcher::new(transport.clone(), &quick_config())
        .unwrap()
        .with_middleware(Arc::new(HeaderStamp::single("x-api-key", "secret")));

    dispatcher.attempt("ping".to_string()).await.unwrap();

    let seen = transport.seen_headers.lock();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|h| h["x-api-key"] == "secret"));
}

struct ExpiredOnce {
    expired: AtomicU32,
    refreshes: AtomicU32,
}

#[async_trait]
impl CredentialSource for ExpiredOnce {
    async fn refresh(&self) -> DispatchResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct AuthGatedTransport {
    creds: Arc<ExpiredOnce>,
}

#[async_trait]
impl Transport for AuthGatedTransport {
    type Request = String;
    type Response = String;

    async fn call(&self, request: &String, _context: &RequestContext) -> DispatchResult<String> {
        if self.creds.expired.swap(0, Ordering::SeqCst) > 0 {
            Err(DispatchError::AuthExpired)
        } else {
            Ok(request.clone())
        }
    }
}

#[tokio::test]
async fn auth_expiry_refreshes_and_replays_the_request() {
    init_tracing();
    let creds = Arc::new(ExpiredOnce {
        expired: AtomicU32::new(1),
        refreshes: AtomicU32::new(0),
    });
    let dispatcher = Dispatcher::new(
        AuthGatedTransport {
            creds: creds.clone(),
        },
        &quick_config(),
    )
    .unwrap()
    .with_credentials(creds.clone());

    let response = dispatcher.attempt("ping".to_string()).await.unwrap();
    assert_eq!(response, "ping");
    assert_eq!(creds.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn budget_debits_are_shared_between_attempt_and_batch() {
    init_tracing();
    let config = quick_config().with_tokens_per_minute(1000);
    let dispatcher = Dispatcher::new(FlakyTransport::new(0), &config).unwrap();

    dispatcher
        .attempt_with_budget("one".to_string(), Some(100))
        .await
        .unwrap();
    assert_eq!(dispatcher.token_budget().unwrap().remaining(), 900);

    let handle = dispatcher.batch(
        (0..4).map(|i| format!("item {i}")).collect(),
        BatchOptions::new(2).with_estimated_tokens_per_item(100),
    );
    let results = handle.results().await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(dispatcher.token_budget().unwrap().remaining(), 500);
}

#[tokio::test]
async fn oversized_budget_estimate_fails_before_the_transport() {
    init_tracing();
    let transport = FlakyTransport::new(0);
    let config = quick_config().with_tokens_per_minute(100);
    let dispatcher = Dispatcher::new(transport.clone(), &config).unwrap();

    let error = dispatcher
        .attempt_with_budget("big".to_string(), Some(101))
        .await
        .unwrap_err();
    assert!(matches!(error, DispatchError::InvalidArgument(_)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn batch_keeps_input_order_and_isolates_failures() {
    init_tracing();

    struct SelectiveTransport;

    #[async_trait]
    impl Transport for SelectiveTransport {
        type Request = u32;
        type Response = u32;

        async fn call(&self, request: &u32, _context: &RequestContext) -> DispatchResult<u32> {
            if *request == 7 {
                Err(DispatchError::invalid_argument("rejected payload"))
            } else {
                Ok(request * 10)
            }
        }
    }

    let dispatcher = Dispatcher::new(SelectiveTransport, &quick_config()).unwrap();
    let handle = dispatcher.batch((0..10).collect(), BatchOptions::new(4));

    assert_eq!(handle.task_count(), 10);
    let results = handle.results().await;
    for (i, result) in results.iter().enumerate() {
        if i == 7 {
            assert!(matches!(result, Err(DispatchError::InvalidArgument(_))));
        } else {
            assert_eq!(result.as_ref().unwrap(), &(i as u32 * 10));
        }
    }
    assert_eq!(handle.finished_count(), 10);
}

#[test]
fn blocking_dispatcher_mirrors_the_async_chain() {
    init_tracing();
    let transport = FlakyTransport::new(2);
    let config = quick_config().with_tokens_per_minute(1000);

    struct BlockingRefresher(AtomicUsize);
    impl BlockingCredentialSource for BlockingRefresher {
        fn refresh(&self) -> DispatchResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let dispatcher = BlockingDispatcher::new(transport.clone(), &config)
        .unwrap()
        .with_credentials(Arc::new(BlockingRefresher(AtomicUsize::new(0))))
        .with_middleware(Arc::new(HeaderStamp::single("x-mode", "blocking")));

    let response = dispatcher.attempt("ping".to_string()).unwrap();
    assert_eq!(response, "ok: ping");
    assert_eq!(transport.calls(), 3);
    assert!(
        transport
            .seen_headers
            .lock()
            .iter()
            .all(|h| h["x-mode"] == "blocking")
    );
}

#[test]
fn blocking_batch_runs_the_full_chain_per_item() {
    init_tracing();
    let config = quick_config().with_tokens_per_minute(10_000);
    let dispatcher = BlockingDispatcher::new(FlakyTransport::new(0), &config).unwrap();

    let handle = dispatcher.batch(
        (0..10).map(|i| format!("item {i}")).collect(),
        BatchOptions::new(4).with_estimated_tokens_per_item(10),
    );
    let results = handle.results();

    assert_eq!(results.len(), 10);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.as_ref().unwrap(), &format!("ok: item {i}"));
    }
    assert_eq!(dispatcher.token_budget().unwrap().remaining(), 9900);
}

#[tokio::test]
async fn shared_rate_limiter_paces_batch_items() {
    init_tracing();
    // 5 qps with burst 5: 8 items need 3 extra refill intervals.
    let config = quick_config().with_query_per_second(5.0);
    let dispatcher = Dispatcher::new(FlakyTransport::new(0), &config).unwrap();

    let start = std::time::Instant::now();
    let handle = dispatcher.batch(
        (0..8).map(|i| format!("item {i}")).collect(),
        BatchOptions::new(8),
    );
    let results = handle.results().await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(start.elapsed() >= Duration::from_millis(500));
}
