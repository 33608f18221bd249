//! Request middleware.
//!
//! Replaces decorator-style request wrapping with an explicit, ordered chain
//! built once per dispatcher: each layer mutates the per-attempt
//! [`RequestContext`] (credential headers, signatures, trace tags) before
//! the transport call. The context is rebuilt for every attempt so stamped
//! values such as timestamps stay fresh across retries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::DispatchResult;

/// Per-attempt request metadata threaded through to the transport.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Headers to stamp onto the outgoing request.
    pub headers: HashMap<String, String>,
    /// 1-based attempt number within the current logical request.
    pub attempt: u32,
}

impl RequestContext {
    /// Fresh context for the given attempt.
    pub fn new(attempt: u32) -> Self {
        Self {
            headers: HashMap::new(),
            attempt,
        }
    }
}

/// One layer of the request-preparation chain.
pub trait Middleware: Send + Sync {
    /// Mutate the context before the transport call. Failing here fails the
    /// attempt without reaching the transport.
    fn apply(&self, context: &mut RequestContext) -> DispatchResult<()>;
}

/// Ordered middleware layers applied before every attempt.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Append a layer; layers run in insertion order.
    pub fn push(&mut self, layer: Arc<dyn Middleware>) {
        self.layers.push(layer);
    }

    /// Build the context for one attempt by running every layer.
    pub fn prepare(&self, attempt: u32) -> DispatchResult<RequestContext> {
        let mut context = RequestContext::new(attempt);
        for layer in &self.layers {
            layer.apply(&mut context)?;
        }
        Ok(context)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("layers", &self.layers.len())
            .finish()
    }
}

/// Stamps a fixed set of headers onto every attempt.
#[derive(Debug, Clone)]
pub struct HeaderStamp {
    headers: HashMap<String, String>,
}

impl HeaderStamp {
    pub fn new(headers: HashMap<String, String>) -> Self {
        Self { headers }
    }

    /// Convenience constructor for a single header.
    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut headers = HashMap::new();
        headers.insert(name.into(), value.into());
        Self { headers }
    }
}

impl Middleware for HeaderStamp {
    fn apply(&self, context: &mut RequestContext) -> DispatchResult<()> {
        context
            .headers
            .extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;

    struct Failing;

    impl Middleware for Failing {
        fn apply(&self, _context: &mut RequestContext) -> DispatchResult<()> {
            Err(DispatchError::invalid_argument("missing credential"))
        }
    }

    #[test]
    fn layers_run_in_insertion_order() {
        let mut chain = MiddlewareChain::default();
        chain.push(Arc::new(HeaderStamp::single("x-stage", "first")));
        chain.push(Arc::new(HeaderStamp::single("x-stage", "second")));

        let context = chain.prepare(1).unwrap();
        assert_eq!(context.headers["x-stage"], "second");
        assert_eq!(context.attempt, 1);
    }

    #[test]
    fn failing_layer_short_circuits() {
        let mut chain = MiddlewareChain::default();
        chain.push(Arc::new(Failing));
        chain.push(Arc::new(HeaderStamp::single("x-after", "unreached")));

        assert!(chain.prepare(1).is_err());
    }

    #[test]
    fn context_is_rebuilt_per_attempt() {
        let mut chain = MiddlewareChain::default();
        chain.push(Arc::new(HeaderStamp::single("x-key", "value")));

        let first = chain.prepare(1).unwrap();
        let second = chain.prepare(2).unwrap();
        assert_eq!(first.attempt, 1);
        assert_eq!(second.attempt, 2);
        assert_eq!(first.headers, second.headers);
    }
}
