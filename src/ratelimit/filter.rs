//! Per-request admission pipeline.

use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::config::FilterConfig;
use crate::error::Result;

use super::clock::{Clock, SystemClock, WindowTimestamps};
use super::decision::{decide, Decision, HeaderBuffer, LocalResponse};
use super::host::{RequestContext, ResponseHeaders};
use super::identifier::resolve_identifier;
use super::increment::{increment_usages, IncrementOutcome};
use super::key::CounterScope;
use super::period::Period;
use super::store::CounterStore;
use super::usage::get_usages;

/// What the gateway should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterAction {
    /// Forward the request upstream.
    Continue,
    /// Stop processing and send the local response.
    Reject(LocalResponse),
}

/// Per-request state, created by [`RateLimitFilter::new_context`].
#[derive(Debug, Default)]
pub struct HttpContext {
    headers: HeaderBuffer,
    increments: Vec<(Period, IncrementOutcome)>,
}

impl HttpContext {
    /// Inject the rate limit headers into the outgoing response.
    ///
    /// Only the end-of-stream headers event writes anything, and only once.
    pub fn on_response_headers<H>(&mut self, end_of_stream: bool, response: &mut H) -> bool
    where
        H: ResponseHeaders + ?Sized,
    {
        self.headers.flush(end_of_stream, response)
    }

    /// Counter updates made for this request, finest period first.
    pub fn increments(&self) -> &[(Period, IncrementOutcome)] {
        &self.increments
    }
}

/// The rate limiting filter attached to one route.
///
/// Holds only immutable configuration and handles to the store and clock,
/// so it can be shared across concurrent requests.
pub struct RateLimitFilter<S: CounterStore + ?Sized, C: Clock = SystemClock> {
    config: Arc<FilterConfig>,
    store: Arc<S>,
    clock: C,
}

impl<S: CounterStore + ?Sized> RateLimitFilter<S, SystemClock> {
    /// Create a filter reading time from the system clock.
    pub fn new(config: FilterConfig, store: Arc<S>) -> Self {
        Self::with_clock(config, store, SystemClock)
    }
}

impl<S: CounterStore + ?Sized, C: Clock> RateLimitFilter<S, C> {
    /// Create a filter with an explicit clock.
    pub fn with_clock(config: FilterConfig, store: Arc<S>, clock: C) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock,
        }
    }

    /// The filter configuration.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// The counter store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create the state for a new request.
    pub fn new_context(&self) -> HttpContext {
        HttpContext::default()
    }

    /// Decide whether a request is admitted, and account for it if so.
    ///
    /// Errors are store read failures under the fail-closed policy; the
    /// gateway should treat them as a failure to process the request. No
    /// headers are buffered for a request that fails.
    #[instrument(
        skip(self, ctx, request),
        fields(route = %request.route_id(), service = %request.service_id())
    )]
    pub async fn on_request_headers<R>(
        &self,
        ctx: &mut HttpContext,
        request: &R,
    ) -> Result<FilterAction>
    where
        R: RequestContext + ?Sized,
    {
        let timestamps = WindowTimestamps::new(self.clock.now());
        let subject = resolve_identifier(&self.config, request);
        let scope = CounterScope::new(request.route_id(), request.service_id(), &subject);

        trace!(subject = %subject, now = timestamps.now_millis(), "Checking rate limit");

        let usages = get_usages(self.store.as_ref(), &self.config, &scope, &timestamps).await?;

        match decide(&self.config, &usages, &timestamps) {
            Decision::Reject(response) => {
                debug!(subject = %subject, status = response.status, "Request rejected");
                Ok(FilterAction::Reject(response))
            }
            Decision::Continue(headers) => {
                ctx.increments =
                    increment_usages(self.store.as_ref(), &self.config, &scope, &timestamps, &usages)
                        .await?;
                ctx.headers = HeaderBuffer::new(headers);
                Ok(FilterAction::Continue)
            }
        }
    }
}
