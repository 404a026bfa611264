//! Admission decision and rate limit header construction.

use tracing::debug;

use crate::config::FilterConfig;

use super::clock::WindowTimestamps;
use super::host::ResponseHeaders;
use super::usage::Usages;

/// Aggregate limit header, reflecting the binding period.
pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
/// Aggregate remaining header, reflecting the binding period.
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
/// Seconds until the binding period resets.
pub const RESET_HEADER: &str = "X-RateLimit-Reset";
/// Seconds a rejected client should wait.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";
/// Reason phrase of the rejection response.
pub const REJECTION_REASON: &str = "Not authorized";

/// Rate limit headers computed for one request, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    entries: Vec<(String, String)>,
}

impl RateLimitHeaders {
    fn set(&mut self, name: &str, value: impl ToString) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// Look up a header value by exact name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All headers in emission order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every header onto a response.
    pub fn apply_to<H: ResponseHeaders + ?Sized>(&self, response: &mut H) {
        for (name, value) in self.iter() {
            response.replace(name, value);
        }
    }
}

/// A response the gateway must send instead of forwarding the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub reason: &'static str,
    /// UTF-8 body
    pub body: Vec<u8>,
    /// Headers to send with the response
    pub headers: Vec<(String, String)>,
    /// Status to use when the downstream protocol is gRPC
    pub grpc_status: tonic::Code,
}

impl LocalResponse {
    /// Value of a response header by exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of the admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward the request; attach these headers to the eventual response.
    Continue(RateLimitHeaders),
    /// Halt the request and answer with this response.
    Reject(LocalResponse),
}

impl Decision {
    /// Whether the request may proceed upstream.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Continue(_))
    }
}

/// Turn aggregated usages into an admission decision.
pub fn decide(config: &FilterConfig, usages: &Usages, timestamps: &WindowTimestamps) -> Decision {
    let mut headers = RateLimitHeaders::default();

    for (period, usage) in usages.counters() {
        headers.set(period.limit_header(), usage.limit);
        headers.set(
            period.remaining_header(),
            (usage.clamped_remaining() - 1).max(0),
        );
    }

    let binding = usages
        .binding()
        .and_then(|period| usages.get(period).map(|usage| (period, usage)));
    let reset = binding.map(|(period, _)| timestamps.reset_secs(period));

    if !config.hide_client_headers {
        if let (Some((_, usage)), Some(reset)) = (binding, reset) {
            headers.set(LIMIT_HEADER, usage.limit);
            headers.set(REMAINING_HEADER, (usage.clamped_remaining() - 1).max(0));
            headers.set(RESET_HEADER, reset);
        }
    }

    let Some(stop) = usages.stop() else {
        return Decision::Continue(headers);
    };

    let retry_after = reset.unwrap_or(1);
    debug!(
        period = %stop,
        retry_after = retry_after,
        status = config.error_code,
        "Rate limit exceeded"
    );

    let mut response_headers: Vec<(String, String)> = headers.entries;
    response_headers.push((RETRY_AFTER_HEADER.to_string(), retry_after.to_string()));

    Decision::Reject(LocalResponse {
        status: config.error_code,
        reason: REJECTION_REASON,
        body: config.error_message.as_bytes().to_vec(),
        headers: response_headers,
        grpc_status: tonic::Code::PermissionDenied,
    })
}

/// Headers held from request time until the response is finalized.
///
/// The buffer is flushed at most once, on the end-of-stream response
/// headers event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBuffer {
    pending: Option<RateLimitHeaders>,
}

impl HeaderBuffer {
    /// Hold `headers` for later emission.
    pub fn new(headers: RateLimitHeaders) -> Self {
        Self {
            pending: Some(headers),
        }
    }

    /// Copy the held headers onto `response` if this is the final headers
    /// event. Returns whether anything was written.
    pub fn flush<H>(&mut self, end_of_stream: bool, response: &mut H) -> bool
    where
        H: ResponseHeaders + ?Sized,
    {
        if !end_of_stream {
            return false;
        }

        match self.pending.take() {
            Some(headers) => {
                headers.apply_to(response);
                true
            }
            None => false,
        }
    }

    /// Whether headers are still waiting to be flushed.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
