//! Rate limiting logic: windows, counters, and the admission pipeline.

mod clock;
mod decision;
mod filter;
mod host;
mod identifier;
mod increment;
mod key;
mod period;
mod store;
mod usage;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, SystemClock, WindowTimestamps};
pub use decision::{
    decide, Decision, HeaderBuffer, LocalResponse, RateLimitHeaders, LIMIT_HEADER,
    REJECTION_REASON, REMAINING_HEADER, RESET_HEADER, RETRY_AFTER_HEADER,
};
pub use filter::{FilterAction, HttpContext, RateLimitFilter};
pub use host::{HttpRequest, RequestContext, ResponseHeaders};
pub use identifier::resolve_identifier;
pub use increment::{increment_counter, increment_usages, IncrementOutcome, MAX_WRITE_ATTEMPTS};
pub use key::{CounterKey, CounterScope, COUNTER_NAMESPACE};
pub use period::Period;
pub use store::{
    decode_counter, encode_counter, read_counter, write_counter, CounterRead, CounterStore,
    MemoryStore, StoreError, StoredValue, Version, WriteOutcome,
};
pub use usage::{get_usages, Usage, Usages};
