//! Tollgate - Multi-window Request Admission Filter
//!
//! This crate implements the admission decision an API gateway makes for
//! every request: the request is checked against per-second, minute, hour,
//! day, month and year budgets kept in a shared, versioned key-value store,
//! and is either let through with rate limit headers or rejected with a
//! retry-after signal. Counters are updated with compare-and-swap writes, so
//! several gateway workers can share one store without locks.

pub mod config;
pub mod error;
pub mod ratelimit;
