//! Rate limit subject resolution.

use crate::config::{FilterConfig, LimitBy};

use super::host::RequestContext;

/// Derive the subject a request is counted against.
///
/// A missing header yields an empty subject, so every request without the
/// header shares one counter.
pub fn resolve_identifier<R>(config: &FilterConfig, request: &R) -> String
where
    R: RequestContext + ?Sized,
{
    match config.limit_by {
        LimitBy::Header => config
            .header_name
            .as_deref()
            .and_then(|name| request.header(name))
            .unwrap_or_default()
            .to_string(),
        LimitBy::Path => request.path().to_string(),
        LimitBy::Ip => request.source_address().to_string(),
    }
}
