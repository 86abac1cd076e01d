//! Performer identity
//!
//! Taken from the `X-Performed-By` header and recorded on ledger rows. It
//! is not authenticated.

use std::convert::Infallible;

use axum::http::request::Parts;

use crate::external::PERFORMED_BY_HEADER;

/// Name recorded when no performer header is sent
pub const DEFAULT_PERFORMER: &str = "System";

/// Extractor for the performer of a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Performer(pub String);

impl Performer {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for Performer
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let name = parts
            .headers
            .get(PERFORMED_BY_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_PERFORMER);
        Ok(Performer(name.to_string()))
    }
}
