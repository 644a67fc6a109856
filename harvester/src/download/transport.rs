//! Network seam for the download engine.

use std::fmt;
use std::io::Read;
use std::time::Duration;

use super::error::DownloadResult;

/// Response to a GET request, with the body left unread.
pub struct TransportResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    /// Parsed `Retry-After` header.
    pub retry_after: Option<Duration>,
    pub body: Box<dyn Read + Send>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("retry_after", &self.retry_after)
            .finish_non_exhaustive()
    }
}

/// Issues GET requests.
///
/// Implementations map connection failures and timeouts to
/// [`DownloadError::Transient`](super::DownloadError::Transient) and return
/// every HTTP status, successful or not, as a [`TransportResponse`]; status
/// classification belongs to the engine.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> DownloadResult<TransportResponse>;
}
