/// Failure of a single remote call.
///
/// `Unavailable` is a hard failure: access to the source was categorically
/// denied (not found, forbidden, or the endpoint is unsupported for it) and
/// retrying cannot help. `Transient` covers network, status and decode errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("source {0} is not available")]
    Unavailable(String),

    #[error("transient fetch failure: {0}")]
    Transient(String),
}

impl FetchError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, FetchError::Unavailable(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transient(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Transient(format!("decode: {}", e))
    }
}
