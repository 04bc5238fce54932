//! The transport collaborator: the core
//! verifier/fetcher/orchestrator only ever see `Transport`, `Response` and
//! `DownloadOutcome` — TLS trust, client certs and proxying are this
//! module's concern alone.

pub mod auth_client;
pub mod test_client;
pub mod tls;

pub use self::auth_client::AuthClient;
pub use self::test_client::TestClient;
pub use self::tls::{init_tls_client, TlsData};

use datatype::{Error, Url};


/// The body and status of a completed request.
#[derive(Debug, Clone)]
pub struct Response {
    pub code: u16,
    pub body: Vec<u8>,
}

impl Response {
    /// A response is "ok" iff its status is in [200, 400).
    pub fn is_ok(&self) -> bool {
        self.code >= 200 && self.code < 400
    }
}

/// The result of a resumable target download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The callback-reported total number of bytes streamed this call
    /// (i.e. not counting `offset`).
    Completed(u64),
    /// `on_chunk` returned `false`, aborting the stream early.
    Interrupted,
}

/// The narrow surface the verification/fetch/orchestration core relies on.
/// Implementations decide TLS trust, client certs, proxying and bandwidth
/// caps; none of that is visible here.
pub trait Transport: Send + Sync {
    /// `GET url`, capping the response body at `max_bytes`. Exceeding the cap fails with `Error::FetchSizeExceeded`
    /// before the full body is buffered.
    fn get(&self, url: &Url, max_bytes: Option<u64>) -> Result<Response, Error>;

    fn post(&self, url: &Url, content_type: &str, body: &[u8]) -> Result<Response, Error>;

    fn put(&self, url: &Url, content_type: &str, body: &[u8]) -> Result<Response, Error>;

    /// Stream `url` starting at byte `offset`, invoking `on_chunk` for each
    /// buffer read. `on_chunk` returns `false` to cancel the stream.
    fn download(
        &self,
        url: &Url,
        offset: u64,
        on_chunk: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<DownloadOutcome, Error>;
}
