use std::sync::Mutex;

use datatype::{Error, Url};
use http::{DownloadOutcome, Response, Transport};


/// A canned-response transport for unit and integration tests. Responses are consumed in reverse of the order given to
/// `from` (last one supplied is returned first, via `Vec::pop`); `download`
/// treats a queued response's body as the full target content starting at
/// offset 0.
pub struct TestClient {
    responses: Mutex<Vec<Response>>,
}

impl Default for TestClient {
    fn default() -> Self {
        TestClient { responses: Mutex::new(Vec::new()) }
    }
}

impl TestClient {
    pub fn from(responses: Vec<Response>) -> Self {
        TestClient { responses: Mutex::new(responses) }
    }

    fn next(&self) -> Result<Response, Error> {
        self.responses
            .lock()?
            .pop()
            .ok_or_else(|| Error::Client("TestClient: no more canned responses".into()))
    }
}

impl Transport for TestClient {
    fn get(&self, _url: &Url, max_bytes: Option<u64>) -> Result<Response, Error> {
        let resp = self.next()?;
        if let Some(limit) = max_bytes {
            if resp.body.len() as u64 > limit {
                return Err(Error::FetchSizeExceeded(format!("exceeds {} byte cap", limit)));
            }
        }
        Ok(resp)
    }

    fn post(&self, _url: &Url, _content_type: &str, _body: &[u8]) -> Result<Response, Error> {
        self.next()
    }

    fn put(&self, _url: &Url, _content_type: &str, _body: &[u8]) -> Result<Response, Error> {
        self.next()
    }

    fn download(
        &self,
        _url: &Url,
        offset: u64,
        on_chunk: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<DownloadOutcome, Error> {
        let resp = self.next()?;
        let body = &resp.body[offset.min(resp.body.len() as u64) as usize..];
        if !on_chunk(body) {
            return Ok(DownloadOutcome::Interrupted);
        }
        Ok(DownloadOutcome::Completed(body.len() as u64))
    }
}
