use base64;
use std::io::Read;
use std::time::Duration;
use ureq::{Agent, AgentBuilder};

use datatype::{Auth, Error, Url};
use http::tls::connector;
use http::{DownloadOutcome, Response, Transport};


/// The `AuthClient` attaches an `Authorization` header derived from the
/// active `Auth` mode to each outgoing request.
pub struct AuthClient {
    auth: Auth,
    agent: Agent,
}

impl Default for AuthClient {
    fn default() -> Self {
        AuthClient::new(Auth::None)
    }
}

impl AuthClient {
    pub fn new(auth: Auth) -> Self {
        let agent = AgentBuilder::new()
            .timeout_connect(Duration::from_secs(20))
            .timeout(Duration::from_secs(120))
            .tls_connector(connector())
            .build();
        AuthClient { auth, agent }
    }

    pub fn set_auth(&mut self, auth: Auth) {
        self.auth = auth;
    }

    fn authorize(&self, req: ureq::Request) -> ureq::Request {
        match self.auth {
            Auth::Credentials(ref cred) => {
                let creds = format!("{}:{}", cred.client_id, cred.client_secret);
                req.set("Authorization", &format!("Basic {}", base64::encode(creds)))
            }
            Auth::Token(ref token) => req.set("Authorization", &format!("Bearer {}", token.access_token)),
            _ => req,
        }
    }

    fn send_with_body(&self, url: &Url, content_type: &str, body: &[u8], is_post: bool) -> Result<Response, Error> {
        let req = if is_post { self.agent.post(url.as_str()) } else { self.agent.put(url.as_str()) };
        let req = self.authorize(req).set("Content-Type", content_type);
        debug!("request length: {} bytes", body.len());

        match req.send_bytes(body) {
            Ok(resp) => {
                let code = resp.status();
                let mut out = Vec::new();
                resp.into_reader().read_to_end(&mut out)?;
                Ok(Response { code, body: out })
            }
            Err(ureq::Error::Status(code, resp)) => {
                let mut out = Vec::new();
                let _ = resp.into_reader().read_to_end(&mut out);
                Ok(Response { code, body: out })
            }
            Err(err) => Err(Error::FetchTransport(err.to_string())),
        }
    }
}

impl Transport for AuthClient {
    fn get(&self, url: &Url, max_bytes: Option<u64>) -> Result<Response, Error> {
        let req = self.authorize(self.agent.get(url.as_str()));
        let resp = req.call().map_err(|err| Error::FetchTransport(err.to_string()))?;
        let code = resp.status();
        let mut body = Vec::new();
        let reader = resp.into_reader();
        match max_bytes {
            Some(limit) => {
                let mut capped = reader.take(limit + 1);
                capped.read_to_end(&mut body)?;
                if body.len() as u64 > limit {
                    return Err(Error::FetchSizeExceeded(format!("{}: exceeds {} byte cap", url, limit)));
                }
            }
            None => {
                let mut reader = reader;
                reader.read_to_end(&mut body)?;
            }
        }
        Ok(Response { code, body })
    }

    fn post(&self, url: &Url, content_type: &str, body: &[u8]) -> Result<Response, Error> {
        self.send_with_body(url, content_type, body, true)
    }

    fn put(&self, url: &Url, content_type: &str, body: &[u8]) -> Result<Response, Error> {
        self.send_with_body(url, content_type, body, false)
    }

    fn download(
        &self,
        url: &Url,
        offset: u64,
        on_chunk: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<DownloadOutcome, Error> {
        let mut req = self.agent.get(url.as_str());
        if offset > 0 {
            req = req.set("Range", &format!("bytes={}-", offset));
        }
        let resp = self
            .authorize(req)
            .call()
            .map_err(|err| Error::FetchTransport(err.to_string()))?;

        let mut reader = resp.into_reader();
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if !on_chunk(&buf[..n]) {
                return Ok(DownloadOutcome::Interrupted);
            }
        }
        Ok(DownloadOutcome::Completed(total))
    }
}
