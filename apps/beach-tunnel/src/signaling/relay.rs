use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use super::ConnectInfo;
use crate::error::SignalError;

/// What a single long-poll against the relay produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    Payload(ConnectInfo),
    /// The relay's wait elapsed (408) or it answered with nothing.
    Empty,
    /// A 200 whose body could not be understood.
    Malformed(String),
}

/// The two calls the rendezvous relay offers.
#[async_trait]
pub trait RelayClient: Send + Sync + 'static {
    async fn push(&self, key: &str, info: &ConnectInfo) -> Result<(), SignalError>;

    async fn pull_once(&self, key: &str) -> Result<PullOutcome, SignalError>;
}

/// HTTP client for `POST /push/{key}` and `GET /pull/{key}`.
#[derive(Clone)]
pub struct HttpRelay {
    client: Client,
    base: Url,
}

// Comfortably above the relay's own long-poll bound.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl HttpRelay {
    pub fn new(base: &str) -> Result<Self, SignalError> {
        let base = Url::parse(base).map_err(|err| SignalError::Http(format!("{base}: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(SignalError::Http(format!("{base} cannot be a base url")));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(http_error)?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, verb: &str, key: &str) -> Result<Url, SignalError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SignalError::Http(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .push(verb)
            .push(key);
        Ok(url)
    }
}

#[async_trait]
impl RelayClient for HttpRelay {
    async fn push(&self, key: &str, info: &ConnectInfo) -> Result<(), SignalError> {
        let url = self.endpoint("push", key)?;
        let send_attempt = self.client.post(url).json(info).send().await;
        tracing::trace!(
            target = "beach_tunnel::signaling",
            phase = "push",
            key,
            result = ?send_attempt.as_ref().map(reqwest::Response::status)
        );
        let response = send_attempt.map_err(http_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SignalError::Status(response.status().as_u16()))
        }
    }

    async fn pull_once(&self, key: &str) -> Result<PullOutcome, SignalError> {
        let url = self.endpoint("pull", key)?;
        let send_attempt = self.client.get(url).send().await;
        tracing::trace!(
            target = "beach_tunnel::signaling",
            phase = "pull",
            key,
            result = ?send_attempt.as_ref().map(reqwest::Response::status)
        );
        let response = send_attempt.map_err(http_error)?;
        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await.map_err(http_error)?;
                Ok(classify_body(&body))
            }
            StatusCode::REQUEST_TIMEOUT => Ok(PullOutcome::Empty),
            status => Err(SignalError::Status(status.as_u16())),
        }
    }
}

fn classify_body(body: &[u8]) -> PullOutcome {
    if body.iter().all(u8::is_ascii_whitespace) {
        return PullOutcome::Empty;
    }
    match serde_json::from_slice::<ConnectInfo>(body) {
        Ok(info) if info.is_complete() => PullOutcome::Payload(info),
        Ok(_) => PullOutcome::Empty,
        Err(err) => PullOutcome::Malformed(err.to_string()),
    }
}

fn http_error(err: reqwest::Error) -> SignalError {
    SignalError::Http(err.to_string())
}
