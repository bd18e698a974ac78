//! Outbound HTTP execution.
//!
//! # Responsibilities
//! - Define the `HttpTransport` seam every fetch in the crate goes through
//! - Provide the hyper-backed implementation used by the binary
//! - Enforce connect/request timeouts and honour cancellation
//!
//! # Design Decisions
//! - Cancellation is cooperative: a token is passed with every request and
//!   observed until response headers arrive
//! - Redirects are never followed; a 3xx is a response like any other
//! - `http` and `https` share one pooled client; TLS trusts the bundled
//!   webpki roots

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http::{Request, Response};
use http_body_util::{BodyStream, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::config::TimeoutConfig;
use crate::http::body::Body;

/// Errors from executing a request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("body error: {0}")]
    Body(#[from] io::Error),
}

/// Executes one HTTP exchange.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        request: Request<Body>,
        cancel: CancellationToken,
    ) -> Result<Response<Body>, TransportError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for std::sync::Arc<T> {
    async fn execute(
        &self,
        request: Request<Body>,
        cancel: CancellationToken,
    ) -> Result<Response<Body>, TransportError> {
        (**self).execute(request, cancel).await
    }
}

/// HTTP/1.1 transport over hyper's pooled client, with TLS for `https`.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Duration,
}

impl HyperTransport {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        // The TLS layer hands https URIs down to the TCP connector.
        http.enforce_http(false);
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            request_timeout: Duration::from_secs(timeouts.request_secs),
        }
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn execute(
        &self,
        request: Request<Body>,
        cancel: CancellationToken,
    ) -> Result<Response<Body>, TransportError> {
        if request.uri().scheme().is_none() || request.uri().authority().is_none() {
            return Err(TransportError::InvalidRequest(format!(
                "'{}' is not an absolute URI",
                request.uri()
            )));
        }

        let (parts, body) = request.into_parts();
        let body = body.collect().await?;
        let request = Request::from_parts(parts, Full::new(body));

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = tokio::time::timeout(self.request_timeout, self.client.request(request)) => {
                match result {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => return Err(TransportError::Upstream(e.to_string())),
                    Err(_) => return Err(TransportError::Timeout(self.request_timeout)),
                }
            }
        };

        let (parts, incoming) = response.into_parts();
        let frames = BodyStream::new(incoming)
            .try_filter_map(|frame| async move { Ok(frame.into_data().ok()) })
            .map_err(io::Error::other);
        Ok(Response::from_parts(
            parts,
            Body::from_reader(StreamReader::new(frames)),
        ))
    }
}
