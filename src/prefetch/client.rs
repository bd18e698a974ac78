//! Client-side entry point.
//!
//! Requests for configured resource types are raced against pushes. Any
//! other GET goes direct, and falls back to the race only if the server
//! side answers that the resource is being prefetched; the in-flight status
//! never reaches the caller.

use std::sync::Arc;

use http::{Method, Request, Response};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::ResponseCache;
use crate::config::{PrefetchConfig, RacingConfig};
use crate::http::body::Body;
use crate::http::transport::{HttpTransport, TransportError};
use crate::prefetch::racing::{RaceError, RacingHttpClient, RequestTemplate};
use crate::prefetch::request::{is_in_flight_status, is_prefetchable_request};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Race(#[from] RaceError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Sends client requests upstream, racing the ones a push may answer.
pub struct PrefetchClient {
    transport: Arc<dyn HttpTransport>,
    racing: RacingHttpClient,
    extensions: Vec<String>,
}

impl PrefetchClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        cache: Arc<ResponseCache>,
        prefetch: &PrefetchConfig,
        racing: &RacingConfig,
    ) -> Self {
        Self {
            racing: RacingHttpClient::new(Arc::clone(&transport), cache, racing),
            transport,
            extensions: prefetch.resource_extensions.clone(),
        }
    }

    /// Whether `request` goes through the racing path.
    pub fn is_prefetchable<B>(&self, request: &Request<B>) -> bool {
        is_prefetchable_request(request, &self.extensions)
    }

    pub async fn execute(&self, request: Request<Body>) -> Result<Response<Body>, ClientError> {
        if self.is_prefetchable(&request) {
            tracing::debug!(url = %request.uri(), "Racing prefetchable request");
            return Ok(self.racing.execute(request).await?);
        }

        let retry = (request.method() == Method::GET).then(|| RequestTemplate::of(&request));
        let response = self.transport.execute(request, CancellationToken::new()).await?;
        match retry {
            Some(template) if is_in_flight_status(response.status()) => {
                tracing::debug!(
                    url = %template.uri(),
                    "Resource in flight upstream, racing for its push"
                );
                Ok(self.racing.execute(template.build()).await?)
            }
            _ => Ok(response),
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        self.racing.cache()
    }
}
