use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Method, Proxy, Response, header::HeaderMap, redirect};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::UpstreamConfig;
use crate::proxy_env::{ProxyEndpoint, ProxySelector};
use crate::resolver::Credentials;

const UA: &str = concat!("m2proxy/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 10;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("timed out waiting for {url} after {after:?}")]
    Timeout { url: String, after: Duration },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Shared outbound HTTP client.
///
/// Proxy routing comes from the [`ProxySelector`] only; the usual
/// environment autodetection of the transport is disabled.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(selector: Arc<ProxySelector>, config: &UpstreamConfig) -> Result<Self> {
        let http_selector = Arc::clone(&selector);
        let https_selector = Arc::clone(&selector);

        let mut http_proxy =
            Proxy::custom(move |url| route_for(&http_selector, url, "http"));
        if let Some(credentials) = selector.http_proxy().and_then(|p| p.credentials.as_ref()) {
            http_proxy = http_proxy.basic_auth(&credentials.username, &credentials.password);
        }

        let mut https_proxy =
            Proxy::custom(move |url| route_for(&https_selector, url, "https"));
        if let Some(credentials) = selector.https_proxy().and_then(|p| p.credentials.as_ref()) {
            https_proxy = https_proxy.basic_auth(&credentials.username, &credentials.password);
        }

        let client = reqwest::Client::builder()
            .no_proxy()
            .proxy(http_proxy)
            .proxy(https_proxy)
            .user_agent(UA)
            .connect_timeout(config.connect_timeout())
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .context("building upstream HTTP client")?;

        info!(
            request_timeout_secs = config.request_timeout().as_secs(),
            connect_timeout_secs = config.connect_timeout().as_secs(),
            http_proxy = ?selector.http_proxy().map(ProxyEndpoint::url),
            https_proxy = ?selector.https_proxy().map(ProxyEndpoint::url),
            no_proxy = ?selector.no_proxy(),
            "Upstream client initialized",
        );

        Ok(Self {
            client,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Issues a body-less request and waits for the response headers.
    ///
    /// The timeout covers connecting and the response head only; the body
    /// is streamed by the caller without a deadline.
    pub async fn send(
        &self,
        method: Method,
        url: &Url,
        headers: HeaderMap,
        credentials: Option<&Credentials>,
    ) -> Result<Response, UpstreamError> {
        let mut builder = self.client.request(method, url.clone()).headers(headers);
        if let Some(credentials) = credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        match tokio::time::timeout(self.request_timeout, builder.send()).await {
            Err(_) => Err(UpstreamError::Timeout {
                url: url.to_string(),
                after: self.request_timeout,
            }),
            Ok(Err(err)) if err.is_timeout() => Err(UpstreamError::Timeout {
                url: url.to_string(),
                after: self.request_timeout,
            }),
            Ok(Err(source)) => Err(UpstreamError::Transport {
                url: url.to_string(),
                source,
            }),
            Ok(Ok(response)) => Ok(response),
        }
    }
}

fn route_for(selector: &ProxySelector, url: &Url, scheme: &str) -> Option<Url> {
    if url.scheme() != scheme {
        return None;
    }
    let endpoint = selector.select(url)?;
    debug!(target_url = %url, proxy = %endpoint, "routing through proxy");
    Url::parse(&endpoint.url()).ok()
}
