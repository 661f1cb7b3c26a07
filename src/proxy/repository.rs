use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use m2proxy_adapter::{LocalArtifactCache, MappedArtifact, NegativeCache, OutcomeKey};
use percent_encoding::percent_decode_str;
use rama::http::{Body, Method, Request, Response, StatusCode, header};
use tracing::{debug, error, warn};
use url::Url;

use super::{
    headers, response,
    stream::{content_type_for, local_body, upstream_body},
    types::{RequestContext, ServeOutcome},
};
use crate::{resolver::RepositoryTarget, upstream::UpstreamClient};

/// Serves one repository id: local cache, then negative cache, then upstream.
pub struct RepositoryProxy {
    target: RepositoryTarget,
    local: Option<Arc<LocalArtifactCache>>,
    negative: NegativeCache,
    client: UpstreamClient,
}

impl RepositoryProxy {
    pub fn new(
        target: RepositoryTarget,
        local: Option<Arc<LocalArtifactCache>>,
        client: UpstreamClient,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            target,
            local,
            negative: NegativeCache::new(negative_ttl),
            client,
        }
    }

    pub fn target(&self) -> &RepositoryTarget {
        &self.target
    }

    pub fn negative_cache(&self) -> &NegativeCache {
        &self.negative
    }

    /// Upstream URL for a request path below this repository's prefix.
    ///
    /// Dot segments are resolved first and clamped at the repository root.
    pub fn rewrite(&self, path_info: &str, query: Option<&str>) -> String {
        let mut target = format!("{}{}", self.target.base(), normalize_path(path_info));
        if let Some(query) = query {
            target.push('?');
            target.push_str(query);
        }
        target
    }

    pub async fn handle(
        &self,
        req: &Request<Body>,
        path_info: &str,
        ctx: &mut RequestContext,
    ) -> Result<Response<Body>> {
        let method = req.method();
        if method != Method::GET && method != Method::HEAD {
            ctx.outcome = ServeOutcome::Rejected;
            return response::respond_method_not_allowed();
        }

        if method == Method::GET
            && let Some(resp) = self.try_local(path_info).await?
        {
            ctx.outcome = ServeOutcome::LocalHit;
            return Ok(resp);
        }

        let target = self.rewrite(path_info, req.uri().query());
        let key = OutcomeKey::new(method.as_str(), &target);

        if let Some(cached) = self.negative.lookup(&key) {
            debug!(target_url = %cached.target_url, status = cached.status, "replaying cached upstream outcome");
            ctx.outcome = ServeOutcome::NegativeHit;
            let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::NOT_FOUND);
            return response::respond_status(status);
        }

        self.forward(req, target, key, ctx).await
    }

    fn contains(&self, url: &Url) -> bool {
        let base = &self.target.base_url;
        let base_path = base.path().trim_end_matches('/');
        let path = url.path();
        url.scheme() == base.scheme()
            && url.host_str() == base.host_str()
            && url.port_or_known_default() == base.port_or_known_default()
            && (path == base_path || path.starts_with(&format!("{base_path}/")))
    }

    async fn try_local(&self, path_info: &str) -> Result<Option<Response<Body>>> {
        let Some(local) = &self.local else {
            return Ok(None);
        };

        let relative = percent_decode_str(path_info).decode_utf8_lossy();
        let Some(path) = local.find(&relative).await else {
            return Ok(None);
        };

        let artifact = match MappedArtifact::open(&path).await {
            Ok(artifact) => artifact,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to map local artifact, going upstream");
                return Ok(None);
            }
        };

        debug!(path = %path.display(), bytes = artifact.len(), "serving from local repository");
        let resp = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type_for(&path))
            .header(header::CONTENT_LENGTH, artifact.len())
            .body(local_body(artifact.into_bytes()))
            .context("building local artifact response")?;
        Ok(Some(resp))
    }

    async fn forward(
        &self,
        req: &Request<Body>,
        target: String,
        key: OutcomeKey,
        ctx: &mut RequestContext,
    ) -> Result<Response<Body>> {
        let url = match Url::parse(&target) {
            Ok(url) => url,
            Err(err) => {
                error!(target_url = %target, error = %err, "cannot build upstream URL");
                ctx.outcome = ServeOutcome::Failed;
                return response::respond_text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        };

        if !self.contains(&url) {
            warn!(target_url = %target, repository = %self.target.id, "rejecting path outside repository");
            ctx.outcome = ServeOutcome::NotFound;
            return response::respond_text(StatusCode::NOT_FOUND, "Not Found");
        }

        let is_head = req.method() == Method::HEAD;
        let method = if is_head {
            reqwest::Method::HEAD
        } else {
            reqwest::Method::GET
        };
        let upstream_headers = headers::to_upstream(req.headers());
        debug!(
            repository = %self.target.id,
            target_url = %target,
            client_headers = ?req.headers(),
            upstream_headers = ?upstream_headers,
            "forwarding request upstream"
        );

        let upstream = match self
            .client
            .send(method, &url, upstream_headers, self.target.credentials.as_ref())
            .await
        {
            Ok(upstream) => upstream,
            Err(err) if err.is_timeout() => {
                error!(target_url = %target, error = %err, "upstream timed out");
                ctx.outcome = ServeOutcome::Failed;
                return response::respond_text(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
            }
            Err(err) => {
                error!(target_url = %target, error = %err, "upstream request failed");
                ctx.outcome = ServeOutcome::Failed;
                return response::respond_text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        };

        let status = upstream.status().as_u16();
        debug!(
            target_url = %target,
            status,
            upstream_headers = ?upstream.headers(),
            "upstream responded"
        );

        if !is_head && status == StatusCode::NOT_FOUND.as_u16() {
            self.negative.record(key, status);
        }

        let mut builder = Response::builder()
            .status(StatusCode::from_u16(status).context("upstream status out of range")?);
        if let Some(client_headers) = builder.headers_mut() {
            client_headers.extend(headers::to_client(upstream.headers()));
        }

        let body = if is_head {
            Body::empty()
        } else {
            upstream_body(upstream, target)
        };

        ctx.outcome = ServeOutcome::Forwarded;
        builder.body(body).context("building proxied response")
    }
}

// Resolves `.` and `..` (plain or percent-encoded) without ever climbing
// above the first segment.
fn normalize_path(path_info: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path_info.split(['/', '\\']) {
        match segment.to_ascii_lowercase().as_str() {
            "" | "." | "%2e" => {}
            ".." | ".%2e" | "%2e." | "%2e%2e" => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return if path_info.is_empty() { String::new() } else { "/".to_string() };
    }
    let mut normalized = format!("/{}", segments.join("/"));
    if path_info.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::normalize_path;

    #[test]
    fn dot_segments_are_resolved() {
        assert_eq!(normalize_path("/com/./x/1.0/x.pom"), "/com/x/1.0/x.pom");
        assert_eq!(normalize_path("/com/y/../x/"), "/com/x/");
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn dot_segments_never_climb_above_root() {
        assert_eq!(normalize_path("/../../admin/secret"), "/admin/secret");
        assert_eq!(normalize_path("/%2e%2e/%2E%2e/admin"), "/admin");
        assert_eq!(normalize_path("/a/..\\..\\..\\etc"), "/etc");
        assert_eq!(normalize_path("/.."), "/");
    }
}
