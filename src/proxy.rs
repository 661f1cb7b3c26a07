mod headers;
mod repository;
mod response;
mod stream;
mod types;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indexmap::IndexMap;
use m2proxy_adapter::LocalArtifactCache;
use rama::{
    Service,
    error::BoxError,
    http::{Body, Method, Request, Response, StatusCode},
};
use tracing::{error, info};

use crate::{resolver::RepositoryTable, upstream::UpstreamClient};

pub use headers::{ALLOWED_HEADERS, is_allowed};
pub use repository::RepositoryProxy;
pub use stream::{ByteChunks, CHUNK_SIZE, content_type_for};
pub use types::{RequestContext, ServeOutcome};

const PREFIX: &str = "/maven";

/// Main proxy service: routes `/maven/{id}/...` to the matching repository.
#[derive(Clone)]
pub struct MavenProxyService {
    table: Arc<RepositoryTable>,
    repositories: Arc<IndexMap<String, RepositoryProxy>>,
}

impl MavenProxyService {
    pub fn new(
        table: RepositoryTable,
        local: Option<LocalArtifactCache>,
        client: UpstreamClient,
        negative_ttl: Duration,
    ) -> Self {
        let local = local.map(Arc::new);
        let repositories = table
            .iter()
            .map(|target| {
                info!(
                    repository = %target.id,
                    url = %target.base(),
                    prefix = %format!("{PREFIX}/{}/", target.id),
                    authenticated = target.credentials.is_some(),
                    "registered repository"
                );
                (
                    target.id.clone(),
                    RepositoryProxy::new(target.clone(), local.clone(), client.clone(), negative_ttl),
                )
            })
            .collect();

        Self {
            table: Arc::new(table),
            repositories: Arc::new(repositories),
        }
    }

    pub fn table(&self) -> &RepositoryTable {
        &self.table
    }

    pub fn repository(&self, id: &str) -> Option<&RepositoryProxy> {
        self.repositories.get(id)
    }

    async fn handle(&self, req: Request<Body>, ctx: &mut RequestContext) -> Result<Response<Body>> {
        let path = req.uri().path().to_owned();
        let Some(rest) = path.strip_prefix(PREFIX) else {
            ctx.outcome = ServeOutcome::NotFound;
            return response::respond_text(StatusCode::NOT_FOUND, "Not Found");
        };

        if rest.is_empty() || rest == "/" {
            if req.method() != Method::GET && req.method() != Method::HEAD {
                ctx.outcome = ServeOutcome::Rejected;
                return response::respond_method_not_allowed();
            }
            ctx.outcome = ServeOutcome::Listing;
            return response::respond_listing(&self.table);
        }

        let Some(rest) = rest.strip_prefix('/') else {
            ctx.outcome = ServeOutcome::NotFound;
            return response::respond_text(StatusCode::NOT_FOUND, "Not Found");
        };
        let (id, path_info) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        match self.repositories.get(id) {
            Some(repository) => repository.handle(&req, path_info, ctx).await,
            None => {
                ctx.outcome = ServeOutcome::NotFound;
                response::respond_text(StatusCode::NOT_FOUND, "Unknown repository")
            }
        }
    }
}

impl Service<Request<Body>> for MavenProxyService {
    type Output = Response<Body>;
    type Error = BoxError;

    async fn serve(&self, req: Request<Body>) -> Result<Self::Output, Self::Error> {
        let mut ctx = RequestContext::from_request(&req);

        let result = match self.handle(req, &mut ctx).await {
            Ok(resp) => Ok(resp),
            Err(err) => {
                error!(
                    summary = %ctx.summary(),
                    error = %err,
                    "request failed"
                );
                ctx.outcome = ServeOutcome::Failed;
                response::respond_text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };

        let duration_ms = ctx.start.elapsed().as_millis();
        match &result {
            Ok(resp) => {
                info!(
                    method = %ctx.method,
                    path = %ctx.path,
                    response_code = resp.status().as_u16(),
                    duration_ms,
                    outcome = %ctx.outcome,
                    "request handled"
                );
            }
            Err(err) => {
                error!(
                    summary = %ctx.summary(),
                    duration_ms,
                    error = %err,
                    "failed to build error response"
                );
            }
        }

        result.map_err(|e| e.into())
    }
}
