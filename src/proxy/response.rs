use anyhow::Result;
use rama::http::{Body, Response, StatusCode, header};

use crate::resolver::RepositoryTable;

/// Responds with plain text
pub fn respond_text(status: StatusCode, body: &str) -> Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body.to_owned()))
        .map_err(Into::into)
}

/// Status line only, used when replaying a cached upstream outcome
pub fn respond_status(status: StatusCode) -> Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_LENGTH, 0)
        .body(Body::empty())
        .map_err(Into::into)
}

pub fn respond_method_not_allowed() -> Result<Response<Body>> {
    let body = "Method Not Allowed";
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header(header::ALLOW, header::HeaderValue::from_static("GET, HEAD"))
        .header(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .map_err(Into::into)
}

pub fn respond_listing(table: &RepositoryTable) -> Result<Response<Body>> {
    respond_text(StatusCode::OK, &table.listing())
}
