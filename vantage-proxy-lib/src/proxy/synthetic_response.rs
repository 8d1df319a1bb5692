use crate::error::{ProxyError, Result};
use http::StatusCode;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;

pub type RespBody = BoxBody<Bytes, hyper::Error>;

/// Builds an empty-body error response, the way the teacher's
/// `synthetic_error_response` does for its 4xx/5xx short-circuits.
pub(crate) fn synthetic_error_response(status_code: StatusCode) -> Result<Response<RespBody>> {
    let res = Response::builder()
        .status(status_code)
        .body(empty_body())
        .map_err(|e| ProxyError::Http(format!("failed to build error response: {e}")))?;
    Ok(res)
}

pub(crate) fn empty_body() -> RespBody {
    Full::new(Bytes::new()).map_err(|never| match never {}).boxed()
}

pub(crate) fn bytes_body(bytes: Bytes) -> RespBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}
