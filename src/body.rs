use std::convert::Infallible;
use std::error::Error as StdError;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;

use crate::error::GatewayError;

type BoxBodyError = Box<dyn StdError + Send + Sync>;
pub(crate) type ReqBody = http_body_util::combinators::BoxBody<Bytes, BoxBodyError>;

fn map_infallible_to_box_error(never: Infallible) -> BoxBodyError {
    match never {}
}

pub(crate) fn empty_req_body() -> ReqBody {
    Full::new(Bytes::new())
        .map_err(map_infallible_to_box_error)
        .boxed()
}

pub(crate) fn buffered_req_body(body: Bytes) -> ReqBody {
    Full::new(body).map_err(map_infallible_to_box_error).boxed()
}

/// Assembles the wire request. `Accept: application/json` is always present;
/// `Content-Type: application/json` only when a body is sent.
pub(crate) fn build_http_request(
    method: Method,
    uri: Uri,
    body: Option<Bytes>,
) -> Result<Request<ReqBody>, GatewayError> {
    let mut request_builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(ACCEPT, HeaderValue::from_static("application/json"));
    let request_body = match body {
        Some(body) => {
            request_builder =
                request_builder.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            buffered_req_body(body)
        }
        None => empty_req_body(),
    };
    request_builder
        .body(request_body)
        .map_err(|source| GatewayError::RequestBuild { source })
}

pub(crate) async fn read_all_body(mut body: Incoming) -> Result<Bytes, GatewayError> {
    let mut collected = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|source| GatewayError::ReadBody {
            source: Box::new(source),
        })?;
        if let Some(data) = frame.data_ref() {
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}
