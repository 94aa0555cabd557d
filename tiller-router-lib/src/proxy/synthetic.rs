use http::StatusCode;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;

type RespBody = BoxBody<Bytes, hyper::Error>;

/// Builds a minimal synthetic response for 4xx and 5xx outcomes: the
/// status line plus its canonical reason phrase as the body.
pub fn synthetic_response(status: StatusCode) -> Response<RespBody> {
    let msg = status.canonical_reason().unwrap_or_default();
    let mut resp = Response::new(full_body(Bytes::from_static(msg.as_bytes())));
    *resp.status_mut() = status;
    resp
}

pub(crate) fn empty_body() -> RespBody {
    full_body(Bytes::new())
}

fn full_body(data: Bytes) -> RespBody {
    Full::new(data).map_err(|never| match never {}).boxed()
}
