use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use http::header::{HeaderName, HeaderValue, CONNECTION, HOST, SET_COOKIE};
use http::{HeaderMap, Uri, Version};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::warn;
use uuid::Uuid;

use crate::balance::{pick, pick_sticky};
use crate::sticky::StickyCodec;
use crate::table::RouteTable;

use super::http_result::{HttpError, HttpResult};
use super::upgrade;

pub type HttpClient = Client<HttpConnector, Incoming>;
pub type RespBody = BoxBody<Bytes, hyper::Error>;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const X_REQUEST_START: HeaderName = HeaderName::from_static("x-request-start");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");

/// Hop-by-hop headers. These are removed when sent to the backend and
/// when the backend's response is returned downstream (RFC 7230 §6.1).
const HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Everything a request needs to be routed: the live table, the shared
/// pooling backend client, and the sticky-cookie codec.
pub struct ProxyContext {
    pub table: Arc<RouteTable>,
    pub client: HttpClient,
    pub codec: Arc<StickyCodec>,
}

/// Builds the shared connection-pooling backend client.
pub fn build_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Routes and forwards one request.
///
/// Resolution happens inline: host → route → backend, then either the
/// ordinary proxy path through the shared transport or the upgrade
/// tunnel. Errors map to synthetic responses at the listener.
pub async fn handle_request(
    ctx: Arc<ProxyContext>,
    mut req: Request<Incoming>,
    peer: SocketAddr,
    is_tls: bool,
    listener_port: u16,
) -> HttpResult<Response<RespBody>> {
    let host = request_host(&req);
    let Some(route) = ctx.table.find_route_for_host(&host) else {
        return Err(HttpError::NoMatchingRoute);
    };

    set_forward_headers(req.headers_mut(), peer, is_tls, listener_port);

    let (backend, set_cookie) = if route.sticky() {
        let picked =
            pick_sticky(&route.service, &ctx.codec, req.headers()).ok_or(HttpError::NoBackend)?;
        (picked.addr, picked.set_cookie)
    } else {
        (pick(&route.service).ok_or(HttpError::NoBackend)?, None)
    };

    if wants_upgrade(req.headers()) {
        return upgrade::tunnel(req, &backend).await;
    }

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri: Uri = format!("http://{backend}{path_and_query}")
        .parse()
        .map_err(|e| HttpError::Upstream(format!("invalid upstream uri: {e}")))?;

    let (mut parts, body) = req.into_parts();
    parts.uri = uri;
    parts.version = Version::HTTP_11;
    parts.headers = without_hop_headers(&parts.headers);
    let out_req = Request::from_parts(parts, body);

    // A connection that never reached the backend is a transport error; a
    // backend that took the request but produced no readable response is a
    // bad gateway.
    let resp = ctx.client.request(out_req).await.map_err(|e| {
        warn!(backend = %backend, error = %e, "proxy error");
        if e.is_connect() {
            HttpError::Upstream(e.to_string())
        } else {
            HttpError::BadGateway(e.to_string())
        }
    })?;

    let (mut parts, body) = resp.into_parts();
    strip_hop_headers(&mut parts.headers);
    if let Some(cookie) = set_cookie {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                parts.headers.append(SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "dropping unencodable sticky cookie"),
        }
    }
    Ok(Response::from_parts(parts, body.boxed()))
}

/// The host the client addressed: Host header for origin-form requests,
/// the URI authority for absolute-form ones.
fn request_host(req: &Request<Incoming>) -> String {
    req.headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string))
        .unwrap_or_default()
}

/// True when the client asked for a protocol switch via
/// `Connection: Upgrade`.
pub(crate) fn wants_upgrade(headers: &HeaderMap) -> bool {
    headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            })
            .unwrap_or(false)
    })
}

fn set_forward_headers(headers: &mut HeaderMap, peer: SocketAddr, is_tls: bool, port: u16) {
    if let Ok(start) = SystemTime::now().duration_since(UNIX_EPOCH) {
        if let Ok(value) = HeaderValue::from_str(&start.as_millis().to_string()) {
            headers.insert(X_REQUEST_START, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().simple().to_string()) {
        headers.insert(X_REQUEST_ID, value);
    }

    // Retain prior X-Forwarded-For hops as a comma+space separated list,
    // folding multiple headers into one.
    let client_ip = peer.ip().to_string();
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let forwarded_for = if prior.is_empty() {
        client_ip
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    let proto = if is_tls { "https" } else { "http" };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
    if let Ok(value) = HeaderValue::from_str(&port.to_string()) {
        headers.insert(X_FORWARDED_PORT, value);
    }
}

/// Copy of `headers` with the hop-by-hop set removed; the inbound map is
/// left untouched.
fn without_hop_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    strip_hop_headers(&mut out);
    out
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_detection_is_token_and_case_insensitive() {
        let mut headers = HeaderMap::new();
        assert!(!wants_upgrade(&headers));

        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(!wants_upgrade(&headers));

        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        assert!(wants_upgrade(&headers));

        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, upgrade"));
        assert!(wants_upgrade(&headers));
    }

    #[test]
    fn hop_headers_are_removed_without_touching_the_source_map() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert("x-app", HeaderValue::from_static("ok"));

        let cleaned = without_hop_headers(&headers);
        assert!(cleaned.get(CONNECTION).is_none());
        assert!(cleaned.get("keep-alive").is_none());
        assert!(cleaned.get("te").is_none());
        assert_eq!(cleaned.get("x-app").unwrap(), "ok");

        assert!(headers.get(CONNECTION).is_some());
    }

    #[test]
    fn forwarded_for_folds_prior_hops() {
        let mut headers = HeaderMap::new();
        headers.append(&X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1"));
        headers.append(&X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.2"));

        let peer: SocketAddr = "192.168.1.5:40000".parse().unwrap();
        set_forward_headers(&mut headers, peer, false, 8080);

        assert_eq!(
            headers.get(&X_FORWARDED_FOR).unwrap(),
            "10.0.0.1, 10.0.0.2, 192.168.1.5"
        );
        assert_eq!(headers.get(&X_FORWARDED_PROTO).unwrap(), "http");
        assert_eq!(headers.get(&X_FORWARDED_PORT).unwrap(), "8080");
        assert_eq!(headers.get(&X_REQUEST_ID).unwrap().len(), 32);
    }
}
