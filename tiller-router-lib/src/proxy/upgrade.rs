use http::{StatusCode, Version};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::copy_bidirectional;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::http_result::{HttpError, HttpResult};
use super::synthetic::empty_body;
use super::RespBody;

/// Bridges a `Connection: Upgrade` exchange.
///
/// The request is sent verbatim (hop-by-hop headers included) over a
/// dedicated backend connection. When the backend answers
/// `101 Switching Protocols`, its response head is relayed downstream and
/// both connections are taken over for a raw bidirectional copy that runs
/// until either peer closes. Any other status passes through as an
/// ordinary response.
pub(crate) async fn tunnel(
    mut req: Request<Incoming>,
    backend: &str,
) -> HttpResult<Response<RespBody>> {
    if req.extensions().get::<OnUpgrade>().is_none() {
        return Err(HttpError::Hijack(
            "client connection does not support upgrade".into(),
        ));
    }

    let stream = TcpStream::connect(backend)
        .await
        .map_err(|e| HttpError::UpstreamDial(format!("{backend}: {e}")))?;

    let downstream = hyper::upgrade::on(&mut req);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| HttpError::Upstream(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            debug!(error = %e, "backend upgrade connection ended");
        }
    });

    // Dedicated connection, origin-form target; headers stay verbatim so
    // the backend sees the original Upgrade handshake.
    let (mut parts, body) = req.into_parts();
    parts.version = Version::HTTP_11;
    let out_req = Request::from_parts(parts, body);

    let mut upstream_resp = sender
        .send_request(out_req)
        .await
        .map_err(|e| HttpError::Upstream(e.to_string()))?;

    if upstream_resp.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Ok(upstream_resp.map(|b| b.boxed()));
    }

    let upstream = hyper::upgrade::on(&mut upstream_resp);
    tokio::spawn(async move {
        let (down, up) = match tokio::try_join!(downstream, upstream) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "upgrade handshake did not complete");
                return;
            }
        };
        let mut down = TokioIo::new(down);
        let mut up = TokioIo::new(up);
        match copy_bidirectional(&mut down, &mut up).await {
            Ok((to_backend, to_client)) => {
                debug!(to_backend, to_client, "upgrade tunnel closed");
            }
            Err(e) => debug!(error = %e, "upgrade tunnel ended with error"),
        }
    });

    let (parts, _) = upstream_resp.into_parts();
    Ok(Response::from_parts(parts, empty_body()))
}
