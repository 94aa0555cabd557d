//! Shared fixtures: an in-process router wired to memory store and
//! discovery, an echoing HTTP backend, and certificate generation.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::header::HeaderName;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use tiller_router_lib::discovery::{Instance, MemoryDiscovery};
use tiller_router_lib::server::ListenerOptions;
use tiller_router_lib::store::MemoryStore;
use tiller_router_lib::types::{EventKind, Route, RouteEvent};
use tiller_router_lib::HttpListener;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestRouter {
    pub listener: Arc<HttpListener>,
    pub store: Arc<MemoryStore>,
    pub discovery: Arc<MemoryDiscovery>,
}

impl TestRouter {
    pub async fn start() -> Self {
        Self::start_with_key([0u8; 32]).await
    }

    pub async fn start_with_key(cookie_key: [u8; 32]) -> Self {
        let store = Arc::new(MemoryStore::new());
        let discovery = Arc::new(MemoryDiscovery::new());
        let listener = HttpListener::new(
            ListenerOptions {
                http_addr: "127.0.0.1:0".parse().unwrap(),
                tls_addr: "127.0.0.1:0".parse().unwrap(),
                cookie_key,
                fallback_keypair: None,
            },
            store.clone(),
            discovery.clone(),
        );
        listener.start().await.expect("router start");
        TestRouter { listener, store, discovery }
    }

    pub fn http_port(&self) -> u16 {
        self.listener.http_addr().expect("router started").port()
    }

    pub fn tls_port(&self) -> u16 {
        self.listener.tls_addr().expect("router started").port()
    }

    /// Adds a route and blocks until the table has applied it.
    pub async fn add_route(&self, route: Route) -> Route {
        let (tx, mut rx) = mpsc::channel(16);
        self.listener.watch(tx.clone());
        let mut route = route;
        self.listener.add_route(&mut route).await.expect("add route");
        wait_for_event(&mut rx, EventKind::Set, Some(&route.domain)).await;
        self.listener.unwatch(&tx);
        route
    }

    /// Removes a route and blocks until the table has dropped it.
    pub async fn remove_route(&self, id: &str) {
        let (tx, mut rx) = mpsc::channel(16);
        self.listener.watch(tx.clone());
        self.listener.remove_route(id).await.expect("remove route");
        wait_for_event(&mut rx, EventKind::Remove, Some(id)).await;
        self.listener.unwatch(&tx);
    }

    pub fn register_backend(&self, service: &str, addr: SocketAddr) {
        self.discovery.register(service, Instance::new(addr.to_string()));
    }
}

/// Waits for a matching route event, panicking after [`EVENT_TIMEOUT`].
pub async fn wait_for_event(
    rx: &mut mpsc::Receiver<RouteEvent>,
    kind: EventKind,
    id: Option<&str>,
) -> RouteEvent {
    let fut = async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if event.event == kind && id.map_or(true, |want| event.id == want) {
                return event;
            }
        }
    };
    match timeout(EVENT_TIMEOUT, fut).await {
        Ok(event) => event,
        Err(_) => panic!("timeout exceeded waiting for {kind:?} {id:?}"),
    }
}

/// Spawns an HTTP/1.1 backend that answers every request with its id in
/// `x-backend-id` and the body, echoes each `x-*` request header back as
/// `echo-x-*`, and always attaches a `keep-alive` response header so
/// callers can check hop-by-hop stripping.
pub async fn spawn_backend(id: &'static str) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind backend");
    let addr = listener.local_addr().expect("backend addr");

    let task = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let svc = service_fn(move |req: Request<Incoming>| async move {
                    let mut resp = Response::new(Full::new(Bytes::from(format!(
                        "hello from {id}"
                    ))));
                    resp.headers_mut()
                        .insert("x-backend-id", id.parse().unwrap());
                    resp.headers_mut()
                        .insert("keep-alive", "timeout=5".parse().unwrap());
                    for (name, value) in req.headers() {
                        if name.as_str().starts_with("x-") {
                            let echoed =
                                HeaderName::try_from(format!("echo-{name}")).unwrap();
                            resp.headers_mut().insert(echoed, value.clone());
                        }
                    }
                    Ok::<_, hyper::Error>(resp)
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });

    (addr, task)
}

/// Self-signed PEM cert and key for one domain.
pub fn generate_cert(domain: &str) -> (String, String) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![domain.to_string()]).expect("generate cert");
    (cert.pem(), key_pair.serialize_pem())
}
