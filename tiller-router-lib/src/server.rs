use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use http::StatusCode;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_rustls::rustls::sign::CertifiedKey;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::discovery::DiscoveryClient;
use crate::error::{Result, RouterError};
use crate::proxy::{build_client, handle_request, synthetic_response, ProxyContext};
use crate::sticky::StickyCodec;
use crate::store::RouteStore;
use crate::table::RouteTable;
use crate::types::{route_id, Route, RouteEvent};
use crate::watch::WatchManager;

/// Listener configuration injected at construction.
///
/// The cookie key should come from real randomness; an all-zero key
/// still works but makes sticky cookies forgeable.
pub struct ListenerOptions {
    pub http_addr: SocketAddr,
    pub tls_addr: SocketAddr,
    pub cookie_key: [u8; 32],
    pub fallback_keypair: Option<Arc<CertifiedKey>>,
}

#[derive(Default)]
struct ListenerState {
    closed: bool,
    started: bool,
    tasks: Vec<JoinHandle<()>>,
    http_addr: Option<SocketAddr>,
    tls_addr: Option<SocketAddr>,
}

/// The HTTP(S) edge listener: owns the route table, both sockets, the
/// store sync loop, and the shared proxy machinery.
pub struct HttpListener {
    opts: ListenerOptions,
    store: Arc<dyn RouteStore>,
    table: Arc<RouteTable>,
    watch: Arc<WatchManager>,
    ctx: Arc<ProxyContext>,
    state: Mutex<ListenerState>,
}

impl HttpListener {
    pub fn new(
        opts: ListenerOptions,
        store: Arc<dyn RouteStore>,
        discovery: Arc<dyn DiscoveryClient>,
    ) -> Arc<Self> {
        let watch = Arc::new(WatchManager::new());
        let table = Arc::new(RouteTable::new(discovery, watch.clone()));
        let ctx = Arc::new(ProxyContext {
            table: table.clone(),
            client: build_client(),
            codec: Arc::new(StickyCodec::new(&opts.cookie_key)),
        });
        Arc::new(HttpListener {
            opts,
            store,
            table,
            watch,
            ctx,
            state: Mutex::new(ListenerState::default()),
        })
    }

    /// Brings the listener up: store sync first (the route table must be
    /// warm before traffic lands), then the plain socket, then TLS. Any
    /// failure tears down whatever already started.
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.lock_state();
            if state.closed {
                return Err(RouterError::Closed);
            }
            if state.started {
                return Err(RouterError::Config("listener already started".into()));
            }
        }

        let (started_tx, started_rx) = oneshot::channel();
        let handler = self.table.clone();
        let sync_task = tokio::spawn(self.store.clone().sync(handler, started_tx));
        match started_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(RouterError::Store(
                    "sync loop exited before initial pass".into(),
                ))
            }
        }

        let http_listener = match bind_reuseport(self.opts.http_addr) {
            Ok(l) => l,
            Err(e) => {
                self.store.stop_sync();
                sync_task.abort();
                return Err(e.into());
            }
        };
        let http_addr = http_listener.local_addr()?;

        let tls_listener = match bind_reuseport(self.opts.tls_addr) {
            Ok(l) => l,
            Err(e) => {
                self.store.stop_sync();
                sync_task.abort();
                drop(http_listener);
                return Err(e.into());
            }
        };
        let tls_addr = tls_listener.local_addr()?;
        let acceptor = crate::tls::build_tls_acceptor(
            self.table.clone(),
            self.opts.fallback_keypair.clone(),
        );

        let http_task = tokio::spawn(accept_loop(
            http_listener,
            None,
            self.ctx.clone(),
            http_addr.port(),
        ));
        let tls_task = tokio::spawn(accept_loop(
            tls_listener,
            Some(acceptor),
            self.ctx.clone(),
            tls_addr.port(),
        ));

        let mut state = self.lock_state();
        if state.closed {
            for task in [sync_task, http_task, tls_task] {
                task.abort();
            }
            self.store.stop_sync();
            return Err(RouterError::Closed);
        }
        state.started = true;
        state.http_addr = Some(http_addr);
        state.tls_addr = Some(tls_addr);
        state.tasks = vec![sync_task, http_task, tls_task];
        info!(%http_addr, %tls_addr, "router listening");
        Ok(())
    }

    /// Stops accepting, tears down discovery subscriptions and the sync
    /// loop, and rejects further mutations. In-flight requests finish on
    /// their own tasks. Idempotent.
    pub fn close(&self) {
        let tasks = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.tasks)
        };
        for task in tasks {
            task.abort();
        }
        self.table.close();
        self.store.stop_sync();
        info!("router closed");
    }

    pub async fn add_route(&self, route: &mut Route) -> Result<()> {
        self.check_open()?;
        route.id = route_id(&route.domain);
        self.store.add(route).await
    }

    pub async fn set_route(&self, route: &mut Route) -> Result<()> {
        self.check_open()?;
        route.id = route_id(&route.domain);
        self.store.set(route).await
    }

    pub async fn remove_route(&self, id: &str) -> Result<()> {
        self.check_open()?;
        self.store.remove(id).await
    }

    /// Subscribes to route-change events.
    pub fn watch(&self, tx: mpsc::Sender<RouteEvent>) {
        self.watch.watch(tx);
    }

    pub fn unwatch(&self, tx: &mpsc::Sender<RouteEvent>) {
        self.watch.unwatch(tx);
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Actual bound plain-HTTP address, once started.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.lock_state().http_addr
    }

    /// Actual bound TLS address, once started.
    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.lock_state().tls_addr
    }

    fn check_open(&self) -> Result<()> {
        if self.lock_state().closed {
            return Err(RouterError::Closed);
        }
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Binds with SO_REUSEPORT so a replacement process can take over the
/// port before this one lets go.
fn bind_reuseport(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    ctx: Arc<ProxyContext>,
    port: u16,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept error");
                continue;
            }
        };
        let ctx = ctx.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls) => serve_connection(TokioIo::new(tls), ctx, peer, true, port).await,
                    Err(e) => {
                        debug!(%peer, error = %e, "tls accept error");
                    }
                },
                None => serve_connection(TokioIo::new(stream), ctx, peer, false, port).await,
            }
        });
    }
}

async fn serve_connection<I>(io: I, ctx: Arc<ProxyContext>, peer: SocketAddr, is_tls: bool, port: u16)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
        let ctx = ctx.clone();
        async move {
            match handle_request(ctx, req, peer, is_tls, port).await {
                Ok(resp) => Ok::<_, hyper::Error>(resp),
                Err(e) => {
                    warn!(error = %e, error_type = e.error_type(), "request failed");
                    Ok(synthetic_response(StatusCode::from(e)))
                }
            }
        }
    });

    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(io, svc)
        .await
    {
        debug!(%peer, error = %e, "serve_connection error");
    }
}
