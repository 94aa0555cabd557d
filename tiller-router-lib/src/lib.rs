#![forbid(unsafe_code)]

//! Core of the tiller edge router: a dynamic layer-7 HTTP(S) router that
//! terminates client connections, picks a live backend from a service
//! discovery view, and proxies the exchange.
//!
//! The building blocks, leaves first:
//!
//! - [`discovery`] — service-set cache over a pluggable discovery client
//! - [`store`] — route persistence adapter with a change-stream sync loop
//! - [`watch`] — in-process pub/sub for route-change events
//! - [`table`] — host → route lookup with wildcard domains and TLS material
//! - [`sticky`] — authenticated encrypted session-affinity cookies
//! - [`balance`] — backend selection (random and sticky)
//! - [`proxy`] — the HTTP/1.1 forwarding engine and upgrade tunnel
//! - [`tls`] — SNI certificate resolution and listener config
//! - [`server`] — the listener orchestrator tying it all together

pub mod balance;
pub mod config;
pub mod discovery;
pub mod error;
pub mod proxy;
pub mod server;
pub mod sticky;
pub mod store;
pub mod table;
pub mod tls;
pub mod types;
pub mod watch;

pub use error::{Result, RouterError};
pub use server::HttpListener;
pub use types::{route_id, EventKind, Route, RouteEvent};
