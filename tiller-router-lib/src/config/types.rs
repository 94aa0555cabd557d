use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;

use crate::error::{Result, RouterError};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen: ListenConfig,

    /// Base64-encoded 32-byte secret for sticky-session cookies. Unset
    /// means an all-zero key, which is only acceptable outside production.
    #[serde(default)]
    pub cookie_key: Option<String>,

    /// Listener-wide fallback certificate for TLS clients that send no
    /// SNI.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Routes seeded into the store at startup.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Statically known services and their instance addresses.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    pub http: SocketAddr,
    pub tls: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub domain: String,
    pub service: String,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub tls_cert_path: Option<String>,
    #[serde(default)]
    pub tls_key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub addrs: Vec<String>,
}

impl Config {
    /// Decodes the configured cookie key, defaulting to all zeros when
    /// unset.
    pub fn cookie_key(&self) -> Result<[u8; 32]> {
        let Some(encoded) = &self.cookie_key else {
            return Ok([0u8; 32]);
        };
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| RouterError::Config(format!("cookie_key is not valid base64: {e}")))?;
        raw.try_into()
            .map_err(|_| RouterError::Config("cookie_key must decode to 32 bytes".into()))
    }

    /// Applies environment overrides: `PORT` replaces the plain HTTP
    /// listen port.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|e| RouterError::Config(format!("invalid PORT: {e}")))?;
            self.listen.http.set_port(port);
        }
        Ok(())
    }
}
