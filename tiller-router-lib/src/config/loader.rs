use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::{Result, RouterError};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| RouterError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| RouterError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    cfg.cookie_key()?;

    if let Some(tls) = &cfg.tls {
        if !Path::new(&tls.cert_path).exists() {
            return Err(RouterError::Config(format!(
                "Certificate file not found: {}",
                tls.cert_path
            )));
        }
        if !Path::new(&tls.key_path).exists() {
            return Err(RouterError::Config(format!(
                "Key file not found: {}",
                tls.key_path
            )));
        }
    }

    let service_names: HashSet<_> = cfg.services.iter().map(|s| s.name.as_str()).collect();
    let mut domains = HashSet::new();
    for route in &cfg.routes {
        if route.domain.is_empty() {
            return Err(RouterError::Config("route with empty domain".into()));
        }
        if !domains.insert(route.domain.to_lowercase()) {
            return Err(RouterError::Config(format!(
                "duplicate route domain: {}",
                route.domain
            )));
        }
        if !service_names.contains(route.service.as_str()) {
            return Err(RouterError::Config(format!(
                "Route references unknown service: {}",
                route.service
            )));
        }
        if route.tls_cert_path.is_some() != route.tls_key_path.is_some() {
            return Err(RouterError::Config(format!(
                "route {} needs both tls_cert_path and tls_key_path",
                route.domain
            )));
        }
    }

    Ok(())
}
