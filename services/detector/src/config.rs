use std::net::SocketAddr;

use anyhow::{anyhow, Context, Result};
use pxd_reconcile::ReconcileMode;

use crate::cache::CacheConfig;
use crate::db::DbConfig;
use crate::probe::ProbeConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub database: DbConfig,
    pub cache: CacheConfig,
    pub probe: ProbeConfig,
    pub reconcile_mode: ReconcileMode,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr = lookup("PXD_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse()
            .context("PXD_LISTEN_ADDR must be a socket address (host:port).")?;

        let log_level = lookup("PXD_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = lookup("PXD_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let reconcile_mode = match lookup("PXD_RECONCILE_MODE") {
            Some(v) => ReconcileMode::parse(&v).ok_or_else(|| {
                anyhow!("PXD_RECONCILE_MODE must be 'count' or 'exact', got '{v}'.")
            })?,
            None => ReconcileMode::default(),
        };

        let database = DbConfig::from_lookup(&lookup);
        let cache = CacheConfig::from_lookup(&lookup)?;
        let probe = ProbeConfig::from_lookup(&lookup)?;

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            database,
            cache,
            probe,
            reconcile_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert!(!config.dev_mode);
        assert_eq!(config.reconcile_mode, ReconcileMode::Count);
        assert_eq!(config.cache.set_key, "proxies");
        assert_eq!(config.probe, ProbeConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("PXD_LISTEN_ADDR", "0.0.0.0:9000"),
            ("PXD_DEV", "true"),
            ("PXD_RECONCILE_MODE", "Exact"),
            ("PXD_CACHE_SET", "suspects"),
            ("PXD_PROBE_PORTS", "1080, 3128"),
            ("PXD_PROBE_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr.port(), 9000);
        assert!(config.dev_mode);
        assert_eq!(config.reconcile_mode, ReconcileMode::Exact);
        assert_eq!(config.cache.set_key, "suspects");
        assert_eq!(config.probe.ports, vec![1080, 3128]);
        assert_eq!(config.probe.connect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_lookup(lookup_from(&[("PXD_LISTEN_ADDR", "nope")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("PXD_RECONCILE_MODE", "fuzzy")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("PXD_PROBE_PORTS", "80,0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("REDIS_PORT", "abc")])).is_err());
    }
}
