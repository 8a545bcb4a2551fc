use crate::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PORT_VAR: &str = "PORT";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_PATH: &str = "./service.log";
pub const SHUTDOWN_DELAY: Duration = Duration::from_secs(20);
pub const GRACE_PERIOD: Duration = Duration::from_secs(0);
pub const FORCE_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_path: PathBuf,
    /// Delay after which the service shuts itself down regardless of traffic.
    pub shutdown_delay: Duration,
    pub grace_period: Duration,
    pub force_period: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            shutdown_delay: SHUTDOWN_DELAY,
            grace_period: GRACE_PERIOD,
            force_period: FORCE_PERIOD,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Config> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup`, which stands in for the environment. An empty
    /// `PORT` counts as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(value) = lookup(PORT_VAR).filter(|v| !v.trim().is_empty()) {
            let parsed = value.trim().parse::<u16>();
            config.port = parsed.map_err(|source| Error::InvalidPort { value, source })?;
        }

        Ok(config)
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn with_host(mut self, host: IpAddr) -> Config {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Config {
        self.port = port;
        self
    }

    pub fn with_log_path<P: AsRef<Path>>(mut self, path: P) -> Config {
        self.log_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_shutdown_delay(mut self, delay: Duration) -> Config {
        self.shutdown_delay = delay;
        self
    }

    pub fn with_drain_periods(mut self, grace: Duration, force: Duration) -> Config {
        self.grace_period = grace;
        self.force_period = force;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(port: Option<&'static str>) -> impl Fn(&str) -> Option<String> {
        move |key: &str| match key {
            PORT_VAR => port.map(String::from),
            _ => None,
        }
    }

    #[test]
    fn defaults_without_port() {
        let config = Config::from_lookup(lookup(None)).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.address(), "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_path, PathBuf::from("./service.log"));
        assert_eq!(config.shutdown_delay, Duration::from_secs(20));
    }

    #[test]
    fn port_comes_from_lookup() {
        let config = Config::from_lookup(lookup(Some("9091"))).unwrap();
        assert_eq!(config.port, 9091);
    }

    #[test]
    fn empty_port_counts_as_unset() {
        let config = Config::from_lookup(lookup(Some("  "))).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        match Config::from_lookup(lookup(Some("http"))) {
            Err(Error::InvalidPort { value, .. }) => assert_eq!(value, "http"),
            other => panic!("expected InvalidPort, got {:?}", other),
        }
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        assert!(Config::from_lookup(lookup(Some("70000"))).is_err());
    }
}
