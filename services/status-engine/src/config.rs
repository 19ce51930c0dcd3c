use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use cdp_reconcile::{ReconcileConfig, DEFAULT_ENVIRONMENTS};

use crate::consumer::ConsumerConfig;
use crate::db::DbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub database: DbConfig,
    pub reconcile: ReconcileConfig,
    pub sweep_interval: Duration,
    pub consumer: ConsumerConfig,
    pub queue_visibility_timeout: Duration,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: '{value}'")),
        Err(_) => Ok(default),
    }
}

/// Splits a comma-separated environment list, dropping blanks.
fn parse_environments(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("CDP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid CDP_LISTEN_ADDR")?;

        let log_level = std::env::var("CDP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("CDP_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let database = DbConfig::from_env();

        let environments = match std::env::var("CDP_ENVIRONMENTS") {
            Ok(raw) => parse_environments(&raw),
            Err(_) => DEFAULT_ENVIRONMENTS.iter().map(|e| e.to_string()).collect(),
        };
        anyhow::ensure!(
            !environments.is_empty(),
            "CDP_ENVIRONMENTS must list at least one environment"
        );

        let sweep_interval = Duration::from_secs(env_or("CDP_SWEEP_INTERVAL_SECS", 60u64)?);
        let queue_visibility_timeout =
            Duration::from_secs(env_or("CDP_QUEUE_VISIBILITY_TIMEOUT_SECS", 30u64)?);

        let consumer = ConsumerConfig {
            concurrency: env_or("CDP_CONSUMER_CONCURRENCY", 4usize)?,
            batch_size: env_or("CDP_CONSUMER_BATCH_SIZE", 10usize)?,
            ..ConsumerConfig::default()
        };

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            database,
            reconcile: ReconcileConfig::with_environments(environments),
            sweep_interval,
            consumer,
            queue_visibility_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_environments_trims_and_drops_blanks() {
        assert_eq!(
            parse_environments(" dev, test ,,prod "),
            vec!["dev".to_string(), "test".to_string(), "prod".to_string()]
        );
        assert!(parse_environments(" , ").is_empty());
    }

    #[test]
    fn test_env_or_falls_back_to_default() {
        let value: u64 = env_or("CDP_TEST_UNSET_VARIABLE_FOR_CONFIG", 42).unwrap();
        assert_eq!(value, 42);
    }
}
