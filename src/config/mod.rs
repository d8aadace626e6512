use crate::error::{AppError, AppResult};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Name of the env var carrying the path to the YAML config file.
pub const APP_CONFIG_ENV: &str = "N_APP_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub env: Env,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    pub api_version: String,
    #[serde(default)]
    pub on_panic: String,

    pub storage_pool_size: usize,
    #[serde(with = "humantime_serde")]
    pub timestamp_interval: Duration,
    pub restore_rec_limit: usize,

    pub http_server: HttpConfig,
    pub dbengine: DbEngineConfig,
    pub stan_server: StanConfig,
    pub memcache: MemCacheConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    Local,
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub port: String,
    pub host: String,
    #[serde(with = "humantime_serde")]
    pub resp_timeout: Duration,
    pub keep_alive: bool,
    #[serde(with = "humantime_serde")]
    pub alive_time: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbEngineConfig {
    pub driver: String,
    pub host: String,
    pub port: String,
    pub dbname: String,
    pub db_admin: String,
    #[serde(default)]
    pub passwd: String,
    pub max_pool: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub conn_retry: u32,
}

impl DbEngineConfig {
    /// Postgres connection string built from the adapter settings.
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{user}:{pass}@{host}:{port}/{db}",
            user = self.db_admin,
            pass = self.passwd,
            host = self.host,
            port = self.port,
            db = self.dbname,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StanConfig {
    #[serde(with = "humantime_serde")]
    pub ask_wait: Duration,
    pub channel_name: String,
    pub durable_name: String,
    pub cluster_id: String,
    pub client_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemCacheConfig {
    pub size: usize,
    #[serde(with = "humantime_serde")]
    pub expiration_time: Duration,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn validate_config(cfg: &AppConfig) -> AppResult<()> {
    if cfg.api_version.trim().is_empty() {
        return Err(AppError::MissingConfig("api_version"));
    }
    if cfg.storage_pool_size == 0 {
        return Err(AppError::InvalidConfig(
            "storage_pool_size must be > 0".into(),
        ));
    }
    if cfg.restore_rec_limit == 0 {
        return Err(AppError::InvalidConfig(
            "restore_rec_limit must be > 0".into(),
        ));
    }
    if cfg.dbengine.max_pool == 0 {
        return Err(AppError::InvalidConfig("dbengine.max_pool must be > 0".into()));
    }
    if cfg.dbengine.conn_retry == 0 {
        return Err(AppError::InvalidConfig(
            "dbengine.conn_retry must be > 0".into(),
        ));
    }
    if cfg.stan_server.cluster_id.trim().is_empty() || cfg.stan_server.client_id.trim().is_empty()
    {
        return Err(AppError::InvalidConfig(
            "stan_server.cluster_id and client_id must not be empty".into(),
        ));
    }
    if cfg.memcache.size == 0 {
        return Err(AppError::InvalidConfig("memcache.size must be > 0".into()));
    }
    Ok(())
}

/// Load and validate the YAML config from the path named by `N_APP_CONFIG`.
///
/// Fatal bootstrap error (unset env var, unreadable file, invalid YAML or
/// out-of-range values) bubbles up so `main` can exit non-zero.
pub fn load_app_config() -> AppResult<AppConfig> {
    let path = std::env::var(APP_CONFIG_ENV)
        .map_err(|_| AppError::InvalidConfig(format!("{APP_CONFIG_ENV} is not set")))?;
    let contents = fs::read_to_string(&path)?;
    let config: AppConfig = serde_yaml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
env: local
api_version: v1
storage_pool_size: 10
timestamp_interval: 10s
restore_rec_limit: 20
http_server:
  port: "8081"
  host: "0.0.0.0"
  resp_timeout: 5s
  keep_alive: true
  alive_time: 30s
dbengine:
  driver: postgres
  host: localhost
  port: "5432"
  dbname: orders
  db_admin: postgres
  passwd: ""
  max_pool: 10
  timeout: 3s
  conn_retry: 5
stan_server:
  ask_wait: 30s
  channel_name: orders
  durable_name: orders-durable
  cluster_id: test-cluster
  client_id: order-service
memcache:
  size: 256
  expiration_time: 5m
"#;

    #[test]
    fn parses_and_validates_sample_config() {
        let cfg: AppConfig = serde_yaml::from_str(SAMPLE).expect("parse");
        validate_config(&cfg).expect("validate");
        assert_eq!(cfg.env, Env::Local);
        assert_eq!(cfg.storage_pool_size, 10);
        assert_eq!(cfg.memcache.expiration_time, Duration::from_secs(300));
    }

    #[test]
    fn rejects_zero_pool_size() {
        let mut cfg: AppConfig = serde_yaml::from_str(SAMPLE).expect("parse");
        cfg.storage_pool_size = 0;
        assert!(validate_config(&cfg).is_err());
    }
}
