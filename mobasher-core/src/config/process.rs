//! Process-wide configuration loaded from the environment.
//!
//! `dotenvy::dotenv()` is called once in `main` before this is constructed.
//! Required values missing from the environment are a fail-fast
//! [`Error::Config`], never retried.

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub sslmode: String,
    pub schema: String,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: require_env("DB_HOST")?,
            port: require_env("DB_PORT")?
                .parse()
                .map_err(|_| Error::config("DB_PORT must be a valid port number"))?,
            name: require_env("DB_NAME")?,
            user: require_env("DB_USER")?,
            password: require_env("DB_PASSWORD")?,
            sslmode: env_or("DB_SSLMODE", "prefer"),
            schema: env_or("DB_SCHEMA", "public"),
        })
    }

    /// Postgres connection URL including the `search_path` option via the
    /// `options=-csearch_path=<schema>` connection parameter.
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{user}:{password}@{host}:{port}/{name}?sslmode={sslmode}&options=-csearch_path%3D{schema}",
            user = urlencoding::encode(&self.user),
            password = urlencoding::encode(&self.password),
            host = self.host,
            port = self.port,
            name = self.name,
            sslmode = self.sslmode,
            schema = self.schema,
        )
    }
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub database: DatabaseConfig,
    pub redis_url: String,
    pub data_root: String,
    pub screenshot_root: Option<String>,
    pub api_host: String,
    pub api_port: u16,
    pub log_dir: String,
    pub log_json: bool,
}

impl ProcessConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            redis_url: require_env("REDIS_URL")?,
            data_root: require_env("MOBASHER_DATA_ROOT")?,
            screenshot_root: std::env::var("MOBASHER_SCREENSHOT_ROOT").ok(),
            api_host: env_or("API_HOST", "0.0.0.0"),
            api_port: env_or("API_PORT", "8080")
                .parse()
                .map_err(|_| Error::config("API_PORT must be a valid port number"))?,
            log_dir: env_or("MOBASHER_LOG_DIR", "./logs"),
            log_json: std::env::var("MOBASHER_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }

    /// Resolves the screenshot root used by both the OCR worker's write path
    /// and the retention job's cleanup walk. The single source of truth for
    /// the Open Question on screenshot path conventions.
    pub fn resolve_screenshot_root(&self) -> std::path::PathBuf {
        match &self.screenshot_root {
            Some(root) => std::path::PathBuf::from(root),
            None => std::path::PathBuf::from(&self.data_root).join("screenshots"),
        }
    }

    pub fn metrics_port(&self, worker: &str) -> Option<u16> {
        std::env::var(format!("{}_METRICS_PORT", worker.to_uppercase()))
            .ok()
            .and_then(|v| v.parse().ok())
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::config(format!("missing required env var {key}")))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_url_includes_search_path() {
        let cfg = DatabaseConfig {
            host: "localhost".into(),
            port: 5432,
            name: "mobasher".into(),
            user: "mobasher".into(),
            password: "secret".into(),
            sslmode: "disable".into(),
            schema: "public".into(),
        };
        let url = cfg.connection_url();
        assert!(url.contains("search_path"));
        assert!(url.contains("mobasher"));
    }
}
