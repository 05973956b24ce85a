use clap::Parser;
use lib_common::core::{InvalidJitterBounds, JitterBounds};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Live gold price feed server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "GOLD_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "GOLD_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "GOLD_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "GOLD_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "GOLD_SOURCE_URL", help = "Page the gold price table is fetched from.")]
    pub source_url: Option<String>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL URL for the history store. In-memory when unset.")]
    pub database_url: Option<String>,

    #[clap(long, env = "GOLD_DB_POOL_SIZE", help = "Maximum number of pooled database connections.")]
    pub db_pool_size: Option<usize>,

    #[clap(long, env = "GOLD_MIN_DELAY_MS", help = "Lower bound in milliseconds of the pause between fetch cycles.")]
    pub min_delay_ms: Option<u64>,

    #[clap(long, env = "GOLD_MAX_DELAY_MS", help = "Upper bound in milliseconds of the pause between fetch cycles.")]
    pub max_delay_ms: Option<u64>,

    #[clap(long, env = "GOLD_FETCH_TIMEOUT_SECS", help = "Timeout in seconds for one page fetch.")]
    pub fetch_timeout_secs: Option<u64>,

    #[clap(long, env = "GOLD_SETTLE_MS", help = "Pause in milliseconds between response headers and body read.")]
    pub settle_ms: Option<u64>,

    #[clap(long, env = "GOLD_HISTORY_LIMIT", help = "Default and maximum row count of the history endpoint.")]
    pub history_limit: Option<usize>,

    #[clap(
        long,
        env = "GOLD_ALLOWED_ORIGINS",
        value_delimiter = ',',
        help = "Comma-separated list of origins allowed to connect."
    )]
    pub allowed_origins: Option<Vec<String>>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    FileRead { path: PathBuf, reason: String },
    #[error("Failed to parse config file {path}: {reason}")]
    FileParse { path: PathBuf, reason: String },
    #[error(transparent)]
    Jitter(#[from] InvalidJitterBounds),
    #[error("historyLimit must be at least 1")]
    ZeroHistoryLimit,
    #[error("dbPoolSize must be at least 1")]
    ZeroPoolSize,
    #[error("tlsCertPath and tlsKeyPath must be set together")]
    PartialTls,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            source_url: other.source_url.or(self.source_url),
            database_url: other.database_url.or(self.database_url),
            db_pool_size: other.db_pool_size.or(self.db_pool_size),
            min_delay_ms: other.min_delay_ms.or(self.min_delay_ms),
            max_delay_ms: other.max_delay_ms.or(self.max_delay_ms),
            fetch_timeout_secs: other.fetch_timeout_secs.or(self.fetch_timeout_secs),
            settle_ms: other.settle_ms.or(self.settle_ms),
            history_limit: other.history_limit.or(self.history_limit),
            allowed_origins: other.allowed_origins.or(self.allowed_origins),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(3000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            source_url: Some("https://anlikaltinfiyatlari.com/altin/bursa".to_string()),
            db_pool_size: Some(8),
            min_delay_ms: Some(10_000),
            max_delay_ms: Some(15_000),
            fetch_timeout_secs: Some(30),
            settle_ms: Some(0),
            history_limit: Some(100),
            allowed_origins: Some(vec![
                "https://metal.ojrd.space".to_string(),
                "http://localhost:4200".to_string(),
            ]),
            ..Default::default()
        }
    }
}

/// Fully resolved server settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub source_url: String,
    pub database_url: Option<String>,
    pub db_pool_size: usize,
    pub jitter: JitterBounds,
    pub fetch_timeout: Duration,
    pub settle: Duration,
    pub history_limit: usize,
    pub allowed_origins: Vec<String>,
    pub tls: Option<(PathBuf, PathBuf)>,
}

impl Settings {
    /// Validates a merged config. Unset values fall back to the built-in defaults.
    pub fn resolve(config: Config) -> Result<Settings, ConfigError> {
        let config = Config::defaults().merge(config);

        let history_limit = config.history_limit.unwrap_or(100);
        if history_limit == 0 {
            return Err(ConfigError::ZeroHistoryLimit);
        }
        let db_pool_size = config.db_pool_size.unwrap_or(8);
        if db_pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        let jitter = JitterBounds::from_millis(
            config.min_delay_ms.unwrap_or(10_000),
            config.max_delay_ms.unwrap_or(15_000),
        )?;
        let tls = match (config.tls_cert_path, config.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            _ => return Err(ConfigError::PartialTls),
        };
        let allowed_origins = config
            .allowed_origins
            .unwrap_or_default()
            .into_iter()
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Settings {
            port: config.port.unwrap_or(3000),
            log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
            source_url: config
                .source_url
                .unwrap_or_else(|| "https://anlikaltinfiyatlari.com/altin/bursa".to_string()),
            database_url: config.database_url.filter(|url| !url.trim().is_empty()),
            db_pool_size,
            jitter,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs.unwrap_or(30)),
            settle: Duration::from_millis(config.settle_ms.unwrap_or(0)),
            history_limit,
            allowed_origins,
            tls,
        })
    }
}

/// Reads a JSON config file. A missing file yields `None`.
fn read_config_file(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let config_str = fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let file_config = serde_json::from_str::<Config>(&config_str).map_err(|e| ConfigError::FileParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(Some(file_config))
}

/// Layers defaults, then the config file, then environment and CLI.
fn layered(cli: Config) -> Result<Config, ConfigError> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_gold.conf"));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path)? {
        current_config = current_config.merge(file_config);
    }

    // clap already folded environment variables into the CLI values.
    Ok(current_config.merge(cli))
}

/// Parses the process arguments once and resolves the final settings.
pub fn load_settings() -> Result<Settings, ConfigError> {
    Settings::resolve(layered(Config::parse())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_resolve() {
        let settings = Settings::resolve(Config::default()).unwrap();
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.history_limit, 100);
        assert_eq!(settings.jitter.min(), Duration::from_secs(10));
        assert_eq!(settings.jitter.max(), Duration::from_secs(15));
        assert!(settings.database_url.is_none());
        assert!(settings.tls.is_none());
        assert_eq!(
            settings.allowed_origins,
            vec!["https://metal.ojrd.space", "http://localhost:4200"]
        );
    }

    #[test]
    fn later_layers_win() {
        let file = Config {
            port: Some(4000),
            history_limit: Some(50),
            ..Default::default()
        };
        let cli = Config {
            port: Some(5000),
            ..Default::default()
        };
        let merged = Config::defaults().merge(file).merge(cli);
        assert_eq!(merged.port, Some(5000));
        assert_eq!(merged.history_limit, Some(50));
        assert_eq!(merged.min_delay_ms, Some(10_000));
    }

    #[test]
    fn config_file_is_layered_under_cli() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"port": 4100, "minDelayMs": 2000, "maxDelayMs": 3000, "allowedOrigins": ["https://a.example/"]}}"#
        )
        .unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            max_delay_ms: Some(4000),
            ..Default::default()
        };
        let settings = Settings::resolve(layered(cli).unwrap()).unwrap();
        assert_eq!(settings.port, 4100);
        assert_eq!(settings.jitter.min(), Duration::from_millis(2000));
        assert_eq!(settings.jitter.max(), Duration::from_millis(4000));
        assert_eq!(settings.allowed_origins, vec!["https://a.example"]);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(layered(cli), Err(ConfigError::FileParse { .. })));
    }

    #[test]
    fn cli_flags_parse_origin_list() {
        let cli = Config::try_parse_from([
            "server_gold",
            "--allowed-origins",
            "https://a.example,https://b.example",
            "--history-limit",
            "10",
        ])
        .unwrap();
        assert_eq!(
            cli.allowed_origins,
            Some(vec!["https://a.example".to_string(), "https://b.example".to_string()])
        );
        assert_eq!(cli.history_limit, Some(10));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let inverted = Config {
            min_delay_ms: Some(5000),
            max_delay_ms: Some(1000),
            ..Default::default()
        };
        assert!(matches!(Settings::resolve(inverted), Err(ConfigError::Jitter(_))));

        let zero_limit = Config {
            history_limit: Some(0),
            ..Default::default()
        };
        assert!(matches!(Settings::resolve(zero_limit), Err(ConfigError::ZeroHistoryLimit)));

        let half_tls = Config {
            tls_cert_path: Some(PathBuf::from("cert.pem")),
            ..Default::default()
        };
        assert!(matches!(Settings::resolve(half_tls), Err(ConfigError::PartialTls)));
    }
}
