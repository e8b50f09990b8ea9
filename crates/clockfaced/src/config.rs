use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MANAGER_PIN: &str = "1234";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration: optional TOML file overridden by `CLOCKFACE_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (default: 127.0.0.1:5000).
    pub bind_addr: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which a candidate is accepted.
    pub match_threshold: f32,
    /// Descriptor length produced by the extraction model.
    pub descriptor_dim: usize,
    /// Shared secret for manager-only operations.
    pub manager_pin: String,
    /// Descriptor extraction service endpoint; image input is refused when unset.
    pub extractor_url: Option<String>,
    /// Timeout in seconds for one extraction call.
    pub extract_timeout_secs: u64,
    /// Spreadsheet id for the report sink; mirroring is disabled when unset.
    pub spreadsheet_id: Option<String>,
    pub sheets_base_url: String,
    /// Tabular range rows are appended to and read from.
    pub sheets_range: String,
    /// Pre-issued bearer token for the sheets API.
    pub sheets_token: Option<String>,
    /// Timeout in seconds for one sink call.
    pub sink_timeout_secs: u64,
    /// Number of pending mirror rows held before new ones are dropped.
    pub mirror_queue_capacity: usize,
    /// Maximum accepted request body (base64 images are large).
    pub max_body_bytes: usize,
}

/// On-disk layer. Every key is optional; missing keys fall through to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind_addr: Option<String>,
    pub db_path: Option<PathBuf>,
    pub match_threshold: Option<f32>,
    pub descriptor_dim: Option<usize>,
    pub manager_pin: Option<String>,
    pub extractor_url: Option<String>,
    pub extract_timeout_secs: Option<u64>,
    pub spreadsheet_id: Option<String>,
    pub sheets_base_url: Option<String>,
    pub sheets_range: Option<String>,
    pub sheets_token: Option<String>,
    pub sink_timeout_secs: Option<u64>,
    pub mirror_queue_capacity: Option<usize>,
    pub max_body_bytes: Option<usize>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load configuration. `CLOCKFACE_CONFIG` names an optional TOML file;
    /// environment variables take precedence over it.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("CLOCKFACE_CONFIG") {
            Ok(path) => FileConfig::from_path(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::from_layers(file, |key| std::env::var(key).ok()))
    }

    fn from_layers(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = env("CLOCKFACE_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| default_data_dir(&env).join("attendance.db"));

        Self {
            bind_addr: env("CLOCKFACE_BIND_ADDR")
                .or(file.bind_addr)
                .unwrap_or_else(|| "127.0.0.1:5000".to_string()),
            db_path,
            match_threshold: parse_valid(
                &env,
                "CLOCKFACE_MATCH_THRESHOLD",
                file.match_threshold,
                clockface_core::DEFAULT_MATCH_THRESHOLD,
                |t: &f32| t.is_finite() && *t > 0.0,
            ),
            descriptor_dim: parse_or(
                &env,
                "CLOCKFACE_DESCRIPTOR_DIM",
                file.descriptor_dim,
                clockface_core::DEFAULT_DESCRIPTOR_DIM,
            ),
            manager_pin: env("CLOCKFACE_MANAGER_PIN")
                .or(file.manager_pin)
                .unwrap_or_else(|| DEFAULT_MANAGER_PIN.to_string()),
            extractor_url: non_empty(env("CLOCKFACE_EXTRACTOR_URL")).or(file.extractor_url),
            extract_timeout_secs: parse_or(
                &env,
                "CLOCKFACE_EXTRACT_TIMEOUT_SECS",
                file.extract_timeout_secs,
                10,
            ),
            spreadsheet_id: non_empty(env("CLOCKFACE_SPREADSHEET_ID")).or(file.spreadsheet_id),
            sheets_base_url: env("CLOCKFACE_SHEETS_BASE_URL")
                .or(file.sheets_base_url)
                .unwrap_or_else(|| "https://sheets.googleapis.com/v4".to_string()),
            sheets_range: env("CLOCKFACE_SHEETS_RANGE")
                .or(file.sheets_range)
                .unwrap_or_else(|| "Sheet1!A:D".to_string()),
            sheets_token: non_empty(env("CLOCKFACE_SHEETS_TOKEN")).or(file.sheets_token),
            sink_timeout_secs: parse_or(
                &env,
                "CLOCKFACE_SINK_TIMEOUT_SECS",
                file.sink_timeout_secs,
                10,
            ),
            mirror_queue_capacity: parse_or(
                &env,
                "CLOCKFACE_MIRROR_QUEUE_CAPACITY",
                file.mirror_queue_capacity,
                256,
            )
            .max(1),
            max_body_bytes: parse_or(
                &env,
                "CLOCKFACE_MAX_BODY_BYTES",
                file.max_body_bytes,
                50 * 1024 * 1024,
            ),
        }
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }

    pub fn uses_default_pin(&self) -> bool {
        self.manager_pin == DEFAULT_MANAGER_PIN
    }
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("clockface")
}

/// Environment value if set and parseable, else the file value, else `default`.
/// Unparseable environment values are ignored rather than fatal.
fn parse_or<T: FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    file_value: Option<T>,
    default: T,
) -> T {
    parse_valid(env, key, file_value, default, |_| true)
}

/// Like `parse_or`, but a value from either layer that fails `valid` is
/// treated as absent.
fn parse_valid<T: FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    file_value: Option<T>,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T {
    let from_env = env(key).and_then(|v| {
        let parsed = v.trim().parse().ok().filter(|t| valid(t));
        if parsed.is_none() {
            tracing::warn!(key, value = %v, "ignoring invalid configuration value");
        }
        parsed
    });
    from_env
        .or(file_value.filter(|t| valid(t)))
        .unwrap_or(default)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
