//! Configuration management for the OTA image server

use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root data directory (holds `config.json` for device lookups).
    pub data_dir: PathBuf,
    /// Directory images are stored under, one subdirectory per serial.
    pub images_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Ceiling on a fully assembled upload, in bytes.
    pub max_file_size: u64,
    /// Ceiling on a single chunk, in bytes.
    pub max_chunk_size: u64,
    /// Ceiling on a single-request (non-chunked) upload body, in bytes.
    pub max_upload_size: usize,
    /// Inactivity window after which a chunked upload is abandoned.
    pub chunk_timeout: Duration,
}

/// 16 GiB assembled-file ceiling.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 16 * 1024 * 1024 * 1024;

/// 100 MiB per-chunk ceiling.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// 1 GiB single-request upload ceiling.
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 1024 * 1024 * 1024;

/// 5 minute chunked-upload inactivity window.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("/opt/ota");
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 9080,
            },
            storage: StorageConfig {
                images_dir: data_dir.join("images"),
                data_dir,
            },
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(env::var("DATA").unwrap_or_else(|_| "/opt/ota".to_string()));
        let images_dir = env::var("DATA_IMAGES")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("images"));

        Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(9080),
            },
            storage: StorageConfig {
                data_dir,
                images_dir,
            },
            limits: LimitsConfig {
                max_file_size: env_u64("OTA_MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE),
                max_chunk_size: env_u64("OTA_MAX_CHUNK_SIZE", DEFAULT_MAX_CHUNK_SIZE),
                max_upload_size: env_u64("OTA_MAX_UPLOAD_SIZE", DEFAULT_MAX_UPLOAD_SIZE as u64)
                    as usize,
                chunk_timeout: Duration::from_secs(env_u64(
                    "OTA_CHUNK_TIMEOUT_SECS",
                    DEFAULT_CHUNK_TIMEOUT.as_secs(),
                )),
            },
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
