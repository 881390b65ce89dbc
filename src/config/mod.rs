//! Configuration management for the onair playout engine
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Validation runs once at startup; configuration
//! problems are fatal there and never surface inside the playout loop.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::selector::SelectorMode;

/// Longest accepted exclusion window (one year)
pub const MAX_EXCLUSION_WINDOW_HOURS: u64 = 24 * 365;

/// Longest accepted resume recency window (one day)
pub const MAX_RESUME_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Object store configuration
    pub storage: StorageConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Playout configuration
    pub radio: RadioConfig,

    /// Track selection tunables
    pub selection: SelectionConfig,

    /// Crash-recovery configuration
    pub resume: ResumeConfig,

    /// Segment uploader configuration
    pub uploader: UploaderConfig,

    /// Encoder subprocess configuration
    pub encoder: EncoderConfig,

    /// Helper HTTP server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend provider ("local" or "s3")
    pub provider: String,

    /// Root directory for the local provider
    pub root: PathBuf,

    /// Bucket holding the music library
    pub bucket_prod: String,

    /// Bucket receiving stream segments and the now-playing beacon
    pub bucket_stream: String,

    /// S3-compatible endpoint, e.g. `https://s3.us-west-004.backblazeb2.com`
    pub endpoint: String,

    /// Signing region
    pub region: String,

    pub access_key_id: String,

    pub secret_access_key: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Playout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Directory the encoder writes segments and the manifest into
    pub segment_dir: PathBuf,

    /// Local track cache directory
    pub cache_dir: PathBuf,

    /// Number of upcoming tracks to prefetch
    pub prefetch_count: usize,

    /// Selector used when a slot names no mode
    pub default_mode: String,

    /// Namespace for music tracks
    pub music_prefix: String,

    /// Namespace for station identification clips
    pub jingle_prefix: String,

    /// Play one jingle after this many music tracks (0 disables)
    pub jingle_interval: u32,

    /// Optional TOML timetable; the database schedule is used when absent
    pub timetable_path: Option<PathBuf>,

    /// Delay before retrying when the library yields nothing
    pub empty_library_retry_secs: u64,
}

/// Track selection tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Tracks played within this many hours are excluded
    pub exclusion_window_hours: u64,

    /// Number of recent plays whose artists are excluded
    pub artist_separation: usize,

    /// Starvation candidate pool size
    pub pool_size: usize,

    /// Starvation working queue size
    pub queue_size: usize,

    /// Harmonic candidate pool size
    pub harmonic_pool_size: usize,

    /// Below this many candidates, constraints are relaxed
    pub min_pool: usize,

    /// Half-width of the harmonic score jitter
    pub jitter: f64,
}

/// Crash-recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    /// Persisted state younger than this triggers a warm resume
    pub window_secs: u64,

    /// Added to the persisted segment sequence on warm resume
    pub sequence_margin: u64,
}

/// Segment uploader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Directory scan interval in milliseconds
    pub poll_interval_ms: u64,

    /// Files modified more recently than this are skipped
    pub debounce_ms: u64,

    /// Rolling manifest file name
    pub manifest_name: String,

    /// Purge the uploaded set once it holds this many names
    pub purge_threshold: usize,
}

/// Encoder subprocess configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoder executable
    pub binary: String,
    pub log_level: String,
    pub input_format: String,
    pub fflags: String,
    pub audio_filter: String,
    pub codec: String,
    pub bitrate: String,
    pub channels: u32,
    pub segment_time: u32,
    pub list_size: u32,
    pub hls_flags: String,
}

/// Helper HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address; the server is disabled when unset
    pub bind_address: Option<String>,

    /// Public base URL of the stream bucket
    pub public_base_url: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Every value falls back to [`Config::default`] when its `ONAIR_*`
    /// variable is missing or unparsable.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();

        Ok(Self {
            storage: StorageConfig {
                provider: env_string("ONAIR_STORAGE_PROVIDER", d.storage.provider),
                root: env_string("ONAIR_STORAGE_ROOT", d.storage.root.display().to_string())
                    .into(),
                bucket_prod: env_string("ONAIR_BUCKET_PROD", d.storage.bucket_prod),
                bucket_stream: env_string("ONAIR_BUCKET_STREAM", d.storage.bucket_stream),
                endpoint: env_string("ONAIR_S3_ENDPOINT", d.storage.endpoint),
                region: env_string("ONAIR_S3_REGION", d.storage.region),
                access_key_id: env_string("ONAIR_S3_ACCESS_KEY_ID", d.storage.access_key_id),
                secret_access_key: env_string(
                    "ONAIR_S3_SECRET_ACCESS_KEY",
                    d.storage.secret_access_key,
                ),
            },
            database: DatabaseConfig {
                sqlite_path: env_string(
                    "ONAIR_SQLITE_PATH",
                    d.database.sqlite_path.display().to_string(),
                )
                .into(),
            },
            radio: RadioConfig {
                segment_dir: env_string(
                    "ONAIR_SEGMENT_DIR",
                    d.radio.segment_dir.display().to_string(),
                )
                .into(),
                cache_dir: env_string("ONAIR_CACHE_DIR", d.radio.cache_dir.display().to_string())
                    .into(),
                prefetch_count: env_or("ONAIR_PREFETCH_COUNT", d.radio.prefetch_count),
                default_mode: env_string("ONAIR_DEFAULT_MODE", d.radio.default_mode),
                music_prefix: env_string("ONAIR_MUSIC_PREFIX", d.radio.music_prefix),
                jingle_prefix: env_string("ONAIR_JINGLE_PREFIX", d.radio.jingle_prefix),
                jingle_interval: env_or("ONAIR_JINGLE_INTERVAL", d.radio.jingle_interval),
                timetable_path: std::env::var("ONAIR_TIMETABLE").ok().map(PathBuf::from),
                empty_library_retry_secs: env_or(
                    "ONAIR_EMPTY_LIBRARY_RETRY",
                    d.radio.empty_library_retry_secs,
                ),
            },
            selection: SelectionConfig {
                exclusion_window_hours: env_or(
                    "ONAIR_EXCLUSION_WINDOW_HOURS",
                    d.selection.exclusion_window_hours,
                ),
                artist_separation: env_or(
                    "ONAIR_ARTIST_SEPARATION",
                    d.selection.artist_separation,
                ),
                pool_size: env_or("ONAIR_POOL_SIZE", d.selection.pool_size),
                queue_size: env_or("ONAIR_QUEUE_SIZE", d.selection.queue_size),
                harmonic_pool_size: env_or(
                    "ONAIR_HARMONIC_POOL_SIZE",
                    d.selection.harmonic_pool_size,
                ),
                min_pool: env_or("ONAIR_MIN_POOL", d.selection.min_pool),
                jitter: env_or("ONAIR_JITTER", d.selection.jitter),
            },
            resume: ResumeConfig {
                window_secs: env_or("ONAIR_RESUME_WINDOW_SECS", d.resume.window_secs),
                sequence_margin: env_or("ONAIR_RESUME_MARGIN", d.resume.sequence_margin),
            },
            uploader: UploaderConfig {
                poll_interval_ms: env_or("ONAIR_UPLOAD_POLL_MS", d.uploader.poll_interval_ms),
                debounce_ms: env_or("ONAIR_UPLOAD_DEBOUNCE_MS", d.uploader.debounce_ms),
                manifest_name: d.uploader.manifest_name,
                purge_threshold: env_or(
                    "ONAIR_UPLOAD_PURGE_THRESHOLD",
                    d.uploader.purge_threshold,
                ),
            },
            encoder: EncoderConfig {
                binary: env_string("ONAIR_ENCODER", d.encoder.binary),
                bitrate: env_string("ONAIR_BITRATE", d.encoder.bitrate),
                segment_time: env_or("ONAIR_SEGMENT_TIME", d.encoder.segment_time),
                list_size: env_or("ONAIR_LIST_SIZE", d.encoder.list_size),
                ..d.encoder
            },
            server: ServerConfig {
                bind_address: std::env::var("ONAIR_BIND_ADDRESS").ok(),
                public_base_url: env_string("ONAIR_PUBLIC_URL", d.server.public_base_url),
            },
            logging: LoggingConfig {
                level: env_string("ONAIR_LOG_LEVEL", d.logging.level),
                format: env_string("ONAIR_LOG_FORMAT", d.logging.format),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        match self.storage.provider.as_str() {
            "local" => {}
            "s3" => {
                if self.storage.endpoint.is_empty() {
                    anyhow::bail!("storage.endpoint is required for the s3 provider");
                }
                if self.storage.access_key_id.is_empty()
                    || self.storage.secret_access_key.is_empty()
                {
                    anyhow::bail!("storage credentials are required for the s3 provider");
                }
                if self.storage.region.is_empty() {
                    anyhow::bail!("storage.region must not be empty");
                }
            }
            other => anyhow::bail!("unsupported storage provider '{other}'"),
        }

        if self.storage.bucket_prod.is_empty() || self.storage.bucket_stream.is_empty() {
            anyhow::bail!("bucket names must not be empty");
        }

        SelectorMode::from_str(&self.radio.default_mode)
            .map_err(|e| anyhow::anyhow!("radio.default_mode: {e}"))?;

        if self.radio.music_prefix.is_empty() || self.radio.jingle_prefix.is_empty() {
            anyhow::bail!("namespace prefixes must not be empty");
        }

        if self.selection.pool_size == 0 || self.selection.queue_size == 0 {
            anyhow::bail!("pool_size and queue_size must be greater than 0");
        }

        if self.selection.harmonic_pool_size == 0 {
            anyhow::bail!("harmonic_pool_size must be greater than 0");
        }

        if self.selection.exclusion_window_hours > MAX_EXCLUSION_WINDOW_HOURS {
            anyhow::bail!(
                "exclusion_window_hours must be at most {MAX_EXCLUSION_WINDOW_HOURS}"
            );
        }

        if self.resume.window_secs > MAX_RESUME_WINDOW_SECS {
            anyhow::bail!("resume.window_secs must be at most {MAX_RESUME_WINDOW_SECS}");
        }

        if self.encoder.binary.trim().is_empty() {
            anyhow::bail!("encoder.binary must not be empty");
        }

        if self.selection.jitter < 0.0 {
            anyhow::bail!("jitter must not be negative");
        }

        if self.uploader.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }

        if self.uploader.manifest_name.is_empty() {
            anyhow::bail!("manifest_name must not be empty");
        }

        Ok(())
    }

    /// Exclusion window as a chrono duration
    #[must_use]
    pub fn exclusion_window(&self) -> chrono::Duration {
        self.selection.exclusion_window()
    }

    /// Resume recency window as a chrono duration
    #[must_use]
    pub fn resume_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.resume.window_secs.min(MAX_RESUME_WINDOW_SECS) as i64)
    }

    /// Uploader polling interval
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.uploader.poll_interval_ms)
    }

    /// Uploader debounce window
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.uploader.debounce_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: String::from("local"),
            root: PathBuf::from("data/buckets"),
            bucket_prod: String::from("prod"),
            bucket_stream: String::from("stream"),
            endpoint: String::new(),
            region: String::from("us-east-1"),
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/onair.db"),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            segment_dir: PathBuf::from("./hls_output"),
            cache_dir: PathBuf::from("tmp/track_cache"),
            prefetch_count: 5,
            default_mode: String::from("starvation"),
            music_prefix: String::from("music/"),
            jingle_prefix: String::from("station_id/"),
            jingle_interval: 3,
            timetable_path: None,
            empty_library_retry_secs: 10,
        }
    }
}

impl SelectionConfig {
    /// Exclusion window as a chrono duration
    #[must_use]
    pub fn exclusion_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.exclusion_window_hours.min(MAX_EXCLUSION_WINDOW_HOURS) as i64)
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            exclusion_window_hours: 12,
            artist_separation: 10,
            pool_size: 300,
            queue_size: 50,
            harmonic_pool_size: 200,
            min_pool: 5,
            jitter: 5.0,
        }
    }
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            window_secs: 600, // 10 minutes
            sequence_margin: 2,
        }
    }
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 800,
            debounce_ms: 1000,
            manifest_name: String::from("stream.m3u8"),
            purge_threshold: 100,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            binary: String::from("ffmpeg"),
            log_level: String::from("warning"),
            input_format: String::from("mp3"),
            fflags: String::from("+genpts+discardcorrupt+igndts"),
            audio_filter: String::from("aresample=async=1"),
            codec: String::from("aac"),
            bitrate: String::from("128k"),
            channels: 2,
            segment_time: 4,
            list_size: 15,
            hls_flags: String::from("append_list+omit_endlist+temp_file"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            public_base_url: String::from("http://localhost:8080/stream"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}
