//! Settings loading
//!
//! [`Settings`] is built once at process entry and handed to each component
//! constructor. Values come from, highest precedence first:
//!
//! 1. [`Overrides`] (CLI flags or their environment fallbacks)
//! 2. The `KEY=VALUE` config file
//! 3. Fixed defaults
//!
//! # Config file
//!
//! ```text
//! # replica-sync endpoints
//! SOURCE_REST_URL=http://localhost:6335
//! TARGET_REST_URL="https://replica.example.net:6333"
//! TARGET_API_KEY='abc123'   # inline comments are allowed
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use replica_store::{DEFAULT_REQUEST_TIMEOUT, HttpStore, StoreEndpoint};

use crate::{Error, Result};

pub const DEFAULT_SOURCE_URL: &str = "http://localhost:6335";
pub const DEFAULT_TARGET_URL: &str = "http://localhost:6333";
pub const DEFAULT_LOG_PREFIX: &str = "replica-sync";
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(1800);

const DEFAULT_CONFIG_FILE: &str = ".config/replica-sync/config.env";
const DEFAULT_FORWARD_SCRIPT: &str = "scripts/sync-to-remote.sh";
const DEFAULT_REVERSE_SCRIPT: &str = "scripts/sync-from-remote.sh";
const DEFAULT_LOG_DIR: &str = "logs";

const KEY_SOURCE_URL: &str = "SOURCE_REST_URL";
const KEY_SOURCE_API_KEY: &str = "SOURCE_API_KEY";
const KEY_TARGET_URL: &str = "TARGET_REST_URL";
const KEY_TARGET_API_KEY: &str = "TARGET_API_KEY";
const KEY_LOG_PREFIX: &str = "LOG_PREFIX";
const KEY_SYNC_TIMEOUT: &str = "SYNC_TIMEOUT_SECS";
const KEY_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT_SECS";

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub forward_script: Option<PathBuf>,
    pub reverse_script: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

/// Immutable process configuration
#[derive(Debug, Clone)]
pub struct Settings {
    /// Source store, the workstation instance
    pub local: StoreEndpoint,
    /// Target store
    pub remote: StoreEndpoint,
    /// Procedure that pushes local data to the remote store
    pub forward_script: PathBuf,
    /// Procedure that pulls remote data into the local store
    pub reverse_script: PathBuf,
    pub log_dir: PathBuf,
    pub log_prefix: String,
    pub sync_timeout: Duration,
    pub request_timeout: Duration,
}

impl Settings {
    /// Resolve settings against the user's home directory.
    ///
    /// A missing config file is not an error; an unreadable one is.
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let home = dirs::home_dir().ok_or(Error::NoHomeDir)?;
        let config_path = overrides
            .config_path
            .clone()
            .unwrap_or_else(|| home.join(DEFAULT_CONFIG_FILE));

        let values = match std::fs::read_to_string(&config_path) {
            Ok(contents) => {
                tracing::debug!(path = %config_path.display(), "Loaded config file");
                parse_env_file(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %config_path.display(), "Config file not found, using defaults");
                BTreeMap::new()
            }
            Err(source) => {
                return Err(Error::ConfigRead {
                    path: config_path,
                    source,
                });
            }
        };

        Self::resolve(&values, &home, overrides)
    }

    /// Combine parsed file values, overrides and defaults.
    pub fn resolve(
        values: &BTreeMap<String, String>,
        home: &Path,
        overrides: &Overrides,
    ) -> Result<Self> {
        let get = |key: &str| values.get(key).map(String::as_str);

        let local = StoreEndpoint::new(
            get(KEY_SOURCE_URL).unwrap_or(DEFAULT_SOURCE_URL),
            get(KEY_SOURCE_API_KEY).map(str::to_string),
        )?;
        let remote = StoreEndpoint::new(
            get(KEY_TARGET_URL).unwrap_or(DEFAULT_TARGET_URL),
            get(KEY_TARGET_API_KEY).map(str::to_string),
        )?;

        let log_prefix = match get(KEY_LOG_PREFIX) {
            Some(prefix) if !prefix.is_empty() => prefix.to_string(),
            _ => DEFAULT_LOG_PREFIX.to_string(),
        };

        Ok(Self {
            local,
            remote,
            forward_script: overrides
                .forward_script
                .clone()
                .unwrap_or_else(|| home.join(DEFAULT_FORWARD_SCRIPT)),
            reverse_script: overrides
                .reverse_script
                .clone()
                .unwrap_or_else(|| home.join(DEFAULT_REVERSE_SCRIPT)),
            log_dir: overrides
                .log_dir
                .clone()
                .unwrap_or_else(|| home.join(DEFAULT_LOG_DIR)),
            log_prefix,
            sync_timeout: seconds(get(KEY_SYNC_TIMEOUT), KEY_SYNC_TIMEOUT, DEFAULT_SYNC_TIMEOUT),
            request_timeout: seconds(
                get(KEY_REQUEST_TIMEOUT),
                KEY_REQUEST_TIMEOUT,
                DEFAULT_REQUEST_TIMEOUT,
            ),
        })
    }

    /// HTTP clients for the local and remote stores
    pub fn stores(&self) -> Result<(HttpStore, HttpStore)> {
        let local = HttpStore::with_timeout(self.local.clone(), self.request_timeout)?;
        let remote = HttpStore::with_timeout(self.remote.clone(), self.request_timeout)?;
        Ok((local, remote))
    }
}

fn seconds(raw: Option<&str>, key: &str, default: Duration) -> Duration {
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            tracing::warn!(
                key,
                value = raw,
                default_secs = default.as_secs(),
                "Invalid duration in config, using default"
            );
            default
        }
    }
}

/// Parse `KEY=VALUE` lines.
///
/// Blank lines, `#` comments and lines without `=` are skipped. Values lose
/// one layer of surrounding quotes and anything after an inline `#`. Later
/// keys overwrite earlier ones.
pub fn parse_env_file(contents: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let mut value = strip_quotes(value.trim());
        if let Some((before, _)) = value.split_once('#') {
            value = strip_quotes(before.trim());
        }

        values.insert(key.trim().to_string(), value.to_string());
    }

    values
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
