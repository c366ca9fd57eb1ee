//! View configuration
//!
//! Configuration is a plain struct with defaults and `with_*` builders, and
//! can be loaded from environment variables.

use std::path::PathBuf;

use crate::{ConfigError, Mode};

/// Default LMDB map size in megabytes.
pub const DEFAULT_MAP_SIZE_MB: usize = 64;

/// Default maximum number of named LMDB databases (tables).
pub const DEFAULT_MAX_DBS: u32 = 64;

/// Settings for an LMDB-backed cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmdbConfig {
    /// Directory holding the LMDB environment.
    pub path: PathBuf,
    /// Maximum size of the memory map.
    pub map_size_mb: usize,
    /// Maximum number of named databases; one per entity plus the ledger.
    pub max_dbs: u32,
}

impl LmdbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size_mb: DEFAULT_MAP_SIZE_MB,
            max_dbs: DEFAULT_MAX_DBS,
        }
    }

    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    pub fn with_max_dbs(mut self, max_dbs: u32) -> Self {
        self.max_dbs = max_dbs;
        self
    }

    /// Map size in bytes, or `None` if it does not fit in `usize`.
    pub fn map_size_bytes(&self) -> Option<usize> {
        self.map_size_mb.checked_mul(1024 * 1024)
    }
}

/// Where the cache store lives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheLocation {
    /// Process-local, lost on exit.
    #[default]
    InMemory,
    /// Persistent LMDB environment.
    Lmdb(LmdbConfig),
}

/// Configuration for a view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewConfig {
    /// View-wide freshness mode.
    pub mode: Mode,
    /// Cache store location.
    pub cache: CacheLocation,
}

impl ViewConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cache(mut self, cache: CacheLocation) -> Self {
        self.cache = cache;
        self
    }

    /// Create ViewConfig from environment variables.
    ///
    /// Environment variables:
    /// - `DBVIEW_MODE`: `offline`, `prefer_cache`, or `freshen` (default: freshen)
    /// - `DBVIEW_CACHE_PATH`: LMDB directory; unset means an in-memory cache
    /// - `DBVIEW_CACHE_MAP_SIZE_MB`: LMDB map size (default: 64)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create ViewConfig from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match lookup("DBVIEW_MODE") {
            Some(raw) => raw.parse::<Mode>().map_err(|e| ConfigError::InvalidValue {
                field: "DBVIEW_MODE".to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => Mode::default(),
        };

        let cache = match lookup("DBVIEW_CACHE_PATH").filter(|p| !p.trim().is_empty()) {
            Some(path) => {
                let mut lmdb = LmdbConfig::new(path);
                if let Some(raw) = lookup("DBVIEW_CACHE_MAP_SIZE_MB") {
                    let size = raw
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .filter(|size| *size > 0)
                        .ok_or_else(|| ConfigError::InvalidValue {
                            field: "DBVIEW_CACHE_MAP_SIZE_MB".to_string(),
                            value: raw.clone(),
                            reason: "must be a positive integer".to_string(),
                        })?;
                    lmdb = lmdb.with_map_size_mb(size);
                    if lmdb.map_size_bytes().is_none() {
                        return Err(ConfigError::InvalidValue {
                            field: "DBVIEW_CACHE_MAP_SIZE_MB".to_string(),
                            value: raw,
                            reason: "map size in bytes overflows".to_string(),
                        });
                    }
                }
                CacheLocation::Lmdb(lmdb)
            }
            None => CacheLocation::InMemory,
        };

        Ok(Self { mode, cache })
    }
}
