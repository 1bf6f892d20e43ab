use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{
    MAX_TRANSACTIONS,
    error::{DatabaseError, Result},
};

const DEFAULT_PAGE_FILE: &str = "lumbung.db";
const DEFAULT_LOG_FILE: &str = "lumbung.log";

/// Where a store lives and how much memory it may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub page_file: PathBuf,
    pub log_file: PathBuf,
    /// Pages kept in memory before the least recently used are written back.
    pub page_cache_capacity: usize,
    /// Bytes of log appended before they are handed to the OS.
    pub log_buffer_size: usize,
    pub max_active_transactions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_file: PathBuf::from(DEFAULT_PAGE_FILE),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            page_cache_capacity: default_page_cache_capacity(),
            log_buffer_size: default_log_buffer_size(),
            max_active_transactions: MAX_TRANSACTIONS,
        }
    }
}

fn default_page_cache_capacity() -> usize {
    1024 // 4 MiB of pages
}

fn default_log_buffer_size() -> usize {
    64 * 1024
}

impl EngineConfig {
    /// Default file names inside `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            page_file: dir.join(DEFAULT_PAGE_FILE),
            log_file: dir.join(DEFAULT_LOG_FILE),
            ..Self::default()
        }
    }

    /// Defaults overridden by `LUMBUNG_PAGE_FILE`, `LUMBUNG_LOG_FILE` and
    /// `LUMBUNG_PAGE_CACHE`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("LUMBUNG_PAGE_FILE") {
            config.page_file = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("LUMBUNG_LOG_FILE") {
            config.log_file = PathBuf::from(path);
        }
        if let Ok(raw) = std::env::var("LUMBUNG_PAGE_CACHE") {
            config.page_cache_capacity =
                raw.trim().parse().map_err(|_| DatabaseError::InvalidConfig {
                    reason: format!("LUMBUNG_PAGE_CACHE must be a page count, got '{}'", raw),
                })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_file == self.log_file {
            return Err(DatabaseError::InvalidConfig {
                reason: format!(
                    "page file and log file must differ, both are '{}'",
                    self.page_file.display()
                ),
            });
        }
        if self.page_cache_capacity == 0 {
            return Err(DatabaseError::InvalidConfig {
                reason: "page_cache_capacity must be at least 1".to_string(),
            });
        }
        if self.max_active_transactions == 0 {
            return Err(DatabaseError::InvalidConfig {
                reason: "max_active_transactions must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
