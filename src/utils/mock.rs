use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::{
    config::EngineConfig,
    engine::Engine,
    types::error::Result,
};

/// A store in a temporary directory that disappears with the value.
pub struct TempStore {
    dir: TempDir,
    pub config: EngineConfig,
}

impl TempStore {
    pub fn new() -> Self {
        Self::with_prefix("lumbung_test")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .unwrap_or_else(|e| panic!("cannot create temp dir: {e}"));
        let config = EngineConfig::in_dir(dir.path());
        Self { dir, config }
    }

    /// Small page cache so tests exercise eviction.
    pub fn with_cache_capacity(mut self, pages: usize) -> Self {
        self.config.page_cache_capacity = pages;
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn page_file(&self) -> PathBuf {
        self.config.page_file.clone()
    }

    pub fn log_file(&self) -> PathBuf {
        self.config.log_file.clone()
    }

    pub fn open(&self) -> Result<Engine> {
        Engine::init(self.config.clone())
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}
