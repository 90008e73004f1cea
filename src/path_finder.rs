/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use std::path::{Path, PathBuf};

use crate::error::{FlickrdError, Result};

// Builds the paths needed for storing state and reading config.
#[derive(Debug, Clone)]
pub(crate) struct PathFinder {
    state_dir: PathBuf,
    config_file: PathBuf,
}
impl PathFinder {
    const STATE_DIR: &str = ".flickr";
    const CACHE_FILE: &str = "flickrd.sqlite";
    const CONFIG_FILE: &str = "flickrd.ini";
    const LOG_FILE: &str = "flickrd.log";

    /// Uses FLICKRD_HOME / FLICKRD_CONFIG when set, otherwise `~/.flickr` and
    /// `flickrd.ini` in the working directory.
    pub(crate) fn from_env() -> Result<Self> {
        let state_dir = match std::env::var("FLICKRD_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(PathFinder::STATE_DIR),
        };
        let config_file = std::env::var("FLICKRD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(PathFinder::CONFIG_FILE));
        Self::new(state_dir, config_file)
    }

    pub(crate) fn new<P: Into<PathBuf>, C: Into<PathBuf>>(state_dir: P, config_file: C) -> Result<Self> {
        let finder = Self {
            state_dir: state_dir.into(),
            config_file: config_file.into(),
        };

        // Create state dir if it doesn't exists
        std::fs::create_dir_all(&finder.state_dir)
            .map_err(|e| FlickrdError::filesystem(&finder.state_dir, e))?;
        Ok(finder)
    }

    pub(crate) fn get_state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub(crate) fn get_cache_file(&self) -> PathBuf {
        self.state_dir.join(PathFinder::CACHE_FILE)
    }

    pub(crate) fn get_log_file(&self) -> PathBuf {
        self.state_dir.join(PathFinder::LOG_FILE)
    }

    pub(crate) fn does_cache_file_exist(&self) -> bool {
        std::fs::exists(self.get_cache_file()).unwrap_or_default()
    }

    pub(crate) fn get_config_file(&self) -> &Path {
        &self.config_file
    }
}
