/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use std::path::PathBuf;

use thiserror::Error;

/// Failures that end a run.
#[derive(Debug, Error)]
pub enum FlickrdError {
    /// Missing or invalid configuration values
    #[error("{0}")]
    Config(String),

    /// OAuth handshake failed or the stored token was rejected
    #[error("Flickr authorization failed: {0}")]
    Auth(String),

    /// Network, HTTP or API level failure talking to Flickr
    #[error(
        "Flickr request failed: {0}\nFlickr limits the number of requests per hour. Wait about 30 minutes and run the command again."
    )]
    RemoteApi(String),

    #[error("file system error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("terminal input failed: {0}")]
    Terminal(#[source] std::io::Error),

    #[error("local cache error: {0}")]
    Cache(#[from] rusqlite::Error),
}

impl FlickrdError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<reqwest::Error> for FlickrdError {
    fn from(err: reqwest::Error) -> Self {
        Self::RemoteApi(err.to_string())
    }
}

impl From<reqwest_oauth1::Error> for FlickrdError {
    fn from(err: reqwest_oauth1::Error) -> Self {
        Self::RemoteApi(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlickrdError>;
