/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{FlickrdError, Result};
use crate::tokens::{Credential, TokenStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS flickr_photos (
    photo_id TEXT PRIMARY KEY,
    downloaded INTEGER NOT NULL DEFAULT 0,
    local_path TEXT,
    taken_at TEXT,
    posted_at TEXT,
    camera TEXT,
    md5 TEXT,
    size_bytes INTEGER,
    last_checked_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS oauth_tokens (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    credential TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where a photo was saved and when it was last listed
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PhotoRecord {
    pub(crate) photo_id: String,
    pub(crate) downloaded: bool,
    pub(crate) local_path: Option<PathBuf>,
    pub(crate) size_bytes: Option<u64>,
    /// UTC
    pub(crate) last_checked_at: NaiveDateTime,
}

/// What is known about a finished download
#[derive(Debug, Clone, Default)]
pub(crate) struct DownloadFacts<'a> {
    pub(crate) taken_at: Option<NaiveDateTime>,
    pub(crate) posted_at: Option<NaiveDateTime>,
    pub(crate) camera: Option<&'a str>,
    pub(crate) md5: Option<&'a str>,
    pub(crate) size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct CacheStats {
    pub(crate) downloaded: u64,
    pub(crate) seen: u64,
    pub(crate) total_bytes: u64,
}

/// Remembers which photos were already downloaded, and the OAuth token.
///
/// Single process use only.
pub(crate) struct LocalCache {
    conn: Connection,
}

impl LocalCache {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FlickrdError::filesystem(parent, e))?;
        }
        log::debug!("Opening cache {}", path.display());
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// True iff the photo was downloaded before
    pub(crate) fn has(&self, photo_id: &str) -> Result<bool> {
        let downloaded: Option<bool> = self
            .conn
            .query_row(
                "SELECT downloaded FROM flickr_photos WHERE photo_id = ?1",
                params![photo_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(downloaded.unwrap_or(false))
    }

    /// Marks a photo as downloaded to `local_path`
    pub(crate) fn record(&self, photo_id: &str, local_path: &Path, facts: &DownloadFacts) -> Result<()> {
        let path_str = local_path.to_string_lossy().into_owned();
        if path_str.is_empty() {
            return Err(FlickrdError::filesystem(
                local_path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty local path"),
            ));
        }
        self.conn.execute(
            r#"INSERT INTO flickr_photos (photo_id, downloaded, local_path, taken_at, posted_at, camera, md5, size_bytes, last_checked_at)
               VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               ON CONFLICT(photo_id) DO UPDATE SET
                   downloaded = 1,
                   local_path = excluded.local_path,
                   taken_at = excluded.taken_at,
                   posted_at = excluded.posted_at,
                   camera = excluded.camera,
                   md5 = excluded.md5,
                   size_bytes = excluded.size_bytes,
                   last_checked_at = excluded.last_checked_at"#,
            params![
                photo_id,
                path_str,
                facts.taken_at.map(format_ts),
                facts.posted_at.map(format_ts),
                facts.camera,
                facts.md5,
                facts.size_bytes.map(|v| v as i64),
                now(),
            ],
        )?;
        Ok(())
    }

    /// Notes that the photo was seen in a listing, creating the row if needed.
    /// The downloaded flag is left alone.
    pub(crate) fn touch_seen(&self, photo_id: &str) -> Result<()> {
        self.conn.execute(
            r#"INSERT INTO flickr_photos (photo_id, downloaded, last_checked_at) VALUES (?1, 0, ?2)
               ON CONFLICT(photo_id) DO UPDATE SET last_checked_at = excluded.last_checked_at"#,
            params![photo_id, now()],
        )?;
        Ok(())
    }

    pub(crate) fn lookup(&self, photo_id: &str) -> Result<Option<PhotoRecord>> {
        let record = self
            .conn
            .query_row(
                r#"SELECT photo_id, downloaded, local_path, size_bytes, last_checked_at
                   FROM flickr_photos WHERE photo_id = ?1"#,
                params![photo_id],
                |row| {
                    Ok(PhotoRecord {
                        photo_id: row.get(0)?,
                        downloaded: row.get(1)?,
                        local_path: row.get::<_, Option<String>>(2)?.map(PathBuf::from),
                        size_bytes: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
                        last_checked_at: parse_ts(&row.get::<_, String>(4)?).unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub(crate) fn stats(&self) -> Result<CacheStats> {
        let stats = self.conn.query_row(
            r#"SELECT COALESCE(SUM(downloaded), 0), COUNT(*), COALESCE(SUM(CASE WHEN downloaded = 1 THEN size_bytes END), 0)
               FROM flickr_photos"#,
            [],
            |row| {
                Ok(CacheStats {
                    downloaded: row.get::<_, i64>(0)? as u64,
                    seen: row.get::<_, i64>(1)? as u64,
                    total_bytes: row.get::<_, i64>(2)? as u64,
                })
            },
        )?;
        Ok(stats)
    }

    /// Removes every photo row and the stored credential
    pub(crate) fn clear(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        let photos = tx.execute("DELETE FROM flickr_photos", [])?;
        tx.execute("DELETE FROM oauth_tokens", [])?;
        tx.commit()?;
        log::debug!("Removed {} photo records and the stored token", photos);
        Ok(())
    }
}

impl TokenStore for LocalCache {
    fn load_credential(&self) -> Result<Option<Credential>> {
        let stored: Option<String> = self
            .conn
            .query_row("SELECT credential FROM oauth_tokens WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        match stored {
            None => Ok(None),
            Some(json) => match serde_json::from_str(&json) {
                Ok(credential) => Ok(Some(credential)),
                Err(err) => {
                    log::warn!("Ignoring unreadable stored token: {}", err);
                    Ok(None)
                }
            },
        }
    }

    fn save_credential(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_string(credential)
            .map_err(|e| FlickrdError::Auth(e.to_string()))?;
        self.conn.execute(
            r#"INSERT INTO oauth_tokens (id, credential) VALUES (1, ?1)
               ON CONFLICT(id) DO UPDATE SET credential = excluded.credential, created_at = datetime('now')"#,
            params![json],
        )?;
        Ok(())
    }

    fn delete_credential(&self) -> Result<()> {
        self.conn.execute("DELETE FROM oauth_tokens", [])?;
        Ok(())
    }
}

fn now() -> String {
    Utc::now().naive_utc().format(TS_FORMAT).to_string()
}

fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(v: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(v, TS_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TS_FORMAT).unwrap()
    }

    fn credential() -> Credential {
        Credential {
            api_key: "key".to_string(),
            token: "token".to_string(),
            token_secret: "secret".to_string(),
            user_nsid: "1@N00".to_string(),
            username: "me".to_string(),
            fullname: None,
        }
    }

    #[test]
    fn record_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("flickrd.sqlite");
        {
            let cache = LocalCache::open(&db).unwrap();
            assert!(!cache.has("100").unwrap());
            cache
                .record(
                    "100",
                    Path::new("photos/2016-03-01_101530(X100).jpg"),
                    &DownloadFacts {
                        taken_at: Some(ts("2016-03-01 10:15:30")),
                        camera: Some("X100"),
                        size_bytes: Some(2048),
                        ..Default::default()
                    },
                )
                .unwrap();
            assert!(cache.has("100").unwrap());
        }

        let cache = LocalCache::open(&db).unwrap();
        assert!(cache.has("100").unwrap());
        let record = cache.lookup("100").unwrap().unwrap();
        assert!(record.downloaded);
        assert_eq!(
            record.local_path,
            Some(PathBuf::from("photos/2016-03-01_101530(X100).jpg"))
        );
        assert_eq!(record.photo_id, "100");
        assert_eq!(record.size_bytes, Some(2048));
        assert!(record.last_checked_at > ts("2020-01-01 00:00:00"));
    }

    #[test]
    fn touch_seen_does_not_mark_downloaded() {
        let cache = LocalCache::open_in_memory().unwrap();
        cache.touch_seen("7").unwrap();
        assert!(!cache.has("7").unwrap());
        assert!(!cache.lookup("7").unwrap().unwrap().downloaded);

        cache.record("7", Path::new("a.jpg"), &DownloadFacts::default()).unwrap();
        cache.touch_seen("7").unwrap();
        assert!(cache.has("7").unwrap());
        assert_eq!(
            cache.lookup("7").unwrap().unwrap().local_path,
            Some(PathBuf::from("a.jpg"))
        );
    }

    #[test]
    fn one_row_per_photo() {
        let cache = LocalCache::open_in_memory().unwrap();
        cache.touch_seen("1").unwrap();
        cache.record("1", Path::new("a.jpg"), &DownloadFacts::default()).unwrap();
        cache.record("1", Path::new("b.jpg"), &DownloadFacts::default()).unwrap();
        cache.touch_seen("2").unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.seen, 2);
        assert_eq!(stats.downloaded, 1);
        assert_eq!(
            cache.lookup("1").unwrap().unwrap().local_path,
            Some(PathBuf::from("b.jpg"))
        );
    }

    #[test]
    fn empty_path_is_rejected() {
        let cache = LocalCache::open_in_memory().unwrap();
        assert!(cache.record("1", Path::new(""), &DownloadFacts::default()).is_err());
        assert!(!cache.has("1").unwrap());
    }

    #[test]
    fn stats_sum_downloaded_sizes() {
        let cache = LocalCache::open_in_memory().unwrap();
        let facts = |size| DownloadFacts {
            size_bytes: Some(size),
            ..Default::default()
        };
        cache.record("1", Path::new("a.jpg"), &facts(1000)).unwrap();
        cache.record("2", Path::new("b.jpg"), &facts(500)).unwrap();
        cache.touch_seen("3").unwrap();

        assert_eq!(
            cache.stats().unwrap(),
            CacheStats {
                downloaded: 2,
                seen: 3,
                total_bytes: 1500
            }
        );
    }

    #[test]
    fn clear_removes_photos_and_credential() {
        let mut cache = LocalCache::open_in_memory().unwrap();
        cache.save_credential(&credential()).unwrap();
        cache.record("1", Path::new("a.jpg"), &DownloadFacts::default()).unwrap();

        cache.clear().unwrap();
        assert!(!cache.has("1").unwrap());
        assert_eq!(cache.load_credential().unwrap(), None);
        assert_eq!(cache.stats().unwrap(), CacheStats::default());
    }

    #[test]
    fn credential_round_trip_replaces_previous() {
        let cache = LocalCache::open_in_memory().unwrap();
        assert_eq!(cache.load_credential().unwrap(), None);

        cache.save_credential(&credential()).unwrap();
        let mut newer = credential();
        newer.token = "newer".to_string();
        cache.save_credential(&newer).unwrap();
        assert_eq!(cache.load_credential().unwrap(), Some(newer));

        cache.delete_credential().unwrap();
        assert_eq!(cache.load_credential().unwrap(), None);
    }
}
