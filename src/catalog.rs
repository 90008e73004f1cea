/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use std::path::Path;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use futures::Stream;

use crate::error::Result;

/// Which photos a command operates on
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Selection {
    All,
    Album(String),
    Taken(DateRange),
    Posted(DateRange),
}

impl Selection {
    /// Exact client-side check of the date bounds the server was asked for
    pub(crate) fn admits(&self, photo: &PhotoRef) -> bool {
        match self {
            Selection::All | Selection::Album(_) => true,
            Selection::Taken(range) => photo.taken_at.is_none_or(|ts| range.contains(ts)),
            Selection::Posted(range) => photo.posted_at.is_none_or(|ts| range.contains(ts)),
        }
    }
}

impl std::fmt::Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Selection::All => write!(f, "all photos"),
            Selection::Album(id) => write!(f, "album {}", id),
            Selection::Taken(range) => write!(f, "photos taken {}", range),
            Selection::Posted(range) => write!(f, "photos posted {}", range),
        }
    }
}

/// Inclusive range of whole days in local time
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DateRange {
    pub(crate) start: NaiveDate,
    pub(crate) end: NaiveDate,
}

impl DateRange {
    pub(crate) fn new(start: NaiveDate, end: Option<NaiveDate>) -> Self {
        Self {
            start,
            end: end.unwrap_or(start),
        }
    }

    /// First second of the start day
    pub(crate) fn first_moment(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    /// Last second of the end day
    pub(crate) fn last_moment(&self) -> NaiveDateTime {
        self.end.and_hms_opt(23, 59, 59).unwrap_or(self.end.and_time(NaiveTime::MIN))
    }

    pub(crate) fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.first_moment() && ts <= self.last_moment()
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "on {}", self.start)
        } else {
            write!(f, "from {} to {}", self.start, self.end)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MediaType {
    Photo,
    Video,
}

/// A photo as it appears in a catalog listing
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PhotoRef {
    pub(crate) id: String,
    pub(crate) taken_at: Option<NaiveDateTime>,
    pub(crate) posted_at: Option<NaiveDateTime>,
    pub(crate) media: MediaType,
    /// Extension of the original upload, e.g. `jpg`
    pub(crate) original_format: Option<String>,
}

impl PhotoRef {
    pub(crate) fn is_video(&self) -> bool {
        self.media == MediaType::Video
    }
}

impl std::fmt::Display for PhotoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.taken_at {
            Some(ts) => write!(f, "{} ({})", self.id, ts),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Details resolved per photo right before download
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Original {
    pub(crate) url: String,
    pub(crate) camera: Option<String>,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

/// What a finished download wrote to disk
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Downloaded {
    pub(crate) bytes: u64,
    /// Lowercase hex md5 of the body, computed while it was written
    pub(crate) md5: String,
}

/// Totals from a one-item listing of a selection
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ListingSummary {
    pub(crate) total: u64,
    pub(crate) title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Album {
    pub(crate) album_id: String,
    pub(crate) title: String,
    pub(crate) photo_count: u64,
    pub(crate) video_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct UserInfo {
    pub(crate) nsid: String,
    pub(crate) username: String,
    pub(crate) realname: Option<String>,
    pub(crate) profile_url: Option<String>,
    pub(crate) photo_count: u64,
    pub(crate) first_taken: Option<String>,
    pub(crate) first_posted: Option<NaiveDateTime>,
}

/// Unix time of a wall clock time in the local zone
pub(crate) fn local_timestamp(ts: NaiveDateTime) -> i64 {
    Local
        .from_local_datetime(&ts)
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| ts.and_utc().timestamp())
}

/// Read access to a user's photos.
///
/// Listings are lazy and can be restarted by calling `photos` again.
pub(crate) trait PhotoCatalog {
    fn photos(&self, selection: &Selection) -> impl Stream<Item = Result<PhotoRef>> + '_;

    async fn summary(&self, selection: &Selection) -> Result<ListingSummary>;

    async fn resolve_original(&self, photo: &PhotoRef) -> Result<Original>;

    /// Streams the original into `dest`, hashing it on the way
    async fn download(&self, original: &Original, dest: &Path) -> Result<Downloaded>;
}
