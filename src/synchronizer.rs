/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use filetime::FileTime;
use futures::{StreamExt, pin_mut};
use humansize::{DECIMAL, format_size};
use image::ImageReader;

use crate::PathFinder;
use crate::catalog::{Downloaded, ListingSummary, PhotoCatalog, PhotoRef, Selection, local_timestamp};
use crate::config::Config;
use crate::error::{FlickrdError, Result};
use crate::flickr_client::FlickrClient;
use crate::interaction::{Console, Interaction};
use crate::local_cache::{DownloadFacts, LocalCache};
use crate::namer::{NamingInput, Namer, PhotoPath, extension_for};
use crate::tokens::get_full_auth_tokens;

/// Pause between two polls in sync mode, counted from the end of a poll
pub(crate) const SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

// Newest photos are listed first, so a long run of known ones means nothing new follows
const CAUGHT_UP_AFTER: u32 = 100;

// name.jpg, name-2.jpg ... name-98.jpg
const MAX_NAME_NUMBER: u32 = 98;

// Enough for the image crate to recognise every format it knows
const FORMAT_HEADER_LEN: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Download the selection once and stop
    Once,
    /// Keep polling all photos for new uploads
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Selecting,
    Fetching,
    Idle,
    Done,
}

/// Counters for one poll, or summed over a run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct PollStats {
    pub(crate) listed: u64,
    pub(crate) downloaded: u64,
    pub(crate) cached: u64,
    pub(crate) videos: u64,
    pub(crate) duplicates: u64,
    /// Downloaded earlier, but the file is gone or has changed size
    pub(crate) missing: u64,
    pub(crate) bytes: u64,
}

impl PollStats {
    fn add(&mut self, other: &PollStats) {
        self.listed += other.listed;
        self.downloaded += other.downloaded;
        self.cached += other.cached;
        self.videos += other.videos;
        self.duplicates += other.duplicates;
        self.missing += other.missing;
        self.bytes += other.bytes;
    }
}

/// Drives a selection through listing, download and (in sync mode) waiting.
///
/// Every photo is processed to completion before the next one is listed,
/// and the cache is only written once the file is in its final place.
pub(crate) struct Synchronizer<'a, C, I> {
    catalog: &'a C,
    cache: &'a LocalCache,
    interaction: &'a mut I,
    selection: Selection,
    mode: Mode,
    namer: Namer,
    download_dir: PathBuf,
    interval: Duration,
    owner: String,
    state: State,
    confirmed: bool,
    expected: u64,
    last_poll: PollStats,
    totals: PollStats,
}

impl<'a, C: PhotoCatalog, I: Interaction> Synchronizer<'a, C, I> {
    pub(crate) fn new(
        catalog: &'a C,
        cache: &'a LocalCache,
        interaction: &'a mut I,
        selection: Selection,
        mode: Mode,
        namer: Namer,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            cache,
            interaction,
            selection,
            mode,
            namer,
            download_dir: download_dir.into(),
            interval: SYNC_INTERVAL,
            owner: String::new(),
            state: State::Selecting,
            confirmed: false,
            expected: 0,
            last_poll: PollStats::default(),
            totals: PollStats::default(),
        }
    }

    pub(crate) fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Account name shown before the first download
    pub(crate) fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn last_poll(&self) -> PollStats {
        self.last_poll
    }

    /// Steps until done. In sync mode this only returns on error.
    pub(crate) async fn run(&mut self) -> Result<PollStats> {
        while self.state() != State::Done {
            self.step().await?;
        }
        Ok(self.totals)
    }

    pub(crate) async fn step(&mut self) -> Result<()> {
        self.state = match self.state {
            State::Selecting => self.select().await?,
            State::Fetching => {
                let stats = self.fetch().await?;
                self.last_poll = stats;
                self.totals.add(&stats);
                self.report();
                self.after_poll()
            }
            State::Idle => {
                log::debug!("Checking for new photos in {}s", self.interval.as_secs());
                tokio::time::sleep(self.interval).await;
                State::Selecting
            }
            State::Done => State::Done,
        };
        Ok(())
    }

    fn after_poll(&self) -> State {
        match self.mode {
            Mode::Once => State::Done,
            Mode::Sync => State::Idle,
        }
    }

    async fn select(&mut self) -> Result<State> {
        let summary = self.catalog.summary(&self.selection).await?;
        self.expected = summary.total;
        if summary.total == 0 {
            log::info!("Nothing to download for {}", self.selection);
            self.last_poll = PollStats::default();
            return Ok(self.after_poll());
        }

        if !self.confirmed {
            if let (Selection::Album(_), Some(title)) = (&self.selection, summary.title.as_deref()) {
                self.namer = self.namer.clone().with_prefix(title);
            }
            if !self.ask_to_start(&summary)? {
                log::info!("Download cancelled");
                return Ok(State::Done);
            }
            self.confirmed = true;
        }
        Ok(State::Fetching)
    }

    fn ask_to_start(&mut self, summary: &ListingSummary) -> Result<bool> {
        println!();
        if !self.owner.is_empty() {
            println!("Flickr user        : {}", self.owner);
        }
        match &summary.title {
            Some(title) => println!("Selection          : {} \"{}\"", self.selection, title),
            None => println!("Selection          : {}", self.selection),
        }
        println!("Listed items       : {}", summary.total);
        println!("Download directory : {}", self.download_dir.display());
        if let Some(subdir) = self.namer.subdir_description() {
            println!("Subdirectory rule  : {}", subdir);
        }
        println!("File naming rule   : {}", self.namer.naming_rule());
        if self.mode == Mode::Sync {
            println!(
                "New photos are checked every {} minutes until interrupted",
                self.interval.as_secs() / 60
            );
        }
        self.interaction.confirm("Start downloading?")
    }

    async fn fetch(&self) -> Result<PollStats> {
        let photos = self.catalog.photos(&self.selection);
        pin_mut!(photos);

        let mut stats = PollStats::default();
        let mut known_in_a_row = 0;
        while let Some(photo) = photos.next().await {
            let photo = photo?;
            stats.listed += 1;

            if photo.is_video() {
                stats.videos += 1;
                log::debug!("Skipping video {}", photo);
                continue;
            }

            // Checked before touch_seen so the previous listing time is still there
            let known = self.cache.has(&photo.id)?;
            if known && !self.check_still_present(&photo)? {
                stats.missing += 1;
            }
            self.cache.touch_seen(&photo.id)?;
            if known {
                stats.cached += 1;
                known_in_a_row += 1;
                log::debug!("({}/{}) {} is already downloaded", stats.listed, self.expected, photo);
                if self.mode == Mode::Sync && known_in_a_row >= CAUGHT_UP_AFTER {
                    log::debug!("{} known photos in a row, poll finished", known_in_a_row);
                    break;
                }
                continue;
            }
            known_in_a_row = 0;

            log::info!("({}/{}) Downloading {}", stats.listed, self.expected, photo);
            self.fetch_one(&photo, &mut stats).await?;
        }
        Ok(stats)
    }

    // False when the saved file was deleted or no longer has the recorded size
    fn check_still_present(&self, photo: &PhotoRef) -> Result<bool> {
        let Some(record) = self.cache.lookup(&photo.id)?.filter(|r| r.downloaded) else {
            return Ok(true);
        };
        let Some(path) = record.local_path else {
            return Ok(true);
        };
        match std::fs::metadata(&path) {
            Err(_) => {
                log::warn!(
                    "{} was saved to {} but the file is gone (last listed {} UTC). Run delete-cache to download it again.",
                    record.photo_id,
                    path.display(),
                    record.last_checked_at
                );
                Ok(false)
            }
            Ok(meta) if record.size_bytes.is_some_and(|size| size != meta.len()) => {
                log::warn!(
                    "{} has changed since {} was saved: {} on disk, {} downloaded",
                    path.display(),
                    record.photo_id,
                    format_size(meta.len(), DECIMAL),
                    format_size(record.size_bytes.unwrap_or_default(), DECIMAL)
                );
                Ok(false)
            }
            Ok(_) => Ok(true),
        }
    }

    async fn fetch_one(&self, photo: &PhotoRef, stats: &mut PollStats) -> Result<()> {
        let original = self.catalog.resolve_original(photo).await?;
        log::debug!("Original of {} is {}x{} at {}", photo.id, original.width, original.height, original.url);
        let extension = extension_for(photo.original_format.as_deref(), &original.url);
        let target = self.namer.render(&NamingInput {
            photo_id: &photo.id,
            taken_at: photo.taken_at,
            posted_at: photo.posted_at,
            camera: original.camera.as_deref(),
            extension: &extension,
        });

        let dir = self.download_dir.join(&target.subdir);
        std::fs::create_dir_all(&dir).map_err(|e| FlickrdError::filesystem(&dir, e))?;

        let part = part_path(&self.download_dir.join(target.relative()));
        let downloaded = match self.catalog.download(&original, &part).await {
            Ok(downloaded) => downloaded,
            Err(err) => {
                let _ = std::fs::remove_file(&part);
                return Err(err);
            }
        };
        let size = downloaded.bytes;
        check_image_format(photo, &part)?;

        let (path, duplicate) = self.place(&part, &target, &downloaded)?;
        if duplicate {
            stats.duplicates += 1;
            log::info!("{} is identical to {}, keeping the existing file", photo.id, path.display());
        } else {
            set_file_times(&path, photo)?;
            stats.downloaded += 1;
            stats.bytes += size;
            log::info!("Saved {} ({})", path.display(), format_size(size, DECIMAL));
        }

        self.cache.record(
            &photo.id,
            &path,
            &DownloadFacts {
                taken_at: photo.taken_at,
                posted_at: photo.posted_at,
                camera: original.camera.as_deref(),
                md5: Some(&downloaded.md5),
                size_bytes: Some(size),
            },
        )?;
        Ok(())
    }

    // Moves the finished download to the first free numbered name, unless one of
    // the taken names already holds the same bytes.
    fn place(&self, part: &Path, target: &PhotoPath, downloaded: &Downloaded) -> Result<(PathBuf, bool)> {
        for n in 1..=MAX_NAME_NUMBER {
            let candidate = self.download_dir.join(target.numbered(n));
            if !candidate.exists() {
                std::fs::rename(part, &candidate)
                    .map_err(|e| FlickrdError::filesystem(&candidate, e))?;
                return Ok((candidate, false));
            }

            if same_content(&candidate, downloaded)? {
                std::fs::remove_file(part).map_err(|e| FlickrdError::filesystem(part, e))?;
                return Ok((candidate, true));
            }
        }

        let _ = std::fs::remove_file(part);
        Err(FlickrdError::filesystem(
            self.download_dir.join(target.relative()),
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("all {} numbered names are taken", MAX_NAME_NUMBER),
            ),
        ))
    }

    fn report(&self) {
        let stats = self.last_poll();
        match self.mode {
            Mode::Once => log::info!(
                "Finished {}: {} downloaded ({}), {} already present, {} identical, {} videos skipped",
                self.selection,
                stats.downloaded,
                format_size(stats.bytes, DECIMAL),
                stats.cached,
                stats.duplicates,
                stats.videos
            ),
            Mode::Sync if stats.downloaded == 0 => log::info!("No new photos"),
            Mode::Sync => log::info!(
                "{} new photos downloaded ({})",
                stats.downloaded,
                format_size(stats.bytes, DECIMAL)
            ),
        }
        if stats.missing > 0 {
            log::warn!(
                "{} downloaded photos are missing or changed on disk. Run delete-cache to download them again.",
                stats.missing
            );
        }
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

// Stamps the file with the capture time, or the upload time when that is unknown
fn set_file_times(path: &Path, photo: &PhotoRef) -> Result<()> {
    if let Some(ts) = photo.taken_at.or(photo.posted_at) {
        let time = FileTime::from_unix_time(local_timestamp(ts), 0);
        filetime::set_file_times(path, time, time).map_err(|e| FlickrdError::filesystem(path, e))?;
    }
    Ok(())
}

// Warns when the start of the file is not a known image format
fn check_image_format(photo: &PhotoRef, path: &Path) -> Result<()> {
    let mut header = Vec::new();
    File::open(path)
        .and_then(|file| file.take(FORMAT_HEADER_LEN).read_to_end(&mut header))
        .map_err(|e| FlickrdError::filesystem(path, e))?;
    match ImageReader::new(Cursor::new(header)).with_guessed_format() {
        Ok(reader) if reader.format().is_some() => {}
        Ok(_) => log::warn!("Photo {}: downloaded data is not a known image format", photo.id),
        Err(err) => log::warn!("Photo {}: image format detection failed: {:?}", photo.id, err),
    }
    Ok(())
}

// Sizes are compared first so most files are never read
fn same_content(path: &Path, downloaded: &Downloaded) -> Result<bool> {
    let len = std::fs::metadata(path)
        .map_err(|e| FlickrdError::filesystem(path, e))?
        .len();
    if len != downloaded.bytes {
        return Ok(false);
    }
    Ok(file_md5(path)? == downloaded.md5)
}

fn file_md5(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| FlickrdError::filesystem(path, e))?;
    let mut reader = BufReader::new(file);
    let mut digest = md5::Context::new();
    loop {
        let buf = reader.fill_buf().map_err(|e| FlickrdError::filesystem(path, e))?;
        if buf.is_empty() {
            break;
        }
        let len = buf.len();
        digest.consume(buf);
        reader.consume(len);
    }
    Ok(format!("{:x}", digest.compute()))
}

// Handles the all, album, taken, posted and sync cli requests
pub(crate) async fn handle_download_req(
    path_finder: &PathFinder,
    config: &Config,
    selection: Selection,
    mode: Mode,
    assume_yes: bool,
) -> anyhow::Result<()> {
    let cache = LocalCache::open(&path_finder.get_cache_file())?;
    let mut console = Console::new(assume_yes);
    let credential =
        get_full_auth_tokens(&config.api_key, &config.secret_key, &cache, &mut console).await?;
    let client = FlickrClient::new(&config.secret_key, &credential);
    let namer = Namer::new(&config.naming_rule, &config.subdir_rule);

    let mut synchronizer = Synchronizer::new(
        &client,
        &cache,
        &mut console,
        selection,
        mode,
        namer,
        &config.download_dir,
    )
    .with_owner(credential.to_string())
    .with_interval(SYNC_INTERVAL);
    let totals = synchronizer.run().await?;
    log::debug!("Run totals {:?}", totals);
    Ok(())
}

// Handles the delete-cache cli request
pub(crate) fn handle_delete_cache_req(path_finder: &PathFinder) -> anyhow::Result<()> {
    if !path_finder.does_cache_file_exist() {
        log::info!("There is no local cache to delete");
        return Ok(());
    }
    let mut cache = LocalCache::open(&path_finder.get_cache_file())?;
    cache.clear()?;
    log::info!(
        "Local cache {} cleared. Photos will be downloaded again and authorization is required on the next run",
        path_finder.get_cache_file().display()
    );
    Ok(())
}
