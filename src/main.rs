/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */
mod catalog;
mod config;
mod error;
mod flickr_client;
mod interaction;
mod local_cache;
mod logging;
mod namer;
mod path_finder;
mod querier;
mod synchronizer;
mod tokens;

use anyhow::Result;
use catalog::{DateRange, Selection};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use config::Config;
use dotenvy::dotenv;
use logging::configure_logging;
use path_finder::PathFinder;
use querier::handle_status_req;
use synchronizer::{Mode, handle_delete_cache_req, handle_download_req};

// CLI Definitions
static LONG_ABOUT: &str = r#"
Downloads the original photos of your Flickr account.

Settings are read from flickrd.ini (created with placeholder values on first
run). Values given with the options below are written back to that file.
On first use the tool prints a Flickr authorization address; open it, allow
read access and paste the code shown back into the terminal.

Optional environment variables:
FLICKRD_CONFIG - Path of the config file (default ./flickrd.ini)
FLICKRD_HOME   - Directory for the local cache (default ~/.flickr)
RUST_LOG       - Console log filter, e.g. debug
A debug log of every run is kept in flickrd.log in the cache directory.
A .env file can be created in the working directory that contains these as well.

File naming placeholders: YYYY MM DD hh mm ss camera photo_id
"#;

#[derive(Debug, Parser)] // requires `derive` feature
#[command(name = "flickrd")]
#[command(about = "Downloads original photos from Flickr", long_about = Some(LONG_ABOUT))]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Answers yes to the confirmation prompt
    #[arg(short = 'y', long = "yes", global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the values in the config file
#[derive(Debug, Args)]
pub(crate) struct ConfigArgs {
    /// Flickr API key
    #[arg(short = 'k', long = "api_key", global = true)]
    pub(crate) api_key: Option<String>,

    /// Flickr API secret
    #[arg(short = 's', long = "secret_key", global = true)]
    pub(crate) secret_key: Option<String>,

    /// Directory photos are downloaded into
    #[arg(short = 'd', long = "download_dir", global = true)]
    pub(crate) download_dir: Option<String>,

    /// File name template, e.g. YYYY-MM-DD_hhmmss(camera)
    #[arg(short = 'n', long = "naming_rule", global = true)]
    pub(crate) naming_rule: Option<String>,

    /// Subdirectory template, e.g. YYYY/MM
    #[arg(short = 'r', long = "subdir_rule", global = true)]
    pub(crate) subdir_rule: Option<String>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Shows the account, its albums and what has been downloaded so far
    Status,

    /// Downloads every photo
    All,

    /// Downloads the photos of one album
    #[command(arg_required_else_help = true)]
    Album {
        /// Numeric album (photoset) id, see `status`
        #[arg(value_parser = parse_album_id)]
        album_id: String,
    },

    /// Downloads photos taken on a day or between two days (inclusive)
    #[command(arg_required_else_help = true)]
    Taken(DateArgs),

    /// Downloads photos uploaded on a day or between two days (inclusive)
    #[command(arg_required_else_help = true)]
    Posted(DateArgs),

    /// Keeps downloading newly uploaded photos every 5 minutes
    Sync,

    /// Forgets downloaded photos and the stored authorization
    DeleteCache,
}

#[derive(Debug, Args)]
pub(crate) struct DateArgs {
    /// First day, YYYYMMDD
    #[arg(value_parser = parse_date)]
    start: NaiveDate,

    /// Last day, YYYYMMDD. Defaults to the first day
    #[arg(value_parser = parse_date)]
    end: Option<NaiveDate>,
}

impl DateArgs {
    fn range(&self) -> Result<DateRange> {
        if let Some(end) = self.end.filter(|end| *end < self.start) {
            anyhow::bail!("end date {} is before start date {}", end, self.start);
        }
        Ok(DateRange::new(self.start, self.end))
    }
}

fn parse_album_id(value: &str) -> std::result::Result<String, String> {
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        Ok(value.to_string())
    } else {
        Err(format!("album id must be all digits: {}", value))
    }
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    if value.len() != 8 || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("date must be YYYYMMDD: {}", value));
    }
    NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|e| format!("invalid date {}: {}", value, e))
}

async fn handle_cli_arg(args: Cli, path_finder: PathFinder) -> Result<()> {
    log::debug!(
        "Using state dir {} and config {}",
        path_finder.get_state_dir().display(),
        path_finder.get_config_file().display()
    );

    // No credentials needed to forget everything
    if let Commands::DeleteCache = args.command {
        return handle_delete_cache_req(&path_finder);
    }

    let mut config = Config::load(path_finder.get_config_file())?;
    config.apply(&args.config);
    config.save(path_finder.get_config_file())?;
    config.validate(path_finder.get_config_file())?;
    log::debug!("Config {:#?}", config);

    let (selection, mode) = match args.command {
        Commands::Status => return handle_status_req(&path_finder, &config).await,
        Commands::All => (Selection::All, Mode::Once),
        Commands::Album { album_id } => (Selection::Album(album_id), Mode::Once),
        Commands::Taken(dates) => (Selection::Taken(dates.range()?), Mode::Once),
        Commands::Posted(dates) => (Selection::Posted(dates.range()?), Mode::Once),
        Commands::Sync => (Selection::All, Mode::Sync),
        Commands::DeleteCache => return handle_delete_cache_req(&path_finder),
    };
    handle_download_req(&path_finder, &config, selection, mode, args.yes).await
}

// CLI tool for downloading Flickr originals
#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Cli::parse();
    let path_finder = PathFinder::from_env()?;
    configure_logging(&path_finder.get_log_file())?;
    log::debug!("+++ flickrd");

    tokio::select! {
        res = handle_cli_arg(args, path_finder) => res?,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted. A partially downloaded .part file may be left in the download directory.");
        }
    }

    log::debug!("--- flickrd");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_taken_range_with_global_flags() {
        let cli = Cli::try_parse_from([
            "flickrd", "taken", "20160101", "20160531", "-y", "--api_key", "abc",
        ])
        .unwrap();

        assert!(cli.yes);
        assert_eq!(cli.config.api_key.as_deref(), Some("abc"));
        let Commands::Taken(dates) = cli.command else {
            panic!("expected taken");
        };
        let range = dates.range().unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2016, 1, 1).unwrap());
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2016, 5, 31).unwrap());
    }

    #[test]
    fn single_date_means_one_day() {
        let cli = Cli::try_parse_from(["flickrd", "posted", "20150101"]).unwrap();
        let Commands::Posted(dates) = cli.command else {
            panic!("expected posted");
        };
        let range = dates.range().unwrap();
        assert_eq!(range.start, range.end);
    }

    #[test]
    fn rejects_bad_dates_and_album_ids() {
        assert!(Cli::try_parse_from(["flickrd", "taken", "2016-01-01"]).is_err());
        assert!(Cli::try_parse_from(["flickrd", "taken", "20160230"]).is_err());
        assert!(Cli::try_parse_from(["flickrd", "album", "72157abc"]).is_err());

        let cli = Cli::try_parse_from(["flickrd", "album", "72157650000000000"]).unwrap();
        assert!(matches!(cli.command, Commands::Album { album_id } if album_id == "72157650000000000"));
    }

    #[test]
    fn end_before_start_is_rejected() {
        let cli = Cli::try_parse_from(["flickrd", "taken", "20160531", "20160101"]).unwrap();
        let Commands::Taken(dates) = cli.command else {
            panic!("expected taken");
        };
        assert!(dates.range().is_err());
    }

    #[test]
    fn config_overrides_before_the_command() {
        let cli = Cli::try_parse_from([
            "flickrd", "-d", "/tmp/photos", "-n", "photo_id", "-r", "YYYY/MM", "sync",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Sync));
        assert_eq!(cli.config.download_dir.as_deref(), Some("/tmp/photos"));
        assert_eq!(cli.config.naming_rule.as_deref(), Some("photo_id"));
        assert_eq!(cli.config.subdir_rule.as_deref(), Some("YYYY/MM"));
        assert!(!cli.yes);
    }
}
