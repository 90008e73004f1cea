/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use anyhow::Result;
use humansize::{DECIMAL, format_size};

use crate::PathFinder;
use crate::catalog::{Album, UserInfo};
use crate::config::Config;
use crate::flickr_client::FlickrClient;
use crate::interaction::Console;
use crate::local_cache::{CacheStats, LocalCache};
use crate::tokens::get_full_auth_tokens;

// Handles the status cli request
pub(crate) async fn handle_status_req(path_finder: &PathFinder, config: &Config) -> Result<()> {
    let cache = LocalCache::open(&path_finder.get_cache_file())?;
    let mut console = Console::new(false);
    let credential =
        get_full_auth_tokens(&config.api_key, &config.secret_key, &cache, &mut console).await?;
    let client = FlickrClient::new(&config.secret_key, &credential);

    let user = client.user_info().await?;
    let albums = client.albums().await?;
    let stats = cache.stats()?;

    println!("{}", render_status(&user, &albums, &stats, config));
    Ok(())
}

fn render_status(user: &UserInfo, albums: &[Album], stats: &CacheStats, config: &Config) -> String {
    let mut lines = vec![
        format!("User            : {} ({})", user.username, user.nsid),
    ];
    if let Some(realname) = user.realname.as_deref().filter(|v| !v.is_empty()) {
        lines.push(format!("Real name       : {}", realname));
    }
    if let Some(url) = &user.profile_url {
        lines.push(format!("Profile         : {}", url));
    }
    lines.push(format!("Photos on Flickr: {}", user.photo_count));
    if let Some(first_taken) = &user.first_taken {
        lines.push(format!("First taken     : {}", first_taken));
    }
    if let Some(first_posted) = user.first_posted {
        lines.push(format!("First posted    : {}", first_posted));
    }

    lines.push(String::new());
    lines.push(format!("Albums ({})", albums.len()));
    let width = albums.iter().map(|a| a.album_id.len()).max().unwrap_or(0);
    for album in albums {
        lines.push(format!(
            "  {:<width$}  {} ({} photos, {} videos)",
            album.album_id,
            album.title,
            album.photo_count,
            album.video_count,
            width = width
        ));
    }

    lines.push(String::new());
    lines.push(format!("Download directory: {}", config.download_dir.display()));
    lines.push(format!(
        "Downloaded        : {} photos ({})",
        stats.downloaded,
        format_size(stats.total_bytes, DECIMAL)
    ));
    lines.push(format!("Seen in listings  : {}", stats.seen));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lists_albums_and_cache_totals() {
        let user = UserInfo {
            nsid: "12345678@N00".to_string(),
            username: "traveler".to_string(),
            realname: Some("Kim Traveler".to_string()),
            photo_count: 1520,
            ..Default::default()
        };
        let albums = vec![
            Album {
                album_id: "72157650000000001".to_string(),
                title: "Seoul".to_string(),
                photo_count: 12,
                video_count: 1,
            },
            Album {
                album_id: "7215".to_string(),
                title: "Busan".to_string(),
                photo_count: 3,
                video_count: 0,
            },
        ];
        let stats = CacheStats {
            downloaded: 14,
            seen: 16,
            total_bytes: 2_500_000,
        };

        let text = render_status(&user, &albums, &stats, &Config::default());
        assert!(text.contains("traveler (12345678@N00)"));
        assert!(text.contains("Real name       : Kim Traveler"));
        assert!(text.contains("Albums (2)"));
        assert!(text.contains("72157650000000001  Seoul (12 photos, 1 videos)"));
        assert!(text.contains("7215               Busan (3 photos, 0 videos)"));
        assert!(text.contains("14 photos (2.50 MB)"));
        assert!(!text.contains("Profile"));
    }
}
