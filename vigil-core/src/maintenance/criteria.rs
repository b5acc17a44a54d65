use chrono::{DateTime, Duration, Utc};

use vigil_model::{
    parse_resolution, LargeFilesParams, LibraryItemCache, LowResolutionParams,
    MediaType, UnwatchedMovieParams,
};

/// `unwatched_movie`: added long enough ago, never watched or not watched
/// within the window. Returns the human-readable reason on a match.
pub fn matches_unwatched_movie(
    item: &LibraryItemCache,
    params: &UnwatchedMovieParams,
    now: DateTime<Utc>,
) -> Option<String> {
    if item.media_type != MediaType::Movie {
        return None;
    }
    let cutoff = now - Duration::days(i64::from(params.days));
    let added_at = item.added_at?;
    if added_at > cutoff {
        return None;
    }
    match item.last_watched_at {
        None => Some(format!(
            "unwatched since added ({} days threshold)",
            params.days
        )),
        Some(watched) if watched <= cutoff => Some(format!(
            "not watched in the last {} days",
            params.days
        )),
        Some(_) => None,
    }
}

/// `low_resolution`: the stored resolution string parses to a height at or
/// below the threshold. Unparseable strings never match.
pub fn matches_low_resolution(
    item: &LibraryItemCache,
    params: &LowResolutionParams,
) -> Option<String> {
    let raw = item.video_resolution.as_deref()?;
    let height = parse_resolution(raw)?;
    if height <= params.max_height {
        Some(format!("{height}p is at or below {}p", params.max_height))
    } else {
        None
    }
}

/// `large_files`: on-disk size at or above the threshold.
pub fn matches_large_files(
    item: &LibraryItemCache,
    params: &LargeFilesParams,
) -> Option<String> {
    let size = item.file_size?;
    if size >= params.min_size_bytes() {
        let gb = size as f64 / (1024.0 * 1024.0 * 1024.0);
        Some(format!(
            "{gb:.1} GiB exceeds the {:.1} GiB threshold",
            params.min_size_gb
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use vigil_model::ExternalIds;

    fn item(media_type: MediaType) -> LibraryItemCache {
        LibraryItemCache {
            id: 1,
            server_id: Uuid::new_v4(),
            library_id: "1".into(),
            item_id: "10".into(),
            media_type,
            title: "Item".into(),
            year: Some(2020),
            added_at: Some(Utc::now() - Duration::days(400)),
            video_resolution: None,
            file_size: None,
            last_watched_at: None,
            play_count: 0,
            episode_count: None,
            parent_item_id: None,
            external_ids: ExternalIds::default(),
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn unwatched_movie_matches_never_watched() {
        let movie = item(MediaType::Movie);
        let params = UnwatchedMovieParams { days: 90 };
        assert!(matches_unwatched_movie(&movie, &params, Utc::now()).is_some());
    }

    #[test]
    fn unwatched_movie_respects_recent_watch() {
        let mut movie = item(MediaType::Movie);
        movie.last_watched_at = Some(Utc::now() - Duration::days(5));
        let params = UnwatchedMovieParams { days: 90 };
        assert!(matches_unwatched_movie(&movie, &params, Utc::now()).is_none());
    }

    #[test]
    fn unwatched_movie_respects_stale_watch() {
        let mut movie = item(MediaType::Movie);
        movie.last_watched_at = Some(Utc::now() - Duration::days(200));
        let params = UnwatchedMovieParams { days: 90 };
        assert!(matches_unwatched_movie(&movie, &params, Utc::now()).is_some());
    }

    #[test]
    fn recently_added_movie_is_safe() {
        let mut movie = item(MediaType::Movie);
        movie.added_at = Some(Utc::now() - Duration::days(10));
        let params = UnwatchedMovieParams { days: 90 };
        assert!(matches_unwatched_movie(&movie, &params, Utc::now()).is_none());
    }

    #[test]
    fn low_resolution_threshold_boundary() {
        let params = LowResolutionParams { max_height: 720 };
        let mut matched = Vec::new();
        for raw in ["480", "720", "1080", "2160"] {
            let mut i = item(MediaType::Movie);
            i.video_resolution = Some(raw.to_string());
            if matches_low_resolution(&i, &params).is_some() {
                matched.push(raw);
            }
        }
        assert_eq!(matched, vec!["480", "720"]);
    }

    #[test]
    fn unknown_resolution_never_matches() {
        let params = LowResolutionParams { max_height: 4320 };
        let mut i = item(MediaType::Movie);
        i.video_resolution = Some("widescreen".to_string());
        assert!(matches_low_resolution(&i, &params).is_none());
        i.video_resolution = None;
        assert!(matches_low_resolution(&i, &params).is_none());
    }

    #[test]
    fn large_files_threshold() {
        let params = LargeFilesParams { min_size_gb: 2.0 };
        let mut i = item(MediaType::Movie);
        i.file_size = Some(3 * 1024 * 1024 * 1024);
        assert!(matches_large_files(&i, &params).is_some());
        i.file_size = Some(1024 * 1024 * 1024);
        assert!(matches_large_files(&i, &params).is_none());
        i.file_size = None;
        assert!(matches_large_files(&i, &params).is_none());
    }
}
