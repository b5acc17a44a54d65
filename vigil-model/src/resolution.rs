use once_cell::sync::Lazy;
use regex::Regex;

static NUMERIC_HEIGHT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{3,4})p?$").expect("height regex should compile")
});

/// Parse a vendor resolution string into a canonical pixel height.
///
/// Vendors disagree on representation: Plex reports `"1080"` or `"4k"`,
/// Emby/Jellyfin derive strings like `"1080p"`, and some libraries carry
/// legacy `"SD"`/`"HD"` tags. Unrecognised strings map to `None`, which a
/// height threshold never matches.
pub fn parse_resolution(raw: &str) -> Option<u32> {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return None;
    }

    match normalized.as_str() {
        "4k" | "uhd" => return Some(2160),
        "8k" => return Some(4320),
        "sd" => return Some(480),
        "hd" => return Some(720),
        _ => {}
    }

    let captures = NUMERIC_HEIGHT_REGEX.captures(&normalized)?;
    match captures[1].parse::<u32>() {
        // Heights outside the plausible range are vendor noise, not video.
        Ok(height) if (120..=4320).contains(&height) => Some(height),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_resolution;

    #[test]
    fn known_aliases() {
        assert_eq!(parse_resolution("4k"), Some(2160));
        assert_eq!(parse_resolution("4K"), Some(2160));
        assert_eq!(parse_resolution("uhd"), Some(2160));
        assert_eq!(parse_resolution("SD"), Some(480));
        assert_eq!(parse_resolution("hd"), Some(720));
    }

    #[test]
    fn numeric_forms() {
        assert_eq!(parse_resolution("1080"), Some(1080));
        assert_eq!(parse_resolution("1080p"), Some(1080));
        assert_eq!(parse_resolution(" 720p "), Some(720));
        assert_eq!(parse_resolution("480"), Some(480));
        assert_eq!(parse_resolution("2160"), Some(2160));
        assert_eq!(parse_resolution("4320p"), Some(4320));
    }

    #[test]
    fn unknown_is_none() {
        assert_eq!(parse_resolution(""), None);
        assert_eq!(parse_resolution("unknown"), None);
        assert_eq!(parse_resolution("1080i60"), None);
        assert_eq!(parse_resolution("99999"), None);
        assert_eq!(parse_resolution("p1080"), None);
    }
}
