//! URL helpers for the aggregator site and harvested invite links

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use crate::utils::error::CrawlerError;

fn game_segment_pattern() -> &'static Regex {
    static GAME_RE: OnceLock<Regex> = OnceLock::new();
    GAME_RE.get_or_init(|| Regex::new(r"/games/([^/?#]+)").expect("Invalid regex pattern"))
}

/// Check that a game identifier is safe to splice into a path
pub fn is_valid_game_id(game_id: &str) -> bool {
    !game_id.is_empty()
        && game_id.len() <= 32
        && game_id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Listing page for a game: `{base}/games/{game_id}`
///
/// # Errors
///
/// Returns `CrawlerError::InvalidUrl` for malformed game identifiers
pub fn listing_url(base: &Url, game_id: &str) -> Result<String, CrawlerError> {
    if !is_valid_game_id(game_id) {
        return Err(CrawlerError::InvalidUrl(format!("bad game id: {game_id:?}")));
    }
    base.join(&format!("/games/{game_id}"))
        .map(String::from)
        .map_err(|e| CrawlerError::InvalidUrl(e.to_string()))
}

/// Resolve an href found on a listing page against the site base
pub fn resolve(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);
    Some(resolved.into())
}

/// Looks like an invite link (`https://…`)
pub fn is_vip_link(value: &str) -> bool {
    value.len() > "https://".len()
        && value.starts_with("https://")
        && !value.contains(char::is_whitespace)
}

/// Game identifier encoded in an invite link, if any
pub fn encoded_game_id(link: &str) -> Option<&str> {
    game_segment_pattern()
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// `true` if the link carries a `/games/{id}` segment for some other game
///
/// Links without a game segment are accepted.
pub fn targets_other_game(link: &str, game_id: &str) -> bool {
    matches!(encoded_game_id(link), Some(encoded) if encoded != game_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://rbxservers.xyz").unwrap()
    }

    #[test]
    fn test_listing_url() {
        assert_eq!(
            listing_url(&base(), "123").unwrap(),
            "https://rbxservers.xyz/games/123"
        );
        assert!(listing_url(&base(), "").is_err());
        assert!(listing_url(&base(), "../admin").is_err());
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(
            resolve(&base(), "/servers/abc").as_deref(),
            Some("https://rbxservers.xyz/servers/abc")
        );
        assert_eq!(
            resolve(&base(), "/servers/abc#top").as_deref(),
            Some("https://rbxservers.xyz/servers/abc")
        );
        assert_eq!(resolve(&base(), "   "), None);
    }

    #[test]
    fn test_is_vip_link() {
        assert!(is_vip_link("https://a"));
        assert!(is_vip_link(
            "https://www.roblox.com/games/123?privateServerLinkCode=xyz"
        ));
        assert!(!is_vip_link("http://a"));
        assert!(!is_vip_link("https://"));
        assert!(!is_vip_link("copy this: https://a"));
    }

    #[test]
    fn test_targets_other_game() {
        let own = "https://www.roblox.com/games/123/Name?privateServerLinkCode=x";
        let other = "https://www.roblox.com/games/999?privateServerLinkCode=x";
        assert!(!targets_other_game(own, "123"));
        assert!(targets_other_game(other, "123"));
        assert!(!targets_other_game("https://a", "123"));
        // prefix of another id must not match
        assert!(targets_other_game(
            "https://www.roblox.com/games/1234?privateServerLinkCode=x",
            "123"
        ));
    }
}
