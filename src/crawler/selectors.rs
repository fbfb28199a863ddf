//! CSS selectors and DOM probes for the aggregator site
//!
//! Every function here works on a serialized page snapshot and never fails:
//! missing markup yields `None` or a placeholder.

use std::collections::HashSet;

use lazy_static::lazy_static;
use scraper::{Html, Selector};

use crate::crawler::url::is_vip_link;
use crate::models::ServerInfo;
use crate::utils::{last_path_segment, normalize_whitespace, truncate_chars};

/// Maximum characters kept from a server description
pub const DESCRIPTION_MAX_CHARS: usize = 200;

// Helper macro to parse selectors safely at compile time
macro_rules! parse_selector {
    ($s:expr) => {
        Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
    };
}

lazy_static! {
    static ref SERVER_ANCHOR: Selector = parse_selector!("a[href^='/servers/']");

    static ref INVITE_INPUT: Selector = parse_selector!("input[type='text']");

    static ref PAGE_TITLE: Selector = parse_selector!("title");

    static ref DESCRIPTION: Vec<Selector> = vec![
        parse_selector!(".server-info"),
        parse_selector!(".description"),
        parse_selector!(".details"),
    ];

    static ref GAME_NAME: Vec<Selector> = vec![
        parse_selector!("h1"),
        parse_selector!(".game-title"),
        parse_selector!(".game-name"),
    ];

    static ref OG_TITLE: Selector = parse_selector!("meta[property='og:title']");

    static ref OG_IMAGE: Selector = parse_selector!("meta[property='og:image']");

    static ref GAME_IMAGE: Vec<Selector> = vec![
        parse_selector!("img.game-image"),
        parse_selector!(".game-thumbnail img"),
    ];
}

fn first_text(document: &Html, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|selector| {
        document.select(selector).find_map(|el| {
            let text = normalize_whitespace(&el.text().collect::<String>());
            (!text.is_empty()).then_some(text)
        })
    })
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Detail-page hrefs on a listing page, distinct and in document order
pub fn candidate_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();

    document
        .select(&SERVER_ANCHOR)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|href| href.len() > "/servers/".len())
        .filter(|href| seen.insert(href.to_string()))
        .map(str::to_string)
        .collect()
}

/// First text input whose value is an invite link
pub fn invite_value(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    document
        .select(&INVITE_INPUT)
        .filter_map(|el| el.value().attr("value"))
        .map(str::trim)
        .find(|value| is_vip_link(value))
        .map(str::to_string)
}

/// Best-effort server metadata for a detail page
pub fn server_info(html: &str, candidate_url: &str) -> ServerInfo {
    let document = Html::parse_document(html);
    let unknown = ServerInfo::unknown();

    let page_title = document
        .select(&PAGE_TITLE)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .unwrap_or(unknown.page_title);

    let description =
        first_text(&document, &DESCRIPTION).map(|d| truncate_chars(&d, DESCRIPTION_MAX_CHARS));

    let server_id = last_path_segment(candidate_url)
        .map(str::to_string)
        .unwrap_or(unknown.server_id);

    ServerInfo {
        server_id,
        page_title,
        description,
    }
}

/// Game name and image from a listing page
pub fn game_details(html: &str) -> (Option<String>, Option<String>) {
    let document = Html::parse_document(html);

    let name = first_text(&document, &GAME_NAME).or_else(|| meta_content(&document, &OG_TITLE));

    let image = meta_content(&document, &OG_IMAGE).or_else(|| {
        GAME_IMAGE.iter().find_map(|selector| {
            document
                .select(selector)
                .filter_map(|el| el.value().attr("src"))
                .find(|src| !src.trim().is_empty())
                .map(|src| src.trim().to_string())
        })
    });

    (name, image)
}
