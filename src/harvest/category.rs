//! Keyword-based game categorization

/// Category used when no keyword matches
pub const DEFAULT_CATEGORY: &str = "other";

/// Ordered keyword table; the first category with a matching keyword wins
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "rpg",
        &["rpg", "quest", "dungeon", "fruits", "piece", "legend", "kingdom", "sword", "adventure"],
    ),
    ("simulator", &["simulator", "tycoon", "clicker", "farm", "idle", "factory"]),
    ("action", &["fight", "combat", "battle", "war", "shooter", "gun", "arsenal", "pvp", "arena"]),
    ("horror", &["horror", "doors", "scary", "nightmare", "haunted", "piggy", "backrooms"]),
    ("social", &["hangout", "roleplay", "brookhaven", "adopt", "life", "town", "city", "chat"]),
    ("racing", &["racing", "race", "drive", "driving", "car", "speed", "kart"]),
    ("puzzle", &["puzzle", "escape", "obby", "maze", "parkour", "tower"]),
    ("building", &["build", "building", "craft", "sandbox", "plane", "boat"]),
    ("anime", &["anime", "naruto", "dragon", "demon", "slayer", "titan", "hero", "jujutsu"]),
];

/// Classify a game by its display name
///
/// Matching is case-insensitive on whole words of the name.
pub fn classify(game_name: &str) -> &'static str {
    let lowered = game_name.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| words.contains(k)))
        .map_or(DEFAULT_CATEGORY, |(category, _)| *category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("Blox Fruits"), "rpg");
        assert_eq!(classify("Pet Simulator 99"), "simulator");
        assert_eq!(classify("DOORS"), "horror");
        assert_eq!(classify("Brookhaven 🏡RP"), "social");
        assert_eq!(classify("Tower of Hell"), "puzzle");
    }

    #[test]
    fn test_first_match_wins() {
        // matches both rpg and racing; rpg is listed first
        assert_eq!(classify("Race Legend"), "rpg");
        // whole words only: "legends" is not "legend"
        assert_eq!(classify("Legends of Speed"), "racing");
    }

    #[test]
    fn test_default_category() {
        assert_eq!(classify("Game 123"), DEFAULT_CATEGORY);
        assert_eq!(classify(""), DEFAULT_CATEGORY);
    }
}
