//! Persistent, multi-tenant link store
//!
//! Links are kept per user and per game (`user → game → GameBucket`) in a single
//! JSON document. Mutations only touch memory; [`LinkStore::persist`] rewrites
//! the whole document atomically (temp file + rename).
//!
//! Concurrent writers are not coordinated: the last `persist` wins.

pub mod document;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rand::seq::SliceRandom;

use crate::models::{
    GameBucket, GameMetadata, HarvestStats, LinkRecord, Reservation, UsageEntry, UserSummary,
    VipLink,
};
use crate::utils::error::StorageError;

pub use document::{StoreDocument, LEGACY_GAME_ID, LEGACY_USER, SCHEMA_VERSION};

/// Usage history entries kept per user
pub const USAGE_HISTORY_LIMIT: usize = 100;

/// Store handle shared between concurrent harvest tasks
pub type SharedLinkStore = Arc<tokio::sync::Mutex<LinkStore>>;

/// In-memory store backed by one JSON document
#[derive(Debug)]
pub struct LinkStore {
    path: PathBuf,
    doc: StoreDocument,
}

impl LinkStore {
    /// Empty store that will persist to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc: StoreDocument::empty(),
        }
    }

    /// Open the document at `path`, or start empty if it does not exist
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the file exists but cannot be read or upgraded
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let mut store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    /// Wrap into a shared handle
    pub fn shared(self) -> SharedLinkStore {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace in-memory state with the document on disk
    ///
    /// A missing file leaves the store empty. Older layouts are upgraded; the
    /// upgraded form is written on the next `persist`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the file cannot be read, parsed or upgraded
    pub fn load(&mut self) -> Result<(), StorageError> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "No link store on disk, starting empty");
            self.doc = StoreDocument::empty();
            return Ok(());
        }

        let file = File::open(&self.path).map_err(|source| StorageError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let value: serde_json::Value = serde_json::from_reader(BufReader::new(file))?;
        self.doc = document::migrate(value)?;

        tracing::info!(
            path = %self.path.display(),
            users = self.doc.links_by_user.len(),
            links = self.total_count(),
            "Link store loaded"
        );
        Ok(())
    }

    /// Write the whole document atomically; failures are logged and return `false`
    pub fn persist(&mut self) -> bool {
        self.doc.schema_version = SCHEMA_VERSION;
        self.doc.last_updated = Some(Utc::now().to_rfc3339());
        self.doc.total_count = self.total_count();

        match self.write_atomic() {
            Ok(()) => {
                tracing::debug!(
                    path = %self.path.display(),
                    total = self.doc.total_count,
                    "Link store persisted"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "PersistError: link store not saved"
                );
                false
            }
        }
    }

    fn write_atomic(&self) -> Result<(), StorageError> {
        let io_err = |path: &Path| {
            let path = path.display().to_string();
            move |source| StorageError::Io { path, source }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let file = File::create(&temp_path).map_err(io_err(&temp_path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.doc)?;
        writer.flush().map_err(io_err(&temp_path))?;
        drop(writer);

        fs::rename(&temp_path, &self.path).map_err(io_err(&self.path))
    }

    /// Read-only view of the document
    pub fn document(&self) -> &StoreDocument {
        &self.doc
    }

    /// Number of links across every user and game
    pub fn total_count(&self) -> usize {
        self.doc
            .links_by_user
            .values()
            .flat_map(BTreeMap::values)
            .map(|b| b.links.len())
            .sum()
    }

    /// Bucket for a (user, game) pair
    pub fn bucket(&self, user_id: &str, game_id: &str) -> Option<&GameBucket> {
        self.doc.links_by_user.get(user_id)?.get(game_id)
    }

    /// Get or create the bucket for `metadata.game_id`, recording its category
    pub fn ensure_bucket(&mut self, user_id: &str, metadata: GameMetadata) -> &mut GameBucket {
        self.doc
            .game_categories
            .entry(user_id.to_string())
            .or_default()
            .entry(metadata.game_id.clone())
            .or_insert_with(|| metadata.category.clone());

        self.doc
            .links_by_user
            .entry(user_id.to_string())
            .or_default()
            .entry(metadata.game_id.clone())
            .or_insert_with(|| GameBucket::new(metadata))
    }

    /// Whether the link is already stored for this (user, game)
    pub fn contains(&self, user_id: &str, game_id: &str, link: &str) -> bool {
        self.bucket(user_id, game_id)
            .is_some_and(|bucket| bucket.contains(link))
    }

    /// Add a link; `true` only if it was not already present
    pub fn add_link(&mut self, user_id: &str, game_id: &str, record: LinkRecord) -> bool {
        self.ensure_bucket(user_id, GameMetadata::placeholder(game_id))
            .insert(record)
    }

    /// Save pre-harvested links without extraction metadata
    ///
    /// Blank entries are skipped. Returns how many links were new.
    pub fn save_links_directly(&mut self, user_id: &str, game_id: &str, links: &[String]) -> usize {
        let bucket = self.ensure_bucket(user_id, GameMetadata::placeholder(game_id));
        let added = links
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .filter(|l| bucket.insert(LinkRecord::bare(*l)))
            .count();

        tracing::info!(user_id = %user_id, game_id = %game_id, added, "Saved links directly");
        added
    }

    /// Every link matching the supplied filters, flattened
    ///
    /// Neither filter ⇒ every link of every user.
    pub fn get_all(&self, user_id: Option<&str>, game_id: Option<&str>) -> Vec<VipLink> {
        self.doc
            .links_by_user
            .iter()
            .filter(|(user, _)| user_id.map_or(true, |u| u == user.as_str()))
            .flat_map(|(_, games)| games.iter())
            .filter(|(game, _)| game_id.map_or(true, |g| g == game.as_str()))
            .flat_map(|(_, bucket)| bucket.links.iter().cloned())
            .collect()
    }

    /// A uniformly random link for the pair, with its record
    pub fn get_random(
        &self,
        user_id: &str,
        game_id: &str,
    ) -> (Option<VipLink>, Option<LinkRecord>) {
        let Some(bucket) = self.bucket(user_id, game_id) else {
            return (None, None);
        };
        match bucket.links.choose(&mut rand::thread_rng()) {
            Some(link) => (
                Some(link.clone()),
                bucket.server_details.get(link).cloned(),
            ),
            None => (None, None),
        }
    }

    /// Set a stored link aside for the user
    ///
    /// Returns `false` if the link is already reserved.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::UnknownLink` if the user has no such link for the game
    pub fn reserve_server(
        &mut self,
        user_id: &str,
        game_id: &str,
        link: &str,
    ) -> Result<bool, StorageError> {
        if !self.contains(user_id, game_id, link) {
            return Err(StorageError::UnknownLink {
                user_id: user_id.to_string(),
                game_id: game_id.to_string(),
            });
        }

        let reservations = self
            .doc
            .user_reserved_servers
            .entry(user_id.to_string())
            .or_default();
        if reservations.iter().any(|r| r.link == link) {
            return Ok(false);
        }

        reservations.push(Reservation {
            game_id: game_id.to_string(),
            link: link.to_string(),
            reserved_at: Utc::now(),
        });
        tracing::debug!(user_id = %user_id, game_id = %game_id, "Server reserved");
        Ok(true)
    }

    /// Drop a reservation; `true` if one existed
    pub fn release_server(&mut self, user_id: &str, link: &str) -> bool {
        let Some(reservations) = self.doc.user_reserved_servers.get_mut(user_id) else {
            return false;
        };
        let before = reservations.len();
        reservations.retain(|r| r.link != link);
        before != reservations.len()
    }

    pub fn reserved_servers(&self, user_id: &str) -> &[Reservation] {
        self.doc
            .user_reserved_servers
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Add or remove a favorite game; `true` means it is now a favorite
    pub fn toggle_favorite(&mut self, user_id: &str, game_id: &str) -> bool {
        let favorites = self
            .doc
            .user_favorites
            .entry(user_id.to_string())
            .or_default();

        if let Some(pos) = favorites.iter().position(|g| g == game_id) {
            favorites.remove(pos);
            false
        } else {
            favorites.push(game_id.to_string());
            true
        }
    }

    pub fn favorites(&self, user_id: &str) -> &[String] {
        self.doc
            .user_favorites
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Category of a game for a user, defaulting to `"other"`
    pub fn category_of(&self, user_id: &str, game_id: &str) -> &str {
        self.doc
            .game_categories
            .get(user_id)
            .and_then(|cats| cats.get(game_id))
            .map(String::as_str)
            .or_else(|| self.bucket(user_id, game_id).map(|b| b.category.as_str()))
            .unwrap_or("other")
    }

    /// Favorite games grouped by category
    pub fn favorites_by_category(&self, user_id: &str) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for game_id in self.favorites(user_id) {
            grouped
                .entry(self.category_of(user_id, game_id).to_string())
                .or_default()
                .push(game_id.clone());
        }
        grouped
    }

    /// Append to the user's usage history, keeping the newest entries
    pub fn record_usage(&mut self, user_id: &str, game_id: &str, link: &str, action: &str) {
        let history = self
            .doc
            .usage_history
            .entry(user_id.to_string())
            .or_default();
        history.push(UsageEntry {
            game_id: game_id.to_string(),
            link: link.to_string(),
            action: action.to_string(),
            timestamp: Utc::now(),
        });
        if history.len() > USAGE_HISTORY_LIMIT {
            let excess = history.len() - USAGE_HISTORY_LIMIT;
            history.drain(..excess);
        }
    }

    pub fn usage_history(&self, user_id: &str) -> &[UsageEntry] {
        self.doc
            .usage_history
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Fold one harvest pass into the global counters
    pub fn record_pass(&mut self, processed: u64, new_links: u64, elapsed_secs: f64) {
        self.doc
            .scraping_stats
            .record_pass(processed, new_links, elapsed_secs);
    }

    pub fn stats(&self) -> &HarvestStats {
        &self.doc.scraping_stats
    }

    /// Overview of one user's holdings
    pub fn user_summary(&self, user_id: &str) -> UserSummary {
        let games = self.doc.links_by_user.get(user_id);
        UserSummary {
            user_id: user_id.to_string(),
            total_games: games.map_or(0, BTreeMap::len),
            total_links: games.map_or(0, |g| g.values().map(|b| b.links.len()).sum()),
            favorites: self.favorites(user_id).len(),
            reservations: self.reserved_servers(user_id).len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> LinkStore {
        LinkStore::new(dir.path().join("links.json"))
    }

    #[test]
    fn test_add_link_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        assert!(store.add_link("U1", "123", LinkRecord::bare("https://a")));
        assert!(!store.add_link("U1", "123", LinkRecord::bare("https://a")));
        assert_eq!(store.get_all(Some("U1"), Some("123")), vec!["https://a"]);
    }

    #[test]
    fn test_same_link_different_scopes() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        assert!(store.add_link("U1", "123", LinkRecord::bare("https://a")));
        assert!(store.add_link("U2", "123", LinkRecord::bare("https://a")));
        assert!(store.add_link("U1", "456", LinkRecord::bare("https://a")));
        assert_eq!(store.total_count(), 3);
    }

    #[test]
    fn test_get_all_filters() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add_link("U1", "1", LinkRecord::bare("https://a"));
        store.add_link("U1", "2", LinkRecord::bare("https://b"));
        store.add_link("U2", "1", LinkRecord::bare("https://c"));

        assert_eq!(store.get_all(None, None).len(), 3);
        assert_eq!(store.get_all(Some("U1"), None).len(), 2);
        assert_eq!(store.get_all(None, Some("1")).len(), 2);
        assert_eq!(store.get_all(Some("U2"), Some("2")), Vec::<String>::new());
        assert!(store.get_all(Some("nobody"), None).is_empty());
    }

    #[test]
    fn test_get_random() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        assert_eq!(store.get_random("U1", "1"), (None, None));

        store.add_link("U1", "1", LinkRecord::bare("https://a"));
        let (link, record) = store.get_random("U1", "1");
        assert_eq!(link.as_deref(), Some("https://a"));
        assert_eq!(record.unwrap().link, "https://a");
    }

    #[test]
    fn test_save_links_directly_skips_blank_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let links = vec![
            "https://a".to_string(),
            "  ".to_string(),
            "https://a".to_string(),
            "https://b".to_string(),
        ];
        assert_eq!(store.save_links_directly("U1", "1", &links), 2);
    }

    #[test]
    fn test_reservations() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add_link("U1", "1", LinkRecord::bare("https://a"));

        assert!(matches!(
            store.reserve_server("U1", "1", "https://zzz"),
            Err(StorageError::UnknownLink { .. })
        ));
        assert!(store.reserve_server("U1", "1", "https://a").unwrap());
        assert!(!store.reserve_server("U1", "1", "https://a").unwrap());
        assert_eq!(store.reserved_servers("U1").len(), 1);

        assert!(store.release_server("U1", "https://a"));
        assert!(!store.release_server("U1", "https://a"));
        assert!(store.reserved_servers("U1").is_empty());
    }

    #[test]
    fn test_favorites_toggle_and_group() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.ensure_bucket(
            "U1",
            GameMetadata {
                category: "rpg".to_string(),
                ..GameMetadata::placeholder("1")
            },
        );

        assert!(store.toggle_favorite("U1", "1"));
        assert!(store.toggle_favorite("U1", "2"));
        let grouped = store.favorites_by_category("U1");
        assert_eq!(grouped["rpg"], vec!["1"]);
        assert_eq!(grouped["other"], vec!["2"]);

        assert!(!store.toggle_favorite("U1", "1"));
        assert_eq!(store.favorites("U1"), ["2".to_string()]);
    }

    #[test]
    fn test_usage_history_is_bounded() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        for i in 0..(USAGE_HISTORY_LIMIT + 5) {
            store.record_usage("U1", "1", &format!("https://{i}"), "get_random");
        }
        let history = store.usage_history("U1");
        assert_eq!(history.len(), USAGE_HISTORY_LIMIT);
        assert_eq!(history[0].link, "https://5");
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("links.json");
        let mut store = LinkStore::new(&path);
        for link in ["https://c", "https://a", "https://b"] {
            store.add_link("U1", "123", LinkRecord::bare(link));
        }
        store.toggle_favorite("U1", "123");
        store.record_pass(3, 3, 1.5);
        assert!(store.persist());
        assert!(!dir.path().join("nested").join("links.json.tmp").exists());

        let reloaded = LinkStore::open(&path).unwrap();
        assert_eq!(
            reloaded.bucket("U1", "123").unwrap().links,
            vec!["https://c", "https://a", "https://b"]
        );
        assert_eq!(reloaded.favorites("U1"), ["123".to_string()]);
        assert_eq!(reloaded.stats().total_scraped, 3);
        assert_eq!(reloaded.document().total_count, 3);
        assert!(reloaded.document().last_updated.is_some());
    }

    #[test]
    fn test_reload_keeps_every_user_and_game() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.json");
        let mut store = LinkStore::new(&path);
        let layout = [
            ("U1", "111", ["https://u1/111/z", "https://u1/111/a"]),
            ("U1", "222", ["https://u1/222/m", "https://u1/222/b"]),
            ("U2", "111", ["https://u2/111/y", "https://u2/111/c"]),
            ("U2", "222", ["https://u2/222/x", "https://u2/222/d"]),
        ];
        for (user, game, links) in &layout {
            for link in links {
                assert!(store.add_link(user, game, LinkRecord::bare(*link)));
            }
        }
        // same link for a different user is stored again
        assert!(store.add_link("U2", "111", LinkRecord::bare("https://u1/111/z")));
        assert!(store.persist());

        let reloaded = LinkStore::open(&path).unwrap();
        for (user, game, links) in &layout {
            let stored = reloaded.get_all(Some(*user), Some(*game));
            let mut expected: Vec<VipLink> = links.iter().map(|l| l.to_string()).collect();
            if (*user, *game) == ("U2", "111") {
                expected.push("https://u1/111/z".to_string());
            }
            assert_eq!(stored, expected, "{user}/{game}");
        }
        assert_eq!(reloaded.total_count(), 9);
        assert_eq!(reloaded.get_all(Some("U1"), None).len(), 4);
        assert_eq!(reloaded.get_all(None, Some("222")).len(), 4);
    }

    #[test]
    fn test_persist_failure_returns_false() {
        let dir = TempDir::new().unwrap();
        // a directory where the file should be
        let path = dir.path().join("occupied");
        fs::create_dir_all(path.join("links.json.tmp")).unwrap();
        let mut store = LinkStore::new(path.join("links.json"));
        store.add_link("U1", "1", LinkRecord::bare("https://a"));
        assert!(!store.persist());
    }

    #[test]
    fn test_user_summary() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.add_link("U1", "1", LinkRecord::bare("https://a"));
        store.add_link("U1", "2", LinkRecord::bare("https://b"));
        store.toggle_favorite("U1", "1");

        let summary = store.user_summary("U1");
        assert_eq!(summary.total_games, 2);
        assert_eq!(summary.total_links, 2);
        assert_eq!(summary.favorites, 1);
        assert_eq!(summary.reservations, 0);
    }
}
