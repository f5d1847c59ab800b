//! Directory listing cache and folder-size aggregates.
//!
//! Two maps live behind one reader-writer lock:
//! - listings: rendered folder listings with an absolute expiry
//! - folder sizes: running byte totals per folder, no expiry
//!
//! Keys are scoped to a username so that [`DirectoryCache::invalidate_user`]
//! can drop everything belonging to one user. The lock is only held for map
//! access; computing a value (directory walks, database queries) happens
//! outside of it.
//!
//! [`FileService`](crate::file::FileService) does not apply size deltas on
//! writes. Every mutation calls `invalidate_user`, which drops the user's
//! aggregates too, and the next read recalculates them from metadata. A
//! move or recursive delete touches every ancestor of two subtrees, and
//! recalculating is exact where a missed delta would drift.
//! [`DirectoryCache::update_folder_size`] is kept for callers that track
//! sizes incrementally between recalculations.

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

/// Default lifetime of a cached listing.
pub const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(5);

/// Build the listing cache key for a user's folder.
///
/// `folder` is user-relative, `""` for the user's root.
pub fn listing_key(username: &str, folder: &str) -> String {
    format!("{username}:{folder}")
}

/// Build the folder-size key for a user's folder.
///
/// The key is the folder's path relative to the storage root
/// (`alice` for alice's root, `alice/docs` for a subfolder).
pub fn folder_key(username: &str, folder: &str) -> String {
    if folder.is_empty() {
        username.to_string()
    } else {
        format!("{username}/{folder}")
    }
}

/// Whether `key` was built for `username` by [`listing_key`] or [`folder_key`].
fn is_scoped_to(key: &str, username: &str) -> bool {
    match key.strip_prefix(username) {
        Some(rest) => rest.is_empty() || rest.starts_with(':') || rest.starts_with('/'),
        None => false,
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
struct CacheState<V> {
    listings: HashMap<String, CacheEntry<V>>,
    folder_sizes: HashMap<String, i64>,
}

/// Cache for folder listings and folder sizes.
#[derive(Debug)]
pub struct DirectoryCache<V> {
    ttl: Duration,
    state: RwLock<CacheState<V>>,
}

impl<V: Clone> DirectoryCache<V> {
    /// Create a cache whose listings live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(CacheState {
                listings: HashMap::new(),
                folder_sizes: HashMap::new(),
            }),
        }
    }

    /// Lifetime of a cached listing.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a cached listing if present and not yet expired.
    ///
    /// Expired entries are reported as missing but left in place; the next
    /// [`put`](Self::put) for the key overwrites them.
    pub fn get(&self, key: &str) -> Option<V> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let entry = state.listings.get(key)?;

        if Instant::now() < entry.expires_at {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Store a listing, replacing any previous entry for `key`.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.listings.insert(key.into(), entry);
    }

    /// Drop every listing and folder size belonging to `username`.
    ///
    /// Mutating operations call this before releasing the user's write lock,
    /// so the next read for that user always rebuilds from storage.
    pub fn invalidate_user(&self, username: &str) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.listings.retain(|key, _| !is_scoped_to(key, username));
        state
            .folder_sizes
            .retain(|key, _| !is_scoped_to(key, username));
    }

    /// Stored size aggregate for a folder.
    pub fn get_folder_size(&self, key: &str) -> Option<i64> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.folder_sizes.get(key).copied()
    }

    /// Store a folder's size aggregate.
    pub fn set_folder_size(&self, key: impl Into<String>, size: i64) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.folder_sizes.insert(key.into(), size);
    }

    /// Add `delta` to a folder's size aggregate.
    ///
    /// If the folder has no aggregate yet, `delta` becomes its value; the
    /// total stays inaccurate until the next recalculation.
    pub fn update_folder_size(&self, key: &str, delta: i64) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state.folder_sizes.entry(key.to_string()).or_insert(0) += delta;
    }

    /// Recompute a folder's size with `compute` and store the result.
    ///
    /// The cache lock is not held while `compute` runs.
    pub async fn recalculate_folder_size<F, Fut, E>(&self, key: &str, compute: F) -> Result<i64, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<i64, E>>,
    {
        let size = compute().await?;
        self.set_folder_size(key, size);
        Ok(size)
    }

    /// Number of listing entries currently stored, including expired ones.
    pub fn listing_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .listings
            .len()
    }
}

impl<V: Clone> Default for DirectoryCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_LISTING_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn cache() -> DirectoryCache<Vec<String>> {
        DirectoryCache::new(Duration::from_secs(5))
    }

    #[test]
    fn test_keys() {
        assert_eq!(listing_key("alice", ""), "alice:");
        assert_eq!(listing_key("alice", "docs/2024"), "alice:docs/2024");
        assert_eq!(folder_key("alice", ""), "alice");
        assert_eq!(folder_key("alice", "docs"), "alice/docs");
    }

    #[test]
    fn test_is_scoped_to() {
        assert!(is_scoped_to("alice:", "alice"));
        assert!(is_scoped_to("alice:docs", "alice"));
        assert!(is_scoped_to("alice", "alice"));
        assert!(is_scoped_to("alice/docs", "alice"));
        assert!(!is_scoped_to("alicent:docs", "alice"));
        assert!(!is_scoped_to("alicent/docs", "alice"));
        assert!(!is_scoped_to("bob:", "alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_then_get_before_ttl() {
        let cache = cache();
        cache.put(listing_key("alice", ""), vec!["a.txt".to_string()]);

        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(
            cache.get(&listing_key("alice", "")),
            Some(vec!["a.txt".to_string()])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_ttl_is_miss() {
        let cache = cache();
        cache.put("alice:", vec!["a.txt".to_string()]);

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.get("alice:"), None);
        // Expired entries are not swept by reads.
        assert_eq!(cache.listing_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites_and_refreshes_expiry() {
        let cache = cache();
        cache.put("alice:", vec!["old".to_string()]);

        tokio::time::advance(Duration::from_secs(4)).await;
        cache.put("alice:", vec!["new".to_string()]);
        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(cache.get("alice:"), Some(vec!["new".to_string()]));
    }

    #[test]
    fn test_get_missing_key() {
        let cache = cache();
        assert_eq!(cache.get("nobody:"), None);
    }

    #[test]
    fn test_invalidate_user_removes_only_that_user() {
        let cache = cache();
        cache.put(listing_key("alice", ""), vec![]);
        cache.put(listing_key("alice", "docs"), vec![]);
        cache.put(listing_key("alicent", ""), vec![]);
        cache.put(listing_key("bob", ""), vec![]);
        cache.set_folder_size(folder_key("alice", "docs"), 10);
        cache.set_folder_size(folder_key("alicent", ""), 20);

        cache.invalidate_user("alice");

        assert_eq!(cache.get(&listing_key("alice", "")), None);
        assert_eq!(cache.get(&listing_key("alice", "docs")), None);
        assert_eq!(cache.get_folder_size(&folder_key("alice", "docs")), None);
        assert!(cache.get(&listing_key("alicent", "")).is_some());
        assert!(cache.get(&listing_key("bob", "")).is_some());
        assert_eq!(cache.get_folder_size(&folder_key("alicent", "")), Some(20));
    }

    #[test]
    fn test_folder_size_set_and_get() {
        let cache = cache();
        assert_eq!(cache.get_folder_size("alice/docs"), None);

        cache.set_folder_size("alice/docs", 1024);
        assert_eq!(cache.get_folder_size("alice/docs"), Some(1024));
    }

    #[test]
    fn test_update_folder_size_without_entry_starts_from_delta() {
        let cache = cache();
        cache.update_folder_size("alice/docs", 300);
        assert_eq!(cache.get_folder_size("alice/docs"), Some(300));

        cache.update_folder_size("alice/pics", -50);
        assert_eq!(cache.get_folder_size("alice/pics"), Some(-50));
    }

    #[test]
    fn test_update_folder_size_is_additive() {
        let split = cache();
        split.set_folder_size("alice", 1000);
        split.update_folder_size("alice", 250);
        split.update_folder_size("alice", -100);

        let combined = cache();
        combined.set_folder_size("alice", 1000);
        combined.update_folder_size("alice", 150);

        assert_eq!(
            split.get_folder_size("alice"),
            combined.get_folder_size("alice")
        );
        assert_eq!(split.get_folder_size("alice"), Some(1150));
    }

    #[tokio::test]
    async fn test_recalculate_folder_size_replaces_drifted_value() {
        let cache = cache();
        cache.set_folder_size("alice/docs", 999);

        let size = cache
            .recalculate_folder_size("alice/docs", || async { Ok::<_, Infallible>(42) })
            .await
            .unwrap();

        assert_eq!(size, 42);
        assert_eq!(cache.get_folder_size("alice/docs"), Some(42));
    }

    #[tokio::test]
    async fn test_recalculate_folder_size_error_leaves_entry() {
        let cache = cache();
        cache.set_folder_size("alice/docs", 7);

        let result = cache
            .recalculate_folder_size("alice/docs", || async { Err::<i64, _>("walk failed") })
            .await;

        assert_eq!(result, Err("walk failed"));
        assert_eq!(cache.get_folder_size("alice/docs"), Some(7));
    }
}
