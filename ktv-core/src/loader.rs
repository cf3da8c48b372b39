//! Song resource loading
//!
//! A song needs a lyric document and, for anyone who sings, the audio asset
//! on disk. Both halves run as separate tasks and the load completes only
//! once every requested half has finished. Results are cached per song, and
//! each half of a song has at most one task in flight, whichever scopes are
//! waiting on it.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::role::Role;
use crate::rtc::ContentCenter;

/// Why a load did not produce a playable song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum LoadError {
    #[error("No lyric url for the song")]
    NoLyricUrl,

    #[error("Preloading the song asset failed")]
    AssetPreloadFailed,

    #[error("Load was cancelled")]
    Cancelled,
}

/// Which halves of a song to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadScope {
    /// Listeners only scroll lyrics
    LyricOnly,
    /// Chorus joins only need the audio
    AssetOnly,
    Full,
}

impl LoadScope {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Audience => LoadScope::LyricOnly,
            Role::SoloSinger | Role::CoSinger | Role::LeadSinger => LoadScope::Full,
        }
    }

    pub const fn wants_lyric(self) -> bool {
        matches!(self, LoadScope::LyricOnly | LoadScope::Full)
    }

    pub const fn wants_asset(self) -> bool {
        matches!(self, LoadScope::AssetOnly | LoadScope::Full)
    }
}

/// Outcome of a successful load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSong {
    pub song_code: String,
    /// Present whenever the scope asked for the lyric
    pub lyric_url: Option<String>,
    pub asset_ready: bool,
}

#[derive(Debug, Clone, Default)]
struct CacheEntry {
    lyric_url: Option<String>,
    asset_ready: bool,
}

impl CacheEntry {
    fn satisfies(&self, scope: LoadScope) -> bool {
        (!scope.wants_lyric() || self.lyric_url.is_some()) && (!scope.wants_asset() || self.asset_ready)
    }
}

type SharedHalf<T> = Shared<BoxFuture<'static, T>>;

struct LoaderInner {
    content: Arc<dyn ContentCenter>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    // Lock order: an in-flight map before the cache
    lyrics_in_flight: Mutex<HashMap<String, SharedHalf<Option<String>>>>,
    assets_in_flight: Mutex<HashMap<String, SharedHalf<bool>>>,
}

/// Loads and caches song resources. Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct ResourceLoader {
    inner: Arc<LoaderInner>,
}

impl ResourceLoader {
    pub fn new(content: Arc<dyn ContentCenter>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                content,
                cache: RwLock::new(HashMap::new()),
                lyrics_in_flight: Mutex::new(HashMap::new()),
                assets_in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Load the halves of `song_code` that `scope` asks for
    pub async fn load(&self, song_code: &str, scope: LoadScope) -> Result<LoadedSong, LoadError> {
        if let Some(hit) = self.cached(song_code, scope) {
            debug!("Song {} already loaded ({:?})", song_code, scope);
            return Ok(hit);
        }
        info!("Loading song {} ({:?})", song_code, scope);

        let lyric = scope.wants_lyric().then(|| self.lyric_half(song_code));
        let asset = scope.wants_asset().then(|| self.asset_half(song_code));

        // Neither half cancels the other; wait for both before classifying
        let (lyric, asset) = tokio::join!(
            async move {
                match lyric {
                    Some(half) => Some(half.await),
                    None => None,
                }
            },
            async move {
                match asset {
                    Some(half) => Some(half.await),
                    None => None,
                }
            },
        );

        let result = match (lyric, asset) {
            (Some(None), _) => Err(LoadError::NoLyricUrl),
            (_, Some(false)) => Err(LoadError::AssetPreloadFailed),
            _ => {
                let entry = self.inner.cache.read().get(song_code).cloned().unwrap_or_default();
                Ok(LoadedSong {
                    song_code: song_code.to_string(),
                    lyric_url: entry.lyric_url,
                    asset_ready: entry.asset_ready,
                })
            }
        };

        match &result {
            Ok(_) => info!("Song {} loaded ({:?})", song_code, scope),
            Err(e) => warn!("Loading song {} failed: {}", song_code, e),
        }
        result
    }

    /// Make sure the audio asset is on disk
    pub async fn ensure_asset(&self, song_code: &str) -> Result<(), LoadError> {
        self.load(song_code, LoadScope::AssetOnly).await.map(|_| ())
    }

    /// Cached lyric url for a song, if resolved
    pub fn lyric_url(&self, song_code: &str) -> Option<String> {
        self.inner
            .cache
            .read()
            .get(song_code)
            .and_then(|entry| entry.lyric_url.clone())
    }

    pub fn is_ready(&self, song_code: &str, scope: LoadScope) -> bool {
        self.cached(song_code, scope).is_some()
    }

    fn cached(&self, song_code: &str, scope: LoadScope) -> Option<LoadedSong> {
        let cache = self.inner.cache.read();
        let entry = cache.get(song_code)?;
        entry.satisfies(scope).then(|| LoadedSong {
            song_code: song_code.to_string(),
            lyric_url: entry.lyric_url.clone(),
            asset_ready: entry.asset_ready,
        })
    }

    /// The lyric lookup for `song_code`, joining one already in flight
    fn lyric_half(&self, song_code: &str) -> SharedHalf<Option<String>> {
        let mut in_flight = self.inner.lyrics_in_flight.lock();
        if let Some(url) = self.lyric_url(song_code) {
            return future::ready(Some(url)).boxed().shared();
        }
        in_flight
            .entry(song_code.to_string())
            .or_insert_with(|| {
                let task = tokio::spawn(Arc::clone(&self.inner).resolve_lyric(song_code.to_string()));
                async move { task.await.ok().flatten() }.boxed().shared()
            })
            .clone()
    }

    /// The asset preload for `song_code`, joining one already in flight
    fn asset_half(&self, song_code: &str) -> SharedHalf<bool> {
        let mut in_flight = self.inner.assets_in_flight.lock();
        if self.is_ready(song_code, LoadScope::AssetOnly) {
            return future::ready(true).boxed().shared();
        }
        in_flight
            .entry(song_code.to_string())
            .or_insert_with(|| {
                let task = tokio::spawn(Arc::clone(&self.inner).preload_asset(song_code.to_string()));
                async move { task.await.unwrap_or(false) }.boxed().shared()
            })
            .clone()
    }
}

impl LoaderInner {
    async fn resolve_lyric(self: Arc<Self>, song_code: String) -> Option<String> {
        let url = match self.content.resolve_lyric(&song_code).await {
            Ok(url) if !url.is_empty() => Some(url),
            Ok(_) => {
                warn!("Content center returned an empty lyric url for {}", song_code);
                None
            }
            Err(e) => {
                warn!("Lyric lookup for {} failed: {}", song_code, e);
                None
            }
        };

        let mut in_flight = self.lyrics_in_flight.lock();
        if let Some(url) = &url {
            self.cache.write().entry(song_code.clone()).or_default().lyric_url = Some(url.clone());
        }
        in_flight.remove(&song_code);
        url
    }

    async fn preload_asset(self: Arc<Self>, song_code: String) -> bool {
        let ready = if self.content.is_asset_cached(&song_code) {
            debug!("Asset for {} already cached", song_code);
            true
        } else {
            match self.content.preload_asset(&song_code).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Preload of {} failed: {}", song_code, e);
                    false
                }
            }
        };

        let mut in_flight = self.assets_in_flight.lock();
        if ready {
            self.cache.write().entry(song_code.clone()).or_default().asset_ready = true;
        }
        in_flight.remove(&song_code);
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockContent;

    fn loader() -> (ResourceLoader, Arc<MockContent>) {
        let content = Arc::new(MockContent::new());
        (ResourceLoader::new(content.clone()), content)
    }

    #[tokio::test]
    async fn test_full_load_resolves_both_halves() {
        let (loader, content) = loader();

        let song = loader.load("S1", LoadScope::Full).await.unwrap();

        assert_eq!(song.lyric_url.as_deref(), Some("https://lyrics.test/S1.xml"));
        assert!(song.asset_ready);
        assert_eq!(content.lyric_calls(), 1);
        assert_eq!(content.preload_calls(), 1);
    }

    #[tokio::test]
    async fn test_ready_song_is_served_from_cache() {
        let (loader, content) = loader();

        let first = loader.load("S1", LoadScope::Full).await.unwrap();
        let second = loader.load("S1", LoadScope::Full).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(content.preload_calls(), 1);
        assert_eq!(content.lyric_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_task() {
        let (loader, content) = loader();

        let (a, b) = tokio::join!(loader.load("S1", LoadScope::Full), loader.load("S1", LoadScope::Full));

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(content.preload_calls(), 1);
        assert_eq!(content.lyric_calls(), 1);
    }

    #[tokio::test]
    async fn test_full_load_and_asset_ensure_share_one_preload() {
        let (loader, content) = loader();

        let (full, asset) = tokio::join!(loader.load("S1", LoadScope::Full), loader.ensure_asset("S1"));

        assert!(full.unwrap().asset_ready);
        assert_eq!(asset, Ok(()));
        assert_eq!(content.preload_calls(), 1);
        assert_eq!(content.lyric_calls(), 1);
    }

    #[tokio::test]
    async fn test_audience_skips_preload() {
        let (loader, content) = loader();

        let song = loader.load("S1", LoadScope::LyricOnly).await.unwrap();

        assert!(song.lyric_url.is_some());
        assert!(!song.asset_ready);
        assert_eq!(content.preload_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_lyric_fails_but_asset_still_loads() {
        let (loader, content) = loader();
        content.remove_lyric("S1");

        let err = loader.load("S1", LoadScope::Full).await.unwrap_err();

        assert_eq!(err, LoadError::NoLyricUrl);
        assert_eq!(content.preload_calls(), 1);
        // The asset half was not cancelled and is reusable
        assert!(loader.is_ready("S1", LoadScope::AssetOnly));
    }

    #[tokio::test]
    async fn test_lyric_failure_wins_over_preload_failure() {
        let (loader, content) = loader();
        content.remove_lyric("S1");
        content.fail_preload("S1");

        assert_eq!(loader.load("S1", LoadScope::Full).await, Err(LoadError::NoLyricUrl));
    }

    #[tokio::test]
    async fn test_preload_failure_is_retried_next_time() {
        let (loader, content) = loader();
        content.fail_preload("S1");

        assert_eq!(loader.load("S1", LoadScope::Full).await, Err(LoadError::AssetPreloadFailed));
        // Audience only needs the lyric, which did resolve
        assert!(loader.is_ready("S1", LoadScope::LyricOnly));

        content.allow_preload("S1");
        assert!(loader.load("S1", LoadScope::Full).await.is_ok());
        assert_eq!(content.preload_calls(), 2);
        // The cached lyric url was reused
        assert_eq!(content.lyric_calls(), 1);
    }

    #[tokio::test]
    async fn test_asset_already_on_disk_skips_download() {
        let (loader, content) = loader();
        content.mark_cached("S1");

        loader.ensure_asset("S1").await.unwrap();

        assert_eq!(content.preload_calls(), 0);
        assert_eq!(content.lyric_calls(), 0);
    }
}
