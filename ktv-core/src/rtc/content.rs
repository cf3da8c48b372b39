//! Song content center boundary

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by the content center
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("No lyric available for song {0}")]
    NoLyric(String),

    #[error("Preload of song {song} failed: {reason}")]
    Preload { song: String, reason: String },

    #[error("No answer from the content center for song {0}")]
    Timeout(String),

    #[error("Content request was dropped before completing")]
    Dropped,
}

/// Remote song catalog: lyric lookup and audio asset download/caching
#[async_trait]
pub trait ContentCenter: Send + Sync {
    /// Resolve the lyric document url for a song
    async fn resolve_lyric(&self, song_code: &str) -> Result<String, ContentError>;

    /// Download and cache the song's audio asset
    async fn preload_asset(&self, song_code: &str) -> Result<(), ContentError>;

    /// Whether the asset is already on disk
    fn is_asset_cached(&self, song_code: &str) -> bool;
}
