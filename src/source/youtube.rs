//! YouTube video thumbnails, served through the HTTP source.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use super::handler::{Source, SourceMeta};
use super::http::HttpSource;
use crate::error::SourceError;

/// Rule pattern matching YouTube watch URLs.
pub const DEFAULT_PATTERN: &str = r"(?i)^(https?:)?//(www\.)?(youtube\.com/watch|youtu\.be/)";

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]v=([A-Za-z0-9_-]+)").expect("Invalid video id regex"));

/// Maps a watch URL to the video's still image and fetches that.
#[derive(Debug, Clone)]
pub struct YouTubeSource {
    http: Arc<HttpSource>,
}

impl YouTubeSource {
    pub fn new(http: Arc<HttpSource>) -> Self {
        Self { http }
    }

    /// Thumbnail URL for a watch URL, if it carries a video id.
    pub fn thumbnail_url(src: &str) -> Option<String> {
        VIDEO_ID
            .captures(src)
            .and_then(|c| c.get(1))
            .map(|id| format!("http://img.youtube.com/vi/{}/0.jpg", id.as_str()))
    }
}

#[async_trait]
impl Source for YouTubeSource {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn read_metadata(&self, src: &str) -> Result<SourceMeta, SourceError> {
        let url = Self::thumbnail_url(src).ok_or_else(|| SourceError::not_found(src))?;
        self.http.read_metadata(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_url() {
        assert_eq!(
            YouTubeSource::thumbnail_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(),
            Some("http://img.youtube.com/vi/dQw4w9WgXcQ/0.jpg")
        );
        assert_eq!(
            YouTubeSource::thumbnail_url("http://youtube.com/watch?feature=x&v=ab-_9&t=3").as_deref(),
            Some("http://img.youtube.com/vi/ab-_9/0.jpg")
        );
        assert_eq!(YouTubeSource::thumbnail_url("https://youtube.com/watch"), None);
    }

    #[test]
    fn test_default_pattern() {
        let re = Regex::new(DEFAULT_PATTERN).unwrap();
        assert!(re.is_match("https://www.youtube.com/watch?v=abc"));
        assert!(re.is_match("//youtube.com/watch?v=abc"));
        assert!(!re.is_match("https://example.com/watch?v=abc"));
    }
}
