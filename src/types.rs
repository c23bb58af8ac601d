use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One media unit discovered on the source platform. Transient: produced by
/// the scraper, consumed once per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: Option<String>,
    pub url: Option<String>,
    /// Alternate rendition in WebP, preferred for download when present.
    pub webp_url: Option<String>,
    pub title: Option<String>,
}

impl SourceItem {
    /// Best download location, or None if the item carries no usable URL.
    pub fn media_url(&self) -> Option<&str> {
        self.webp_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(self.url.as_deref().filter(|u| !u.is_empty()))
    }

    /// Stable identifier: the platform id when present, otherwise a hash of
    /// the media URL.
    pub fn stable_id(&self) -> Option<String> {
        if let Some(id) = self.id.as_deref().filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
        self.media_url().map(hash_url)
    }

    /// Key used for in-list deduplication, independent of the ledger.
    pub fn dedup_key(&self) -> Option<String> {
        self.id
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.media_url().map(str::to_string))
    }
}

/// Normalized sticker raster, held only for the duration of one item's
/// processing.
#[derive(Debug, Clone)]
pub struct StickerAsset {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Terminal status of one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// No new items; the collection was already fully mirrored.
    UpToDate,
    /// All attempted items were appended and recorded.
    FullySynced,
    /// Some items were skipped; they remain eligible for the next run.
    PartiallySynced,
    /// The run stopped early (user cancel); no partial item state remains.
    Aborted,
}

/// Per-run counters reported to the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub discovered: usize,
    pub filtered: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub status: Option<RunStatus>,
    pub pack_short_name: Option<String>,
}

/// SHA-256 of a URL with its query string stripped, so the hash survives
/// CDN query-parameter churn.
pub fn hash_url(u: &str) -> String {
    let canonical = match url::Url::parse(u) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => u.to_string(),
    };
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_query_params() {
        let a = hash_url("https://media.giphy.com/x/giphy.webp?cid=abc&rid=1");
        let b = hash_url("https://media.giphy.com/x/giphy.webp?cid=zzz");
        let c = hash_url("https://media.giphy.com/x/giphy.webp");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn hash_differs_per_path() {
        assert_ne!(
            hash_url("https://media.giphy.com/a.webp"),
            hash_url("https://media.giphy.com/b.webp")
        );
    }

    #[test]
    fn stable_id_prefers_platform_id() {
        let it = SourceItem {
            id: Some("abc123".into()),
            url: Some("https://example.com/x.gif".into()),
            ..Default::default()
        };
        assert_eq!(it.stable_id().as_deref(), Some("abc123"));
    }

    #[test]
    fn stable_id_falls_back_to_url_hash() {
        let it = SourceItem {
            url: Some("https://example.com/x.gif".into()),
            ..Default::default()
        };
        assert_eq!(
            it.stable_id(),
            Some(hash_url("https://example.com/x.gif"))
        );
    }

    #[test]
    fn media_url_prefers_webp() {
        let it = SourceItem {
            url: Some("https://example.com/x.gif".into()),
            webp_url: Some("https://example.com/x.webp".into()),
            ..Default::default()
        };
        assert_eq!(it.media_url(), Some("https://example.com/x.webp"));
    }
}
