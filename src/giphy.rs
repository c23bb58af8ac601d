use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::SourceItem;

const API_BASE: &str = "https://api.giphy.com/v1";
const SITE_BASE: &str = "https://giphy.com";

/// GIPHY client: keyed API endpoints when a key is configured, falling back
/// to scraping the embedded `__NEXT_DATA__` JSON blob from the profile page.
#[derive(Clone)]
pub struct GiphyClient {
    http: reqwest::Client,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Gif>,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    #[serde(default)]
    data: Option<ChannelData>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelData {
    #[serde(default)]
    featured_collections: Vec<FeaturedCollection>,
}

#[derive(Debug, Deserialize)]
struct FeaturedCollection {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Gif {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    images: Images,
}

#[derive(Debug, Default, Deserialize)]
struct Images {
    #[serde(default)]
    original: Option<Rendition>,
}

#[derive(Debug, Deserialize)]
struct Rendition {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    webp: Option<String>,
}

impl GiphyClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }

    /// Ordered, deduplicated collection names for a profile. An empty result
    /// is normal and sends the caller into generic-feed mode.
    pub async fn list_collections(&self, profile: &str) -> Result<Vec<String>> {
        let profile = profile_from_input(profile);

        if let Some(key) = &self.api_key {
            let resp = self
                .http
                .get(format!("{API_BASE}/channels/{profile}"))
                .query(&[("api_key", key.as_str())])
                .send()
                .await
                .context("fetching channel metadata")?;
            if resp.status().is_success() {
                let body: ChannelResponse =
                    resp.json().await.context("decoding channel metadata")?;
                let names = body
                    .data
                    .unwrap_or_default()
                    .featured_collections
                    .into_iter()
                    .filter_map(|c| c.name)
                    .filter(|n| !n.is_empty());
                return Ok(dedup_preserving_order(names));
            }
            warn!(%profile, "channel API unavailable, falling back to page scrape");
        }

        let html = self.fetch_profile_page(&profile).await?;
        let Some(data) = extract_next_data(&html) else {
            debug!(%profile, "no __NEXT_DATA__ blob on profile page");
            return Ok(Vec::new());
        };
        let value: Value = serde_json::from_str(data).context("parsing __NEXT_DATA__")?;
        Ok(collections_from_next_data(&value))
    }

    /// Ordered items for a profile, optionally scoped to a collection,
    /// capped at `limit`.
    pub async fn list_items(
        &self,
        profile: &str,
        collection: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceItem>> {
        let profile = profile_from_input(profile);

        if let (Some(key), Some(coll)) = (&self.api_key, collection) {
            // Collection names are not directly queryable; search by the
            // collection tag is the closest the public API offers.
            let resp = self
                .http
                .get(format!("{API_BASE}/gifs/search"))
                .query(&[
                    ("api_key", key.as_str()),
                    ("q", coll),
                    ("limit", &limit.to_string()),
                    ("sort", "relevant"),
                ])
                .send()
                .await
                .context("searching collection items")?;
            if resp.status().is_success() {
                let body: SearchResponse = resp.json().await.context("decoding search results")?;
                return Ok(body.data.into_iter().map(gif_to_item).collect());
            }
            warn!(%profile, collection = coll, "search API unavailable, falling back to page scrape");
        }

        let html = self.fetch_profile_page(&profile).await?;
        let Some(data) = extract_next_data(&html) else {
            return Ok(Vec::new());
        };
        let value: Value = serde_json::from_str(data).context("parsing __NEXT_DATA__")?;
        Ok(items_from_next_data(&value, limit))
    }

    async fn fetch_profile_page(&self, profile: &str) -> Result<String> {
        self.http
            .get(format!("{SITE_BASE}/{profile}"))
            .send()
            .await
            .with_context(|| format!("fetching profile page for {profile}"))?
            .text()
            .await
            .context("reading profile page body")
    }
}

/// Accepts a raw handle or a full profile URL; the handle is the first path
/// segment.
pub fn profile_from_input(input: &str) -> String {
    let input = input.trim();
    if input.starts_with("http") {
        if let Ok(parsed) = url::Url::parse(input) {
            if let Some(seg) = parsed
                .path_segments()
                .and_then(|mut s| s.find(|p| !p.is_empty()))
            {
                return seg.to_string();
            }
        }
    }
    input.to_string()
}

/// Slice out the `__NEXT_DATA__` JSON embedded in a profile page.
fn extract_next_data(html: &str) -> Option<&str> {
    let id_pos = html.find("id=\"__NEXT_DATA__\"")?;
    let rest = &html[id_pos..];
    let start = rest.find('>')? + 1;
    let end = rest[start..].find("</script>")?;
    Some(&rest[start..start + end])
}

fn collections_from_next_data(value: &Value) -> Vec<String> {
    let cols = value
        .pointer("/props/pageProps/channel/featured_collections")
        .and_then(Value::as_array);
    let names = cols
        .into_iter()
        .flatten()
        .filter_map(|c| c.get("name").and_then(Value::as_str))
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    dedup_preserving_order(names)
}

fn items_from_next_data(value: &Value, limit: usize) -> Vec<SourceItem> {
    // The page embeds gifs under pageData on newer builds and directly under
    // pageProps on older ones.
    let gifs = value
        .pointer("/props/pageProps/pageData/gifs")
        .or_else(|| value.pointer("/props/pageProps/gifs"))
        .and_then(Value::as_array);

    gifs.into_iter()
        .flatten()
        .take(limit)
        .map(|g| SourceItem {
            id: g.get("id").and_then(Value::as_str).map(str::to_string),
            url: g
                .pointer("/images/original/url")
                .and_then(Value::as_str)
                .map(str::to_string),
            webp_url: g
                .pointer("/images/original/webp")
                .and_then(Value::as_str)
                .map(str::to_string),
            title: g
                .get("title")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        })
        .collect()
}

fn gif_to_item(g: Gif) -> SourceItem {
    let original = g.images.original;
    SourceItem {
        id: g.id,
        url: original.as_ref().and_then(|r| r.url.clone()),
        webp_url: original.as_ref().and_then(|r| r.webp.clone()),
        title: g.title.filter(|t| !t.is_empty()),
    }
}

fn dedup_preserving_order(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for n in names {
        if seen.insert(n.clone()) {
            out.push(n);
        }
    }
    out
}
