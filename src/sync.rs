use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::AnyPool;
use tracing::{info, warn};

use crate::announce::{titlecase, Announce};
use crate::config::FailurePolicy;
use crate::dao;
use crate::giphy::GiphyClient;
use crate::media::{self, FormatHint};
use crate::pack::{PackService, PackSynchronizer};
use crate::preview;
use crate::types::{RunStatus, SourceItem, SyncReport};

/// Ledger collection name used when mirroring the profile feed without a
/// named collection.
pub const GENERIC_FEED: &str = "full_feed";

/// Produces candidate items and collection names for a profile.
#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn list_collections(&self, profile: &str) -> Result<Vec<String>>;
    async fn list_items(
        &self,
        profile: &str,
        collection: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceItem>>;
}

#[async_trait]
impl ItemSource for GiphyClient {
    async fn list_collections(&self, profile: &str) -> Result<Vec<String>> {
        GiphyClient::list_collections(self, profile).await
    }

    async fn list_items(
        &self,
        profile: &str,
        collection: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceItem>> {
        GiphyClient::list_items(self, profile, collection, limit).await
    }
}

/// Downloads one media blob. Seamed out so orchestrator tests never touch
/// the network.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("downloading {url}"))?
            .error_for_status()
            .with_context(|| format!("downloading {url}"))?;
        Ok(resp.bytes().await.context("reading media body")?.to_vec())
    }
}

/// Cooperative cancellation, checked between items only: an in-flight item's
/// network calls complete or fail naturally before the run stops.
pub type CancelFlag = Arc<AtomicBool>;

#[derive(Clone)]
pub struct SyncOptions {
    pub batch_cap: usize,
    pub fetch_limit: usize,
    pub preview_seconds: u32,
    pub failure_policy: FailurePolicy,
    /// Disabled for runs without an announcement channel (and in tests).
    pub render_preview: bool,
    pub cancel: CancelFlag,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_cap: 50,
            fetch_limit: 300,
            preview_seconds: 2,
            failure_policy: FailurePolicy::default(),
            render_preview: true,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Outcome of the Collecting + Filtering stages: the capped list of new
/// items, plus the counts the report needs. The caller may show this to the
/// user for confirmation before executing.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub profile: String,
    /// Ledger key for the collection; the generic feed when none was named.
    pub collection: String,
    /// Visible pack title derived from the collection name.
    pub title: String,
    pub items: Vec<SourceItem>,
    pub discovered: usize,
    pub eligible: usize,
}

/// Drives one run: Collecting → Filtering → (confirmation by the caller) →
/// Processing → Announcing → Done. Repeated runs are made safe by the
/// ledger, not by anything in here.
pub struct Orchestrator<'a, S, P, F>
where
    S: ItemSource,
    P: PackService,
    F: MediaFetcher,
{
    source: &'a S,
    pack_service: &'a P,
    fetcher: &'a F,
    pool: &'a AnyPool,
    options: SyncOptions,
}

impl<'a, S, P, F> Orchestrator<'a, S, P, F>
where
    S: ItemSource,
    P: PackService,
    F: MediaFetcher,
{
    pub fn new(
        source: &'a S,
        pack_service: &'a P,
        fetcher: &'a F,
        pool: &'a AnyPool,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            pack_service,
            fetcher,
            pool,
            options,
        }
    }

    /// Collect candidates and filter them down to the capped batch of new
    /// items for this (source, collection).
    pub async fn plan(&self, profile: &str, collection: Option<&str>) -> Result<SyncPlan> {
        let ledger_collection = collection
            .filter(|c| !c.is_empty())
            .unwrap_or(GENERIC_FEED)
            .to_string();
        info!(profile, collection = %ledger_collection, "collecting items");

        let candidates = self
            .source
            .list_items(profile, collection, self.options.fetch_limit)
            .await
            .context("listing source items")?;
        let discovered = candidates.len();

        // Usable media location required.
        let candidates: Vec<SourceItem> = candidates
            .into_iter()
            .filter(|it| it.media_url().is_some())
            .collect();

        // Defensive in-list dedup by id-or-url, first occurrence wins.
        let mut seen_keys = HashSet::new();
        let candidates: Vec<SourceItem> = candidates
            .into_iter()
            .filter(|it| match it.dedup_key() {
                Some(key) => seen_keys.insert(key),
                None => false,
            })
            .collect();

        // Drop everything the ledger already knows.
        let mut fresh = Vec::new();
        for it in candidates {
            let Some(item_id) = it.stable_id() else {
                continue;
            };
            if !dao::is_seen(self.pool, profile, &ledger_collection, &item_id).await? {
                fresh.push(it);
            }
        }
        let eligible = fresh.len();
        fresh.truncate(self.options.batch_cap);

        info!(
            discovered,
            eligible,
            attempting = fresh.len(),
            "filtering complete"
        );
        Ok(SyncPlan {
            profile: profile.to_string(),
            title: titlecase(&ledger_collection),
            collection: ledger_collection,
            items: fresh,
            discovered,
            eligible,
        })
    }

    /// Process the planned batch and hand the result to the announcer.
    pub async fn execute(&self, plan: &SyncPlan, announcer: &dyn Announce) -> Result<SyncReport> {
        let mut report = SyncReport {
            discovered: plan.discovered,
            filtered: plan.eligible,
            ..Default::default()
        };

        if plan.items.is_empty() {
            // Normal terminal state, not an error.
            info!(collection = %plan.collection, "already fully synchronized, nothing to do");
            report.status = Some(RunStatus::UpToDate);
            return Ok(report);
        }

        let pack_sync = PackSynchronizer::new(
            self.pack_service,
            self.pool,
            self.options.failure_policy,
        );
        let pack = pack_sync
            .ensure_pack(&plan.profile, &plan.collection, &plan.title)
            .await?;
        report.pack_short_name = Some(pack.short_name.clone());

        let mut preview_png: Option<Vec<u8>> = None;
        let mut cancelled = false;

        for item in &plan.items {
            if self.options.cancel.load(Ordering::Relaxed) {
                info!("cancellation requested, stopping between items");
                cancelled = true;
                break;
            }
            report.attempted += 1;

            // Guaranteed by the plan filter.
            let Some(url) = item.media_url().map(str::to_string) else {
                report.skipped += 1;
                continue;
            };

            let bytes = match self.fetcher.fetch(&url).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(%url, error = %e, "download failed, skipping item");
                    report.skipped += 1;
                    pack_sync
                        .note_failed_item(&plan.profile, &plan.collection, item)
                        .await?;
                    continue;
                }
            };

            let asset = match media::normalize(&bytes, FormatHint::from_url(&url)) {
                Ok(a) => a,
                Err(e) => {
                    warn!(%url, error = %e, "conversion failed, skipping item");
                    report.skipped += 1;
                    pack_sync
                        .note_failed_item(&plan.profile, &plan.collection, item)
                        .await?;
                    continue;
                }
            };

            // First successfully normalized asset represents the pack.
            if preview_png.is_none() {
                preview_png = Some(asset.png.clone());
            }

            if pack_sync
                .add_item(&pack, &plan.profile, &plan.collection, item, asset)
                .await?
            {
                report.succeeded += 1;
            } else {
                report.skipped += 1;
            }
        }

        if !cancelled && report.succeeded > 0 {
            let clip = match (&preview_png, self.options.render_preview) {
                (Some(png), true) => {
                    let workdir =
                        std::env::temp_dir().join(format!("packrat-{}", std::process::id()));
                    match preview::render_preview(png, &workdir, self.options.preview_seconds)
                        .await
                    {
                        Ok(mp4) => Some(mp4),
                        Err(e) => {
                            // Degraded mode: announce without the clip.
                            warn!(error = %e, "preview rendering failed, announcing text-only");
                            None
                        }
                    }
                }
                _ => None,
            };
            if let Err(e) = announcer.announce(&pack, &plan.collection, clip).await {
                warn!(error = %e, "announcement failed");
            }
        }

        report.status = Some(if cancelled {
            RunStatus::Aborted
        } else if report.skipped == 0 {
            RunStatus::FullySynced
        } else {
            RunStatus::PartiallySynced
        });
        Ok(report)
    }
}
