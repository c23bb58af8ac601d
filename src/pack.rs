use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::AnyPool;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::FailurePolicy;
use crate::dao::{self, PackRecord, ProcessedInsert};
use crate::telegram::{CreateSetOutcome, TelegramApi};
use crate::types::{hash_url, SourceItem, StickerAsset};

/// Creation attempts before giving up on a collection's pack name.
pub const MAX_NAME_ATTEMPTS: u32 = 10;

/// Remote length limit for the short-name base, before the bot suffix.
pub const SHORT_NAME_BASE_LIMIT: usize = 48;

/// Every sticker gets the same label; per-item emoji is not part of this
/// pipeline.
pub const DEFAULT_EMOJI: &str = "\u{1F642}";

#[derive(Debug, Error)]
pub enum PackError {
    #[error("pack name collisions exhausted after {0} attempts")]
    NameExhausted(u32),
}

/// Remote pack operations, seamed out so the synchronizer can be driven
/// against a mock in tests.
#[async_trait]
pub trait PackService: Send + Sync {
    /// Remote handle of the acting identity. Failure is fatal: the mandatory
    /// name suffix cannot be built without it.
    async fn bot_username(&self) -> Result<String>;
    async fn create_set(&self, name: &str, title: &str) -> Result<CreateSetOutcome>;
    async fn add_sticker(&self, set_name: &str, png: Vec<u8>, emoji: &str) -> Result<()>;
}

#[async_trait]
impl PackService for TelegramApi {
    async fn bot_username(&self) -> Result<String> {
        Ok(self.get_me().await?.username)
    }

    async fn create_set(&self, name: &str, title: &str) -> Result<CreateSetOutcome> {
        self.create_sticker_set(name, title).await
    }

    async fn add_sticker(&self, set_name: &str, png: Vec<u8>, emoji: &str) -> Result<()> {
        TelegramApi::add_sticker(self, set_name, png, emoji).await
    }
}

/// Transliterate a collection title into the constrained short-name charset:
/// letters, digits and underscore, lower-cased, truncated, with a generic
/// placeholder when nothing survives.
pub fn slugify_short_name(title: &str) -> String {
    let mut base = String::with_capacity(title.len());
    let mut last_underscore = true; // suppress leading underscores
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            base.push(ch.to_ascii_lowercase());
            last_underscore = ch == '_';
        } else if !last_underscore {
            base.push('_');
            last_underscore = true;
        }
    }
    let base: String = base.trim_matches('_').chars().take(SHORT_NAME_BASE_LIMIT).collect();
    let base = base.trim_matches('_').to_string();
    if base.is_empty() {
        "stickerpack".to_string()
    } else {
        base
    }
}

/// Ensures a uniquely-named remote pack exists and appends normalized assets
/// to it, one item at a time, isolating per-item failures. Records every
/// confirmed append in the ledger.
pub struct PackSynchronizer<'a, S: PackService> {
    svc: &'a S,
    pool: &'a AnyPool,
    policy: FailurePolicy,
}

impl<'a, S: PackService> PackSynchronizer<'a, S> {
    pub fn new(svc: &'a S, pool: &'a AnyPool, policy: FailurePolicy) -> Self {
        Self { svc, pool, policy }
    }

    /// Establish the remote pack for `(source, collection)`, reusing a
    /// previously recorded identity when one exists.
    ///
    /// On a fresh collection this derives a short name from the collection
    /// title, retries with a numeric disambiguator while the remote reports
    /// the name occupied (bounded at [`MAX_NAME_ATTEMPTS`]), and treats any
    /// other rejection as "this pack already exists for our identity".
    pub async fn ensure_pack(
        &self,
        source: &str,
        collection: &str,
        title: &str,
    ) -> Result<PackRecord> {
        if let Some(existing) = dao::get_pack(self.pool, source, collection).await? {
            info!(short_name = %existing.short_name, "reusing recorded pack");
            return Ok(existing);
        }

        let username = self
            .svc
            .bot_username()
            .await
            .context("resolving bot identity for pack naming")?;
        let base = slugify_short_name(collection);
        let suffix = format!("_by_{username}");

        let mut name = format!("{base}{suffix}");
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            match self.svc.create_set(&name, title).await? {
                CreateSetOutcome::Created => {
                    info!(short_name = %name, "created sticker pack");
                    let pack = PackRecord {
                        title: title.to_string(),
                        short_name: name,
                    };
                    dao::save_pack(self.pool, source, collection, &pack).await?;
                    return Ok(pack);
                }
                CreateSetOutcome::NameOccupied => {
                    name = format!("{base}_{attempt}{suffix}");
                }
                CreateSetOutcome::Failed(reason) => {
                    // Assume a pack we created earlier; the remote does not
                    // let us distinguish "exists and is ours" cheaply.
                    warn!(short_name = %name, %reason, "create rejected; treating pack as established");
                    let pack = PackRecord {
                        title: title.to_string(),
                        short_name: name,
                    };
                    dao::save_pack(self.pool, source, collection, &pack).await?;
                    return Ok(pack);
                }
            }
        }
        Err(PackError::NameExhausted(MAX_NAME_ATTEMPTS).into())
    }

    /// Submit one normalized asset. Returns true when the item was appended
    /// and recorded. An append failure is isolated: it is logged, optionally
    /// suppressed per policy, and never aborts the run.
    ///
    /// Ordering invariant: the ledger write happens only after the remote
    /// confirms the append (unless the suppress policy explicitly opts out),
    /// so a transient failure leaves the item eligible for the next run.
    pub async fn add_item(
        &self,
        pack: &PackRecord,
        source: &str,
        collection: &str,
        item: &SourceItem,
        asset: StickerAsset,
    ) -> Result<bool> {
        let Some(item_id) = item.stable_id() else {
            return Ok(false);
        };

        match self
            .svc
            .add_sticker(&pack.short_name, asset.png, DEFAULT_EMOJI)
            .await
        {
            Ok(()) => {
                self.remember(source, collection, &item_id, item).await?;
                Ok(true)
            }
            Err(e) => {
                warn!(item = %item_id, error = %e, "sticker append failed, skipping item");
                if self.policy == FailurePolicy::SkipAndSuppress {
                    self.remember(source, collection, &item_id, item).await?;
                }
                Ok(false)
            }
        }
    }

    /// Ledger handling for an item that failed before upload (download or
    /// conversion). Under `SkipAndSuppress` the item is recorded so broken
    /// files are not fetched again on every run.
    pub async fn note_failed_item(
        &self,
        source: &str,
        collection: &str,
        item: &SourceItem,
    ) -> Result<()> {
        if self.policy == FailurePolicy::SkipAndSuppress {
            if let Some(item_id) = item.stable_id() {
                self.remember(source, collection, &item_id, item).await?;
            }
        }
        Ok(())
    }

    async fn remember(
        &self,
        source: &str,
        collection: &str,
        item_id: &str,
        item: &SourceItem,
    ) -> Result<()> {
        let url_hash = item.media_url().map(hash_url).unwrap_or_default();
        dao::remember_item(
            self.pool,
            &ProcessedInsert {
                source: source.to_string(),
                collection: collection.to_string(),
                item_id: item_id.to_string(),
                url_hash,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use std::sync::Mutex;

    struct MockRemote {
        /// Names create_set was called with, in order.
        create_calls: Mutex<Vec<String>>,
        /// Reject this many create attempts as occupied before accepting.
        occupied_rejections: usize,
        /// When set, every create fails with this non-collision reason.
        other_failure: Option<String>,
        added: Mutex<Vec<String>>,
        fail_all_adds: bool,
    }

    impl MockRemote {
        fn accepting() -> Self {
            Self {
                create_calls: Mutex::new(Vec::new()),
                occupied_rejections: 0,
                other_failure: None,
                added: Mutex::new(Vec::new()),
                fail_all_adds: false,
            }
        }
    }

    #[async_trait]
    impl PackService for MockRemote {
        async fn bot_username(&self) -> Result<String> {
            Ok("samplebot".into())
        }

        async fn create_set(&self, name: &str, _title: &str) -> Result<CreateSetOutcome> {
            let mut calls = self.create_calls.lock().unwrap();
            calls.push(name.to_string());
            if let Some(reason) = &self.other_failure {
                return Ok(CreateSetOutcome::Failed(reason.clone()));
            }
            if calls.len() <= self.occupied_rejections {
                return Ok(CreateSetOutcome::NameOccupied);
            }
            Ok(CreateSetOutcome::Created)
        }

        async fn add_sticker(&self, set_name: &str, _png: Vec<u8>, _emoji: &str) -> Result<()> {
            if self.fail_all_adds {
                anyhow::bail!("remote quota exceeded");
            }
            self.added.lock().unwrap().push(set_name.to_string());
            Ok(())
        }
    }

    async fn memory_db() -> Database {
        let db = Database::connect(Some("sqlite::memory:")).await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    fn item(id: &str) -> SourceItem {
        SourceItem {
            id: Some(id.into()),
            url: Some(format!("https://example.com/{id}.gif")),
            ..Default::default()
        }
    }

    fn asset() -> StickerAsset {
        StickerAsset {
            png: vec![0u8; 4],
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn slug_strips_punctuation_and_lowercases() {
        assert_eq!(slugify_short_name("Epic Fails!!"), "epic_fails");
        assert_eq!(slugify_short_name("  spaced   out  "), "spaced_out");
        assert_eq!(slugify_short_name("Caps_And_123"), "caps_and_123");
    }

    #[test]
    fn slug_falls_back_when_empty() {
        assert_eq!(slugify_short_name("!!!"), "stickerpack");
        assert_eq!(slugify_short_name(""), "stickerpack");
    }

    #[test]
    fn slug_truncates_long_titles() {
        let long = "x".repeat(200);
        assert_eq!(slugify_short_name(&long).len(), SHORT_NAME_BASE_LIMIT);
    }

    #[tokio::test]
    async fn ensure_pack_derives_suffixed_name() {
        let db = memory_db().await;
        let remote = MockRemote::accepting();
        let sync = PackSynchronizer::new(&remote, db.pool(), FailurePolicy::SkipAndRetry);

        let pack = sync
            .ensure_pack("hardgifs", "Epic Fails!!", "Epic Fails @hardstickers")
            .await
            .unwrap();
        assert_eq!(pack.short_name, "epic_fails_by_samplebot");
        // Identity recorded for the next run.
        let saved = dao::get_pack(db.pool(), "hardgifs", "Epic Fails!!")
            .await
            .unwrap();
        assert_eq!(saved, Some(pack));
    }

    #[tokio::test]
    async fn ensure_pack_retries_with_numeric_disambiguator() {
        let db = memory_db().await;
        let remote = MockRemote {
            occupied_rejections: 2,
            ..MockRemote::accepting()
        };
        let sync = PackSynchronizer::new(&remote, db.pool(), FailurePolicy::SkipAndRetry);

        let pack = sync
            .ensure_pack("hardgifs", "fails", "Fails")
            .await
            .unwrap();
        assert_eq!(pack.short_name, "fails_2_by_samplebot");
        assert_eq!(
            *remote.create_calls.lock().unwrap(),
            vec![
                "fails_by_samplebot",
                "fails_1_by_samplebot",
                "fails_2_by_samplebot",
            ]
        );
    }

    #[tokio::test]
    async fn ensure_pack_collision_loop_is_bounded() {
        let db = memory_db().await;
        let remote = MockRemote {
            occupied_rejections: usize::MAX,
            ..MockRemote::accepting()
        };
        let sync = PackSynchronizer::new(&remote, db.pool(), FailurePolicy::SkipAndRetry);

        let err = sync
            .ensure_pack("hardgifs", "fails", "Fails")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PackError>(),
            Some(PackError::NameExhausted(MAX_NAME_ATTEMPTS))
        ));
        assert_eq!(
            remote.create_calls.lock().unwrap().len(),
            MAX_NAME_ATTEMPTS as usize
        );
        // No identity is recorded for an unestablished pack.
        assert!(dao::get_pack(db.pool(), "hardgifs", "fails")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn ensure_pack_recovers_from_other_rejection() {
        let db = memory_db().await;
        let remote = MockRemote {
            other_failure: Some("Bad Request: sticker set already exists".into()),
            ..MockRemote::accepting()
        };
        let sync = PackSynchronizer::new(&remote, db.pool(), FailurePolicy::SkipAndRetry);

        let pack = sync
            .ensure_pack("hardgifs", "fails", "Fails")
            .await
            .unwrap();
        assert_eq!(pack.short_name, "fails_by_samplebot");
        assert_eq!(remote.create_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ensure_pack_reuses_recorded_identity() {
        let db = memory_db().await;
        let existing = PackRecord {
            title: "Fails".into(),
            short_name: "fails_7_by_samplebot".into(),
        };
        dao::save_pack(db.pool(), "hardgifs", "fails", &existing)
            .await
            .unwrap();

        let remote = MockRemote::accepting();
        let sync = PackSynchronizer::new(&remote, db.pool(), FailurePolicy::SkipAndRetry);
        let pack = sync
            .ensure_pack("hardgifs", "fails", "Fails")
            .await
            .unwrap();
        assert_eq!(pack, existing);
        assert!(remote.create_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_item_records_only_after_confirmed_append() {
        let db = memory_db().await;
        let remote = MockRemote::accepting();
        let sync = PackSynchronizer::new(&remote, db.pool(), FailurePolicy::SkipAndRetry);
        let pack = sync
            .ensure_pack("hardgifs", "fails", "Fails")
            .await
            .unwrap();

        let ok = sync
            .add_item(&pack, "hardgifs", "fails", &item("a1"), asset())
            .await
            .unwrap();
        assert!(ok);
        assert!(dao::is_seen(db.pool(), "hardgifs", "fails", "a1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn failed_append_leaves_item_eligible_under_retry_policy() {
        let db = memory_db().await;
        let remote = MockRemote {
            fail_all_adds: true,
            ..MockRemote::accepting()
        };
        let sync = PackSynchronizer::new(&remote, db.pool(), FailurePolicy::SkipAndRetry);
        let pack = sync
            .ensure_pack("hardgifs", "fails", "Fails")
            .await
            .unwrap();

        let ok = sync
            .add_item(&pack, "hardgifs", "fails", &item("a1"), asset())
            .await
            .unwrap();
        assert!(!ok);
        assert!(!dao::is_seen(db.pool(), "hardgifs", "fails", "a1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn failed_append_is_suppressed_under_suppress_policy() {
        let db = memory_db().await;
        let remote = MockRemote {
            fail_all_adds: true,
            ..MockRemote::accepting()
        };
        let sync = PackSynchronizer::new(&remote, db.pool(), FailurePolicy::SkipAndSuppress);
        let pack = sync
            .ensure_pack("hardgifs", "fails", "Fails")
            .await
            .unwrap();

        let ok = sync
            .add_item(&pack, "hardgifs", "fails", &item("a1"), asset())
            .await
            .unwrap();
        assert!(!ok);
        // Recorded so the broken item is not retried forever.
        assert!(dao::is_seen(db.pool(), "hardgifs", "fails", "a1")
            .await
            .unwrap());
    }
}
