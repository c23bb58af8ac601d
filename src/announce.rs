use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::dao::PackRecord;
use crate::telegram::TelegramApi;

/// Receives the finished pack identity and an optional preview clip;
/// responsible for all outbound message formatting.
#[async_trait]
pub trait Announce: Send + Sync {
    async fn announce(&self, pack: &PackRecord, collection: &str, preview: Option<Vec<u8>>)
        -> Result<()>;
}

/// Posts the release announcement to a Telegram channel with a button that
/// opens the pack.
pub struct ChannelAnnouncer {
    api: TelegramApi,
    channel_id: String,
}

impl ChannelAnnouncer {
    pub fn new(api: TelegramApi, channel_id: String) -> Self {
        Self { api, channel_id }
    }
}

#[async_trait]
impl Announce for ChannelAnnouncer {
    async fn announce(
        &self,
        pack: &PackRecord,
        collection: &str,
        preview: Option<Vec<u8>>,
    ) -> Result<()> {
        let caption = release_caption(collection);
        let button_url = format!("https://t.me/addstickers/{}", pack.short_name);

        if let Some(clip) = preview {
            match self
                .api
                .send_channel_post(&self.channel_id, &caption, "View the pack", &button_url, Some(clip))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    // Degrade to a text-only announcement.
                    warn!(error = %e, "animated announcement failed, falling back to text");
                }
            }
        }
        self.api
            .send_channel_post(&self.channel_id, &caption, "View the pack", &button_url, None)
            .await
    }
}

/// No-op announcer for runs without a configured channel.
pub struct NullAnnouncer;

#[async_trait]
impl Announce for NullAnnouncer {
    async fn announce(
        &self,
        _pack: &PackRecord,
        _collection: &str,
        _preview: Option<Vec<u8>>,
    ) -> Result<()> {
        Ok(())
    }
}

fn release_caption(collection: &str) -> String {
    format!(
        "{}\n{}\nSubscribe for more \u{1F642}",
        bold("New sticker pack released"),
        bold(&titlecase(collection))
    )
}

fn bold(s: &str) -> String {
    format!("<b>{s}</b>")
}

/// Title Case every whitespace-separated word.
pub fn titlecase(s: &str) -> String {
    s.trim()
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titlecases_words() {
        assert_eq!(titlecase("epic fails"), "Epic Fails");
        assert_eq!(titlecase("  ALREADY  SHOUTING "), "Already Shouting");
        assert_eq!(titlecase("full_feed"), "Full_feed");
    }

    #[test]
    fn caption_bolds_headline_and_title() {
        let caption = release_caption("epic fails");
        assert!(caption.starts_with("<b>New sticker pack released</b>\n"));
        assert!(caption.contains("<b>Epic Fails</b>"));
    }
}
