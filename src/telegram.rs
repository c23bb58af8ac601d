use anyhow::{anyhow, Context, Result};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Thin Telegram Bot API client. Owns nothing global: token, owner and HTTP
/// client are injected at construction.
#[derive(Clone)]
pub struct TelegramApi {
    http: reqwest::Client,
    base: String,
    owner_user_id: i64,
}

/// The acting bot identity, resolved once per run via `getMe`. The username
/// builds the mandatory `_by_<bot>` suffix on every pack short name.
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub username: String,
}

/// Tagged outcome of a create-set call, so the collision branch is
/// exhaustive instead of string-sniffing at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateSetOutcome {
    Created,
    /// The remote rejected the short name as already occupied.
    NameOccupied,
    /// Any other rejection, with the remote's description.
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl TelegramApi {
    pub fn new(http: reqwest::Client, bot_token: &str, owner_user_id: i64) -> Self {
        Self {
            http,
            base: format!("https://api.telegram.org/bot{bot_token}"),
            owner_user_id,
        }
    }

    pub async fn get_me(&self) -> Result<BotIdentity> {
        let resp: ApiEnvelope<BotIdentity> = self
            .http
            .post(format!("{}/getMe", self.base))
            .send()
            .await
            .context("calling getMe")?
            .json()
            .await
            .context("decoding getMe response")?;
        if !resp.ok {
            return Err(anyhow!(
                "getMe rejected: {}",
                resp.description.unwrap_or_else(|| "unknown".into())
            ));
        }
        resp.result.context("getMe returned no identity")
    }

    /// Attempt to create a static sticker set under `name`.
    pub async fn create_sticker_set(&self, name: &str, title: &str) -> Result<CreateSetOutcome> {
        let body = json!({
            "user_id": self.owner_user_id,
            "name": name,
            "title": title,
            "sticker_format": "static",
        });
        let resp: ApiEnvelope<serde_json::Value> = self
            .http
            .post(format!("{}/createNewStickerSet", self.base))
            .json(&body)
            .send()
            .await
            .context("calling createNewStickerSet")?
            .json()
            .await
            .context("decoding createNewStickerSet response")?;

        if resp.ok {
            return Ok(CreateSetOutcome::Created);
        }
        let description = resp.description.unwrap_or_default();
        debug!(name, %description, "create sticker set rejected");
        Ok(classify_create_failure(&description))
    }

    /// Append one PNG sticker to an existing set. Errors here are isolated
    /// per item by the caller.
    pub async fn add_sticker(&self, set_name: &str, png: Vec<u8>, emoji: &str) -> Result<()> {
        let sticker = json!({
            "sticker": "attach://sticker_file",
            "format": "static",
            "emoji_list": [emoji],
        });
        let form = Form::new()
            .text("user_id", self.owner_user_id.to_string())
            .text("name", set_name.to_string())
            .text("sticker", sticker.to_string())
            .part(
                "sticker_file",
                Part::bytes(png)
                    .file_name("sticker.png")
                    .mime_str("image/png")?,
            );
        let resp: ApiEnvelope<serde_json::Value> = self
            .http
            .post(format!("{}/addStickerToSet", self.base))
            .multipart(form)
            .send()
            .await
            .context("calling addStickerToSet")?
            .json()
            .await
            .context("decoding addStickerToSet response")?;
        if !resp.ok {
            return Err(anyhow!(
                "addStickerToSet rejected: {}",
                resp.description.unwrap_or_else(|| "unknown".into())
            ));
        }
        Ok(())
    }

    /// Post the announcement to a channel: an MP4 animation with caption and
    /// inline button, or a plain message when no animation is given.
    pub async fn send_channel_post(
        &self,
        chat_id: &str,
        caption: &str,
        button_text: &str,
        button_url: &str,
        animation: Option<Vec<u8>>,
    ) -> Result<()> {
        let keyboard = json!({
            "inline_keyboard": [[{ "text": button_text, "url": button_url }]]
        });

        let resp: ApiEnvelope<serde_json::Value> = match animation {
            Some(mp4) => {
                let form = Form::new()
                    .text("chat_id", chat_id.to_string())
                    .text("parse_mode", "HTML")
                    .text("disable_notification", "true")
                    .text("caption", caption.to_string())
                    .text("reply_markup", keyboard.to_string())
                    .text("animation", "attach://animation")
                    .part(
                        "animation",
                        Part::bytes(mp4)
                            .file_name("preview.mp4")
                            .mime_str("video/mp4")?,
                    );
                self.http
                    .post(format!("{}/sendAnimation", self.base))
                    .multipart(form)
                    .send()
                    .await
                    .context("calling sendAnimation")?
                    .json()
                    .await
                    .context("decoding sendAnimation response")?
            }
            None => {
                let body = json!({
                    "chat_id": chat_id,
                    "parse_mode": "HTML",
                    "disable_notification": true,
                    "text": caption,
                    "reply_markup": keyboard,
                });
                self.http
                    .post(format!("{}/sendMessage", self.base))
                    .json(&body)
                    .send()
                    .await
                    .context("calling sendMessage")?
                    .json()
                    .await
                    .context("decoding sendMessage response")?
            }
        };

        if !resp.ok {
            return Err(anyhow!(
                "channel post rejected: {}",
                resp.description.unwrap_or_else(|| "unknown".into())
            ));
        }
        Ok(())
    }
}

/// Collision vs other-failure split. The remote reports occupation under a
/// couple of historical spellings.
fn classify_create_failure(description: &str) -> CreateSetOutcome {
    let lower = description.to_ascii_lowercase();
    if description.contains("SHORTNAME_OCCUPIED")
        || lower.contains("name is already occupied")
        || description.contains("STICKERSET_INVALID")
    {
        CreateSetOutcome::NameOccupied
    } else {
        CreateSetOutcome::Failed(description.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_occupied_spellings() {
        assert_eq!(
            classify_create_failure("Bad Request: SHORTNAME_OCCUPIED"),
            CreateSetOutcome::NameOccupied
        );
        assert_eq!(
            classify_create_failure("Bad Request: sticker set name is already occupied"),
            CreateSetOutcome::NameOccupied
        );
        assert_eq!(
            classify_create_failure("Bad Request: STICKERSET_INVALID"),
            CreateSetOutcome::NameOccupied
        );
    }

    #[test]
    fn classifies_other_failures() {
        assert_eq!(
            classify_create_failure("Bad Request: user not found"),
            CreateSetOutcome::Failed("Bad Request: user not found".into())
        );
    }
}
