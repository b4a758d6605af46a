use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use teleshare_core::{Error, InboundFile, InboundFileKind, Result};
use tokio::io::AsyncWriteExt;

/// Slack on top of the long-poll timeout before the HTTP request gives up.
const POLL_GRACE: Duration = Duration::from_secs(10);

pub struct BotApi {
    api_base: String,
    bot_token: String,
    client: reqwest::Client,
}

impl BotApi {
    pub fn new(api_base: &str, bot_token: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn get_updates(&self, offset: Option<i64>, timeout_secs: u32) -> Result<Vec<Update>> {
        #[derive(Serialize)]
        struct Params {
            #[serde(skip_serializing_if = "Option::is_none")]
            offset: Option<i64>,
            timeout: u32,
            allowed_updates: [&'static str; 1],
        }
        self.call(
            "getUpdates",
            &Params {
                offset,
                timeout: timeout_secs,
                allowed_updates: ["message"],
            },
            Some(Duration::from_secs(u64::from(timeout_secs)) + POLL_GRACE),
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<Message> {
        #[derive(Serialize)]
        struct ReplyParameters {
            message_id: i64,
            allow_sending_without_reply: bool,
        }
        #[derive(Serialize)]
        struct Params<'a> {
            chat_id: i64,
            text: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            reply_parameters: Option<ReplyParameters>,
        }
        self.call(
            "sendMessage",
            &Params {
                chat_id,
                text,
                reply_parameters: reply_to.map(|message_id| ReplyParameters {
                    message_id,
                    allow_sending_without_reply: true,
                }),
            },
            None,
        )
        .await
    }

    pub async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Params<'a> {
            chat_id: i64,
            message_id: i64,
            text: &'a str,
        }
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &Params {
                    chat_id,
                    message_id,
                    text,
                },
                None,
            )
            .await?;
        Ok(())
    }

    /// Streams the file behind `file_id` into `dest`; returns the byte count.
    pub async fn download(&self, file_id: &str, dest: &mut tokio::fs::File) -> Result<u64> {
        #[derive(Serialize)]
        struct Params<'a> {
            file_id: &'a str,
        }
        let file: TelegramFile = self.call("getFile", &Params { file_id }, None).await?;
        let file_path = file.file_path.ok_or_else(|| Error::Telegram {
            message: "getFile missing result.file_path".to_string(),
        })?;

        let url = format!("{}/file/bot{}/{}", self.api_base, self.bot_token, file_path);
        let mut res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Telegram {
                message: format!("file download failed: {}", e.without_url()),
            })?;
        let status = res.status();
        if !status.is_success() {
            return Err(Error::Telegram {
                message: format!("file download http {status}"),
            });
        }

        let mut written = 0u64;
        while let Some(chunk) = res.chunk().await.map_err(|e| Error::Telegram {
            message: format!("file download read failed: {}", e.without_url()),
        })? {
            dest.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        dest.flush().await?;
        Ok(written)
    }

    async fn call<P: Serialize, T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let url = format!("{}/bot{}/{}", self.api_base, self.bot_token, method);
        let mut req = self.client.post(url).json(params);
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }

        let res = req.send().await.map_err(|e| Error::Telegram {
            message: format!("{method} request failed: {}", e.without_url()),
        })?;
        let status = res.status();
        let body = res.text().await.map_err(|e| Error::Telegram {
            message: format!("{method} read response failed: {}", e.without_url()),
        })?;

        let parsed: TelegramResponse<T> =
            serde_json::from_str(&body).map_err(|e| Error::Telegram {
                message: format!("{method} invalid json (http {status}): {e}"),
            })?;
        if !parsed.ok {
            return Err(Error::Telegram {
                message: format!(
                    "{method}: {}",
                    parsed
                        .description
                        .unwrap_or_else(|| format!("telegram returned ok=false (http {status})"))
                ),
            });
        }
        parsed.result.ok_or_else(|| Error::Telegram {
            message: format!("{method} missing result"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// The fields every downloadable attachment shares.
#[derive(Debug, Deserialize)]
pub struct Media {
    pub file_id: String,
    pub file_unique_id: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Sticker {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub is_animated: bool,
    #[serde(default)]
    pub is_video: bool,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub document: Option<Media>,
    /// Sizes of one photo, smallest first.
    #[serde(default)]
    pub photo: Vec<Media>,
    pub video: Option<Media>,
    pub audio: Option<Media>,
    pub voice: Option<Media>,
    pub sticker: Option<Sticker>,
    pub animation: Option<Media>,
    pub video_note: Option<Media>,
    pub forward_origin: Option<serde_json::Value>,
    pub forward_date: Option<i64>,
}

impl Message {
    pub fn is_forwarded(&self) -> bool {
        self.forward_origin.is_some() || self.forward_date.is_some()
    }

    /// The first attachment, checked in the order document, photo (largest
    /// size), video, audio, voice, sticker, animation, video note. Only one
    /// file is backed up per message; Telegram delivers each album item as
    /// its own message.
    pub fn inbound_file(&self) -> Option<InboundFile> {
        let media = |kind: InboundFileKind, m: &Media| {
            InboundFile::new(kind, &m.file_id, &m.file_unique_id, m.file_name.as_deref())
        };

        if let Some(m) = &self.document {
            return Some(media(InboundFileKind::Document, m));
        }
        if let Some(m) = self.photo.last() {
            return Some(media(InboundFileKind::Photo, m));
        }
        if let Some(m) = &self.video {
            return Some(media(InboundFileKind::Video, m));
        }
        if let Some(m) = &self.audio {
            return Some(media(InboundFileKind::Audio, m));
        }
        if let Some(m) = &self.voice {
            return Some(media(InboundFileKind::Voice, m));
        }
        if let Some(s) = &self.sticker {
            let kind = InboundFileKind::Sticker {
                animated: s.is_animated,
                video: s.is_video,
            };
            return Some(InboundFile::new(kind, &s.file_id, &s.file_unique_id, None));
        }
        if let Some(m) = &self.animation {
            return Some(media(InboundFileKind::Animation, m));
        }
        self.video_note
            .as_ref()
            .map(|m| media(InboundFileKind::VideoNote, m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(json: serde_json::Value) -> Message {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn largest_photo_size_is_chosen() {
        let m = message(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 5},
            "photo": [
                {"file_id": "small", "file_unique_id": "s", "width": 90, "height": 90},
                {"file_id": "large", "file_unique_id": "L", "width": 1280, "height": 960}
            ]
        }));
        let file = m.inbound_file().unwrap();
        assert_eq!(file.kind, InboundFileKind::Photo);
        assert_eq!(file.file_id, "large");
        assert_eq!(file.suggested_name, "photo_L.jpg");
    }

    #[test]
    fn document_wins_over_animation() {
        let m = message(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 5},
            "document": {"file_id": "d", "file_unique_id": "D", "file_name": "cat.gif.mp4"},
            "animation": {"file_id": "a", "file_unique_id": "A"}
        }));
        let file = m.inbound_file().unwrap();
        assert_eq!(file.kind, InboundFileKind::Document);
        assert_eq!(file.suggested_name, "cat.gif.mp4");
    }

    #[test]
    fn video_sticker_keeps_its_container_extension() {
        let m = message(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 5},
            "sticker": {"file_id": "s", "file_unique_id": "S", "is_animated": false, "is_video": true}
        }));
        assert_eq!(m.inbound_file().unwrap().suggested_name, "sticker_S.webm");
    }

    #[test]
    fn forwarded_text_has_no_file() {
        let m = message(serde_json::json!({
            "message_id": 1,
            "chat": {"id": 5},
            "text": "hello",
            "forward_origin": {"type": "hidden_user", "sender_user_name": "x", "date": 1}
        }));
        assert!(m.is_forwarded());
        assert!(m.inbound_file().is_none());
    }

    #[test]
    fn failed_call_reports_the_description() {
        let parsed: TelegramResponse<Message> = serde_json::from_str(
            r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#,
        )
        .unwrap();
        assert!(!parsed.ok);
        assert!(parsed.result.is_none());
        assert_eq!(parsed.description.as_deref(), Some("Unauthorized"));
    }
}
