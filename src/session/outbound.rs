//! Sending messages and fetching attachments through a session's client.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::audio;
use crate::client::jid::Jid;
use crate::client::media::{classify, direct_path_from_url, MediaKind};
use crate::client::{MediaReference, OutgoingAttachment, OutgoingMessage, VoiceNote};
use crate::error::BridgeError;
use crate::session::events::resolve_chat_name;
use crate::session::Session;
use crate::store::{StoredMedia, StoredMessage};

/// Duration announced for audio that is not Ogg/Opus and cannot be analyzed.
const UNANALYZED_AUDIO_SECS: u32 = 30;

pub const MEDIA_DIR: &str = "media";

#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub recipient: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadedMedia {
    pub message_id: String,
    pub media_type: MediaKind,
    pub filename: String,
    pub path: PathBuf,
}

/// A bare phone number or a full address.
pub fn parse_recipient(recipient: &str) -> Result<Jid, BridgeError> {
    let recipient = recipient.trim();
    if recipient.is_empty() {
        return Err(BridgeError::InvalidInput("recipient is required".to_string()));
    }
    if recipient.contains('@') {
        recipient.parse()
    } else {
        Ok(Jid::personal(recipient))
    }
}

impl Session {
    /// Send text, or a file with the text as caption.
    ///
    /// `.ogg` files go out as voice notes with duration and waveform; if the file
    /// cannot be analyzed nothing is sent.
    ///
    /// ## Errors:
    /// - `NotConnected` when the transport is down
    /// - `InvalidInput` for a bad recipient, an unreadable file or an empty message
    /// - `AudioFormat` for an `.ogg` file that is not an Ogg container
    pub async fn send(
        &self,
        recipient: &str,
        text: &str,
        media_path: Option<&Path>,
    ) -> Result<SendReceipt, BridgeError> {
        if !self.client().is_connected() {
            return Err(BridgeError::NotConnected);
        }

        let to = parse_recipient(recipient)?;
        let attachment = match media_path {
            Some(path) => Some(self.prepare_attachment(path).await?),
            None => None,
        };

        if text.is_empty() && attachment.is_none() {
            return Err(BridgeError::InvalidInput(
                "message or media_path is required".to_string(),
            ));
        }

        let stored_media = attachment.as_ref().map(|a| StoredMedia {
            kind: a.kind,
            filename: a.file_name.clone(),
            url: a.upload.url.clone(),
            media_key: a.upload.media_key.clone(),
            file_length: a.upload.file_length,
        });

        let message_id = self
            .client()
            .send_message(
                &to,
                OutgoingMessage {
                    text: text.to_string(),
                    attachment,
                },
            )
            .await?;
        info!(session_id = %self.id(), recipient = %to, message_id = %message_id, "Message sent");

        self.record_sent(&to, &message_id, text, stored_media).await;

        Ok(SendReceipt {
            message_id,
            recipient: to.to_string(),
        })
    }

    async fn prepare_attachment(&self, path: &Path) -> Result<OutgoingAttachment, BridgeError> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            BridgeError::InvalidInput(format!("read media file {}: {}", path.display(), e))
        })?;

        let format = classify(path);
        let voice = if format.is_ogg() {
            let analysis = audio::analyze(&data)?;
            Some(VoiceNote {
                seconds: analysis.duration_seconds,
                waveform: analysis.waveform.to_vec(),
            })
        } else if format.kind == MediaKind::Audio {
            debug!(mime = format.mime_type, "Audio is not Ogg/Opus, sending without waveform");
            Some(VoiceNote {
                seconds: UNANALYZED_AUDIO_SECS,
                waveform: Vec::new(),
            })
        } else {
            None
        };

        let upload = self.client().upload(data, format.kind).await?;
        debug!(session_id = %self.id(), kind = format.kind.as_str(), bytes = upload.file_length, "Media uploaded");

        Ok(OutgoingAttachment {
            kind: format.kind,
            mime_type: format.mime_type.to_string(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            upload,
            voice,
        })
    }

    /// History entry for a message we sent. Failures only affect history.
    async fn record_sent(&self, to: &Jid, message_id: &str, text: &str, media: Option<StoredMedia>) {
        let chat_jid = to.to_string();
        let now = Utc::now();

        let name = resolve_chat_name(self, to, None, "").await;
        if let Err(e) = self.messages().store_chat(&chat_jid, &name, now) {
            debug!(session_id = %self.id(), error = %e, "Failed to record chat for sent message");
            return;
        }

        let record = StoredMessage {
            id: message_id.to_string(),
            chat_jid,
            sender: "me".to_string(),
            content: text.to_string(),
            timestamp: now,
            is_from_me: true,
            media,
        };
        if let Err(e) = self.messages().store_message(&record) {
            debug!(session_id = %self.id(), error = %e, "Failed to record sent message");
        }
    }

    /// Fetch a message's attachment into `<session>/media/<chat>/`.
    ///
    /// A file already on disk is returned without contacting the service.
    ///
    /// ## Errors:
    /// - `NotFound` for an unknown message
    /// - `InvalidInput` for a text-only message or incomplete media metadata
    /// - `Storage` when the file cannot be written
    pub async fn download_media(
        &self,
        message_id: &str,
        chat_jid: &str,
    ) -> Result<DownloadedMedia, BridgeError> {
        let media = self
            .messages()
            .media_info(message_id, chat_jid)?
            .ok_or_else(|| BridgeError::InvalidInput("not a media message".to_string()))?;

        let chat_dir = self
            .dir()
            .join(MEDIA_DIR)
            .join(chat_jid.replace([':', '/', '\\'], "_"));
        tokio::fs::create_dir_all(&chat_dir)
            .await
            .map_err(|e| BridgeError::storage(&format!("create {}", chat_dir.display()), e))?;

        let filename = Path::new(&media.filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| message_id.to_string());
        let local = chat_dir.join(&filename);

        if tokio::fs::metadata(&local).await.is_ok_and(|m| m.is_file()) {
            debug!(session_id = %self.id(), path = %local.display(), "Media already downloaded");
            return Ok(self.downloaded(message_id, media.kind, filename, local));
        }

        if !media.is_downloadable() {
            return Err(BridgeError::InvalidInput(
                "incomplete media information for download".to_string(),
            ));
        }

        let reference = MediaReference {
            kind: media.kind,
            direct_path: direct_path_from_url(&media.url),
            url: media.url,
            media_key: media.media_key,
            file_length: media.file_length,
        };
        let data = self.client().download(&reference).await?;

        tokio::fs::write(&local, &data)
            .await
            .map_err(|e| BridgeError::storage(&format!("write {}", local.display()), e))?;
        info!(
            session_id = %self.id(),
            kind = reference.kind.as_str(),
            bytes = data.len(),
            path = %local.display(),
            "Media downloaded"
        );

        Ok(self.downloaded(message_id, reference.kind, filename, local))
    }

    fn downloaded(&self, message_id: &str, kind: MediaKind, filename: String, path: PathBuf) -> DownloadedMedia {
        DownloadedMedia {
            message_id: message_id.to_string(),
            media_type: kind,
            filename,
            path: path.canonicalize().unwrap_or(path),
        }
    }
}
