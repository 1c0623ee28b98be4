//! # Client Event Handling
//!
//! Each session has exactly one consumer task for its client's events, so events
//! are processed in the order the client produced them. The task only holds a
//! `Weak` reference and stops once the session is gone or the client drops its
//! sender.
//!
//! ## Chat Names:
//! 1. A non-empty name already stored for the chat wins
//! 2. Groups: record display name, record name, group subject from the service,
//!    then `Group <user>`
//! 3. Contacts: address book name, the record's name (push name), the sender,
//!    then the address user part

use std::sync::Weak;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::client::jid::Jid;
use crate::client::media::default_filename;
use crate::client::{
    ClientEvent, ConversationNames, HistorySync, IncomingMessage, MediaAttachment,
};
use crate::session::Session;
use crate::store::{StoredMedia, StoredMessage};
use crate::webhook::WebhookPayload;
use chrono::{DateTime, Utc};

pub(crate) fn spawn_event_loop(session: Weak<Session>, mut events: UnboundedReceiver<ClientEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(session) = session.upgrade() else {
                break;
            };
            handle_event(&session, event).await;
        }
        debug!("Client event loop finished");
    });
}

pub(crate) async fn handle_event(session: &Session, event: ClientEvent) {
    match event {
        ClientEvent::MessageReceived(message) => handle_message(session, message).await,
        ClientEvent::HistorySyncReceived(sync) => handle_history_sync(session, sync).await,
        ClientEvent::Connected => {
            info!(session_id = %session.id(), "Connected to messaging service");
        }
        ClientEvent::LoggedOut => {
            warn!(session_id = %session.id(), "Account was logged out by the service");
            session.mark_logged_out();
        }
    }
}

fn stored_media(attachment: &MediaAttachment, received_at: DateTime<Utc>) -> StoredMedia {
    StoredMedia {
        kind: attachment.kind,
        filename: default_filename(attachment.kind, received_at, attachment.file_name.as_deref()),
        url: attachment.url.clone(),
        media_key: attachment.media_key.clone(),
        file_length: attachment.file_length,
    }
}

pub(crate) async fn resolve_chat_name(
    session: &Session,
    jid: &Jid,
    record: Option<&(dyn ConversationNames + Sync)>,
    sender: &str,
) -> String {
    let chat_jid = jid.to_string();
    match session.messages().chat_name(&chat_jid) {
        Ok(Some(existing)) => return existing,
        Ok(None) => {}
        Err(e) => warn!(session_id = %session.id(), error = %e, "Failed to read stored chat name"),
    }

    if jid.is_group() {
        let from_record =
            record.and_then(|r| r.optional_display_name().or_else(|| r.optional_name()));
        if let Some(name) = from_record {
            return name.to_string();
        }

        match session.client().group_name(jid).await {
            Ok(Some(name)) if !name.is_empty() => return name,
            Ok(_) => {}
            Err(e) => debug!(chat = %chat_jid, error = %e, "Group info lookup failed"),
        }
        return format!("Group {}", jid.user);
    }

    if let Some(name) = session.client().contact_name(jid).await.filter(|n| !n.is_empty()) {
        return name;
    }
    if let Some(name) = record.and_then(|r| r.optional_name()) {
        return name.to_string();
    }
    if !sender.is_empty() {
        return sender.to_string();
    }
    jid.user.clone()
}

async fn handle_message(session: &Session, message: IncomingMessage) {
    if message.chat.is_broadcast() {
        return;
    }

    let chat_jid = message.chat.to_string();
    let name = resolve_chat_name(session, &message.chat, Some(&message), &message.sender).await;
    if let Err(e) = session.messages().store_chat(&chat_jid, &name, message.timestamp) {
        warn!(session_id = %session.id(), chat = %chat_jid, error = %e, "Failed to store chat");
    }

    let content = message.text.clone().unwrap_or_default();
    let record = StoredMessage {
        id: message.id.clone(),
        chat_jid: chat_jid.clone(),
        sender: message.sender.clone(),
        content: content.clone(),
        timestamp: message.timestamp,
        is_from_me: message.is_from_me,
        media: message
            .media
            .as_ref()
            .map(|m| stored_media(m, message.timestamp)),
    };

    match session.messages().store_message(&record) {
        Ok(true) => debug!(
            session_id = %session.id(),
            chat = %chat_jid,
            from_me = message.is_from_me,
            media = ?record.media.as_ref().map(|m| m.kind),
            "Stored message"
        ),
        Ok(false) => return,
        Err(e) => warn!(session_id = %session.id(), error = %e, "Failed to store message"),
    }

    if message.is_from_me || content.is_empty() {
        return;
    }

    if let Some(webhook) = session.webhook() {
        let webhook = webhook.clone();
        let payload = WebhookPayload::incoming_message(
            session.id(),
            &chat_jid,
            &message.sender,
            &content,
            message.timestamp,
        );
        tokio::spawn(async move {
            webhook.notify(&payload).await;
        });
    }
}

async fn handle_history_sync(session: &Session, sync: HistorySync) {
    let own_user = session.own_user().unwrap_or_default();
    let mut stored = 0usize;

    for conversation in &sync.conversations {
        let jid: Jid = match conversation.id.parse() {
            Ok(jid) => jid,
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Skipping conversation");
                continue;
            }
        };

        let Some(latest) = conversation.messages.first().and_then(|m| m.timestamp) else {
            continue;
        };

        let chat_jid = jid.to_string();
        let name = resolve_chat_name(session, &jid, Some(conversation), "").await;
        if let Err(e) = session.messages().store_chat(&chat_jid, &name, latest) {
            warn!(session_id = %session.id(), chat = %chat_jid, error = %e, "Failed to store chat");
            continue;
        }

        for message in &conversation.messages {
            let Some(timestamp) = message.timestamp else {
                continue;
            };

            let sender = if message.from_me {
                own_user.clone()
            } else {
                match message.participant.as_deref() {
                    Some(participant) if !participant.is_empty() => participant.to_string(),
                    _ => jid.user.clone(),
                }
            };

            let record = StoredMessage {
                id: message.id.clone(),
                chat_jid: chat_jid.clone(),
                sender,
                content: message.text.clone().unwrap_or_default(),
                timestamp,
                is_from_me: message.from_me,
                media: message.media.as_ref().map(|m| stored_media(m, timestamp)),
            };

            match session.messages().store_message(&record) {
                Ok(true) => stored += 1,
                Ok(false) => {}
                Err(e) => warn!(session_id = %session.id(), error = %e, "Failed to store history message"),
            }
        }
    }

    info!(
        session_id = %session.id(),
        conversations = sync.conversations.len(),
        stored,
        "History sync complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::media::MediaKind;
    use crate::client::{
        HistoryConversation, HistoryMessage, SimulatedClient, SimulatedClientFactory,
        SimulatedOptions,
    };
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open() -> (TempDir, Arc<Session>, SimulatedClient) {
        let dir = TempDir::new().unwrap();
        let factory = SimulatedClientFactory::new(SimulatedOptions::default());
        let session = Session::open("events", dir.path().join("events"), &factory, None).unwrap();
        let client = factory.client("events").unwrap();
        (dir, session, client)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn incoming(chat: &str, text: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            id: "MSG1".to_string(),
            chat: chat.parse().unwrap(),
            sender: "15550001111".to_string(),
            push_name: Some("Alex".to_string()),
            is_from_me: false,
            timestamp: at(1_700_000_000),
            text: text.map(str::to_string),
            media: None,
        }
    }

    #[tokio::test]
    async fn test_incoming_message_is_stored_with_push_name() {
        let (_dir, session, _client) = open();
        let chat = "15550001111@s.whatsapp.net";
        handle_event(&session, ClientEvent::MessageReceived(incoming(chat, Some("hey")))).await;

        let messages = session.messages().messages(chat, 10).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hey");
        assert_eq!(session.messages().chat_name(chat).unwrap().as_deref(), Some("Alex"));
    }

    #[tokio::test]
    async fn test_contact_name_beats_push_name() {
        let (_dir, session, client) = open();
        let chat: Jid = "15550001111@s.whatsapp.net".parse().unwrap();
        client.add_contact(&chat, "Alex Rivera");
        handle_event(&session, ClientEvent::MessageReceived(incoming(&chat.to_string(), Some("hey")))).await;
        assert_eq!(
            session.messages().chat_name(&chat.to_string()).unwrap().as_deref(),
            Some("Alex Rivera")
        );
    }

    #[tokio::test]
    async fn test_broadcast_and_empty_messages_are_ignored() {
        let (_dir, session, _client) = open();
        handle_event(&session, ClientEvent::MessageReceived(incoming("status@broadcast", Some("story")))).await;
        assert!(session.messages().chats().unwrap().is_empty());

        let chat = "15550001111@s.whatsapp.net";
        handle_event(&session, ClientEvent::MessageReceived(incoming(chat, None))).await;
        assert!(session.messages().messages(chat, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_group_name_fallbacks() {
        let (_dir, session, client) = open();

        let named: Jid = "120363000000000001@g.us".parse().unwrap();
        client.add_group(&named, "Weekend Climbing");
        assert_eq!(resolve_chat_name(&session, &named, None, "").await, "Weekend Climbing");

        let unnamed: Jid = "120363000000000002@g.us".parse().unwrap();
        assert_eq!(
            resolve_chat_name(&session, &unnamed, None, "").await,
            "Group 120363000000000002"
        );

        let conversation = HistoryConversation {
            id: unnamed.to_string(),
            display_name: Some("Book Club".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_chat_name(&session, &unnamed, Some(&conversation), "").await,
            "Book Club"
        );
    }

    #[tokio::test]
    async fn test_history_sync_stores_messages() {
        let (_dir, session, _client) = open();
        let group = "120363000000000003@g.us";

        let sync = HistorySync {
            conversations: vec![
                HistoryConversation {
                    id: group.to_string(),
                    name: Some("Family".to_string()),
                    messages: vec![
                        HistoryMessage {
                            id: "H2".to_string(),
                            participant: Some("15550002222@s.whatsapp.net".to_string()),
                            timestamp: Some(at(200)),
                            text: Some("dinner at 7".to_string()),
                            ..Default::default()
                        },
                        HistoryMessage {
                            id: "H1".to_string(),
                            timestamp: Some(at(100)),
                            media: Some(MediaAttachment {
                                kind: MediaKind::Image,
                                file_name: None,
                                url: "https://mmg.whatsapp.net/v/t62/x.enc".to_string(),
                                media_key: vec![1; 32],
                                file_length: 10,
                            }),
                            ..Default::default()
                        },
                        HistoryMessage {
                            id: "H0".to_string(),
                            timestamp: None,
                            text: Some("no timestamp".to_string()),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                },
                HistoryConversation {
                    id: "not a jid".to_string(),
                    ..Default::default()
                },
                HistoryConversation {
                    id: "15550003333@s.whatsapp.net".to_string(),
                    messages: vec![HistoryMessage {
                        id: "X".to_string(),
                        timestamp: None,
                        text: Some("undated".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
        };

        handle_event(&session, ClientEvent::HistorySyncReceived(sync)).await;

        let chats = session.messages().chats().unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].name, "Family");
        assert_eq!(chats[0].last_message_time, Some(at(200)));

        let messages = session.messages().messages(group, 10).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, "15550002222@s.whatsapp.net");
        assert_eq!(messages[1].sender, "120363000000000003");
        assert_eq!(messages[1].filename.as_deref(), Some("image_19700101_000140.jpg"));
    }

    #[tokio::test]
    async fn test_events_flow_through_the_loop_in_order() {
        let (_dir, session, client) = open();
        let chat = "15550001111@s.whatsapp.net";
        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            let mut message = incoming(chat, Some(text));
            message.id = format!("M{}", i);
            message.timestamp = at(1000 + i as i64);
            client.emit(ClientEvent::MessageReceived(message));
        }

        for _ in 0..200 {
            if session.messages().messages(chat, 10).unwrap().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let contents: Vec<_> = session
            .messages()
            .messages(chat, 10)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, ["three", "two", "one"]);
    }
}
