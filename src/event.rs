//! The narrow inbound-event contract the engine consumes.
//!
//! The chat protocol adapter owns event parsing; the engine only needs the
//! ids and message kind captured here.

use serde::{Deserialize, Serialize};

/// Whether a message event arrived in a group or a private conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Group,
    Private,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Group => "group",
            MessageKind::Private => "private",
        }
    }
}

/// An inbound event as seen by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Id of the bot account that received the event.
    pub bot_id: String,
    /// Id of the originating user, when the event has one.
    pub user_id: Option<String>,
    /// Id of the originating group, for group events.
    pub group_id: Option<String>,
    /// Message kind, `None` for non-message events (notices, requests).
    pub message_kind: Option<MessageKind>,
    /// The platform's own standing for the sender (e.g. "admin", "owner"),
    /// used to seed role checks when no explicit assignment exists.
    pub sender_role: Option<String>,
}

impl Event {
    /// A message received in a group conversation.
    pub fn group_message(
        bot_id: impl Into<String>,
        user_id: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            bot_id: bot_id.into(),
            user_id: Some(user_id.into()),
            group_id: Some(group_id.into()),
            message_kind: Some(MessageKind::Group),
            sender_role: None,
        }
    }

    /// A message received in a private conversation.
    pub fn private_message(bot_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            user_id: Some(user_id.into()),
            group_id: None,
            message_kind: Some(MessageKind::Private),
            sender_role: None,
        }
    }

    /// A non-message event (notice, request) with no sender.
    pub fn notice(bot_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            user_id: None,
            group_id: None,
            message_kind: None,
            sender_role: None,
        }
    }

    /// Attach the platform-reported sender standing.
    pub fn with_sender_role(mut self, role: impl Into<String>) -> Self {
        self.sender_role = Some(role.into());
        self
    }
}
