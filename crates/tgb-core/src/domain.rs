/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// Telegram update id. Monotonic per bot; used as the `getUpdates` offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateId(pub i64);

impl UpdateId {
    /// Offset that acknowledges this update and everything before it.
    pub fn next(self) -> i64 {
        self.0 + 1
    }
}

/// One inbound text message taken from a `getUpdates` batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub update_id: UpdateId,
    pub message_id: MessageId,
    pub chat_id: ChatId,
    /// Telegram usernames are optional; messages without one can never authorize.
    pub username: Option<String>,
    pub text: String,
}

/// One `getUpdates` page.
///
/// `last_update_id` covers every update fetched, including the ones that carried
/// no text, so the offset moves past them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateBatch {
    pub last_update_id: Option<UpdateId>,
    pub messages: Vec<InboundMessage>,
}

impl UpdateBatch {
    pub fn is_empty(&self) -> bool {
        self.last_update_id.is_none() && self.messages.is_empty()
    }
}

/// Where an outgoing message goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendTarget {
    /// Fresh message to a chat.
    Chat(ChatId),
    /// Threaded reply to a message in a chat.
    Reply { chat_id: ChatId, message_id: MessageId },
}

impl SendTarget {
    pub fn chat_id(&self) -> ChatId {
        match self {
            SendTarget::Chat(chat_id) => *chat_id,
            SendTarget::Reply { chat_id, .. } => *chat_id,
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, SendTarget::Reply { .. })
    }
}

/// Payload handed to the send job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendRequest {
    pub target: SendTarget,
    pub text: String,
}

/// Structured `sendMessage` result, mirroring the Bot API `{ok, description}` envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendOutcome {
    pub ok: bool,
    pub description: String,
}

impl SendOutcome {
    pub fn delivered() -> Self {
        Self {
            ok: true,
            description: String::new(),
        }
    }

    pub fn refused(description: impl Into<String>) -> Self {
        Self {
            ok: false,
            description: description.into(),
        }
    }
}

/// A user currently connected to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnlineUser {
    pub name: String,
    pub played_before: bool,
}
