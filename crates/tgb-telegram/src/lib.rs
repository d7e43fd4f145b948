//! Telegram adapter (teloxide).
//!
//! This crate implements the `tgb-core` BotApi port over the Telegram Bot API.

use async_trait::async_trait;

use teloxide::{
    payloads::{GetUpdatesSetters, SendMessageSetters},
    prelude::*,
    types::{Message, Update, UpdateKind},
    RequestError,
};

use tokio::time::sleep;
use tracing::trace;

use tgb_core::{
    domain::{
        ChatId, InboundMessage, MessageId, SendOutcome, SendRequest, SendTarget, UpdateBatch,
        UpdateId,
    },
    errors::Error,
    ports::BotApi,
    Result,
};

#[derive(Clone)]
pub struct TelegramBotApi {
    bot: Bot,
}

impl TelegramBotApi {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    /// `@username` of the bot, for the startup log.
    pub async fn username(&self) -> Result<String> {
        let me = self.with_retry(|| self.bot.get_me()).await?;
        Ok(me.username().to_string())
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    /// Retry once on flood control. Only used for reads; sends are not retried.
    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

/// Text messages only. Other updates are ignored here and acknowledged through
/// [`UpdateBatch::last_update_id`].
fn inbound_from(update_id: i32, msg: &Message) -> Option<InboundMessage> {
    let text = msg.text()?;
    Some(InboundMessage {
        update_id: UpdateId(i64::from(update_id)),
        message_id: MessageId(msg.id.0),
        chat_id: ChatId(msg.chat.id.0),
        username: msg.from().and_then(|u| u.username.clone()),
        text: text.to_string(),
    })
}

/// Keep the text messages of a page, but report the highest id of all of it.
fn batch_from(updates: &[Update]) -> UpdateBatch {
    let mut messages = Vec::with_capacity(updates.len());
    for update in updates {
        match &update.kind {
            UpdateKind::Message(msg) => match inbound_from(update.id, msg) {
                Some(m) => messages.push(m),
                None => trace!(update_id = update.id, "skipping non-text message"),
            },
            _ => trace!(update_id = update.id, "skipping non-message update"),
        }
    }

    UpdateBatch {
        last_update_id: updates
            .iter()
            .map(|u| UpdateId(i64::from(u.id)))
            .max(),
        messages,
    }
}

/// API-level refusals become `ok == false`; everything else is a transport failure.
fn outcome_from(res: std::result::Result<Message, RequestError>) -> Result<SendOutcome> {
    match res {
        Ok(_) => Ok(SendOutcome::delivered()),
        Err(RequestError::Api(api)) => Ok(SendOutcome::refused(api.to_string())),
        Err(RequestError::MigrateToChatId(id)) => Ok(SendOutcome::refused(format!(
            "group migrated to supergroup {id}"
        ))),
        Err(other) => Err(TelegramBotApi::map_err(other)),
    }
}

#[async_trait]
impl BotApi for TelegramBotApi {
    async fn get_updates(&self, offset: i64) -> Result<UpdateBatch> {
        // Update ids fit in i32 on the Bot API; clamp rather than wrap.
        let offset = i32::try_from(offset).unwrap_or(i32::MAX);
        let updates = self
            .with_retry(|| self.bot.get_updates().offset(offset).timeout(0))
            .await?;
        Ok(batch_from(&updates))
    }

    async fn send_message(&self, req: &SendRequest) -> Result<SendOutcome> {
        let chat = Self::tg_chat(req.target.chat_id());
        let res = match req.target {
            SendTarget::Chat(_) => self.bot.send_message(chat, req.text.clone()).await,
            SendTarget::Reply { message_id, .. } => {
                self.bot
                    .send_message(chat, req.text.clone())
                    .reply_to_message_id(Self::tg_msg_id(message_id))
                    .await
            }
        };
        outcome_from(res)
    }
}
