//! Inbound path: password check, console execution, reply.

use std::sync::Arc;

use tracing::{info, trace, warn};

use crate::{
    capture::LineCaptureSender,
    config::BotConfig,
    delivery::Delivery,
    domain::{InboundMessage, SendOutcome, SendTarget},
    ports::Host,
    promise::Promise,
};

/// An authorized command, password already stripped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCommand {
    pub username: String,
    pub command: String,
    /// Where the command output is sent back.
    pub reply_to: SendTarget,
}

/// Split `"<password> <command...>"` at the first space.
///
/// The command part is returned verbatim. `None` if either part is missing.
pub fn parse_command(text: &str) -> Option<(&str, &str)> {
    let (password, command) = text.split_once(' ')?;
    if password.is_empty() || command.trim().is_empty() {
        return None;
    }
    Some((password, command))
}

#[derive(Clone)]
pub struct CommandDispatcher {
    bot: Arc<BotConfig>,
    host: Arc<dyn Host>,
    delivery: Delivery,
}

impl CommandDispatcher {
    pub fn new(bot: Arc<BotConfig>, host: Arc<dyn Host>, delivery: Delivery) -> Self {
        Self {
            bot,
            host,
            delivery,
        }
    }

    /// Check sender and password. Unknown users, malformed text and wrong
    /// passwords all yield `None` alike.
    pub fn authorize(&self, msg: &InboundMessage) -> Option<PendingCommand> {
        let username = msg.username.as_deref()?;
        let expected = self.bot.password_for(username)?;
        let (password, command) = parse_command(&msg.text)?;

        // Accept the bot-command form `/<password> <command>` too.
        if password != expected && password.strip_prefix('/') != Some(expected) {
            return None;
        }

        Some(PendingCommand {
            username: username.to_string(),
            command: command.to_string(),
            reply_to: SendTarget::Reply {
                chat_id: msg.chat_id,
                message_id: msg.message_id,
            },
        })
    }

    /// Run one inbound message through the host and send the first output line back.
    ///
    /// Rejected messages are dropped without any reply. Returns the send promise,
    /// or `None` when nothing was sent.
    pub async fn dispatch(&self, msg: &InboundMessage) -> Option<Promise<SendOutcome>> {
        let Some(pending) = self.authorize(msg) else {
            trace!(update_id = msg.update_id.0, "dropping unauthorized message");
            return None;
        };

        info!(
            user = %pending.username,
            command = %pending.command,
            "executing remote command"
        );

        let mut sender = LineCaptureSender::new();
        if let Err(e) = self.host.dispatch(&mut sender, &pending.command).await {
            warn!(error = %e, command = %pending.command, "host command failed");
        }

        // Some commands log through the host's global logger instead of the sender.
        let reply = sender
            .line()
            .map(str::to_string)
            .or_else(|| self.host.drain_last_log_line())
            .unwrap_or_default();

        self.delivery.send(reply, pending.reply_to)
    }
}
