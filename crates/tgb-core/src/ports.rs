use async_trait::async_trait;

use crate::{
    capture::CommandSender,
    domain::{OnlineUser, SendOutcome, SendRequest, UpdateBatch},
    Result,
};

/// Hexagonal port for the Telegram Bot API.
///
/// Only the two calls the bridge needs. Implementations run on pool workers,
/// never on the control loop.
#[async_trait]
pub trait BotApi: Send + Sync {
    /// Fetch pending updates with id `>= offset`. Only text messages are
    /// returned, but the batch reports the highest id fetched.
    async fn get_updates(&self, offset: i64) -> Result<UpdateBatch>;

    /// Transport failures are `Err`; an API-level refusal is `Ok` with `ok == false`.
    async fn send_message(&self, req: &SendRequest) -> Result<SendOutcome>;
}

/// Hexagonal port for the server process the bridge is attached to.
#[async_trait]
pub trait Host: Send + Sync {
    /// Execute one console command as `sender`. Output the host attributes to the
    /// sender is written through [`CommandSender::send_line`].
    async fn dispatch(&self, sender: &mut dyn CommandSender, command: &str) -> Result<()>;

    /// Pop the most recent line of the host's shared log buffer.
    ///
    /// Used as a fallback when a command wrote through the global logger instead
    /// of its sender.
    fn drain_last_log_line(&self) -> Option<String>;

    fn online_users(&self) -> Vec<OnlineUser>;

    fn ticks_per_second(&self) -> f64;

    /// Server name shown in the daily report header.
    fn motd(&self) -> String;
}
