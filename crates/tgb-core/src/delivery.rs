//! Outbound path: pre-send observers, then a background send job.

use std::sync::Arc;

use tracing::debug;

use crate::{
    domain::{SendOutcome, SendRequest, SendTarget},
    pool::AsyncPool,
    ports::BotApi,
    promise::Promise,
};

/// Message about to be sent. Observers may rewrite both fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub target: SendTarget,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookDecision {
    Continue,
    /// Drop the message; later observers are skipped and nothing is submitted.
    Veto,
}

/// Synchronous hook run on the control loop before a send job is submitted.
pub trait SendObserver: Send + Sync {
    fn before_send(&self, msg: &mut OutgoingMessage) -> HookDecision;
}

#[derive(Clone)]
pub struct Delivery {
    api: Arc<dyn BotApi>,
    pool: AsyncPool,
    observers: Vec<Arc<dyn SendObserver>>,
}

impl Delivery {
    pub fn new(api: Arc<dyn BotApi>, pool: AsyncPool) -> Self {
        Self {
            api,
            pool,
            observers: Vec::new(),
        }
    }

    /// Observers run in registration order.
    pub fn with_observer(mut self, observer: Arc<dyn SendObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Send `text` to `target`.
    ///
    /// Returns `None` when an observer vetoed the message. Never fails
    /// synchronously: delivery errors only show up through the returned promise
    /// (and the debug log).
    pub fn send(&self, text: impl Into<String>, target: SendTarget) -> Option<Promise<SendOutcome>> {
        let mut msg = OutgoingMessage {
            text: text.into(),
            target,
        };
        for observer in &self.observers {
            if observer.before_send(&mut msg) == HookDecision::Veto {
                debug!(chat_id = msg.target.chat_id().0, "send vetoed by observer");
                return None;
            }
        }

        let req = SendRequest {
            target: msg.target,
            text: msg.text,
        };
        let api = self.api.clone();
        let promise = self
            .pool
            .submit(async move { api.send_message(&req).await.map_err(|e| e.to_string()) });

        promise
            .on_success(|outcome: &SendOutcome| {
                if outcome.ok {
                    debug!("succeeded to send message");
                } else {
                    debug!(description = %outcome.description, "failed to send message");
                }
            })
            .on_failure(|reason| debug!(error = reason, "failed to send message"));

        Some(promise)
    }
}
