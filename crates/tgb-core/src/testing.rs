//! In-memory fakes of the ports, shared by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    capture::CommandSender,
    domain::{InboundMessage, OnlineUser, SendOutcome, SendRequest, UpdateBatch, UpdateId},
    errors::Error,
    ports::{BotApi, Host},
    Result,
};

enum Planned {
    Refuse(String),
    Fail(String),
}

/// Page made of text messages only.
pub fn batch_of(messages: Vec<InboundMessage>) -> UpdateBatch {
    UpdateBatch {
        last_update_id: messages.iter().map(|m| m.update_id).max(),
        messages,
    }
}

#[derive(Default)]
pub struct FakeBotApi {
    sent: Mutex<Vec<SendRequest>>,
    planned: Mutex<VecDeque<Planned>>,
    batches: Mutex<VecDeque<Result<UpdateBatch>>>,
    offsets: Mutex<Vec<i64>>,
}

impl FakeBotApi {
    pub fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }

    pub fn refuse_next(&self, description: &str) {
        self.planned
            .lock()
            .unwrap()
            .push_back(Planned::Refuse(description.to_string()));
    }

    pub fn fail_next(&self, reason: &str) {
        self.planned
            .lock()
            .unwrap()
            .push_back(Planned::Fail(reason.to_string()));
    }

    pub fn push_batch(&self, messages: Vec<InboundMessage>) {
        self.batches.lock().unwrap().push_back(Ok(batch_of(messages)));
    }

    /// A page holding only non-text updates up to `last_update_id`.
    pub fn push_skipped(&self, last_update_id: i64) {
        self.batches.lock().unwrap().push_back(Ok(UpdateBatch {
            last_update_id: Some(UpdateId(last_update_id)),
            messages: Vec::new(),
        }));
    }

    pub fn push_poll_error(&self, reason: &str) {
        self.batches
            .lock()
            .unwrap()
            .push_back(Err(Error::External(reason.to_string())));
    }
}

#[async_trait]
impl BotApi for FakeBotApi {
    async fn get_updates(&self, offset: i64) -> Result<UpdateBatch> {
        self.offsets.lock().unwrap().push(offset);
        self.batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(UpdateBatch::default()))
    }

    async fn send_message(&self, req: &SendRequest) -> Result<SendOutcome> {
        let planned = self.planned.lock().unwrap().pop_front();
        match planned {
            Some(Planned::Fail(reason)) => Err(Error::External(reason)),
            Some(Planned::Refuse(description)) => {
                self.sent.lock().unwrap().push(req.clone());
                Ok(SendOutcome::refused(description))
            }
            None => {
                self.sent.lock().unwrap().push(req.clone());
                Ok(SendOutcome::delivered())
            }
        }
    }
}

#[derive(Default)]
pub struct FakeHost {
    commands: Mutex<Vec<(String, String)>>,
    replies: Mutex<HashMap<String, Vec<String>>>,
    log: Mutex<Vec<String>>,
    online: Mutex<Vec<OnlineUser>>,
    tps: Mutex<f64>,
}

impl FakeHost {
    /// Lines written to the sender when `command` runs.
    pub fn reply(&self, command: &str, lines: &[&str]) {
        self.replies.lock().unwrap().insert(
            command.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
    }

    pub fn log_line(&self, line: &str) {
        self.log.lock().unwrap().push(line.to_string());
    }

    pub fn set_online(&self, users: &[(&str, bool)]) {
        *self.online.lock().unwrap() = users
            .iter()
            .map(|(name, played_before)| OnlineUser {
                name: name.to_string(),
                played_before: *played_before,
            })
            .collect();
    }

    pub fn set_tps(&self, tps: f64) {
        *self.tps.lock().unwrap() = tps;
    }

    /// `(sender name, command)` pairs in execution order.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn dispatch(&self, sender: &mut dyn CommandSender, command: &str) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push((sender.name().to_string(), command.to_string()));
        let lines = self
            .replies
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_default();
        for line in lines {
            sender.send_line(&line);
        }
        Ok(())
    }

    fn drain_last_log_line(&self) -> Option<String> {
        self.log.lock().unwrap().pop()
    }

    fn online_users(&self) -> Vec<OnlineUser> {
        self.online.lock().unwrap().clone()
    }

    fn ticks_per_second(&self) -> f64 {
        *self.tps.lock().unwrap()
    }

    fn motd(&self) -> String {
        "Test Server".to_string()
    }
}
